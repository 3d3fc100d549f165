//! Account lock state machine and the reconciler that drives it.
//!
//! ```text
//!            failures >= max within window
//!   Active ------------------------------> AuthLimitExceeded
//!     ^                                          |
//!     +------ last transition + cooldown < now --+
//!
//!   Disabled: set externally, never left automatically
//! ```
//!
//! The authentication path only reads `Account::state`; this module is the
//! only writer besides operators.

use chrono::{DateTime, Utc};
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::password::{hash_password, is_encrypted};
use crate::{
    config::{window_start, LockoutPolicy},
    error::StoreError,
    store::{Account, AccountState, AccountStore, LoginHistory},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    pub state: AccountState,
    pub reason: Option<String>,
}

/// Next lock state for `account`, or `None` if it stays where it is.
///
/// `recent_failures` counts failed logins inside the policy window.
#[must_use]
pub fn next_state(
    account: &Account,
    recent_failures: usize,
    policy: &LockoutPolicy,
    now: DateTime<Utc>,
) -> Option<Transition> {
    match account.state {
        AccountState::Disabled => None,
        AccountState::AuthLimitExceeded => {
            let cooled_down = account.last_transition_time.map_or(true, |at| {
                (now - at)
                    .to_std()
                    .is_ok_and(|elapsed| elapsed > policy.cooldown)
            });
            cooled_down.then_some(Transition {
                state: AccountState::Active,
                reason: None,
            })
        }
        AccountState::Active => (recent_failures >= policy.max_failures).then(|| Transition {
            state: AccountState::AuthLimitExceeded,
            reason: Some(format!(
                "Failed login attempts exceed {} in last {}min",
                policy.max_failures,
                policy.window.as_secs() / 60
            )),
        }),
    }
}

pub struct AccountReconciler {
    accounts: Arc<dyn AccountStore>,
    history: Arc<dyn LoginHistory>,
    policy: LockoutPolicy,
    retention: Duration,
}

impl AccountReconciler {
    #[must_use]
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        history: Arc<dyn LoginHistory>,
        policy: LockoutPolicy,
        retention: Duration,
    ) -> Self {
        Self {
            accounts,
            history,
            policy,
            retention,
        }
    }

    /// Bring one account up to date and persist it if anything changed.
    ///
    /// # Errors
    /// Returns an error if the login history or account store fail.
    pub async fn reconcile(
        &self,
        mut account: Account,
        now: DateTime<Utc>,
    ) -> Result<Account, StoreError> {
        let mut changed = false;

        if let Some(plain) = account
            .encrypted_password
            .clone()
            .filter(|secret| !secret.is_empty() && !is_encrypted(secret))
        {
            let hashed = tokio::task::spawn_blocking(move || hash_password(&plain))
                .await
                .map_err(|err| StoreError::Unavailable(format!("hashing task failed: {err}")))?
                .map_err(|err| StoreError::InvalidRecord(format!("cannot hash password: {err}")))?;
            account.encrypted_password = Some(hashed);
            changed = true;
        }

        if account.state == AccountState::Active {
            let failures = self.recent_failures(&account, now).await?;
            if let Some(transition) = next_state(&account, failures, &self.policy, now) {
                info!(
                    account = %account.name,
                    failures,
                    "Locking account: {}",
                    transition.reason.as_deref().unwrap_or_default()
                );
                apply(&mut account, transition, now);
                changed = true;
            }
        } else if let Some(transition) = next_state(&account, 0, &self.policy, now) {
            info!(account = %account.name, "Unlocking account after cooldown");
            apply(&mut account, transition, now);
            changed = true;
        }

        if changed {
            account = self.accounts.update(account).await?;
        }
        Ok(account)
    }

    /// Failed logins since the window start or the last transition, whichever
    /// is later, so an unlocked account is not relocked by old failures.
    async fn recent_failures(
        &self,
        account: &Account,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let mut since = window_start(now, self.policy.window);
        if let Some(at) = account.last_transition_time {
            since = since.max(at);
        }

        let mut usernames = vec![account.name.clone()];
        usernames.extend(account.email.iter().cloned());
        self.history.count_failures_since(&usernames, since).await
    }

    /// Reconcile every account, then prune expired login history.
    ///
    /// # Errors
    /// Returns an error if accounts cannot be listed or history cannot be
    /// pruned. Per-account failures are logged and skipped.
    pub async fn reconcile_all(&self, now: DateTime<Utc>) -> Result<(), StoreError> {
        for account in self.accounts.list().await? {
            let name = account.name.clone();
            if let Err(err) = self.reconcile(account, now).await {
                error!(account = %name, "Failed to reconcile account: {err}");
            }
        }

        let pruned = self
            .history
            .prune_before(window_start(now, self.retention))
            .await?;
        if pruned > 0 {
            debug!(pruned, "Pruned login history");
        }
        Ok(())
    }

    /// Run [`Self::reconcile_all`] every `interval` until the task is aborted.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(err) = self.reconcile_all(Utc::now()).await {
                    error!("Account reconciliation failed: {err}");
                }
            }
        })
    }
}

fn apply(account: &mut Account, transition: Transition, now: DateTime<Utc>) {
    account.state = transition.state;
    account.reason = transition.reason;
    account.last_transition_time = Some(now);
}
