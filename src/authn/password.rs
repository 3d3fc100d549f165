//! Username/password authentication against the account store.
//!
//! The authenticator only reads: recording the attempt and locking accounts are
//! left to the caller ([`super::recorder`]) and the reconciler
//! ([`super::lockout`]).

use argon2::{
    password_hash::{rand_core::OsRng, SaltString},
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use std::sync::{Arc, OnceLock};
use tracing::{debug, error, warn};

use super::{Identity, EXTRA_GLOBAL_ROLE, GROUP_AUTHENTICATED};
use crate::{
    error::{AuthenticationError, StoreError},
    store::{Account, AccountState, AccountStore, BindingScope, RoleBindingStore},
};

/// Global roles probed for the role hint, strongest first.
pub const GLOBAL_ROLE_HINTS: [&str; 3] = [
    "platform-admin",
    "platform-self-provisioner",
    "platform-regular",
];

/// Provider reported for accounts stored locally.
pub const LOCAL_PROVIDER: &str = "";

/// Basic email format check.
pub(crate) fn valid_email(email: &str) -> bool {
    static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL
        .get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok())
        .as_ref()
        .is_some_and(|regex| regex.is_match(email))
}

/// Hash a password into an argon2 PHC string.
///
/// # Errors
/// Returns an error if hashing fails.
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string())
}

/// Whether `value` is already a PHC hash rather than a plaintext secret.
#[must_use]
pub fn is_encrypted(value: &str) -> bool {
    PasswordHash::new(value).is_ok()
}

fn verify_hash(hash: &str, password: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(err) => {
            error!("Stored password is not a valid PHC string: {err}");
            false
        }
    }
}

// Compared against when no account matches so unknown users cost the same.
fn dummy_hash() -> Option<&'static str> {
    static DUMMY: OnceLock<Option<String>> = OnceLock::new();
    DUMMY
        .get_or_init(|| hash_password("warden-dummy-password").ok())
        .as_deref()
}

async fn verify_blocking(hash: String, password: SecretString) -> Result<bool, AuthenticationError> {
    tokio::task::spawn_blocking(move || verify_hash(&hash, password.expose_secret()))
        .await
        .map_err(|err| {
            AuthenticationError::Upstream(StoreError::Unavailable(format!(
                "password verification task failed: {err}"
            )))
        })
}

pub struct PasswordAuthenticator {
    accounts: Arc<dyn AccountStore>,
    bindings: Arc<dyn RoleBindingStore>,
}

impl PasswordAuthenticator {
    #[must_use]
    pub fn new(accounts: Arc<dyn AccountStore>, bindings: Arc<dyn RoleBindingStore>) -> Self {
        Self { accounts, bindings }
    }

    /// Check a username (or email) and password.
    ///
    /// Returns the identity and the provider that vouched for it.
    ///
    /// # Errors
    /// * `IncorrectCredential` for empty input, unknown users, accounts without a
    ///   local password and wrong passwords alike.
    /// * `AccountNotActive` for disabled accounts.
    /// * `RateLimitExceeded` for locked accounts, before the password is checked.
    /// * `Upstream` when the account store fails.
    pub async fn authenticate(
        &self,
        username: &str,
        password: &SecretString,
    ) -> Result<(Identity, String), AuthenticationError> {
        if username.is_empty() || password.expose_secret().is_empty() {
            return Err(AuthenticationError::IncorrectCredential);
        }

        let Some(account) = self.find_account(username).await? else {
            debug!(username, "no such account");
            if let Some(hash) = dummy_hash() {
                let _ = verify_blocking(hash.to_string(), password.clone()).await;
            }
            return Err(AuthenticationError::IncorrectCredential);
        };

        match account.state {
            AccountState::Active => {}
            AccountState::AuthLimitExceeded => return Err(AuthenticationError::RateLimitExceeded),
            AccountState::Disabled => return Err(AuthenticationError::AccountNotActive),
        }

        let Some(hash) = account
            .encrypted_password
            .clone()
            .filter(|hash| !hash.is_empty())
        else {
            return Err(AuthenticationError::IncorrectCredential);
        };

        if !verify_blocking(hash, password.clone()).await? {
            return Err(AuthenticationError::IncorrectCredential);
        }

        let mut identity = Identity::new(&account.name)
            .with_groups(account.groups.iter().cloned())
            .with_groups([GROUP_AUTHENTICATED]);

        if let Some(role) = self.global_role_hint(&account.name).await {
            identity = identity.with_extra(EXTRA_GLOBAL_ROLE, vec![role.to_string()]);
        }

        Ok((identity, LOCAL_PROVIDER.to_string()))
    }

    async fn find_account(&self, username: &str) -> Result<Option<Account>, StoreError> {
        if let Some(account) = self.accounts.get(username).await? {
            return Ok(Some(account));
        }

        if !valid_email(username) {
            return Ok(None);
        }

        // linear scan, account stores are small
        Ok(self.accounts.list().await?.into_iter().find(|account| {
            account
                .email
                .as_deref()
                .is_some_and(|email| email.eq_ignore_ascii_case(username))
        }))
    }

    async fn global_role_hint(&self, name: &str) -> Option<&'static str> {
        for role in GLOBAL_ROLE_HINTS {
            let binding = format!("{name}-{role}");
            match self.bindings.get_binding(&BindingScope::Global, &binding).await {
                Ok(Some(_)) => return Some(role),
                Ok(None) => {}
                Err(err) => warn!(user = name, binding = %binding, "global role lookup failed: {err}"),
            }
        }
        None
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use argon2::{password_hash::SaltString, Algorithm, Argon2, Params, PasswordHasher, Version};

    /// Cheap hash so tests don't spend seconds in argon2.
    pub(crate) fn quick_hash(password: &str) -> String {
        let params = Params::new(8, 1, 1, None).expect("valid params");
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let salt = SaltString::encode_b64(b"warden-test-salt").expect("valid salt");
        argon2
            .hash_password(password.as_bytes(), &salt)
            .expect("hash")
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::quick_hash;
    use super::*;
    use crate::store::{
        memory::{MemoryAccountStore, MemoryRoleBindingStore},
        RoleBinding, Subject,
    };
    use chrono::Utc;

    async fn fixture() -> (PasswordAuthenticator, Arc<MemoryAccountStore>) {
        let accounts = Arc::new(MemoryAccountStore::new());
        accounts
            .insert(
                Account::new("alice")
                    .with_email("alice@example.com")
                    .with_encrypted_password(quick_hash("correct horse"))
                    .with_groups(["dev"]),
            )
            .await;
        let bindings = Arc::new(MemoryRoleBindingStore::new());
        bindings
            .add_binding(RoleBinding {
                name: "alice-platform-self-provisioner".to_string(),
                scope: BindingScope::Global,
                subjects: vec![Subject::user("alice")],
                role_ref: "platform-self-provisioner".to_string(),
            })
            .await;
        (
            PasswordAuthenticator::new(accounts.clone(), bindings),
            accounts,
        )
    }

    fn secret(value: &str) -> SecretString {
        SecretString::from(value)
    }

    #[tokio::test]
    async fn correct_password() {
        let (authenticator, _) = fixture().await;
        let (identity, provider) = authenticator
            .authenticate("alice", &secret("correct horse"))
            .await
            .unwrap();
        assert_eq!(identity.name, "alice");
        assert!(identity.groups.contains("dev"));
        assert!(identity.groups.contains(GROUP_AUTHENTICATED));
        assert_eq!(identity.global_role(), Some("platform-self-provisioner"));
        assert_eq!(provider, LOCAL_PROVIDER);
    }

    #[tokio::test]
    async fn email_lookup() {
        let (authenticator, _) = fixture().await;
        let (identity, _) = authenticator
            .authenticate("Alice@Example.com", &secret("correct horse"))
            .await
            .unwrap();
        assert_eq!(identity.name, "alice");
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_user_look_the_same() {
        let (authenticator, _) = fixture().await;
        let wrong = authenticator
            .authenticate("alice", &secret("battery staple"))
            .await
            .unwrap_err();
        let unknown = authenticator
            .authenticate("mallory", &secret("battery staple"))
            .await
            .unwrap_err();
        assert_eq!(wrong.to_string(), unknown.to_string());
        assert!(matches!(wrong, AuthenticationError::IncorrectCredential));
    }

    #[tokio::test]
    async fn empty_input() {
        let (authenticator, _) = fixture().await;
        for (user, pass) in [("", "x"), ("alice", "")] {
            assert!(matches!(
                authenticator.authenticate(user, &secret(pass)).await,
                Err(AuthenticationError::IncorrectCredential)
            ));
        }
    }

    #[tokio::test]
    async fn locked_account_rejects_correct_password() {
        let (authenticator, accounts) = fixture().await;
        let account = accounts.get("alice").await.unwrap().unwrap();
        accounts
            .update(account.with_state(AccountState::AuthLimitExceeded, Utc::now()))
            .await
            .unwrap();

        assert!(matches!(
            authenticator
                .authenticate("alice", &secret("correct horse"))
                .await,
            Err(AuthenticationError::RateLimitExceeded)
        ));
    }

    #[tokio::test]
    async fn disabled_account() {
        let (authenticator, accounts) = fixture().await;
        let account = accounts.get("alice").await.unwrap().unwrap();
        accounts
            .update(account.with_state(AccountState::Disabled, Utc::now()))
            .await
            .unwrap();

        assert!(matches!(
            authenticator
                .authenticate("alice", &secret("correct horse"))
                .await,
            Err(AuthenticationError::AccountNotActive)
        ));
    }

    #[tokio::test]
    async fn account_without_password() {
        let (authenticator, accounts) = fixture().await;
        accounts.insert(Account::new("sso-only")).await;
        assert!(matches!(
            authenticator.authenticate("sso-only", &secret("anything")).await,
            Err(AuthenticationError::IncorrectCredential)
        ));
    }

    #[tokio::test]
    async fn plaintext_secret_never_matches() {
        let (authenticator, accounts) = fixture().await;
        accounts
            .insert(Account::new("legacy").with_encrypted_password("hunter2"))
            .await;
        assert!(matches!(
            authenticator.authenticate("legacy", &secret("hunter2")).await,
            Err(AuthenticationError::IncorrectCredential)
        ));
    }

    #[test]
    fn email_format() {
        assert!(valid_email("alice@example.com"));
        assert!(!valid_email("alice"));
        assert!(!valid_email("alice@localhost"));
    }

    #[test]
    fn encrypted_detection() {
        assert!(is_encrypted(&quick_hash("x")));
        assert!(!is_encrypted("plaintext"));
    }
}
