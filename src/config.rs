//! Authentication configuration.
//!
//! Built once at startup and handed to the components that need it.

use chrono::{DateTime, TimeDelta, Utc};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_MAXIMUM_CLOCK_SKEW: Duration = Duration::from_secs(10);
const DEFAULT_ACCESS_TOKEN_MAX_AGE: Duration = Duration::from_secs(2 * 60 * 60);
const DEFAULT_ACCESS_TOKEN_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);
const DEFAULT_LOGIN_HISTORY_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);
const DEFAULT_MAX_FAILURES: usize = 10;
const DEFAULT_FAILURE_WINDOW: Duration = Duration::from_secs(10 * 60);
const DEFAULT_COOLDOWN: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("jwt secret is empty")]
    EmptyJwtSecret,
    #[error("auth max failures must be greater than zero")]
    ZeroMaxFailures,
}

/// Brute-force lockout thresholds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockoutPolicy {
    /// Failed logins inside `window` that lock the account.
    pub max_failures: usize,
    pub window: Duration,
    /// Time a locked account waits, from its last transition, before unlocking.
    pub cooldown: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_failures: DEFAULT_MAX_FAILURES,
            window: DEFAULT_FAILURE_WINDOW,
            cooldown: DEFAULT_COOLDOWN,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AuthenticationOptions {
    jwt_secret: SecretString,
    maximum_clock_skew: Duration,
    access_token_max_age: Duration,
    access_token_inactivity_timeout: Duration,
    login_history_retention_period: Duration,
    lockout: LockoutPolicy,
    multiple_login: bool,
    anonymous: bool,
}

impl AuthenticationOptions {
    #[must_use]
    pub fn new(jwt_secret: SecretString) -> Self {
        Self {
            jwt_secret,
            maximum_clock_skew: DEFAULT_MAXIMUM_CLOCK_SKEW,
            access_token_max_age: DEFAULT_ACCESS_TOKEN_MAX_AGE,
            access_token_inactivity_timeout: DEFAULT_ACCESS_TOKEN_INACTIVITY_TIMEOUT,
            login_history_retention_period: DEFAULT_LOGIN_HISTORY_RETENTION,
            lockout: LockoutPolicy::default(),
            multiple_login: true,
            anonymous: true,
        }
    }

    /// Check the options before any component is built from them.
    ///
    /// # Errors
    /// Returns an error for an empty JWT secret or a zero failure threshold.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.expose_secret().is_empty() {
            return Err(ConfigError::EmptyJwtSecret);
        }
        if self.lockout.max_failures == 0 {
            return Err(ConfigError::ZeroMaxFailures);
        }
        Ok(())
    }

    #[must_use]
    pub fn with_maximum_clock_skew(mut self, skew: Duration) -> Self {
        self.maximum_clock_skew = skew;
        self
    }

    /// Zero disables expiry and server-side revocation tracking.
    #[must_use]
    pub fn with_access_token_max_age(mut self, max_age: Duration) -> Self {
        self.access_token_max_age = max_age;
        self
    }

    #[must_use]
    pub fn with_access_token_inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.access_token_inactivity_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_login_history_retention_period(mut self, period: Duration) -> Self {
        self.login_history_retention_period = period;
        self
    }

    #[must_use]
    pub fn with_lockout(mut self, lockout: LockoutPolicy) -> Self {
        self.lockout = lockout;
        self
    }

    #[must_use]
    pub fn with_multiple_login(mut self, enabled: bool) -> Self {
        self.multiple_login = enabled;
        self
    }

    #[must_use]
    pub fn with_anonymous(mut self, enabled: bool) -> Self {
        self.anonymous = enabled;
        self
    }

    #[must_use]
    pub fn jwt_secret(&self) -> &SecretString {
        &self.jwt_secret
    }

    #[must_use]
    pub fn maximum_clock_skew(&self) -> Duration {
        self.maximum_clock_skew
    }

    #[must_use]
    pub fn access_token_max_age(&self) -> Duration {
        self.access_token_max_age
    }

    #[must_use]
    pub fn access_token_inactivity_timeout(&self) -> Duration {
        self.access_token_inactivity_timeout
    }

    #[must_use]
    pub fn login_history_retention_period(&self) -> Duration {
        self.login_history_retention_period
    }

    #[must_use]
    pub fn lockout(&self) -> LockoutPolicy {
        self.lockout
    }

    #[must_use]
    pub fn multiple_login(&self) -> bool {
        self.multiple_login
    }

    #[must_use]
    pub fn anonymous(&self) -> bool {
        self.anonymous
    }
}

/// `now - window`, saturating at the earliest representable instant.
pub(crate) fn window_start(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(window)
        .ok()
        .and_then(|delta| now.checked_sub_signed(delta))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
