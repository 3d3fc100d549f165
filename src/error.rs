//! Error taxonomy shared by the authentication and authorization pipeline.
//!
//! Credential failures are deliberately coarse: the HTTP layer only ever sees
//! these variants, so a caller cannot tell a missing account from a wrong
//! password.

use thiserror::Error;

/// Failure talking to an external store or cache.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("invalid record: {0}")]
    InvalidRecord(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum AuthenticationError {
    #[error("incorrect password")]
    IncorrectCredential,
    #[error("account is not active")]
    AccountNotActive,
    #[error("auth rate limit exceeded")]
    RateLimitExceeded,
    #[error("invalid token: {0}")]
    TokenInvalid(String),
    #[error("token not found in cache")]
    TokenRevoked,
    #[error("malformed credential: {0}")]
    MalformedCredential(String),
    #[error(transparent)]
    Upstream(#[from] StoreError),
}

impl AuthenticationError {
    /// Terminal errors stop the authentication chain immediately.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::MalformedCredential(_))
    }
}

#[derive(Debug, Error)]
pub enum AuthorizationError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{}", join(.0))]
    Aggregate(Vec<AuthorizationError>),
}

fn join(errors: &[AuthorizationError]) -> String {
    match errors {
        [single] => single.to_string(),
        _ => format!(
            "[{}]",
            errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}
