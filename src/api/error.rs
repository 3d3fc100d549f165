use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::{debug, error};

use crate::{error::AuthenticationError, pipeline::PipelineError};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Authentication(#[from] AuthenticationError),
    #[error("{0}")]
    BadRequest(String),
}

impl ApiError {
    /// Status code and the message shown to the client.
    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message.clone()),
            Self::Authentication(err) => authentication_status(err),
            Self::Pipeline(err) => match err {
                PipelineError::Authentication(err) => authentication_status(err),
                PipelineError::Unauthenticated => {
                    (StatusCode::UNAUTHORIZED, "unauthorized".to_string())
                }
                PipelineError::Forbidden(reason) => (StatusCode::FORBIDDEN, reason.clone()),
                PipelineError::Classify(err) => {
                    error!("Failed to classify request: {err}");
                    internal()
                }
                PipelineError::Authorization(err) => {
                    error!("Authorization failed: {err}");
                    internal()
                }
            },
        }
    }
}

/// Credential failures only ever expose their category; the detail stays in
/// the server log so clients cannot tell which check failed.
fn authentication_status(err: &AuthenticationError) -> (StatusCode, String) {
    let message = match err {
        AuthenticationError::Upstream(source) => {
            error!("Authentication backend failed: {source}");
            return internal();
        }
        AuthenticationError::RateLimitExceeded => {
            return (
                StatusCode::TOO_MANY_REQUESTS,
                "auth rate limit exceeded".to_string(),
            )
        }
        AuthenticationError::IncorrectCredential => "incorrect username or password",
        AuthenticationError::AccountNotActive => "account is not active",
        AuthenticationError::TokenInvalid(_) => "invalid token",
        AuthenticationError::TokenRevoked => "token revoked",
        AuthenticationError::MalformedCredential(_) => "malformed credential",
    };
    debug!("Authentication failed: {err}");
    (StatusCode::UNAUTHORIZED, message.to_string())
}

fn internal() -> (StatusCode, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal server error".to_string(),
    )
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.status_and_message().into_response()
    }
}
