//! Login history recording.

use chrono::Utc;
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use crate::{
    error::AuthenticationError,
    store::{LoginEvent, LoginEventSink, LoginMethod},
};

pub const REASON_SUCCESS: &str = "authenticated successfully";

/// Who tried to log in, how, and from where.
#[derive(Clone, Copy, Debug)]
pub struct LoginAttempt<'a> {
    pub username: &'a str,
    pub method: LoginMethod,
    pub provider: &'a str,
    pub source_ip: Option<&'a str>,
    pub user_agent: Option<&'a str>,
}

pub struct LoginRecorder {
    sink: Arc<dyn LoginEventSink>,
}

impl LoginRecorder {
    #[must_use]
    pub fn new(sink: Arc<dyn LoginEventSink>) -> Self {
        Self { sink }
    }

    /// Append one event. Failures are logged and swallowed so recording never
    /// changes the outcome reported to the caller.
    pub async fn record(
        &self,
        attempt: &LoginAttempt<'_>,
        outcome: Result<(), &AuthenticationError>,
    ) {
        let event = LoginEvent {
            id: Uuid::now_v7(),
            username: attempt.username.to_string(),
            method: attempt.method,
            provider: attempt.provider.to_string(),
            source_ip: attempt.source_ip.map(ToString::to_string),
            user_agent: attempt.user_agent.map(ToString::to_string),
            success: outcome.is_ok(),
            reason: outcome.map_or_else(ToString::to_string, |()| REASON_SUCCESS.to_string()),
            created_at: Utc::now(),
        };

        if let Err(err) = self.sink.append(event).await {
            error!(
                username = attempt.username,
                method = attempt.method.as_str(),
                "Failed to record login: {err}"
            );
        }
    }
}
