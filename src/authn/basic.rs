//! HTTP Basic authentication backed by [`PasswordAuthenticator`].

use async_trait::async_trait;
use axum::http::{header::AUTHORIZATION, HeaderMap};
use base64ct::{Base64, Encoding};
use secrecy::SecretString;
use std::sync::Arc;

use super::{
    password::PasswordAuthenticator,
    recorder::{LoginAttempt, LoginRecorder},
    AuthRequest, CredentialVerifier, Identity,
};
use crate::{error::AuthenticationError, store::LoginMethod};

/// Username and password from an `Authorization: Basic` header.
pub struct BasicCredential {
    pub username: String,
    pub password: SecretString,
}

/// `Ok(None)` when the header is absent or uses another scheme.
///
/// # Errors
/// Returns `MalformedCredential` when the payload is not base64 `user:pass`.
pub fn extract_basic_credential(
    headers: &HeaderMap,
) -> Result<Option<BasicCredential>, AuthenticationError> {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| AuthenticationError::MalformedCredential("non-ascii header".to_string()))?;

    let Some((scheme, payload)) = value.split_once(' ') else {
        return Ok(None);
    };
    if !scheme.eq_ignore_ascii_case("basic") {
        return Ok(None);
    }

    let decoded = Base64::decode_vec(payload.trim())
        .map_err(|_| AuthenticationError::MalformedCredential("invalid base64".to_string()))?;
    let decoded = String::from_utf8(decoded)
        .map_err(|_| AuthenticationError::MalformedCredential("invalid utf-8".to_string()))?;
    let (username, password) = decoded.split_once(':').ok_or_else(|| {
        AuthenticationError::MalformedCredential("missing ':' separator".to_string())
    })?;

    Ok(Some(BasicCredential {
        username: username.to_string(),
        password: SecretString::from(password),
    }))
}

pub struct BasicVerifier {
    authenticator: Arc<PasswordAuthenticator>,
    recorder: Arc<LoginRecorder>,
}

impl BasicVerifier {
    #[must_use]
    pub fn new(authenticator: Arc<PasswordAuthenticator>, recorder: Arc<LoginRecorder>) -> Self {
        Self {
            authenticator,
            recorder,
        }
    }
}

#[async_trait]
impl CredentialVerifier for BasicVerifier {
    fn name(&self) -> &'static str {
        "basic"
    }

    async fn verify(
        &self,
        request: &AuthRequest<'_>,
    ) -> Result<Option<Identity>, AuthenticationError> {
        let Some(credential) = extract_basic_credential(request.headers)? else {
            return Ok(None);
        };

        let result = self
            .authenticator
            .authenticate(&credential.username, &credential.password)
            .await;

        let provider = result
            .as_ref()
            .map(|(_, provider)| provider.clone())
            .unwrap_or_default();
        let attempt = LoginAttempt {
            username: &credential.username,
            method: LoginMethod::Password,
            provider: &provider,
            source_ip: request.source_ip,
            user_agent: request.user_agent,
        };

        match result {
            Ok((identity, _)) => {
                self.recorder.record(&attempt, Ok(())).await;
                Ok(Some(identity))
            }
            Err(err) => {
                // locked and disabled accounts are not counted again
                if matches!(err, AuthenticationError::IncorrectCredential) {
                    self.recorder.record(&attempt, Err(&err)).await;
                }
                Err(err)
            }
        }
    }
}
