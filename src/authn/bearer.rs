//! Bearer token authentication.

use async_trait::async_trait;
use axum::http::{header::AUTHORIZATION, HeaderMap};
use std::sync::Arc;

use super::{AuthRequest, CredentialVerifier, Identity, GROUP_AUTHENTICATED};
use crate::{
    error::AuthenticationError,
    store::{AccountState, AccountStore},
    token::{TokenKind, TokenManager},
};

/// Token from an `Authorization: Bearer` header.
#[must_use]
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    let (scheme, token) = headers.get(AUTHORIZATION)?.to_str().ok()?.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

pub struct BearerVerifier {
    tokens: Arc<TokenManager>,
    accounts: Arc<dyn AccountStore>,
}

impl BearerVerifier {
    #[must_use]
    pub fn new(tokens: Arc<TokenManager>, accounts: Arc<dyn AccountStore>) -> Self {
        Self { tokens, accounts }
    }
}

#[async_trait]
impl CredentialVerifier for BearerVerifier {
    fn name(&self) -> &'static str {
        "bearer"
    }

    async fn verify(
        &self,
        request: &AuthRequest<'_>,
    ) -> Result<Option<Identity>, AuthenticationError> {
        let Some(token) = extract_bearer_token(request.headers) else {
            return Ok(None);
        };

        let (claims, kind) = self.tokens.verify(token).await?;
        if kind == TokenKind::Refresh {
            return Err(AuthenticationError::TokenInvalid(
                "refresh tokens cannot authenticate requests".to_string(),
            ));
        }

        // tokens outlive accounts; re-read so deleted users lose access
        let account = self.accounts.get(&claims.name).await?.ok_or_else(|| {
            AuthenticationError::TokenInvalid(format!("user {:?} not found", claims.name))
        })?;
        if account.state == AccountState::Disabled {
            return Err(AuthenticationError::AccountNotActive);
        }

        Ok(Some(Identity {
            name: account.name,
            groups: account.groups.into_iter().collect(),
            extra: claims.extra,
        }
        .with_groups([GROUP_AUTHENTICATED])))
    }
}
