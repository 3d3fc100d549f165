use async_trait::async_trait;

use super::{AuthRequest, CredentialVerifier, Identity, GROUP_UNAUTHENTICATED, USER_ANONYMOUS};
use crate::error::AuthenticationError;

/// Vouches for every request as `system:anonymous`.
#[derive(Clone, Copy, Debug, Default)]
pub struct AnonymousVerifier;

#[async_trait]
impl CredentialVerifier for AnonymousVerifier {
    fn name(&self) -> &'static str {
        "anonymous"
    }

    fn is_fallback(&self) -> bool {
        true
    }

    async fn verify(
        &self,
        _request: &AuthRequest<'_>,
    ) -> Result<Option<Identity>, AuthenticationError> {
        Ok(Some(
            Identity::new(USER_ANONYMOUS).with_groups([GROUP_UNAUTHENTICATED]),
        ))
    }
}
