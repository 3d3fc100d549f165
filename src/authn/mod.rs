//! Authentication: resolving who is behind a request.
//!
//! Each [`CredentialVerifier`] knows one way of proving identity. The
//! [`AuthenticationChain`] asks them in order:
//!
//! 1. [`basic::BasicVerifier`] (`Authorization: Basic`, password accounts)
//! 2. [`bearer::BearerVerifier`] (`Authorization: Bearer`, issued tokens)
//! 3. [`anonymous::AnonymousVerifier`] (only when enabled)
//!
//! The first verifier that recognises the credentials decides. Errors from one
//! verifier do not stop the others unless they are terminal, but they do keep
//! the anonymous fallback from hiding a failed login.

pub mod anonymous;
pub mod basic;
pub mod bearer;
pub mod lockout;
pub mod password;
pub mod recorder;

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};
use tracing::debug;

use crate::{error::AuthenticationError, request::RequestAttributes};

pub const USER_ANONYMOUS: &str = "system:anonymous";
pub const GROUP_AUTHENTICATED: &str = "system:authenticated";
pub const GROUP_UNAUTHENTICATED: &str = "system:unauthenticated";

/// `Identity::extra` key carrying the resolved global role.
pub const EXTRA_GLOBAL_ROLE: &str = "globalrole";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    #[serde(default)]
    pub groups: BTreeSet<String>,
    #[serde(default)]
    pub extra: BTreeMap<String, Vec<String>>,
}

impl Identity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups.extend(groups.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, values: Vec<String>) -> Self {
        self.extra.insert(key.into(), values);
        self
    }

    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.name == USER_ANONYMOUS
    }

    #[must_use]
    pub fn global_role(&self) -> Option<&str> {
        self.extra
            .get(EXTRA_GLOBAL_ROLE)
            .and_then(|roles| roles.first())
            .map(String::as_str)
    }
}

/// What a verifier gets to look at.
#[derive(Clone, Copy, Debug)]
pub struct AuthRequest<'a> {
    pub headers: &'a HeaderMap,
    pub source_ip: Option<&'a str>,
    pub user_agent: Option<&'a str>,
}

impl<'a> AuthRequest<'a> {
    #[must_use]
    pub fn new(headers: &'a HeaderMap, attributes: &'a RequestAttributes) -> Self {
        Self {
            headers,
            source_ip: attributes.source_ip.as_deref(),
            user_agent: attributes.user_agent.as_deref(),
        }
    }
}

#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    fn name(&self) -> &'static str;

    /// A fallback only applies when no earlier verifier failed.
    fn is_fallback(&self) -> bool {
        false
    }

    /// `Ok(None)` means the request does not carry this kind of credential.
    async fn verify(&self, request: &AuthRequest<'_>)
        -> Result<Option<Identity>, AuthenticationError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Authentication {
    Authenticated(Identity),
    Unauthenticated,
}

#[derive(Clone, Default)]
pub struct AuthenticationChain {
    verifiers: Vec<Arc<dyn CredentialVerifier>>,
}

impl AuthenticationChain {
    #[must_use]
    pub fn new(verifiers: Vec<Arc<dyn CredentialVerifier>>) -> Self {
        Self { verifiers }
    }

    /// Run the verifiers in order.
    ///
    /// # Errors
    /// Returns the first terminal error immediately, otherwise the first error
    /// seen when no verifier matched.
    pub async fn authenticate(
        &self,
        request: &AuthRequest<'_>,
    ) -> Result<Authentication, AuthenticationError> {
        let mut failure: Option<AuthenticationError> = None;

        for verifier in &self.verifiers {
            if verifier.is_fallback() && failure.is_some() {
                continue;
            }

            match verifier.verify(request).await {
                Ok(Some(identity)) => {
                    debug!(verifier = verifier.name(), user = %identity.name, "authenticated");
                    return Ok(Authentication::Authenticated(identity));
                }
                Ok(None) => {}
                Err(err) if err.is_terminal() => return Err(err),
                Err(err) => {
                    debug!(verifier = verifier.name(), "authentication failed: {err}");
                    failure.get_or_insert(err);
                }
            }
        }

        failure.map_or(Ok(Authentication::Unauthenticated), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    enum Outcome {
        Match(&'static str),
        Skip,
        Fail,
        Malformed,
    }

    struct Fixed(Outcome, bool);

    #[async_trait]
    impl CredentialVerifier for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn is_fallback(&self) -> bool {
            self.1
        }

        async fn verify(
            &self,
            _request: &AuthRequest<'_>,
        ) -> Result<Option<Identity>, AuthenticationError> {
            match self.0 {
                Outcome::Match(name) => Ok(Some(Identity::new(name))),
                Outcome::Skip => Ok(None),
                Outcome::Fail => Err(AuthenticationError::IncorrectCredential),
                Outcome::Malformed => Err(AuthenticationError::MalformedCredential(
                    "bad".to_string(),
                )),
            }
        }
    }

    fn chain(members: Vec<Fixed>) -> AuthenticationChain {
        AuthenticationChain::new(
            members
                .into_iter()
                .map(|m| Arc::new(m) as Arc<dyn CredentialVerifier>)
                .collect(),
        )
    }

    async fn run(chain: &AuthenticationChain) -> Result<Authentication, AuthenticationError> {
        let headers = HeaderMap::new();
        let request = AuthRequest {
            headers: &headers,
            source_ip: None,
            user_agent: None,
        };
        chain.authenticate(&request).await
    }

    #[tokio::test]
    async fn first_match_wins() {
        let chain = chain(vec![
            Fixed(Outcome::Skip, false),
            Fixed(Outcome::Match("alice"), false),
            Fixed(Outcome::Match("bob"), false),
        ]);
        assert_eq!(
            run(&chain).await.unwrap(),
            Authentication::Authenticated(Identity::new("alice"))
        );
    }

    #[tokio::test]
    async fn nothing_matched_is_unauthenticated() {
        let chain = chain(vec![Fixed(Outcome::Skip, false)]);
        assert_eq!(run(&chain).await.unwrap(), Authentication::Unauthenticated);
        assert_eq!(
            run(&AuthenticationChain::default()).await.unwrap(),
            Authentication::Unauthenticated
        );
    }

    #[tokio::test]
    async fn errors_do_not_stop_later_verifiers() {
        let chain = chain(vec![
            Fixed(Outcome::Fail, false),
            Fixed(Outcome::Match("alice"), false),
        ]);
        assert!(matches!(
            run(&chain).await,
            Ok(Authentication::Authenticated(_))
        ));
    }

    #[tokio::test]
    async fn terminal_errors_stop_the_chain() {
        let chain = chain(vec![
            Fixed(Outcome::Malformed, false),
            Fixed(Outcome::Match("alice"), false),
        ]);
        assert!(matches!(
            run(&chain).await,
            Err(AuthenticationError::MalformedCredential(_))
        ));
    }

    #[tokio::test]
    async fn fallback_does_not_mask_failures() {
        let chain = chain(vec![
            Fixed(Outcome::Fail, false),
            Fixed(Outcome::Match(USER_ANONYMOUS), true),
        ]);
        assert!(matches!(
            run(&chain).await,
            Err(AuthenticationError::IncorrectCredential)
        ));

        let chain = chain_with_fallback_only();
        assert!(matches!(
            run(&chain).await,
            Ok(Authentication::Authenticated(identity)) if identity.is_anonymous()
        ));
    }

    fn chain_with_fallback_only() -> AuthenticationChain {
        chain(vec![
            Fixed(Outcome::Skip, false),
            Fixed(Outcome::Match(USER_ANONYMOUS), true),
        ])
    }

    #[test]
    fn global_role_hint() {
        let identity = Identity::new("alice")
            .with_extra(EXTRA_GLOBAL_ROLE, vec!["platform-admin".to_string()]);
        assert_eq!(identity.global_role(), Some("platform-admin"));
        assert_eq!(Identity::new("bob").global_role(), None);
    }
}
