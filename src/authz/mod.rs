//! Authorization: deciding whether an identified request may proceed.
//!
//! Authorizers return [`Decision::Allow`], [`Decision::Deny`] or
//! [`Decision::NoOpinion`]. The [`UnionAuthorizer`] asks its members in order
//! and stops at the first definite answer; callers treat a final
//! `NoOpinion` as forbidden.

pub mod path;
pub mod rbac;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::{authn::Identity, error::AuthorizationError, request::RequestAttributes};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
    NoOpinion,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Verdict {
    pub decision: Decision,
    pub reason: String,
}

impl Verdict {
    pub fn allow(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Allow,
            reason: reason.into(),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Deny,
            reason: reason.into(),
        }
    }

    pub fn no_opinion(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::NoOpinion,
            reason: reason.into(),
        }
    }
}

/// Who is asking to do what. `user` is `None` when authentication found no
/// identity and anonymous access is disabled.
#[derive(Clone, Copy, Debug)]
pub struct Attributes<'a> {
    pub user: Option<&'a Identity>,
    pub request: &'a RequestAttributes,
}

#[async_trait]
pub trait Authorizer: Send + Sync {
    /// An `Err` is an implicit `NoOpinion`.
    async fn authorize(&self, attributes: &Attributes<'_>) -> Result<Verdict, AuthorizationError>;
}

pub struct UnionAuthorizer {
    members: Vec<Arc<dyn Authorizer>>,
}

impl UnionAuthorizer {
    #[must_use]
    pub fn new(members: Vec<Arc<dyn Authorizer>>) -> Self {
        Self { members }
    }
}

#[async_trait]
impl Authorizer for UnionAuthorizer {
    async fn authorize(&self, attributes: &Attributes<'_>) -> Result<Verdict, AuthorizationError> {
        let mut reasons = Vec::new();
        let mut errors = Vec::new();

        for member in &self.members {
            match member.authorize(attributes).await {
                Ok(verdict) if verdict.decision == Decision::NoOpinion => {
                    if !verdict.reason.is_empty() {
                        reasons.push(verdict.reason);
                    }
                }
                Ok(verdict) => return Ok(verdict),
                Err(err) => {
                    debug!("authorizer failed: {err}");
                    errors.push(err);
                }
            }
        }

        if errors.is_empty() {
            Ok(Verdict::no_opinion(reasons.join("\n")))
        } else {
            Err(AuthorizationError::Aggregate(errors))
        }
    }
}
