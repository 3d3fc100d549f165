//! The per-request admission pipeline: classify, authenticate, authorize.
//!
//! Everything a handler needs afterwards travels in the returned
//! [`RequestContext`]; nothing is stashed in task-local or global state.

use axum::http::{header::USER_AGENT, HeaderMap, Method, Uri};
use std::{net::SocketAddr, sync::Arc};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::{
    authn::{AuthRequest, Authentication, AuthenticationChain, Identity},
    authz::{Attributes, Authorizer, Decision},
    error::{AuthenticationError, AuthorizationError},
    request::{ClassifyError, Origin, RequestAttributes, RequestInfoFactory},
};

/// Classified and admitted request.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub attributes: RequestAttributes,
    /// `None` only for allowlisted paths reached without credentials while
    /// anonymous access is disabled.
    pub identity: Option<Identity>,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Classify(#[from] ClassifyError),
    #[error(transparent)]
    Authentication(#[from] AuthenticationError),
    #[error("unauthorized")]
    Unauthenticated,
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error(transparent)]
    Authorization(#[from] AuthorizationError),
}

pub struct Pipeline {
    classifier: RequestInfoFactory,
    authentication: AuthenticationChain,
    authorizer: Arc<dyn Authorizer>,
}

impl Pipeline {
    #[must_use]
    pub fn new(
        classifier: RequestInfoFactory,
        authentication: AuthenticationChain,
        authorizer: Arc<dyn Authorizer>,
    ) -> Self {
        Self {
            classifier,
            authentication,
            authorizer,
        }
    }

    /// # Errors
    /// Fails when the URL cannot be classified, the credentials are rejected,
    /// or no authorizer allows the request.
    #[instrument(skip_all, fields(method = %method, path = %uri.path()))]
    pub async fn admit(
        &self,
        method: &Method,
        uri: &Uri,
        headers: &HeaderMap,
        peer: Option<SocketAddr>,
    ) -> Result<RequestContext, PipelineError> {
        let origin = Origin {
            source_ip: client_ip(headers, peer),
            user_agent: headers
                .get(USER_AGENT)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string),
        };
        let attributes = self
            .classifier
            .classify(method, uri.path(), uri.query(), origin)?;

        let identity = match self
            .authentication
            .authenticate(&AuthRequest::new(headers, &attributes))
            .await?
        {
            Authentication::Authenticated(identity) => Some(identity),
            Authentication::Unauthenticated => None,
        };

        let verdict = self
            .authorizer
            .authorize(&Attributes {
                user: identity.as_ref(),
                request: &attributes,
            })
            .await;

        match verdict {
            Ok(verdict) if verdict.decision == Decision::Allow => {
                debug!(reason = %verdict.reason, "request allowed");
                Ok(RequestContext {
                    attributes,
                    identity,
                })
            }
            _ if identity.is_none() => Err(PipelineError::Unauthenticated),
            Ok(verdict) => Err(PipelineError::Forbidden(forbidden_message(
                identity.as_ref(),
                &attributes,
                &verdict.reason,
            ))),
            Err(err) => Err(PipelineError::Authorization(err)),
        }
    }
}

fn forbidden_message(identity: Option<&Identity>, request: &RequestAttributes, reason: &str) -> String {
    let user = identity.map_or("", |identity| identity.name.as_str());
    let target = if request.is_resource_request {
        let mut target = format!("resource {:?}", request.resource);
        if !request.namespace.is_empty() {
            target.push_str(&format!(" in namespace {:?}", request.namespace));
        }
        target
    } else {
        format!("path {:?}", request.path)
    };
    let mut message = format!("user {user:?} cannot {} {target}", request.verb);
    if !reason.is_empty() {
        message.push_str(": ");
        message.push_str(reason);
    }
    message
}

/// First `x-forwarded-for` hop, then `x-real-ip`, then the socket peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(forwarded) = forwarded {
        return Some(forwarded.to_string());
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
}
