//! Role-binding authorization.
//!
//! For every subject of the identity (the user and each of its groups) and
//! every binding scope that applies to the request, the first binding the
//! store returns is authoritative. Its role's rules are matched against the
//! request; the first matching rule allows. This authorizer never denies.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{Attributes, Authorizer, Verdict};
use crate::{
    authn::Identity,
    error::{AuthorizationError, StoreError},
    request::{RequestAttributes, Scope},
    store::{BindingScope, PolicyRule, RoleBinding, RoleBindingStore, Subject},
};

const WILDCARD: &str = "*";

pub struct RbacAuthorizer {
    store: Arc<dyn RoleBindingStore>,
}

impl RbacAuthorizer {
    #[must_use]
    pub fn new(store: Arc<dyn RoleBindingStore>) -> Self {
        Self { store }
    }

    async fn authoritative_binding(
        &self,
        scope: &BindingScope,
        subject: &Subject,
    ) -> Result<Option<RoleBinding>, StoreError> {
        let mut bindings = self.store.list_bindings(scope, subject).await?;
        if bindings.len() > 1 {
            let ignored: Vec<&str> = bindings[1..].iter().map(|b| b.name.as_str()).collect();
            warn!(
                subject = %subject,
                scope = %scope,
                binding = %bindings[0].name,
                ignored = ?ignored,
                "conflicting role bindings, using the first"
            );
        }
        Ok(if bindings.is_empty() {
            None
        } else {
            Some(bindings.swap_remove(0))
        })
    }

    async fn binding_allows(
        &self,
        binding: &RoleBinding,
        request: &RequestAttributes,
    ) -> Result<bool, StoreError> {
        let role = self
            .store
            .get_role(&binding.scope, &binding.role_ref)
            .await?
            .ok_or_else(|| {
                StoreError::InvalidRecord(format!(
                    "role {:?} referenced by binding {:?} not found",
                    binding.role_ref, binding.name
                ))
            })?;
        Ok(role.rules.iter().any(|rule| rule_allows(rule, request)))
    }
}

#[async_trait]
impl Authorizer for RbacAuthorizer {
    async fn authorize(&self, attributes: &Attributes<'_>) -> Result<Verdict, AuthorizationError> {
        let Some(user) = attributes.user else {
            return Ok(Verdict::no_opinion("RBAC: no identity"));
        };
        let request = attributes.request;
        let mut errors = Vec::new();

        for scope in applicable_scopes(request) {
            for subject in subjects(user) {
                let binding = match self.authoritative_binding(&scope, &subject).await {
                    Ok(Some(binding)) => binding,
                    Ok(None) => continue,
                    Err(err) => {
                        errors.push(AuthorizationError::Store(err));
                        continue;
                    }
                };
                match self.binding_allows(&binding, request).await {
                    Ok(true) => {
                        return Ok(Verdict::allow(format!(
                            "RBAC: allowed by {scope} binding {:?} of role {:?} to {subject}",
                            binding.name, binding.role_ref
                        )));
                    }
                    Ok(false) => {}
                    Err(err) => errors.push(AuthorizationError::Store(err)),
                }
            }
        }

        if errors.is_empty() {
            debug!(user = %user.name, verb = %request.verb, path = %request.path, "RBAC: no matching rule");
            Ok(Verdict::no_opinion(format!(
                "RBAC: {:?} cannot {} {}",
                user.name,
                request.verb,
                describe(request)
            )))
        } else {
            Err(AuthorizationError::Aggregate(errors))
        }
    }
}

/// Global and cluster bindings apply everywhere; namespace bindings only to
/// requests scoped to that namespace.
fn applicable_scopes(request: &RequestAttributes) -> Vec<BindingScope> {
    let mut scopes = vec![BindingScope::Global, BindingScope::Cluster];
    if request.scope == Scope::Namespace && !request.namespace.is_empty() {
        scopes.push(BindingScope::Namespace(request.namespace.clone()));
    }
    scopes
}

fn subjects(user: &Identity) -> Vec<Subject> {
    std::iter::once(Subject::user(user.name.clone()))
        .chain(user.groups.iter().map(|g| Subject::group(g.clone())))
        .collect()
}

fn describe(request: &RequestAttributes) -> String {
    if request.is_resource_request {
        let mut resource = request.resource.clone();
        if !request.subresource.is_empty() {
            resource = format!("{resource}/{}", request.subresource);
        }
        if request.api_group.is_empty() {
            resource
        } else {
            format!("{resource}.{}", request.api_group)
        }
    } else {
        request.path.clone()
    }
}

pub(crate) fn rule_allows(rule: &PolicyRule, request: &RequestAttributes) -> bool {
    if !matches_any(&rule.verbs, &request.verb) {
        return false;
    }
    if request.is_resource_request {
        matches_any(&rule.api_groups, &request.api_group)
            && resource_matches(rule, &request.resource, &request.subresource)
            && (rule.resource_names.is_empty()
                || rule.resource_names.iter().any(|n| *n == request.name))
    } else {
        non_resource_url_matches(rule, &request.path)
    }
}

fn matches_any(values: &[String], wanted: &str) -> bool {
    values.iter().any(|v| v == WILDCARD || v == wanted)
}

fn resource_matches(rule: &PolicyRule, resource: &str, subresource: &str) -> bool {
    let combined = if subresource.is_empty() {
        resource.to_string()
    } else {
        format!("{resource}/{subresource}")
    };
    rule.resources.iter().any(|r| {
        if r == WILDCARD || *r == combined {
            return true;
        }
        !subresource.is_empty() && r.strip_prefix("*/") == Some(subresource)
    })
}

fn non_resource_url_matches(rule: &PolicyRule, path: &str) -> bool {
    rule.non_resource_urls.iter().any(|url| {
        if url == WILDCARD || url == path {
            return true;
        }
        url.strip_suffix('*')
            .is_some_and(|prefix| path.starts_with(prefix))
    })
}
