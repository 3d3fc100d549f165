//! Request classification.
//!
//! Turns an HTTP method, path and query string into [`RequestAttributes`], the
//! structured view of a request that authentication and authorization work on.
//!
//! Resource URLs follow the Kubernetes layout:
//!
//! ```text
//! /api/{version}/namespaces/{namespace}/{resource}/{name}/{subresource}
//! /apis/{group}/{version}/workspaces/{workspace}/{resource}/{name}
//! /apis/{group}/{version}/watch/{resource}
//! ```
//!
//! Anything that does not start with a known API prefix is a non-resource request
//! and is authorized by its raw path.

mod list_options;

use axum::http::Method;
use serde::Serialize;
use std::collections::HashSet;
use thiserror::Error;

use self::list_options::ListOptions;

/// Label used by watch requests to narrow results to one workspace.
pub const WORKSPACE_LABEL_KEY: &str = "warden.io/workspace";

const KUBERNETES_API_PREFIXES: [&str; 2] = ["api", "apis"];
const NAMESPACE_SUBRESOURCES: [&str; 2] = ["status", "finalize"];
const SPECIAL_VERBS: [&str; 2] = ["proxy", "watch"];
const SPECIAL_VERBS_NO_SUBRESOURCES: [&str; 1] = ["proxy"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClassifyError {
    #[error("unable to determine kind and namespace from url: {0}")]
    MissingKind(String),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub enum Scope {
    #[default]
    Global,
    Workspace,
    Namespace,
}

/// Everything the pipeline knows about a request after classification.
///
/// Built once per request and never mutated afterwards.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RequestAttributes {
    pub is_resource_request: bool,
    /// The request targets one of the `api`/`apis` roots.
    pub is_kubernetes_request: bool,
    pub path: String,
    /// Lowercase verb. Resource requests use Kubernetes verbs (`get`, `list`,
    /// `watch`, `create`, ...), non-resource requests the lowercased method.
    pub verb: String,
    pub api_prefix: String,
    pub api_group: String,
    pub api_version: String,
    pub workspace: String,
    pub namespace: String,
    /// Empty in single-cluster deployments.
    pub cluster: String,
    pub scope: Scope,
    pub resource: String,
    pub subresource: String,
    pub name: String,
    /// Path segments relative to the resource, e.g. `["pods", "web-0", "log"]`.
    pub parts: Vec<String>,
    pub source_ip: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestAttributes {
    /// Scope derived from which scope markers are present.
    #[must_use]
    pub fn derived_scope(&self) -> Scope {
        if !self.namespace.is_empty() {
            Scope::Namespace
        } else if !self.workspace.is_empty() {
            Scope::Workspace
        } else {
            Scope::Global
        }
    }
}

/// Connection metadata recorded alongside the parsed URL.
#[derive(Clone, Debug, Default)]
pub struct Origin {
    pub source_ip: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Clone, Debug)]
pub struct RequestInfoFactory {
    api_prefixes: HashSet<String>,
    groupless_api_prefixes: HashSet<String>,
}

impl Default for RequestInfoFactory {
    fn default() -> Self {
        Self::new(
            ["api", "apis", "warden-api", "warden-apis"],
            ["api", "warden-api"],
        )
    }
}

impl RequestInfoFactory {
    pub fn new<I, J, S, T>(api_prefixes: I, groupless_api_prefixes: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            api_prefixes: api_prefixes.into_iter().map(Into::into).collect(),
            groupless_api_prefixes: groupless_api_prefixes.into_iter().map(Into::into).collect(),
        }
    }

    /// Classify a request.
    ///
    /// # Errors
    /// Returns [`ClassifyError::MissingKind`] when a `watch` or `proxy` segment is
    /// not followed by a resource.
    pub fn classify(
        &self,
        method: &Method,
        path: &str,
        query: Option<&str>,
        origin: Origin,
    ) -> Result<RequestAttributes, ClassifyError> {
        let mut info = RequestAttributes {
            path: path.to_string(),
            verb: method.as_str().to_lowercase(),
            source_ip: origin.source_ip,
            user_agent: origin.user_agent,
            ..RequestAttributes::default()
        };

        let segments = split_path(path);

        // Discovery paths like `/apis` or `/api/v1` are still Kubernetes requests.
        if segments.len() < 3 {
            info.is_kubernetes_request = segments
                .first()
                .is_some_and(|prefix| KUBERNETES_API_PREFIXES.contains(prefix));
            return Ok(info);
        }

        if !self.api_prefixes.contains(segments[0]) {
            return Ok(info);
        }

        info.api_prefix = segments[0].to_string();
        info.is_kubernetes_request = KUBERNETES_API_PREFIXES.contains(&segments[0]);
        let mut parts = &segments[1..];

        if !self.groupless_api_prefixes.contains(info.api_prefix.as_str()) {
            // the prefix is consumed, so this asks for group, version and one more
            if parts.len() < 3 {
                return Ok(info);
            }
            info.api_group = parts[0].to_string();
            parts = &parts[1..];
        }

        info.is_resource_request = true;
        info.api_version = parts[0].to_string();
        parts = &parts[1..];

        if let Some(verb) = parts.first().filter(|p| SPECIAL_VERBS.contains(*p)) {
            if parts.len() < 2 {
                return Err(ClassifyError::MissingKind(path.to_string()));
            }
            info.verb = (*verb).to_string();
            parts = &parts[1..];
        } else {
            info.verb = verb_for_method(method).to_string();
        }

        if parts.first() == Some(&"workspaces") {
            if let Some(workspace) = parts.get(1) {
                info.workspace = (*workspace).to_string();
            }
            if parts.len() > 2 {
                parts = &parts[2..];
            }
        }

        if parts.first() == Some(&"namespaces") {
            if let Some(namespace) = parts.get(1) {
                info.namespace = (*namespace).to_string();
                if parts
                    .get(2)
                    .is_some_and(|next| !NAMESPACE_SUBRESOURCES.contains(next))
                {
                    parts = &parts[2..];
                }
            }
        }

        info.parts = parts.iter().map(ToString::to_string).collect();

        // resource/name/subresource/anything/else/is/ignored
        if info.parts.len() >= 3 && !SPECIAL_VERBS_NO_SUBRESOURCES.contains(&info.verb.as_str()) {
            info.subresource.clone_from(&info.parts[2]);
        }
        if let Some(name) = info.parts.get(1) {
            info.name.clone_from(name);
        }
        if let Some(resource) = info.parts.first() {
            info.resource.clone_from(resource);
        }
        info.scope = info.derived_scope();

        if info.name.is_empty() && info.verb == "get" {
            let options = ListOptions::parse(query.unwrap_or_default()).unwrap_or_else(|err| {
                tracing::debug!(path, "could not parse list options: {err}");
                ListOptions::watch_only(query.unwrap_or_default())
            });

            info.verb = if options.watch { "watch" } else { "list" }.to_string();

            if let Some(name) = options.exact_name() {
                info.name = name.to_string();
            }
        }

        if info.verb == "watch" {
            let prefix = format!("{WORKSPACE_LABEL_KEY}=");
            if let Some(workspace) = ListOptions::label_selector(query.unwrap_or_default())
                .as_deref()
                .and_then(|selector| selector.strip_prefix(prefix.as_str()))
            {
                info.workspace = workspace.to_string();
                info.scope = Scope::Workspace;
            }
        }

        if info.name.is_empty() && info.verb == "delete" {
            info.verb = "deletecollection".to_string();
        }

        Ok(info)
    }
}

fn verb_for_method(method: &Method) -> &'static str {
    match *method {
        Method::POST => "create",
        Method::GET | Method::HEAD => "get",
        Method::PUT => "update",
        Method::PATCH => "patch",
        Method::DELETE => "delete",
        _ => "",
    }
}

fn split_path(path: &str) -> Vec<&str> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        Vec::new()
    } else {
        trimmed.split('/').collect()
    }
}
