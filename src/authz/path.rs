//! Static allowlist of paths that need no identity.

use async_trait::async_trait;
use std::collections::HashSet;
use thiserror::Error;

use super::{Attributes, Authorizer, Verdict};
use crate::error::AuthorizationError;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("only trailing * allowed in {0}")]
pub struct InvalidPathPattern(pub String);

/// Paths reachable without credentials.
pub const DEFAULT_ALLOWED_PATHS: &[&str] = &[
    "/oauth/token",
    "/healthz",
    "/version",
    "/warden-apis/version",
    "/warden-apis/metrics",
    "/metrics",
    "/apidocs",
    "/apidocs/*",
    "/apidocs.json",
];

/// Allows requests whose path equals an entry, or starts with an entry that
/// ends in `*`. Never denies.
#[derive(Clone, Debug, Default)]
pub struct PathAllowlist {
    exact: HashSet<String>,
    prefixes: Vec<String>,
}

impl PathAllowlist {
    /// # Errors
    /// A `*` anywhere but the last character is rejected.
    pub fn new<I, S>(paths: I) -> Result<Self, InvalidPathPattern>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut allowlist = Self::default();
        for path in paths {
            let raw = path.as_ref();
            let pattern = raw.trim_start_matches('/');
            if let Some(prefix) = pattern.strip_suffix('*') {
                if prefix.contains('*') {
                    return Err(InvalidPathPattern(raw.to_string()));
                }
                allowlist.prefixes.push(prefix.to_string());
            } else if pattern.contains('*') {
                return Err(InvalidPathPattern(raw.to_string()));
            } else {
                allowlist.exact.insert(pattern.to_string());
            }
        }
        Ok(allowlist)
    }

    #[must_use]
    pub fn allows(&self, path: &str) -> bool {
        let path = path.trim_start_matches('/');
        self.exact.contains(path) || self.prefixes.iter().any(|p| path.starts_with(p.as_str()))
    }
}

/// # Errors
/// Never in practice; the literal list is well formed.
pub fn default_allowlist() -> Result<PathAllowlist, InvalidPathPattern> {
    PathAllowlist::new(DEFAULT_ALLOWED_PATHS)
}

#[async_trait]
impl Authorizer for PathAllowlist {
    async fn authorize(&self, attributes: &Attributes<'_>) -> Result<Verdict, AuthorizationError> {
        if self.allows(&attributes.request.path) {
            Ok(Verdict::allow(""))
        } else {
            Ok(Verdict::no_opinion(""))
        }
    }
}
