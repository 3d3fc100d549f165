//! # Warden
//!
//! `warden` is the request-level trust boundary of a multi-tenant
//! cluster-management API. Every inbound request goes through the same
//! pipeline before any handler runs:
//!
//! 1. **Classification** ([`request`]): the path, method and query are turned
//!    into [`request::RequestAttributes`] (API group, version, workspace,
//!    namespace, resource, subresource, name and Kubernetes-style verb).
//! 2. **Authentication** ([`authn`]): Basic credentials (password accounts),
//!    Bearer tokens ([`token`]) and, when enabled, an anonymous fallback.
//!    Password accounts are protected by a brute-force lockout driven by the
//!    login history.
//! 3. **Authorization** ([`authz`]): a static allowlist of public paths, then
//!    role bindings resolved at global, cluster and namespace scope. A request
//!    nobody allows is forbidden.
//!
//! Accounts, role bindings and login events live behind the traits in
//! [`store`], with Postgres and in-memory implementations. Issued tokens are
//! tracked in a [`cache::Cache`] so they can be revoked before they expire.

pub mod api;
pub mod authn;
pub mod authz;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod request;
pub mod store;
pub mod token;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
