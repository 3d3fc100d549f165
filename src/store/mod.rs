//! Records and store contracts consumed by the pipeline.
//!
//! The pipeline never owns accounts, bindings or login history; it reads them
//! through the traits below. [`memory`] backs tests and embedded use,
//! [`postgres`] backs the server.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

use crate::error::StoreError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountState {
    #[default]
    Active,
    Disabled,
    AuthLimitExceeded,
}

impl AccountState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::Disabled => "Disabled",
            Self::AuthLimitExceeded => "AuthLimitExceeded",
        }
    }
}

impl fmt::Display for AccountState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountState {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Active" => Ok(Self::Active),
            "Disabled" => Ok(Self::Disabled),
            "AuthLimitExceeded" => Ok(Self::AuthLimitExceeded),
            other => Err(StoreError::InvalidRecord(format!(
                "unknown account state {other:?}"
            ))),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Account {
    pub name: String,
    pub email: Option<String>,
    /// Argon2 PHC string. `None` for accounts that only sign in through an
    /// identity provider.
    pub encrypted_password: Option<String>,
    pub groups: Vec<String>,
    pub state: AccountState,
    pub reason: Option<String>,
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Account {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    #[must_use]
    pub fn with_encrypted_password(mut self, encrypted: impl Into<String>) -> Self {
        self.encrypted_password = Some(encrypted.into());
        self
    }

    #[must_use]
    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = groups.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_state(mut self, state: AccountState, at: DateTime<Utc>) -> Self {
        self.state = state;
        self.last_transition_time = Some(at);
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoginMethod {
    Password,
    Token,
    OAuth,
}

impl LoginMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Password => "Password",
            Self::Token => "Token",
            Self::OAuth => "OAuth",
        }
    }
}

impl FromStr for LoginMethod {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Password" => Ok(Self::Password),
            "Token" => Ok(Self::Token),
            "OAuth" => Ok(Self::OAuth),
            other => Err(StoreError::InvalidRecord(format!(
                "unknown login method {other:?}"
            ))),
        }
    }
}

/// One login attempt. Append-only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LoginEvent {
    pub id: Uuid,
    pub username: String,
    pub method: LoginMethod,
    pub provider: String,
    pub source_ip: Option<String>,
    pub user_agent: Option<String>,
    pub success: bool,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubjectKind {
    User,
    Group,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subject {
    pub kind: SubjectKind,
    pub name: String,
}

impl Subject {
    pub fn user(name: impl Into<String>) -> Self {
        Self {
            kind: SubjectKind::User,
            name: name.into(),
        }
    }

    pub fn group(name: impl Into<String>) -> Self {
        Self {
            kind: SubjectKind::Group,
            name: name.into(),
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            SubjectKind::User => write!(f, "User {:?}", self.name),
            SubjectKind::Group => write!(f, "Group {:?}", self.name),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BindingScope {
    Global,
    Cluster,
    Namespace(String),
}

impl fmt::Display for BindingScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Cluster => f.write_str("cluster"),
            Self::Namespace(namespace) => write!(f, "namespace {namespace:?}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleBinding {
    pub name: String,
    pub scope: BindingScope,
    pub subjects: Vec<Subject>,
    /// Name of a role in the same scope.
    pub role_ref: String,
}

/// One grant. Empty `resource_names` means every name; `*` matches anything.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    #[serde(default)]
    pub verbs: Vec<String>,
    #[serde(default)]
    pub api_groups: Vec<String>,
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default)]
    pub resource_names: Vec<String>,
    #[serde(default)]
    pub non_resource_urls: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    pub scope: BindingScope,
    pub rules: Vec<PolicyRule>,
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<Account>, StoreError>;

    /// Every account. Used for lookups by email.
    async fn list(&self) -> Result<Vec<Account>, StoreError>;

    async fn update(&self, account: Account) -> Result<Account, StoreError>;
}

#[async_trait]
pub trait RoleBindingStore: Send + Sync {
    /// Bindings at `scope` that name `subject`, in a stable order.
    async fn list_bindings(
        &self,
        scope: &BindingScope,
        subject: &Subject,
    ) -> Result<Vec<RoleBinding>, StoreError>;

    async fn get_binding(
        &self,
        scope: &BindingScope,
        name: &str,
    ) -> Result<Option<RoleBinding>, StoreError>;

    async fn get_role(&self, scope: &BindingScope, name: &str) -> Result<Option<Role>, StoreError>;
}

#[async_trait]
pub trait LoginEventSink: Send + Sync {
    async fn append(&self, event: LoginEvent) -> Result<(), StoreError>;
}

/// Read side of the login history, used by the account reconciler.
#[async_trait]
pub trait LoginHistory: Send + Sync {
    /// Failed attempts recorded for any of `usernames` at or after `since`.
    async fn count_failures_since(
        &self,
        usernames: &[String],
        since: DateTime<Utc>,
    ) -> Result<usize, StoreError>;

    /// Delete events created before `cutoff`, returning how many were removed.
    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}
