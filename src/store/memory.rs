//! In-process stores.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::{
    Account, AccountStore, BindingScope, LoginEvent, LoginEventSink, LoginHistory, Role,
    RoleBinding, RoleBindingStore, Subject,
};
use crate::error::StoreError;

#[derive(Debug, Default)]
pub struct MemoryAccountStore {
    accounts: RwLock<BTreeMap<String, Account>>,
}

impl MemoryAccountStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, account: Account) {
        self.accounts
            .write()
            .await
            .insert(account.name.clone(), account);
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn get(&self, name: &str) -> Result<Option<Account>, StoreError> {
        Ok(self.accounts.read().await.get(name).cloned())
    }

    async fn list(&self) -> Result<Vec<Account>, StoreError> {
        Ok(self.accounts.read().await.values().cloned().collect())
    }

    async fn update(&self, account: Account) -> Result<Account, StoreError> {
        let mut accounts = self.accounts.write().await;
        if !accounts.contains_key(&account.name) {
            return Err(StoreError::InvalidRecord(format!(
                "account {:?} not found",
                account.name
            )));
        }
        accounts.insert(account.name.clone(), account.clone());
        Ok(account)
    }
}

/// Bindings keep insertion order so "first binding wins" is deterministic.
#[derive(Debug, Default)]
pub struct MemoryRoleBindingStore {
    bindings: RwLock<Vec<RoleBinding>>,
    roles: RwLock<Vec<Role>>,
}

impl MemoryRoleBindingStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_binding(&self, binding: RoleBinding) {
        self.bindings.write().await.push(binding);
    }

    pub async fn add_role(&self, role: Role) {
        let mut roles = self.roles.write().await;
        roles.retain(|r| !(r.scope == role.scope && r.name == role.name));
        roles.push(role);
    }
}

#[async_trait]
impl RoleBindingStore for MemoryRoleBindingStore {
    async fn list_bindings(
        &self,
        scope: &BindingScope,
        subject: &Subject,
    ) -> Result<Vec<RoleBinding>, StoreError> {
        Ok(self
            .bindings
            .read()
            .await
            .iter()
            .filter(|b| &b.scope == scope && b.subjects.contains(subject))
            .cloned()
            .collect())
    }

    async fn get_binding(
        &self,
        scope: &BindingScope,
        name: &str,
    ) -> Result<Option<RoleBinding>, StoreError> {
        Ok(self
            .bindings
            .read()
            .await
            .iter()
            .find(|b| &b.scope == scope && b.name == name)
            .cloned())
    }

    async fn get_role(&self, scope: &BindingScope, name: &str) -> Result<Option<Role>, StoreError> {
        Ok(self
            .roles
            .read()
            .await
            .iter()
            .find(|r| &r.scope == scope && r.name == name)
            .cloned())
    }
}

#[derive(Debug, Default)]
pub struct MemoryLoginEvents {
    events: RwLock<Vec<LoginEvent>>,
}

impl MemoryLoginEvents {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<LoginEvent> {
        self.events.read().await.clone()
    }
}

#[async_trait]
impl LoginEventSink for MemoryLoginEvents {
    async fn append(&self, event: LoginEvent) -> Result<(), StoreError> {
        self.events.write().await.push(event);
        Ok(())
    }
}

#[async_trait]
impl LoginHistory for MemoryLoginEvents {
    async fn count_failures_since(
        &self,
        usernames: &[String],
        since: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        Ok(self
            .events
            .read()
            .await
            .iter()
            .filter(|e| !e.success && e.created_at >= since && usernames.contains(&e.username))
            .count())
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut events = self.events.write().await;
        let before = events.len();
        events.retain(|e| e.created_at >= cutoff);
        Ok(u64::try_from(before - events.len()).unwrap_or(u64::MAX))
    }
}
