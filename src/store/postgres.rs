//! `PostgreSQL` backed stores. Schema lives in `db/sql/schema.sql`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::{info_span, Instrument};

use super::{
    Account, AccountStore, BindingScope, LoginEvent, LoginEventSink, LoginHistory, PolicyRule,
    Role, RoleBinding, RoleBindingStore, Subject, SubjectKind,
};
use crate::error::StoreError;

const SCOPE_GLOBAL: &str = "global";
const SCOPE_CLUSTER: &str = "cluster";
const SCOPE_NAMESPACE: &str = "namespace";

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn scope_columns(scope: &BindingScope) -> (&'static str, &str) {
    match scope {
        BindingScope::Global => (SCOPE_GLOBAL, ""),
        BindingScope::Cluster => (SCOPE_CLUSTER, ""),
        BindingScope::Namespace(namespace) => (SCOPE_NAMESPACE, namespace.as_str()),
    }
}

fn scope_from_columns(kind: &str, namespace: String) -> Result<BindingScope, StoreError> {
    match kind {
        SCOPE_GLOBAL => Ok(BindingScope::Global),
        SCOPE_CLUSTER => Ok(BindingScope::Cluster),
        SCOPE_NAMESPACE => Ok(BindingScope::Namespace(namespace)),
        other => Err(StoreError::InvalidRecord(format!(
            "unknown binding scope {other:?}"
        ))),
    }
}

fn subject_kind(kind: SubjectKind) -> &'static str {
    match kind {
        SubjectKind::User => "User",
        SubjectKind::Group => "Group",
    }
}

fn account_from_row(row: &PgRow) -> Result<Account, StoreError> {
    let state: String = row.try_get("state")?;
    Ok(Account {
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        encrypted_password: row.try_get("encrypted_password")?,
        groups: row.try_get("groups")?,
        state: state.parse()?,
        reason: row.try_get("reason")?,
        last_transition_time: row.try_get("last_transition_time")?,
    })
}

const ACCOUNT_COLUMNS: &str =
    "name, email, encrypted_password, groups, state, reason, last_transition_time";

#[async_trait]
impl AccountStore for PgStore {
    async fn get(&self, name: &str) -> Result<Option<Account>, StoreError> {
        let query = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE name = $1");
        let span = info_span!("db.query", db.system = "postgresql", db.operation = "SELECT");
        let row = sqlx::query(&query)
            .bind(name)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn list(&self) -> Result<Vec<Account>, StoreError> {
        let query = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY name");
        let span = info_span!("db.query", db.system = "postgresql", db.operation = "SELECT");
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .instrument(span)
            .await?;
        rows.iter().map(account_from_row).collect()
    }

    async fn update(&self, account: Account) -> Result<Account, StoreError> {
        let query = r"
            UPDATE accounts
            SET email = $2,
                encrypted_password = $3,
                groups = $4,
                state = $5,
                reason = $6,
                last_transition_time = $7
            WHERE name = $1
        ";
        let span = info_span!("db.query", db.system = "postgresql", db.operation = "UPDATE");
        let result = sqlx::query(query)
            .bind(&account.name)
            .bind(&account.email)
            .bind(&account.encrypted_password)
            .bind(&account.groups)
            .bind(account.state.as_str())
            .bind(&account.reason)
            .bind(account.last_transition_time)
            .execute(&self.pool)
            .instrument(span)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::InvalidRecord(format!(
                "account {:?} not found",
                account.name
            )));
        }
        Ok(account)
    }
}

fn binding_from_rows(rows: &[PgRow]) -> Result<Vec<RoleBinding>, StoreError> {
    let mut bindings: Vec<RoleBinding> = Vec::new();
    for row in rows {
        let name: String = row.try_get("name")?;
        let kind: String = row.try_get("subject_kind")?;
        let subject = Subject {
            kind: match kind.as_str() {
                "User" => SubjectKind::User,
                "Group" => SubjectKind::Group,
                other => {
                    return Err(StoreError::InvalidRecord(format!(
                        "unknown subject kind {other:?}"
                    )))
                }
            },
            name: row.try_get("subject_name")?,
        };

        // rows arrive ordered by binding, one per subject
        match bindings.last_mut() {
            Some(last) if last.name == name => last.subjects.push(subject),
            _ => bindings.push(RoleBinding {
                name,
                scope: scope_from_columns(
                    row.try_get::<String, _>("scope")?.as_str(),
                    row.try_get("namespace")?,
                )?,
                subjects: vec![subject],
                role_ref: row.try_get("role_ref")?,
            }),
        }
    }
    Ok(bindings)
}

#[async_trait]
impl RoleBindingStore for PgStore {
    async fn list_bindings(
        &self,
        scope: &BindingScope,
        subject: &Subject,
    ) -> Result<Vec<RoleBinding>, StoreError> {
        let query = r"
            SELECT b.name, b.scope, b.namespace, b.role_ref, s.subject_kind, s.subject_name
            FROM role_bindings b
            JOIN role_binding_subjects s ON s.binding_id = b.id
            WHERE b.scope = $1 AND b.namespace = $2
              AND b.id IN (
                  SELECT binding_id FROM role_binding_subjects
                  WHERE subject_kind = $3 AND subject_name = $4
              )
            ORDER BY b.created_at, b.name, s.position
        ";
        let (kind, namespace) = scope_columns(scope);
        let span = info_span!("db.query", db.system = "postgresql", db.operation = "SELECT");
        let rows = sqlx::query(query)
            .bind(kind)
            .bind(namespace)
            .bind(subject_kind(subject.kind))
            .bind(&subject.name)
            .fetch_all(&self.pool)
            .instrument(span)
            .await?;
        binding_from_rows(&rows)
    }

    async fn get_binding(
        &self,
        scope: &BindingScope,
        name: &str,
    ) -> Result<Option<RoleBinding>, StoreError> {
        let query = r"
            SELECT b.name, b.scope, b.namespace, b.role_ref, s.subject_kind, s.subject_name
            FROM role_bindings b
            JOIN role_binding_subjects s ON s.binding_id = b.id
            WHERE b.scope = $1 AND b.namespace = $2 AND b.name = $3
            ORDER BY s.position
        ";
        let (kind, namespace) = scope_columns(scope);
        let span = info_span!("db.query", db.system = "postgresql", db.operation = "SELECT");
        let rows = sqlx::query(query)
            .bind(kind)
            .bind(namespace)
            .bind(name)
            .fetch_all(&self.pool)
            .instrument(span)
            .await?;
        Ok(binding_from_rows(&rows)?.into_iter().next())
    }

    async fn get_role(&self, scope: &BindingScope, name: &str) -> Result<Option<Role>, StoreError> {
        let query = "SELECT name, rules FROM roles WHERE scope = $1 AND namespace = $2 AND name = $3";
        let (kind, namespace) = scope_columns(scope);
        let span = info_span!("db.query", db.system = "postgresql", db.operation = "SELECT");
        let row = sqlx::query(query)
            .bind(kind)
            .bind(namespace)
            .bind(name)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;

        row.map(|row| -> Result<Role, StoreError> {
            let rules: serde_json::Value = row.try_get("rules")?;
            let rules: Vec<PolicyRule> = serde_json::from_value(rules)
                .map_err(|err| StoreError::InvalidRecord(format!("role {name:?}: {err}")))?;
            Ok(Role {
                name: row.try_get("name")?,
                scope: scope.clone(),
                rules,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl LoginEventSink for PgStore {
    async fn append(&self, event: LoginEvent) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO login_events
                (id, username, method, provider, source_ip, user_agent, success, reason, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ";
        let span = info_span!("db.query", db.system = "postgresql", db.operation = "INSERT");
        sqlx::query(query)
            .bind(event.id)
            .bind(&event.username)
            .bind(event.method.as_str())
            .bind(&event.provider)
            .bind(&event.source_ip)
            .bind(&event.user_agent)
            .bind(event.success)
            .bind(&event.reason)
            .bind(event.created_at)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl LoginHistory for PgStore {
    async fn count_failures_since(
        &self,
        usernames: &[String],
        since: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let query = r"
            SELECT COUNT(*) FROM login_events
            WHERE username = ANY($1) AND success = FALSE AND created_at >= $2
        ";
        let span = info_span!("db.query", db.system = "postgresql", db.operation = "SELECT");
        let row = sqlx::query(query)
            .bind(usernames)
            .bind(since)
            .fetch_one(&self.pool)
            .instrument(span)
            .await?;
        let count: i64 = row.try_get(0)?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let query = "DELETE FROM login_events WHERE created_at < $1";
        let span = info_span!("db.query", db.system = "postgresql", db.operation = "DELETE");
        let result = sqlx::query(query)
            .bind(cutoff)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(result.rows_affected())
    }
}
