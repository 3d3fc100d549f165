//! End-to-end admission tests against the in-process router and in-memory
//! backends.

use argon2::{password_hash::SaltString, Algorithm, Argon2, Params, PasswordHasher, Version};
use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        Request, StatusCode,
    },
    response::Response,
    Router,
};
use base64ct::{Base64, Encoding};
use chrono::{TimeDelta, Utc};
use secrecy::SecretString;
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tower::ServiceExt;
use warden::{
    api::{app, Backends},
    authn::{lockout::AccountReconciler, Identity, GROUP_AUTHENTICATED},
    cache::{Cache, MemoryCache},
    config::AuthenticationOptions,
    error::StoreError,
    store::{
        memory::{MemoryAccountStore, MemoryLoginEvents, MemoryRoleBindingStore},
        Account, AccountState, AccountStore, BindingScope, PolicyRule, Role, RoleBinding,
        RoleBindingStore, Subject,
    },
    token::{Token, TokenManager},
};

const PASSWORD: &str = "P@88w0rd";

fn quick_hash(password: &str) -> String {
    let params = Params::new(8, 1, 1, None).unwrap();
    let salt = SaltString::encode_b64(b"integration-salt").unwrap();
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
        .hash_password(password.as_bytes(), &salt)
        .unwrap()
        .to_string()
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(ToString::to_string).collect()
}

struct Harness {
    app: Router,
    accounts: Arc<MemoryAccountStore>,
    events: Arc<MemoryLoginEvents>,
    cache: Arc<MemoryCache>,
    options: AuthenticationOptions,
}

impl Harness {
    async fn new(options: AuthenticationOptions) -> Self {
        let accounts = Arc::new(MemoryAccountStore::new());
        accounts
            .insert(
                Account::new("alice")
                    .with_email("alice@example.com")
                    .with_encrypted_password(quick_hash(PASSWORD)),
            )
            .await;
        accounts
            .insert(Account::new("root").with_encrypted_password(quick_hash(PASSWORD)))
            .await;

        let bindings = Arc::new(MemoryRoleBindingStore::new());
        seed_bindings(&bindings).await;

        let events = Arc::new(MemoryLoginEvents::new());
        let cache = Arc::new(MemoryCache::new());
        let backends = Backends {
            accounts: accounts.clone(),
            bindings,
            login_events: events.clone(),
            cache: cache.clone(),
        };

        Self {
            app: app(&backends, &options).unwrap(),
            accounts,
            events,
            cache,
            options,
        }
    }

    async fn send(&self, request: Request<Body>) -> Response {
        self.app.clone().oneshot(request).await.unwrap()
    }

    async fn reconcile(&self, now: chrono::DateTime<Utc>) {
        AccountReconciler::new(
            self.accounts.clone(),
            self.events.clone(),
            self.options.lockout(),
            self.options.login_history_retention_period(),
        )
        .reconcile_all(now)
        .await
        .unwrap();
    }

    async fn login(&self) -> Token {
        let response = self
            .send(form(&format!(
                "grant_type=password&username=alice&password={}",
                "P%4088w0rd"
            )))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        serde_json::from_slice(&body(response).await).unwrap()
    }
}

async fn seed_bindings(bindings: &MemoryRoleBindingStore) {
    let default = BindingScope::Namespace("default".to_string());
    bindings
        .add_role(Role {
            name: "viewer".to_string(),
            scope: default.clone(),
            rules: vec![PolicyRule {
                verbs: strings(&["get", "list", "watch"]),
                api_groups: strings(&[""]),
                resources: strings(&["pods"]),
                ..PolicyRule::default()
            }],
        })
        .await;
    bindings
        .add_binding(RoleBinding {
            name: "alice-viewer".to_string(),
            scope: default,
            subjects: vec![Subject::user("alice")],
            role_ref: "viewer".to_string(),
        })
        .await;

    bindings
        .add_role(Role {
            name: "platform-admin".to_string(),
            scope: BindingScope::Global,
            rules: vec![PolicyRule {
                verbs: strings(&["*"]),
                api_groups: strings(&["*"]),
                resources: strings(&["*"]),
                non_resource_urls: strings(&["*"]),
                ..PolicyRule::default()
            }],
        })
        .await;
    bindings
        .add_binding(RoleBinding {
            name: "root-platform-admin".to_string(),
            scope: BindingScope::Global,
            subjects: vec![Subject::user("root")],
            role_ref: "platform-admin".to_string(),
        })
        .await;

    bindings
        .add_role(Role {
            name: "session".to_string(),
            scope: BindingScope::Global,
            rules: vec![PolicyRule {
                verbs: strings(&["post"]),
                non_resource_urls: strings(&["/oauth/*"]),
                ..PolicyRule::default()
            }],
        })
        .await;
    bindings
        .add_binding(RoleBinding {
            name: "authenticated-session".to_string(),
            scope: BindingScope::Global,
            subjects: vec![Subject::group(GROUP_AUTHENTICATED)],
            role_ref: "session".to_string(),
        })
        .await;
}

fn options() -> AuthenticationOptions {
    AuthenticationOptions::new(SecretString::from("integration-secret"))
}

fn basic(username: &str, password: &str) -> String {
    format!(
        "Basic {}",
        Base64::encode_string(format!("{username}:{password}").as_bytes())
    )
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn with_auth(method: &str, uri: &str, authorization: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(AUTHORIZATION, authorization)
        .body(Body::empty())
        .unwrap()
}

fn form(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/oauth/token")
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body(response: Response) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

#[tokio::test]
async fn namespaced_list_is_allowed_by_namespace_binding() {
    let harness = Harness::new(options()).await;
    let credentials = basic("alice", PASSWORD);

    // admitted requests without a handler fall through to 404
    let response = harness
        .send(with_auth("GET", "/api/v1/namespaces/default/pods", &credentials))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = harness
        .send(with_auth("GET", "/api/v1/namespaces/kube-system/pods", &credentials))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = harness
        .send(with_auth("DELETE", "/api/v1/namespaces/default/pods/web-0", &credentials))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn cluster_scoped_delete_needs_global_binding() {
    let harness = Harness::new(options()).await;
    let path = "/apis/rbac.authorization.k8s.io/v1/clusterroles/admin";

    let response = harness
        .send(with_auth("DELETE", path, &basic("alice", PASSWORD)))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let message = String::from_utf8(body(response).await).unwrap();
    assert!(message.contains(r#"user "alice" cannot delete resource "clusterroles""#));

    let response = harness
        .send(with_auth("DELETE", path, &basic("root", PASSWORD)))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn anonymous_requests_are_forbidden_or_unauthorized() {
    let harness = Harness::new(options()).await;
    let response = harness.send(get("/api/v1/namespaces/default/pods")).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let harness = Harness::new(options().with_anonymous(false)).await;
    let response = harness.send(get("/api/v1/namespaces/default/pods")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn bad_credentials_are_unauthorized_and_recorded() {
    let harness = Harness::new(options()).await;

    let response = harness
        .send(with_auth("GET", "/api/v1/namespaces/default/pods", &basic("alice", "wrong")))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = harness
        .send(with_auth("GET", "/healthz", "Basic !!!not-base64"))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let events = harness.events.events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].username, "alice");
    assert!(!events[0].success);
}

#[tokio::test]
async fn repeated_failures_lock_the_account_until_cooldown() {
    let harness = Harness::new(options()).await;
    let path = "/api/v1/namespaces/default/pods";

    for _ in 0..10 {
        let response = harness
            .send(with_auth("GET", path, &basic("alice", "wrong")))
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let now = Utc::now();
    harness.reconcile(now).await;
    let account = harness.accounts.get("alice").await.unwrap().unwrap();
    assert_eq!(account.state, AccountState::AuthLimitExceeded);

    // locked even with the right password
    let response = harness
        .send(with_auth("GET", path, &basic("alice", PASSWORD)))
        .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    harness.reconcile(now + TimeDelta::minutes(11)).await;
    let account = harness.accounts.get("alice").await.unwrap().unwrap();
    assert_eq!(account.state, AccountState::Active);

    let response = harness
        .send(with_auth("GET", path, &basic("alice", PASSWORD)))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn issued_tokens_authenticate_until_logout() {
    let harness = Harness::new(options().with_access_token_max_age(Duration::from_secs(3600)))
        .await;
    let token = harness.login().await;
    assert_eq!(token.token_type, "Bearer");
    assert_eq!(token.expires_in, 3600);

    let bearer = format!("Bearer {}", token.access_token);
    let path = "/api/v1/namespaces/default/pods";
    let response = harness.send(with_auth("GET", path, &bearer)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = harness
        .send(with_auth("POST", "/oauth/logout", &bearer))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = harness.send(with_auth("GET", path, &bearer)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let events = harness.events.events().await;
    assert!(events.iter().any(|event| event.success && event.username == "alice"));
}

#[tokio::test]
async fn rejected_tokens_do_not_reveal_why() {
    let harness = Harness::new(options().with_access_token_max_age(Duration::ZERO)).await;
    let path = "/api/v1/namespaces/default/pods";

    // signed with the server secret, but nobody called ghost exists
    let ghost = TokenManager::new(&harness.options, Arc::new(MemoryCache::new()))
        .issue_to(&Identity::new("ghost"), None, None)
        .await
        .unwrap();
    let response = harness
        .send(with_auth("GET", path, &format!("Bearer {}", ghost.access_token)))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body(response).await, b"invalid token");

    let token = harness.login().await;
    let response = harness
        .send(with_auth("GET", path, &format!("Bearer {}x", token.access_token)))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body(response).await, b"invalid token");
}

#[tokio::test]
async fn evicted_tokens_are_revoked_unless_untracked() {
    let path = "/api/v1/namespaces/default/pods";

    let tracked = Harness::new(options().with_access_token_max_age(Duration::from_secs(3600)))
        .await;
    let token = tracked.login().await;
    let keys = tracked.cache.keys("warden:").await.unwrap();
    assert_eq!(keys.len(), 2);
    tracked.cache.del(&keys).await.unwrap();
    let response = tracked
        .send(with_auth("GET", path, &format!("Bearer {}", token.access_token)))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let untracked = Harness::new(options().with_access_token_max_age(Duration::ZERO)).await;
    let token = untracked.login().await;
    assert_eq!(token.expires_in, 0);
    assert!(untracked.cache.keys("warden:").await.unwrap().is_empty());
    let response = untracked
        .send(with_auth("GET", path, &format!("Bearer {}", token.access_token)))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn refresh_grant_requires_a_refresh_token() {
    let harness = Harness::new(options()).await;
    let token = harness.login().await;

    let response = harness
        .send(form(&format!(
            "grant_type=refresh_token&refresh_token={}",
            token.refresh_token
        )))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let refreshed: Token = serde_json::from_slice(&body(response).await).unwrap();
    assert_ne!(refreshed.access_token, token.access_token);

    let response = harness
        .send(form(&format!(
            "grant_type=refresh_token&refresh_token={}",
            token.access_token
        )))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = harness.send(form("grant_type=client_credentials")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn static_tokens_never_expire() {
    let harness = Harness::new(options()).await;
    let response = harness
        .send(with_auth("POST", "/oauth/statictoken", &basic("alice", PASSWORD)))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let token: Token = serde_json::from_slice(&body(response).await).unwrap();
    assert_eq!(token.token_type, "static_token");
    assert_eq!(token.expires_in, 0);

    let response = harness
        .send(with_auth(
            "GET",
            "/api/v1/namespaces/default/pods",
            &format!("Bearer {}", token.access_token),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn password_grant_reports_lockout() {
    let harness = Harness::new(options()).await;
    let alice = harness.accounts.get("alice").await.unwrap().unwrap();
    harness
        .accounts
        .update(alice.with_state(AccountState::AuthLimitExceeded, Utc::now()))
        .await
        .unwrap();

    let response = harness
        .send(form("grant_type=password&username=alice&password=P%4088w0rd"))
        .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

struct CountingBindings {
    calls: AtomicUsize,
}

#[async_trait]
impl RoleBindingStore for CountingBindings {
    async fn list_bindings(
        &self,
        _scope: &BindingScope,
        _subject: &Subject,
    ) -> Result<Vec<RoleBinding>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }

    async fn get_binding(
        &self,
        _scope: &BindingScope,
        _name: &str,
    ) -> Result<Option<RoleBinding>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }

    async fn get_role(
        &self,
        _scope: &BindingScope,
        _name: &str,
    ) -> Result<Option<Role>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }
}

#[tokio::test]
async fn public_paths_skip_role_bindings() {
    let bindings = Arc::new(CountingBindings {
        calls: AtomicUsize::new(0),
    });
    let events = Arc::new(MemoryLoginEvents::new());
    let backends = Backends {
        accounts: Arc::new(MemoryAccountStore::new()),
        bindings: bindings.clone(),
        login_events: events,
        cache: Arc::new(MemoryCache::new()),
    };
    let app = app(&backends, &options().with_anonymous(false)).unwrap();

    let response = app.clone().oneshot(get("/apidocs.json")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let document: serde_json::Value = serde_json::from_slice(&body(response).await).unwrap();
    assert!(document["paths"]["/oauth/token"].is_object());

    let response = app.clone().oneshot(get("/healthz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-app"));
    assert!(response.headers().contains_key("x-request-id"));

    let response = app.oneshot(get("/version")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(bindings.calls.load(Ordering::SeqCst), 0);
}
