//! HTTP surface: admission middleware, token endpoints and server bootstrap.

pub mod error;
pub(crate) mod handlers;
mod openapi;

pub use openapi::openapi;

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{ConnectInfo, MatchedPath, Request, State},
    http::{HeaderName, HeaderValue},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Extension, Router,
};
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use utoipa_swagger_ui::SwaggerUi;

use self::error::ApiError;
use crate::{
    authn::{
        anonymous::AnonymousVerifier, basic::BasicVerifier, bearer::BearerVerifier,
        lockout::AccountReconciler, password::PasswordAuthenticator, recorder::LoginRecorder,
        AuthenticationChain, CredentialVerifier,
    },
    authz::{path::default_allowlist, rbac::RbacAuthorizer, UnionAuthorizer},
    cache::{Cache, MemoryCache},
    config::AuthenticationOptions,
    pipeline::Pipeline,
    request::RequestInfoFactory,
    store::{postgres::PgStore, AccountStore, LoginEventSink, RoleBindingStore},
    token::TokenManager,
};

const REQUEST_ID: &str = "x-request-id";

/// External collaborators the pipeline reads from and writes to.
#[derive(Clone)]
pub struct Backends {
    pub accounts: Arc<dyn AccountStore>,
    pub bindings: Arc<dyn RoleBindingStore>,
    pub login_events: Arc<dyn LoginEventSink>,
    pub cache: Arc<dyn Cache>,
}

/// Shared by the admission middleware and the handlers.
pub struct AppState {
    pub(crate) pipeline: Pipeline,
    pub(crate) tokens: Arc<TokenManager>,
    pub(crate) passwords: Arc<PasswordAuthenticator>,
    pub(crate) recorder: Arc<LoginRecorder>,
    pub(crate) accounts: Arc<dyn AccountStore>,
}

impl AppState {
    /// Wire the authentication chain and authorizers from `options`.
    ///
    /// # Errors
    /// Returns an error if `options` are invalid.
    pub fn new(backends: &Backends, options: &AuthenticationOptions) -> Result<Self> {
        options.validate()?;

        let tokens = Arc::new(TokenManager::new(options, backends.cache.clone()));
        let passwords = Arc::new(PasswordAuthenticator::new(
            backends.accounts.clone(),
            backends.bindings.clone(),
        ));
        let recorder = Arc::new(LoginRecorder::new(backends.login_events.clone()));

        let mut verifiers: Vec<Arc<dyn CredentialVerifier>> = vec![
            Arc::new(BasicVerifier::new(passwords.clone(), recorder.clone())),
            Arc::new(BearerVerifier::new(tokens.clone(), backends.accounts.clone())),
        ];
        if options.anonymous() {
            verifiers.push(Arc::new(AnonymousVerifier));
        }

        let authorizer = UnionAuthorizer::new(vec![
            Arc::new(default_allowlist()?),
            Arc::new(RbacAuthorizer::new(backends.bindings.clone())),
        ]);

        Ok(Self {
            pipeline: Pipeline::new(
                RequestInfoFactory::default(),
                AuthenticationChain::new(verifiers),
                Arc::new(authorizer),
            ),
            tokens,
            passwords,
            recorder,
            accounts: backends.accounts.clone(),
        })
    }
}

/// Build the router: documented routes, Swagger UI, and the admission
/// middleware in front of all of them.
///
/// # Errors
/// Returns an error if `options` are invalid.
pub fn app(backends: &Backends, options: &AuthenticationOptions) -> Result<Router> {
    let state = Arc::new(AppState::new(backends, options)?);

    let (router, openapi) = openapi::api_router().split_for_parts();
    let app = router
        .route("/warden-apis/version", get(handlers::health::version))
        .merge(SwaggerUi::new("/apidocs").url("/apidocs.json", openapi))
        .fallback(handlers::not_found)
        .layer(middleware::from_fn_with_state(state.clone(), admit))
        .layer(Extension(state))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static(REQUEST_ID),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    REQUEST_ID,
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span)),
        );

    Ok(app)
}

/// Classify, authenticate and authorize; only admitted requests reach a
/// handler, carrying their [`crate::pipeline::RequestContext`].
async fn admit(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    mut request: Request,
    next: Next,
) -> Response {
    let peer = connect_info.map(|ConnectInfo(addr)| addr);
    let admitted = state
        .pipeline
        .admit(request.method(), request.uri(), request.headers(), peer)
        .await;

    match admitted {
        Ok(context) => {
            request.extensions_mut().insert(context);
            next.run(request).await
        }
        Err(err) => ApiError::from(err).into_response(),
    }
}

fn make_span(request: &axum::http::Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get(REQUEST_ID)
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

/// Start the server
/// # Errors
/// Return error if failed to connect to the database or to start the server
pub async fn new(
    port: u16,
    dsn: String,
    options: AuthenticationOptions,
    reconcile_interval: Duration,
) -> Result<()> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    let store = Arc::new(PgStore::new(pool));
    let backends = Backends {
        accounts: store.clone(),
        bindings: store.clone(),
        login_events: store.clone(),
        cache: Arc::new(MemoryCache::new()),
    };

    let reconciler = Arc::new(AccountReconciler::new(
        store.clone(),
        store,
        options.lockout(),
        options.login_history_retention_period(),
    ));
    let reconciler = reconciler.spawn(reconcile_interval);

    let app = app(&backends, &options)?;

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {err}");
        }
        info!("Gracefully shutdown");
    })
    .await?;

    reconciler.abort();

    Ok(())
}
