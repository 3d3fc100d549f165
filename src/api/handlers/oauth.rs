//! OAuth-style token endpoints.
//!
//! `/oauth/token` is reachable without credentials; the password grant checks
//! the submitted username and password itself. The other endpoints act on the
//! identity established by the admission pipeline.

use axum::{
    extract::{Extension, Form},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use secrecy::SecretString;
use serde::Deserialize;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info};
use utoipa::ToSchema;

use crate::{
    api::{error::ApiError, AppState},
    authn::{
        bearer::extract_bearer_token, recorder::LoginAttempt, Identity, GROUP_AUTHENTICATED,
    },
    error::AuthenticationError,
    pipeline::{PipelineError, RequestContext},
    store::{AccountState, LoginMethod},
    token::{Token, TokenKind},
};

pub const GRANT_PASSWORD: &str = "password";
pub const GRANT_REFRESH_TOKEN: &str = "refresh_token";

#[derive(ToSchema, Deserialize, Debug, Default)]
pub struct TokenRequest {
    /// `password` or `refresh_token`.
    pub grant_type: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[utoipa::path(
    post,
    path = "/oauth/token",
    request_body(content = TokenRequest, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Token pair issued", body = Token),
        (status = 400, description = "Unsupported grant type"),
        (status = 401, description = "Invalid credentials"),
        (status = 429, description = "Account locked after repeated failures")
    ),
    tag = "oauth"
)]
pub async fn token(
    state: Extension<Arc<AppState>>,
    context: Extension<RequestContext>,
    Form(request): Form<TokenRequest>,
) -> Result<Json<Token>, ApiError> {
    let grant_type = request.grant_type.clone();
    let token = match grant_type.as_str() {
        GRANT_PASSWORD => password_grant(&state, &context, request).await?,
        GRANT_REFRESH_TOKEN => refresh_grant(&state, request).await?,
        other => {
            return Err(ApiError::BadRequest(format!(
                "unsupported grant type: {other:?}"
            )))
        }
    };
    Ok(Json(token))
}

async fn password_grant(
    state: &AppState,
    context: &RequestContext,
    request: TokenRequest,
) -> Result<Token, ApiError> {
    let username = request.username.unwrap_or_default();
    let password = SecretString::from(request.password.unwrap_or_default());

    let result = state.passwords.authenticate(&username, &password).await;

    let provider = result
        .as_ref()
        .map(|(_, provider)| provider.clone())
        .unwrap_or_default();
    let attempt = LoginAttempt {
        username: &username,
        method: LoginMethod::Token,
        provider: &provider,
        source_ip: context.attributes.source_ip.as_deref(),
        user_agent: context.attributes.user_agent.as_deref(),
    };

    let identity = match result {
        Ok((identity, _)) => {
            state.recorder.record(&attempt, Ok(())).await;
            identity
        }
        Err(err) => {
            if matches!(err, AuthenticationError::IncorrectCredential) {
                state.recorder.record(&attempt, Err(&err)).await;
            }
            return Err(err.into());
        }
    };

    info!(user = %identity.name, "password grant");
    Ok(state.tokens.issue_to(&identity, None, None).await?)
}

async fn refresh_grant(state: &AppState, request: TokenRequest) -> Result<Token, ApiError> {
    let refresh_token = request
        .refresh_token
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ApiError::BadRequest("refresh_token is required".to_string()))?;

    let (claims, kind) = state.tokens.verify(&refresh_token).await?;
    if kind != TokenKind::Refresh {
        return Err(
            AuthenticationError::TokenInvalid("not a refresh token".to_string()).into(),
        );
    }

    let account = state
        .accounts
        .get(&claims.name)
        .await
        .map_err(AuthenticationError::from)?
        .ok_or_else(|| {
            AuthenticationError::TokenInvalid(format!("user {:?} not found", claims.name))
        })?;
    if account.state != AccountState::Active {
        return Err(AuthenticationError::AccountNotActive.into());
    }

    let identity = Identity {
        name: account.name,
        groups: account.groups.into_iter().collect(),
        extra: claims.extra,
    }
    .with_groups([GROUP_AUTHENTICATED]);

    debug!(user = %identity.name, "refresh grant");
    Ok(state.tokens.issue_to(&identity, None, None).await?)
}

fn caller(context: &RequestContext) -> Result<&Identity, ApiError> {
    context
        .identity
        .as_ref()
        .filter(|identity| !identity.is_anonymous())
        .ok_or(ApiError::Pipeline(PipelineError::Unauthenticated))
}

#[utoipa::path(
    post,
    path = "/oauth/statictoken",
    responses(
        (status = 200, description = "Non-expiring token issued to the caller", body = Token),
        (status = 401, description = "No authenticated caller")
    ),
    tag = "oauth"
)]
pub async fn static_token(
    state: Extension<Arc<AppState>>,
    context: Extension<RequestContext>,
) -> Result<Json<Token>, ApiError> {
    let identity = caller(&context)?;
    let token = state
        .tokens
        .issue_to(identity, Some(Duration::ZERO), Some(Duration::ZERO))
        .await?;
    info!(user = %identity.name, "static token issued");
    Ok(Json(token))
}

#[utoipa::path(
    post,
    path = "/oauth/logout",
    responses(
        (status = 200, description = "Presented token revoked"),
        (status = 400, description = "No bearer token presented"),
        (status = 401, description = "No authenticated caller")
    ),
    tag = "oauth"
)]
pub async fn logout(
    state: Extension<Arc<AppState>>,
    context: Extension<RequestContext>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let identity = caller(&context)?;
    let token = extract_bearer_token(&headers)
        .ok_or_else(|| ApiError::BadRequest("no bearer token presented".to_string()))?;
    state.tokens.revoke(&identity.name, token).await?;
    info!(user = %identity.name, "logged out");
    Ok(StatusCode::OK)
}
