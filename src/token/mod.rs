//! Token issuance and verification.
//!
//! Every issuance mints an access and a refresh token signed with the shared
//! secret. When the configured access token max age is non-zero both are also
//! written to the cache under `warden:user:<name>:token:<token>`; verification
//! then requires the entry to exist, which is how logout and forced revocation
//! take effect before a token expires.
//!
//! With a zero max age tokens carry no `exp`, are never cached and cannot be
//! revoked server-side. Static tokens are never checked against the cache
//! either.

pub mod jwt;

use chrono::Utc;
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::debug;
use utoipa::ToSchema;

use self::jwt::{Claims, JwtCodec};
use crate::{
    authn::Identity,
    cache::Cache,
    config::AuthenticationOptions,
    error::AuthenticationError,
};

pub const TOKEN_TYPE_BEARER: &str = "Bearer";
pub const TOKEN_TYPE_STATIC: &str = "static_token";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenKind {
    #[serde(rename = "access_token")]
    Access,
    #[serde(rename = "refresh_token")]
    Refresh,
    #[serde(rename = "static_token")]
    Static,
}

/// Token endpoint response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Token {
    pub access_token: String,
    /// `Bearer`, or `static_token` for long-lived tokens.
    pub token_type: String,
    pub refresh_token: String,
    /// Seconds until the access token expires, `0` if it never does.
    pub expires_in: u64,
}

fn cache_key(username: &str, token: &str) -> String {
    format!("warden:user:{username}:token:{token}")
}

fn user_prefix(username: &str) -> String {
    format!("warden:user:{username}:token:")
}

fn token_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect()
}

fn seconds(duration: Duration) -> i64 {
    i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
}

pub struct TokenManager {
    codec: JwtCodec,
    cache: Arc<dyn Cache>,
    access_token_max_age: Duration,
    inactivity_timeout: Duration,
    multiple_login: bool,
}

impl TokenManager {
    #[must_use]
    pub fn new(options: &AuthenticationOptions, cache: Arc<dyn Cache>) -> Self {
        Self {
            codec: JwtCodec::new(options.jwt_secret(), options.maximum_clock_skew()),
            cache,
            access_token_max_age: options.access_token_max_age(),
            inactivity_timeout: options.access_token_inactivity_timeout(),
            multiple_login: options.multiple_login(),
        }
    }

    /// Mint an access/refresh pair for `identity`.
    ///
    /// Passing both lifetime overrides issues a static token; a single
    /// override is ignored.
    ///
    /// # Errors
    /// Returns an error if signing or caching fails.
    pub async fn issue_to(
        &self,
        identity: &Identity,
        access_max_age: Option<Duration>,
        inactivity_timeout: Option<Duration>,
    ) -> Result<Token, AuthenticationError> {
        let (max_age, inactivity, is_static) = match access_max_age.zip(inactivity_timeout) {
            Some((max_age, inactivity)) => (max_age, inactivity, true),
            None => (self.access_token_max_age, self.inactivity_timeout, false),
        };
        let refresh_age = max_age.saturating_add(inactivity);

        let now = Utc::now().timestamp();
        let expiry = |age: Duration| (!age.is_zero()).then(|| now.saturating_add(seconds(age)));

        let access_kind = if is_static {
            TokenKind::Static
        } else {
            TokenKind::Access
        };
        let access_token = self.codec.encode(&Claims {
            sub: identity.name.clone(),
            token_type: access_kind,
            iat: now,
            exp: expiry(max_age),
            jti: token_id(),
            extra: identity.extra.clone(),
        })?;
        let refresh_token = self.codec.encode(&Claims {
            sub: identity.name.clone(),
            token_type: TokenKind::Refresh,
            iat: now,
            exp: expiry(refresh_age),
            jti: token_id(),
            extra: identity.extra.clone(),
        })?;

        if !max_age.is_zero() {
            if !self.multiple_login {
                self.revoke_all(&identity.name).await?;
            }
            self.cache
                .set(
                    &cache_key(&identity.name, &access_token),
                    TOKEN_TYPE_BEARER,
                    max_age,
                )
                .await?;
            self.cache
                .set(
                    &cache_key(&identity.name, &refresh_token),
                    TOKEN_TYPE_BEARER,
                    refresh_age,
                )
                .await?;
        }

        debug!(user = %identity.name, is_static, "issued token pair");

        Ok(Token {
            access_token,
            token_type: if is_static {
                TOKEN_TYPE_STATIC
            } else {
                TOKEN_TYPE_BEARER
            }
            .to_string(),
            refresh_token,
            expires_in: max_age.as_secs(),
        })
    }

    /// Check a token and return who it was issued to.
    ///
    /// The returned identity carries the name and extras from the token; group
    /// membership is resolved by the caller from the live account.
    ///
    /// # Errors
    /// * `TokenInvalid` for bad signatures or expired tokens.
    /// * `TokenRevoked` when a tracked token is missing from the cache.
    /// * `Upstream` when the cache fails.
    pub async fn verify(&self, token: &str) -> Result<(Identity, TokenKind), AuthenticationError> {
        let claims = self.codec.decode(token, Utc::now().timestamp())?;

        let tracked = !self.access_token_max_age.is_zero() && claims.token_type != TokenKind::Static;
        if tracked && !self.cache.exists(&cache_key(&claims.sub, token)).await? {
            return Err(AuthenticationError::TokenRevoked);
        }

        let identity = Identity {
            name: claims.sub,
            groups: Default::default(),
            extra: claims.extra,
        };
        Ok((identity, claims.token_type))
    }

    /// Forget one token so it no longer verifies.
    ///
    /// # Errors
    /// Returns an error if the cache fails.
    pub async fn revoke(&self, username: &str, token: &str) -> Result<(), AuthenticationError> {
        self.cache.del(&[cache_key(username, token)]).await?;
        Ok(())
    }

    /// Forget every tracked token of `username`.
    ///
    /// # Errors
    /// Returns an error if the cache fails.
    pub async fn revoke_all(&self, username: &str) -> Result<(), AuthenticationError> {
        let keys = self.cache.keys(&user_prefix(username)).await?;
        if !keys.is_empty() {
            self.cache.del(&keys).await?;
        }
        Ok(())
    }
}
