//! HTTP handlers. Every handler runs after the admission middleware, so the
//! [`crate::pipeline::RequestContext`] extension is always present.

pub mod health;
pub mod oauth;

use axum::http::StatusCode;

pub async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "not found")
}
