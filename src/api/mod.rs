pub mod admin;
pub mod chat;
pub mod embeddings;
pub mod health;

use axum::Router;
use axum::extract::rejection::JsonRejection;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use serde::Serialize;

use crate::AppState;
use crate::error::GatewayError;

/// Header carrying the caller's (or the request-id layer's) request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Build the full API router.
///
/// Route layout:
/// ```text
/// /health                GET    breaker-derived provider health
/// /health/connections    GET    one live "Hello" call per provider
/// /v1/chat               POST
/// /v1/chat/stream        POST   SSE
/// /v1/embeddings         POST
/// /admin/usage           GET    recent usage records
/// ```
pub fn build_api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/health/connections", get(health::test_connections))
        .route("/v1/chat", post(chat::chat))
        .route("/v1/chat/stream", post(chat::chat_stream))
        .route("/v1/embeddings", post(embeddings::create_embedding))
        .route("/admin/usage", get(admin::query_usage))
}

/// Success envelope: the payload's fields plus `"success": true`.
#[derive(Debug, Serialize)]
pub struct Success<T> {
    pub success: bool,
    #[serde(flatten)]
    pub data: T,
}

impl<T> Success<T> {
    pub fn new(data: T) -> Self {
        Self { success: true, data }
    }
}

/// The request id set by the `X-Request-ID` layer, if any.
pub fn request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl From<JsonRejection> for GatewayError {
    fn from(rejection: JsonRejection) -> Self {
        Self::InvalidRequest(rejection.body_text())
    }
}
