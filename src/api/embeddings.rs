use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::HeaderMap;

use crate::AppState;
use crate::api::chat::LOW_COST_MODEL;
use crate::api::{Success, request_id};
use crate::error::GatewayError;
use crate::gateway::EmbedReply;
use crate::providers::types::{EmbedRequest, TokenUsage};

/// Dimension of the zero vector served in low-cost mode.
pub const LOW_COST_EMBEDDING_DIM: usize = 8;

/// POST /v1/embeddings
pub async fn create_embedding(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<EmbedRequest>, JsonRejection>,
) -> Result<Json<Success<EmbedReply>>, GatewayError> {
    let Json(mut request) = body?;
    if request.request_id.is_none() {
        request.request_id = request_id(&headers);
    }

    if state.config.low_cost_mode {
        tracing::debug!("Low-cost mode: serving zero embedding");
        return Ok(Json(Success::new(low_cost_embedding())));
    }

    let reply = state.gateway.embed(request).await?;
    Ok(Json(Success::new(reply)))
}

fn low_cost_embedding() -> EmbedReply {
    EmbedReply {
        embedding: vec![0.0; LOW_COST_EMBEDDING_DIM],
        model: LOW_COST_MODEL.to_string(),
        provider: "none".to_string(),
        tokens: TokenUsage::default(),
        latency_ms: 0,
    }
}
