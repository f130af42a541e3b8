use std::convert::Infallible;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use tokio_stream::Stream;
use uuid::Uuid;

use crate::AppState;
use crate::api::{Success, request_id};
use crate::error::GatewayError;
use crate::gateway::{ChatReply, FragmentStream};
use crate::providers::types::{LlmRequest, StreamFragment, TokenUsage};

/// Fixed reply served while low-cost mode is on.
pub const LOW_COST_MESSAGE: &str =
    "AI features are running in low-cost mode. This is a placeholder response; no model was called.";
pub const LOW_COST_MODEL: &str = "low-cost-mode";

/// Parse the body and attach the request id header when the body has none.
fn prepare(
    headers: &HeaderMap,
    body: Result<Json<LlmRequest>, JsonRejection>,
) -> Result<LlmRequest, GatewayError> {
    let Json(mut request) = body?;
    if request.request_id.is_none() {
        request.request_id = request_id(headers);
    }
    Ok(request)
}

fn low_cost_reply(request: &LlmRequest) -> ChatReply {
    ChatReply {
        message: LOW_COST_MESSAGE.to_string(),
        model: LOW_COST_MODEL.to_string(),
        provider: "none".to_string(),
        cost_cents: 0,
        tokens: TokenUsage::default(),
        latency_ms: 0,
        request_id: request
            .request_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
    }
}

/// POST /v1/chat
pub async fn chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<LlmRequest>, JsonRejection>,
) -> Result<Json<Success<ChatReply>>, GatewayError> {
    let request = prepare(&headers, body)?;

    if state.config.low_cost_mode {
        tracing::debug!("Low-cost mode: serving fallback chat reply");
        return Ok(Json(Success::new(low_cost_reply(&request))));
    }

    let reply = state.gateway.chat(request).await?;
    Ok(Json(Success::new(reply)))
}

/// POST /v1/chat/stream
///
/// Server-sent events: one `data: {"content": ...}` event per fragment,
/// `data: {"error": ...}` if the provider fails mid-stream, and a final
/// `data: [DONE]`. Pre-dispatch failures return a JSON error instead.
pub async fn chat_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<LlmRequest>, JsonRejection>,
) -> Result<Response, GatewayError> {
    let request = prepare(&headers, body)?;

    let fragments: FragmentStream = if state.config.low_cost_mode {
        let fragment = StreamFragment {
            content: LOW_COST_MESSAGE.to_string(),
        };
        Box::pin(futures::stream::once(async move { Ok::<_, GatewayError>(fragment) }))
    } else {
        state.gateway.chat_stream(request).await?
    };

    Ok(Sse::new(sse_events(fragments))
        .keep_alive(KeepAlive::default())
        .into_response())
}

/// Render fragments as SSE events followed by the `[DONE]` sentinel.
pub fn sse_events(fragments: FragmentStream) -> impl Stream<Item = Result<Event, Infallible>> + Send {
    fragments
        .map(|item| {
            let payload = match item {
                Ok(fragment) => serde_json::json!({ "content": fragment.content }),
                Err(e) => serde_json::json!({ "error": e.to_string() }),
            };
            Ok::<_, Infallible>(Event::default().data(payload.to_string()))
        })
        .chain(futures::stream::once(async { Ok::<_, Infallible>(Event::default().data("[DONE]")) }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderError;

    #[test]
    fn test_low_cost_reply_is_free() {
        let reply = low_cost_reply(&LlmRequest::prompt("hi").with_request_id("req-1"));
        assert_eq!(reply.message, LOW_COST_MESSAGE);
        assert_eq!(reply.cost_cents, 0);
        assert_eq!(reply.request_id, "req-1");
    }

    #[test]
    fn test_prepare_prefers_body_request_id() {
        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", "from-header".parse().unwrap());

        let req = prepare(&headers, Ok(Json(LlmRequest::prompt("hi")))).unwrap();
        assert_eq!(req.request_id.as_deref(), Some("from-header"));

        let req = prepare(&headers, Ok(Json(LlmRequest::prompt("hi").with_request_id("from-body")))).unwrap();
        assert_eq!(req.request_id.as_deref(), Some("from-body"));
    }

    #[tokio::test]
    async fn test_sse_events_end_with_done() {
        let fragments: FragmentStream = Box::pin(futures::stream::iter(vec![
            Ok(StreamFragment { content: "a".into() }),
            Err(GatewayError::provider("direct", &ProviderError::Stream("reset".into()))),
        ]));
        let events: Vec<_> = sse_events(fragments).collect().await;
        assert_eq!(events.len(), 3);
    }
}
