//! HTTP surface tests, driven through the router with `tower::ServiceExt`.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use aigate::AppState;
use aigate::api::build_api_router;
use aigate::api::chat::LOW_COST_MESSAGE;
use aigate::config::Config;
use aigate::credits::SqliteCreditLedger;
use aigate::db::Database;
use aigate::gateway::Gateway;
use aigate::providers::cost::Pricing;
use aigate::providers::types::{LlmRequest, LlmResponse, Output, SubscriptionTier, TokenUsage};
use aigate::providers::{LlmProvider, ProviderFuture, ProviderKind};
use aigate::usage::SqliteUsageStore;

struct EchoProvider;

impl LlmProvider for EchoProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    fn supports_embeddings(&self) -> bool {
        true
    }

    fn pricing(&self, _model: &str) -> Pricing {
        Pricing::FREE
    }

    fn call<'a>(&'a self, request: &'a LlmRequest) -> ProviderFuture<'a, LlmResponse> {
        Box::pin(async move {
            let text = request
                .messages
                .last()
                .map(|m| m.content.clone())
                .or_else(|| request.input.clone())
                .unwrap_or_default();
            Ok(LlmResponse {
                output: Output::Text(format!("echo: {text}")),
                tokens: TokenUsage::new(2, 2),
                cost_cents: 0,
                model: request.model.clone().unwrap_or_default(),
                provider: "local".into(),
                latency_ms: 1,
            })
        })
    }
}

struct App {
    router: Router,
    state: AppState,
    ledger: Arc<SqliteCreditLedger>,
}

fn app(low_cost_mode: bool, providers: Vec<Arc<dyn LlmProvider>>) -> App {
    let db = Database::open_in_memory().unwrap();
    let ledger = Arc::new(SqliteCreditLedger::new(db.clone()));
    let store = Arc::new(SqliteUsageStore::new(db));
    let gateway = Gateway::builder(ledger.clone(), store.clone())
        .providers(providers)
        .build();

    let config = Config {
        low_cost_mode,
        ..Config::default()
    };
    let state = AppState {
        config: Arc::new(config),
        gateway: Arc::new(gateway),
        usage_store: Some(store),
    };
    App {
        router: build_api_router().with_state(state.clone()),
        state,
        ledger,
    }
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_text(resp: axum::response::Response) -> String {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(resp: axum::response::Response) -> Value {
    serde_json::from_str(&body_text(resp).await).unwrap()
}

#[tokio::test]
async fn chat_returns_success_envelope() {
    let app = app(false, vec![Arc::new(EchoProvider)]);
    app.ledger.set_account("alice", 10, SubscriptionTier::Basic).unwrap();

    let resp = app
        .router
        .oneshot(post(
            "/v1/chat",
            json!({"messages": [{"role": "user", "content": "ping"}], "userId": "alice"}),
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["message"], "echo: ping");
    assert_eq!(json["provider"], "local");
    assert_eq!(json["tokens"]["prompt"], 2);
}

#[tokio::test]
async fn request_id_header_becomes_usage_request_id() {
    let app = app(false, vec![Arc::new(EchoProvider)]);

    let mut req = post("/v1/chat", json!({"input": "hi"}));
    req.headers_mut().insert("x-request-id", "req-from-header".parse().unwrap());
    let resp = app.router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .router
        .oneshot(Request::get("/admin/usage?limit=5").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let json = body_json(resp).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["data"][0]["requestId"], "req-from-header");
    assert_eq!(json["data"][0]["userId"], "system");
}

#[tokio::test]
async fn insufficient_credits_is_402() {
    let app = app(false, vec![Arc::new(EchoProvider)]);

    let resp = app
        .router
        .oneshot(post("/v1/chat", json!({"input": "hi", "userId": "nobody"})))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::PAYMENT_REQUIRED);
    let json = body_json(resp).await;
    assert_eq!(json["success"], false);
    assert!(json["error"].as_str().unwrap().starts_with("Insufficient credits"));
    assert_eq!(app.state.gateway.usage_len(), 0);
}

#[tokio::test]
async fn no_provider_is_503() {
    let app = app(false, vec![]);
    let resp = app.router.oneshot(post("/v1/chat", json!({"input": "hi"}))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(resp).await["code"], "no_provider_available");
}

#[tokio::test]
async fn malformed_body_is_structured_400() {
    let app = app(false, vec![Arc::new(EchoProvider)]);
    let req = Request::builder()
        .method("POST")
        .uri("/v1/chat")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let resp = app.router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let json = body_json(resp).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["code"], "invalid_request");
}

#[tokio::test]
async fn low_cost_mode_skips_gateway() {
    // No providers: anything reaching the gateway would fail.
    let app = app(true, vec![]);

    let resp = app
        .router
        .clone()
        .oneshot(post("/v1/chat", json!({"input": "hi", "userId": "nobody"})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["message"], LOW_COST_MESSAGE);

    let resp = app
        .router
        .clone()
        .oneshot(post("/v1/embeddings", json!({"text": "embed me"})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["embedding"], json!([0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]));

    let resp = app
        .router
        .oneshot(post("/v1/chat/stream", json!({"input": "hi"})))
        .await
        .unwrap();
    let text = body_text(resp).await;
    assert!(text.contains("low-cost mode"));
    assert!(text.contains("data: [DONE]"));
    assert_eq!(app.state.gateway.usage_len(), 0);
}

#[tokio::test]
async fn stream_endpoint_emits_sse() {
    let app = app(false, vec![Arc::new(EchoProvider)]);

    let resp = app
        .router
        .oneshot(post("/v1/chat/stream", json!({"input": "stream me"})))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["content-type"], "text/event-stream");
    let text = body_text(resp).await;
    assert!(text.contains(r#"data: {"content":"echo: stream me"}"#));
    assert!(text.trim_end().ends_with("data: [DONE]"));
    assert_eq!(app.state.gateway.usage_len(), 1);
}

#[tokio::test]
async fn health_reports_breaker_state() {
    let app = app(false, vec![Arc::new(EchoProvider)]);
    for _ in 0..3 {
        app.state.gateway.breakers().record_failure(ProviderKind::Local);
    }

    let resp = app
        .router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["providers"]["local"]["status"], "unhealthy");
    assert_eq!(json["providers"]["local"]["failures"], 3);
    assert_eq!(json["providers"]["local"]["uptime"], 0.0);
}

#[tokio::test]
async fn connection_test_calls_each_provider() {
    let app = app(false, vec![Arc::new(EchoProvider)]);
    let resp = app
        .router
        .oneshot(Request::get("/health/connections").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let json = body_json(resp).await;
    assert_eq!(json["local"]["status"], "connected");
    assert!(json["local"].get("error").is_none());
}
