//! Gateway facade.
//!
//! The single entry point for inference. Every call runs the same pipeline:
//! resolve the subject, pick eligible providers, ask the credit gate, pick a
//! model, dispatch, then record usage. Anything that fails before dispatch
//! returns without touching a provider or the usage ring.

pub mod stream;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::credits::{CreditGate, CreditLedger, resolve_subject};
use crate::error::GatewayError;
use crate::providers::health::{CircuitBreakerConfig, CircuitState};
use crate::providers::models::select_model;
use crate::providers::types::{
    EmbedRequest, LlmRequest, LlmResponse, StreamFragment, SubscriptionTier, TaskType, TokenUsage,
};
use crate::providers::{CircuitBreakerRegistry, LlmProvider, ProviderKind, ProviderSelector, build_providers};
use crate::usage::{UsageRecord, UsageRecorder, UsageRing, UsageStore, spawn_usage_writer};

pub use self::stream::{FragmentStream, MeteredStream};
use self::stream::StreamAccounting;

const DEFAULT_RING_CAPACITY: usize = 1000;
const DEFAULT_BATCH_SIZE: usize = 100;
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(1000);

// ---------------------------------------------------------------------------
// Replies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub message: String,
    pub model: String,
    pub provider: String,
    pub cost_cents: u64,
    pub tokens: TokenUsage,
    pub latency_ms: u64,
    pub request_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbedReply {
    pub embedding: Vec<f32>,
    pub model: String,
    pub provider: String,
    pub tokens: TokenUsage,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Failed,
}

/// Result of one diagnostic "Hello" call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionReport {
    pub status: ConnectionStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Breaker-derived health of one provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderHealth {
    pub status: HealthStatus,
    pub failures: u32,
    pub uptime: f64,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

pub struct GatewayBuilder {
    ledger: Arc<dyn CreditLedger>,
    store: Arc<dyn UsageStore>,
    providers: Vec<Arc<dyn LlmProvider>>,
    breaker_config: CircuitBreakerConfig,
    ring_capacity: usize,
    embedding_provider: Option<ProviderKind>,
    failover: bool,
    batch_size: usize,
    flush_interval: Duration,
}

impl GatewayBuilder {
    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn providers(mut self, providers: impl IntoIterator<Item = Arc<dyn LlmProvider>>) -> Self {
        self.providers.extend(providers);
        self
    }

    pub fn breaker_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker_config = config;
        self
    }

    pub fn ring_capacity(mut self, capacity: usize) -> Self {
        self.ring_capacity = capacity;
        self
    }

    pub fn embedding_provider(mut self, kind: ProviderKind) -> Self {
        self.embedding_provider = Some(kind);
        self
    }

    /// Retry a failed call against the next eligible provider.
    pub fn failover(mut self, enabled: bool) -> Self {
        self.failover = enabled;
        self
    }

    /// Usage writer batching.
    pub fn batch(mut self, size: usize, flush_interval: Duration) -> Self {
        self.batch_size = size;
        self.flush_interval = flush_interval;
        self
    }

    /// Assemble the gateway and start its usage writer. Must run inside a
    /// Tokio runtime.
    pub fn build(self) -> Gateway {
        let breakers = Arc::new(CircuitBreakerRegistry::new(self.breaker_config));
        let mut selector =
            ProviderSelector::new(Arc::clone(&breakers)).with_embedding_provider(self.embedding_provider);
        for p in self.providers {
            selector.register(p);
        }

        let gate = CreditGate::new(self.ledger);
        let ring = Arc::new(UsageRing::new(self.ring_capacity));
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = spawn_usage_writer(self.store, gate.clone(), rx, self.batch_size, self.flush_interval);

        Gateway {
            selector,
            breakers,
            gate,
            recorder: UsageRecorder::new(ring, tx),
            failover: self.failover,
            writer: Mutex::new(Some(writer)),
        }
    }
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// What the pre-dispatch checks established for one call.
struct Admission {
    request_id: String,
    subject: String,
    tier: SubscriptionTier,
    candidates: Vec<Arc<dyn LlmProvider>>,
}

pub struct Gateway {
    selector: ProviderSelector,
    breakers: Arc<CircuitBreakerRegistry>,
    gate: CreditGate,
    recorder: UsageRecorder,
    failover: bool,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl Gateway {
    pub fn builder(ledger: Arc<dyn CreditLedger>, store: Arc<dyn UsageStore>) -> GatewayBuilder {
        GatewayBuilder {
            ledger,
            store,
            providers: Vec::new(),
            breaker_config: CircuitBreakerConfig::default(),
            ring_capacity: DEFAULT_RING_CAPACITY,
            embedding_provider: None,
            failover: false,
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }

    /// Build a gateway with every provider `config` fully describes.
    pub fn from_config(config: &Config, ledger: Arc<dyn CreditLedger>, store: Arc<dyn UsageStore>) -> Self {
        Self::builder(ledger, store)
            .providers(build_providers(&config.providers))
            .breaker_config((&config.circuit_breaker).into())
            .ring_capacity(config.usage.ring_capacity)
            .embedding_provider(config.providers.embedding_provider)
            .failover(config.routing.failover)
            .batch(config.usage.batch_size, config.flush_interval())
            .build()
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn selector(&self) -> &ProviderSelector {
        &self.selector
    }

    // -- Pipeline --------------------------------------------------------

    async fn admit(&self, request: &mut LlmRequest) -> Result<Admission, GatewayError> {
        let request_id = request
            .request_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        request.request_id = Some(request_id.clone());

        let subject = resolve_subject(request.user_id.as_deref());
        request.user_id = Some(subject.clone());

        let candidates = self.selector.candidates(request);
        if candidates.is_empty() {
            warn!(request_id = %request_id, task = %request.task, "No provider available");
            return Err(GatewayError::NoProviderAvailable);
        }

        let auth = self.gate.authorize(&subject).await?;
        if !auth.allowed {
            info!(request_id = %request_id, user_id = %subject, "Request denied: insufficient credits");
            return Err(GatewayError::InsufficientCredits);
        }

        Ok(Admission {
            request_id,
            subject,
            tier: auth.tier,
            candidates,
        })
    }

    /// Model for `provider`. A caller-supplied model wins.
    fn model_for(request: &LlmRequest, provider: &dyn LlmProvider, tier: SubscriptionTier) -> String {
        match request.model.as_deref().map(str::trim) {
            Some(m) if !m.is_empty() => m.to_string(),
            _ => select_model(request.role, provider.kind(), tier).to_string(),
        }
    }

    fn usage_template(request: &LlmRequest, admission: &Admission, provider: &str, model: &str) -> UsageRecord {
        let mut record = UsageRecord::new(admission.subject.clone(), admission.request_id.clone(), request.task)
            .with_org(request.org_id.clone())
            .with_provider(provider, model)
            .with_meta("sensitivity", serde_json::to_value(request.sensitivity).unwrap_or_default());
        if let Some(ref tenant) = request.tenant_id {
            record = record.with_meta("tenantId", tenant.as_str());
        }
        record
    }

    /// Call the admitted candidates in order until one succeeds (or only the
    /// first, without failover). Records exactly one usage entry.
    async fn dispatch(&self, request: &LlmRequest, admission: &Admission) -> Result<LlmResponse, GatewayError> {
        let limit = if self.failover { admission.candidates.len() } else { 1 };
        let mut last_failure: Option<(UsageRecord, GatewayError)> = None;

        for (attempt, provider) in admission.candidates.iter().take(limit).enumerate() {
            let kind = provider.kind();
            let model = Self::model_for(request, provider.as_ref(), admission.tier);
            let mut call = request.clone();
            call.model = Some(model.clone());

            let start = Instant::now();
            match provider.call(&call).await {
                Ok(response) => {
                    self.breakers.record_success(kind);
                    info!(
                        request_id = %admission.request_id,
                        user_id = %admission.subject,
                        provider = %response.provider,
                        model = %response.model,
                        latency_ms = response.latency_ms,
                        cost_cents = response.cost_cents,
                        "AI request completed"
                    );
                    let record = Self::usage_template(request, admission, &response.provider, &response.model)
                        .with_usage(response.tokens, response.cost_cents)
                        .with_latency(response.latency_ms)
                        .with_meta("streamed", false)
                        .with_meta("attempts", attempt + 1);
                    self.recorder.record(record);
                    return Ok(response);
                }
                Err(e) => {
                    self.breakers.record_failure(kind);
                    warn!(
                        request_id = %admission.request_id,
                        provider = %kind,
                        model = %model,
                        error = %e,
                        "AI request failed"
                    );
                    let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
                    let record = Self::usage_template(request, admission, provider.name(), &model)
                        .with_latency(latency_ms)
                        .with_meta("streamed", false)
                        .with_meta("attempts", attempt + 1)
                        .failed(e.to_string());
                    last_failure = Some((record, GatewayError::provider(provider.name(), &e)));
                }
            }
        }

        match last_failure {
            Some((record, err)) => {
                self.recorder.record(record);
                Err(err)
            }
            None => Err(GatewayError::NoProviderAvailable),
        }
    }

    // -- Public operations -----------------------------------------------

    pub async fn chat(&self, mut request: LlmRequest) -> Result<ChatReply, GatewayError> {
        validate_chat(&request)?;
        request.task = TaskType::Chat;

        let admission = self.admit(&mut request).await?;
        let response = self.dispatch(&request, &admission).await?;

        Ok(ChatReply {
            message: response.output.into_text().unwrap_or_default(),
            model: response.model,
            provider: response.provider,
            cost_cents: response.cost_cents,
            tokens: response.tokens,
            latency_ms: response.latency_ms,
            request_id: admission.request_id,
        })
    }

    pub async fn embed(&self, request: EmbedRequest) -> Result<EmbedReply, GatewayError> {
        if request.text.trim().is_empty() {
            return Err(GatewayError::InvalidRequest("text must not be empty".into()));
        }
        let mut request = LlmRequest::from(request);

        let admission = self.admit(&mut request).await?;
        let response = self.dispatch(&request, &admission).await?;

        Ok(EmbedReply {
            embedding: response.output.into_embedding().unwrap_or_default(),
            model: response.model,
            provider: response.provider,
            tokens: response.tokens,
            latency_ms: response.latency_ms,
        })
    }

    /// Open a streaming chat. Fails before yielding anything when no
    /// provider is available or credits are insufficient.
    ///
    /// Usage is recorded once, when the returned stream ends or is dropped.
    /// Providers that cannot stream answer with a single fragment.
    pub async fn chat_stream(&self, mut request: LlmRequest) -> Result<FragmentStream, GatewayError> {
        validate_chat(&request)?;
        request.task = TaskType::Chat;

        let admission = self.admit(&mut request).await?;
        let Some(provider) = admission.candidates.first().cloned() else {
            return Err(GatewayError::NoProviderAvailable);
        };

        let model = Self::model_for(&request, provider.as_ref(), admission.tier);
        let mut call = request.clone();
        call.model = Some(model.clone());

        let Some(opening) = provider.call_stream(&call) else {
            info!(provider = %provider.kind(), "Provider cannot stream, answering in one fragment");
            let response = self.dispatch(&request, &admission).await?;
            let fragment = StreamFragment {
                content: response.output.into_text().unwrap_or_default(),
            };
            let stream: FragmentStream =
                Box::pin(futures::stream::once(async move { Ok::<_, GatewayError>(fragment) }));
            return Ok(stream);
        };

        let start = Instant::now();
        let deltas = match opening.await {
            Ok(deltas) => deltas,
            Err(e) => {
                self.breakers.record_failure(provider.kind());
                warn!(request_id = %admission.request_id, provider = %provider.kind(), error = %e, "Stream open failed");
                let record = Self::usage_template(&request, &admission, provider.name(), &model)
                    .with_latency(u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX))
                    .with_meta("streamed", true)
                    .failed(e.to_string());
                self.recorder.record(record);
                return Err(GatewayError::provider(provider.name(), &e));
            }
        };

        info!(
            request_id = %admission.request_id,
            user_id = %admission.subject,
            provider = %provider.kind(),
            model = %model,
            "Stream opened"
        );

        let accounting = StreamAccounting {
            recorder: self.recorder.clone(),
            breakers: Arc::clone(&self.breakers),
            kind: provider.kind(),
            pricing: provider.pricing(&model),
            template: Self::usage_template(&request, &admission, provider.name(), &model).with_meta("streamed", true),
            model,
            prompt_chars: request.prompt_chars(),
            start,
        };
        let stream: FragmentStream = Box::pin(MeteredStream::new(deltas, accounting));
        Ok(stream)
    }

    /// Send one trivial chat to every registered provider, bypassing
    /// selection, credits and usage accounting.
    pub async fn test_connections(&self) -> BTreeMap<String, ConnectionReport> {
        let checks = self.selector.providers().iter().map(|provider| async move {
            let mut request = LlmRequest::prompt("Hello");
            request.max_tokens = Some(5);
            request.model = Some(select_model(request.role, provider.kind(), SubscriptionTier::Basic).to_string());

            let result = provider.call(&request).await;
            let report = ConnectionReport {
                status: if result.is_ok() {
                    ConnectionStatus::Connected
                } else {
                    ConnectionStatus::Failed
                },
                timestamp: Utc::now(),
                error: result.err().map(|e| e.to_string()),
            };
            (provider.name().to_string(), report)
        });
        futures::future::join_all(checks).await.into_iter().collect()
    }

    /// Breaker-derived health of every registered provider. No network.
    pub fn provider_health(&self) -> BTreeMap<String, ProviderHealth> {
        self.selector
            .providers()
            .iter()
            .map(|p| {
                let snap = self.breakers.snapshot(p.kind());
                let status = match snap.state {
                    CircuitState::Closed => HealthStatus::Healthy,
                    CircuitState::Open => HealthStatus::Unhealthy,
                };
                (
                    p.name().to_string(),
                    ProviderHealth {
                        status,
                        failures: snap.failures,
                        uptime: snap.uptime,
                    },
                )
            })
            .collect()
    }

    /// Most recent usage records from the in-memory ring, newest first.
    pub fn recent_usage(&self, limit: usize) -> Vec<UsageRecord> {
        self.recorder.ring().recent(limit)
    }

    pub fn usage_len(&self) -> usize {
        self.recorder.ring().len()
    }

    /// Stop accepting usage and wait for the writer to flush. Streams still
    /// held by callers keep the writer alive until they are dropped.
    pub async fn shutdown(self) {
        let writer = self.writer.lock().take();
        drop(self.recorder);
        if let Some(handle) = writer {
            if let Err(e) = handle.await {
                warn!(error = %e, "Usage writer task failed");
            }
        }
    }
}

fn validate_chat(request: &LlmRequest) -> Result<(), GatewayError> {
    let has_input = request.input.as_deref().is_some_and(|s| !s.trim().is_empty());
    if request.messages.is_empty() && !has_input {
        return Err(GatewayError::InvalidRequest("messages or input is required".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credits::{CreditStatus, Deduction, LedgerFuture, SYSTEM_USER_ID};
    use crate::providers::cost::Pricing;
    use crate::providers::types::{ChatMessage, Output};
    use crate::providers::{ProviderError, ProviderFuture};
    use crate::usage::UsageFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeProvider {
        kind: ProviderKind,
        fail: bool,
        calls: AtomicUsize,
    }

    impl FakeProvider {
        fn new(kind: ProviderKind, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                kind,
                fail,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl LlmProvider for FakeProvider {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        fn supports_embeddings(&self) -> bool {
            true
        }

        fn pricing(&self, _model: &str) -> Pricing {
            Pricing::new(0.01, 0.01)
        }

        fn call<'a>(&'a self, request: &'a LlmRequest) -> ProviderFuture<'a, LlmResponse> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if self.fail {
                    return Err(ProviderError::Api {
                        status: 500,
                        message: "upstream exploded".into(),
                    });
                }
                let output = match request.task {
                    TaskType::Chat => Output::Text(format!("hi from {}", self.kind)),
                    TaskType::Embed => Output::Embedding(vec![0.1, 0.2]),
                };
                Ok(LlmResponse {
                    output,
                    tokens: TokenUsage::new(5, 5),
                    cost_cents: 1,
                    model: request.model.clone().unwrap_or_default(),
                    provider: self.kind.to_string(),
                    latency_ms: 3,
                })
            })
        }
    }

    struct FixedLedger(bool);

    impl CreditLedger for FixedLedger {
        fn status<'a>(&'a self, _user_id: &'a str) -> LedgerFuture<'a, CreditStatus> {
            let allowed = self.0;
            Box::pin(async move { Ok(CreditStatus::new(allowed, SubscriptionTier::Basic)) })
        }

        fn deduct<'a>(&'a self, _deduction: &'a Deduction) -> LedgerFuture<'a, ()> {
            Box::pin(async { Ok(()) })
        }
    }

    struct NullStore;

    impl UsageStore for NullStore {
        fn persist<'a>(&'a self, _records: &'a [UsageRecord]) -> UsageFuture<'a, ()> {
            Box::pin(async { Ok(()) })
        }
    }

    fn gateway(allowed: bool, providers: Vec<Arc<dyn LlmProvider>>) -> Gateway {
        Gateway::builder(Arc::new(FixedLedger(allowed)), Arc::new(NullStore))
            .providers(providers)
            .build()
    }

    fn hello() -> LlmRequest {
        LlmRequest::chat(vec![ChatMessage::user("hello")]).with_user("alice")
    }

    #[tokio::test]
    async fn test_chat_returns_reply_and_records_usage() {
        let direct = FakeProvider::new(ProviderKind::Direct, false);
        let gw = gateway(true, vec![direct.clone()]);

        let reply = gw.chat(hello().with_request_id("req-42")).await.unwrap();
        assert_eq!(reply.provider, "direct");
        assert_eq!(reply.model, "gpt-4o-mini");
        assert_eq!(reply.message, "hi from direct");
        assert_eq!(reply.request_id, "req-42");

        let usage = gw.recent_usage(10);
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].user_id, "alice");
        assert_eq!(usage[0].request_id, "req-42");
        assert!(usage[0].success);
    }

    #[tokio::test]
    async fn test_denied_request_touches_nothing() {
        let direct = FakeProvider::new(ProviderKind::Direct, false);
        let gw = gateway(false, vec![direct.clone()]);

        let err = gw.chat(hello()).await.unwrap_err();
        assert!(matches!(err, GatewayError::InsufficientCredits));
        assert_eq!(direct.calls.load(Ordering::SeqCst), 0);
        assert_eq!(gw.usage_len(), 0);
    }

    #[tokio::test]
    async fn test_anonymous_maps_to_system_and_bypasses_credits() {
        let gw = gateway(false, vec![FakeProvider::new(ProviderKind::Local, false)]);
        let reply = gw
            .chat(LlmRequest::prompt("hi").with_user("anonymous"))
            .await
            .unwrap();
        assert_eq!(reply.provider, "local");
        assert_eq!(gw.recent_usage(1)[0].user_id, SYSTEM_USER_ID);
    }

    #[tokio::test]
    async fn test_no_providers() {
        let gw = gateway(true, vec![]);
        assert!(matches!(
            gw.chat(hello()).await.unwrap_err(),
            GatewayError::NoProviderAvailable
        ));
    }

    #[tokio::test]
    async fn test_invalid_request_rejected() {
        let gw = gateway(true, vec![FakeProvider::new(ProviderKind::Direct, false)]);
        assert!(matches!(
            gw.chat(LlmRequest::default()).await.unwrap_err(),
            GatewayError::InvalidRequest(_)
        ));
        assert!(matches!(
            gw.embed(EmbedRequest::new("   ")).await.unwrap_err(),
            GatewayError::InvalidRequest(_)
        ));
    }

    #[tokio::test]
    async fn test_failure_records_one_failed_usage_and_trips_breaker() {
        let relay = FakeProvider::new(ProviderKind::Relay, true);
        let direct = FakeProvider::new(ProviderKind::Direct, false);
        let gw = gateway(true, vec![relay.clone(), direct.clone()]);

        let err = gw.chat(hello()).await.unwrap_err();
        assert!(err.to_string().contains("relay"));
        assert_eq!(direct.calls.load(Ordering::SeqCst), 0);

        let usage = gw.recent_usage(10);
        assert_eq!(usage.len(), 1);
        assert!(!usage[0].success);
        assert_eq!(usage[0].cost_cents, 0);
        assert_eq!(gw.breakers().snapshot(ProviderKind::Relay).failures, 1);
    }

    #[tokio::test]
    async fn test_failover_tries_next_provider() {
        let relay = FakeProvider::new(ProviderKind::Relay, true);
        let direct = FakeProvider::new(ProviderKind::Direct, false);
        let gw = Gateway::builder(Arc::new(FixedLedger(true)), Arc::new(NullStore))
            .provider(relay.clone())
            .provider(direct.clone())
            .failover(true)
            .build();

        let reply = gw.chat(hello()).await.unwrap();
        assert_eq!(reply.provider, "direct");
        assert_eq!(relay.calls.load(Ordering::SeqCst), 1);

        let usage = gw.recent_usage(10);
        assert_eq!(usage.len(), 1);
        assert!(usage[0].success);
        assert_eq!(usage[0].metadata["attempts"], 2);
    }

    #[tokio::test]
    async fn test_breaker_opens_after_threshold() {
        let relay = FakeProvider::new(ProviderKind::Relay, true);
        let direct = FakeProvider::new(ProviderKind::Direct, false);
        let gw = gateway(true, vec![relay.clone(), direct.clone()]);

        for _ in 0..3 {
            let _ = gw.chat(hello()).await;
        }
        let reply = gw.chat(hello()).await.unwrap();
        assert_eq!(reply.provider, "direct");
        assert_eq!(relay.calls.load(Ordering::SeqCst), 3);

        let health = gw.provider_health();
        assert_eq!(health["relay"].status, HealthStatus::Unhealthy);
        assert_eq!(health["direct"].status, HealthStatus::Healthy);
        assert!((health["direct"].uptime - 100.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_embed_returns_vector() {
        let gw = Gateway::builder(Arc::new(FixedLedger(true)), Arc::new(NullStore))
            .provider(FakeProvider::new(ProviderKind::Relay, false))
            .provider(FakeProvider::new(ProviderKind::Local, false))
            .embedding_provider(ProviderKind::Local)
            .build();

        let reply = gw.embed(EmbedRequest::new("vector please")).await.unwrap();
        assert_eq!(reply.provider, "local");
        assert_eq!(reply.model, "nomic-embed-text");
        assert_eq!(reply.embedding, vec![0.1, 0.2]);
    }

    #[tokio::test]
    async fn test_stream_degrades_without_streaming_support() {
        use futures::StreamExt;

        let gw = gateway(true, vec![FakeProvider::new(ProviderKind::Budget, false)]);
        let fragments: Vec<_> = gw.chat_stream(hello()).await.unwrap().collect().await;

        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].as_ref().unwrap().content, "hi from budget");
        assert_eq!(gw.usage_len(), 1);
    }

    #[tokio::test]
    async fn test_test_connections_reports_each_provider() {
        let gw = gateway(
            true,
            vec![
                FakeProvider::new(ProviderKind::Direct, false),
                FakeProvider::new(ProviderKind::Budget, true),
            ],
        );
        let report = gw.test_connections().await;
        assert_eq!(report["direct"].status, ConnectionStatus::Connected);
        assert_eq!(report["budget"].status, ConnectionStatus::Failed);
        assert!(report["budget"].error.as_deref().unwrap().contains("upstream exploded"));
        assert_eq!(gw.usage_len(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_drains_writer() {
        let gw = gateway(true, vec![FakeProvider::new(ProviderKind::Direct, false)]);
        gw.chat(hello()).await.unwrap();
        gw.shutdown().await;
    }
}
