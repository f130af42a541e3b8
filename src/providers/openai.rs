//! OpenAI-compatible wire codec.
//!
//! All four backends speak the `/chat/completions` + `/embeddings` dialect,
//! so the request body, response parsing and SSE decoding live here and the
//! adapters only contribute their endpoint, pricing and capabilities.

use std::time::{Duration, Instant};

use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::config::ProviderEndpoint;
use crate::net::{HttpClient, HttpClientBuilder, SseStream};
use crate::providers::cost::{Pricing, cost_cents, estimate_tokens};
use crate::providers::types::{
    ChatMessage, LlmRequest, LlmResponse, MessageRole, Output, StreamDelta, TaskType, TokenUsage,
};
use crate::providers::{DeltaStream, ProviderError};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    message: Option<WireMessage>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl From<WireUsage> for TokenUsage {
    fn from(u: WireUsage) -> Self {
        TokenUsage::new(u.prompt_tokens, u.completion_tokens)
    }
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<WireMessage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

// ---------------------------------------------------------------------------
// Request construction
// ---------------------------------------------------------------------------

/// Provider-native message list for `request`.
///
/// Explicit messages are sent verbatim, with the system prompt prepended
/// only when it is set and the list does not already start with a system
/// message. Otherwise a `{system?, user}` pair is synthesized from
/// `system` and `input`.
pub fn build_messages(request: &LlmRequest) -> Vec<ChatMessage> {
    let mut out = Vec::with_capacity(request.messages.len() + 1);

    if request.messages.is_empty() {
        if let Some(ref system) = request.system {
            out.push(ChatMessage::system(system.as_str()));
        }
        out.push(ChatMessage::user(request.input.as_deref().unwrap_or_default()));
        return out;
    }

    let starts_with_system = request
        .messages
        .first()
        .is_some_and(|m| m.role == MessageRole::System);
    if !starts_with_system {
        if let Some(ref system) = request.system {
            out.push(ChatMessage::system(system.as_str()));
        }
    }
    out.extend(request.messages.iter().cloned());
    out
}

/// Pull a readable message out of an error body, preferring the
/// `error.message` field OpenAI-compatible servers send.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

// ---------------------------------------------------------------------------
// OpenAiCompat
// ---------------------------------------------------------------------------

/// Result of a non-streaming completion.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
    /// Model reported by the backend, when it differs from the requested one.
    pub model: Option<String>,
}

/// Result of an embedding call.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub usage: TokenUsage,
}

/// HTTP client bound to one OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiCompat {
    client: HttpClient,
    base_url: String,
    api_key: Option<String>,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiCompat {
    pub fn new(endpoint: &ProviderEndpoint, default_base_url: &str) -> Self {
        Self::with_builder(endpoint, default_base_url, HttpClient::builder())
    }

    /// Like [`Self::new`], starting from a caller-prepared client builder
    /// (e.g. one carrying extra default headers).
    pub fn with_builder(
        endpoint: &ProviderEndpoint,
        default_base_url: &str,
        builder: HttpClientBuilder,
    ) -> Self {
        let client = builder
            .request_timeout(Duration::from_secs(endpoint.timeout_secs))
            .build();
        let base_url = endpoint
            .base_url
            .as_deref()
            .unwrap_or(default_base_url)
            .trim_end_matches('/')
            .to_string();
        Self {
            client,
            base_url,
            api_key: endpoint.usable_key().map(str::to_string),
            max_tokens: endpoint.max_tokens,
            temperature: endpoint.temperature,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// JSON body for `/chat/completions`.
    pub fn chat_body(&self, request: &LlmRequest, model: &str, stream: bool) -> Value {
        let mut body = json!({
            "model": model,
            "messages": build_messages(request),
            "max_tokens": request.max_tokens.unwrap_or(self.max_tokens),
            "temperature": request.temperature.unwrap_or(self.temperature),
            "stream": stream,
        });
        if request.json_mode {
            body["response_format"] = json!({ "type": "json_object" });
        }
        if stream {
            body["stream_options"] = json!({ "include_usage": true });
        }
        body
    }

    async fn post(&self, path: &str, body: &Value) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}{path}", self.base_url);
        let mut req = self.client.inner().post(&url).json(body);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: error_message(&text),
            });
        }
        Ok(resp)
    }

    /// One non-streaming chat completion.
    pub async fn complete(&self, request: &LlmRequest, model: &str) -> Result<Completion, ProviderError> {
        let body = self.chat_body(request, model, false);
        let resp: CompletionResponse = self
            .post("/chat/completions", &body)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Decode(format!("completion body: {e}")))?;

        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Decode("response contained no choices".into()))?;
        let text = choice.message.and_then(|m| m.content).unwrap_or_default();

        let usage = match resp.usage {
            Some(u) => u.into(),
            None => TokenUsage::new(
                estimate_tokens(request.prompt_chars()),
                estimate_tokens(text.chars().count()),
            ),
        };

        Ok(Completion {
            text,
            usage,
            model: resp.model,
        })
    }

    /// Embed `text` with `model`.
    pub async fn embed(&self, text: &str, model: &str) -> Result<Embedding, ProviderError> {
        let body = json!({ "model": model, "input": text });
        let resp: EmbeddingResponse = self
            .post("/embeddings", &body)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Decode(format!("embedding body: {e}")))?;

        let vector = resp
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| ProviderError::Decode("response contained no embedding".into()))?;
        let usage = resp
            .usage
            .map_or_else(|| TokenUsage::new(estimate_tokens(text.chars().count()), 0), Into::into);

        Ok(Embedding { vector, usage })
    }

    /// Open a streamed chat completion.
    ///
    /// The stream ends at the `[DONE]` sentinel or when the connection
    /// closes. Dropping it closes the connection.
    pub async fn stream(&self, request: &LlmRequest, model: &str) -> Result<DeltaStream, ProviderError> {
        let body = self.chat_body(request, model, true);
        let resp = self.post("/chat/completions", &body).await?;

        let stream: DeltaStream = Box::pin(SseStream::new(resp.bytes_stream())
            .take_while(|event| futures::future::ready(!matches!(event, Ok(e) if e.is_done())))
            .filter_map(|event| {
                futures::future::ready(match event {
                    Ok(e) => decode_stream_event(&e.data),
                    Err(err) => Some(Err(ProviderError::Stream(err.to_string()))),
                })
            }));

        Ok(stream)
    }

    /// Full adapter call: dispatches on the task type, prices the result and
    /// fills in the canonical response.
    pub async fn respond(
        &self,
        provider: &str,
        request: &LlmRequest,
        pricing: Pricing,
    ) -> Result<LlmResponse, ProviderError> {
        let model = request.model.as_deref().ok_or(ProviderError::MissingModel)?;
        let start = Instant::now();

        let (output, tokens, model) = match request.task {
            TaskType::Chat => {
                let c = self.complete(request, model).await?;
                let model = c.model.unwrap_or_else(|| model.to_string());
                (Output::Text(c.text), c.usage, model)
            }
            TaskType::Embed => {
                let text = request.input.as_deref().unwrap_or_default();
                let e = self.embed(text, model).await?;
                (Output::Embedding(e.vector), e.usage, model.to_string())
            }
        };

        let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        let cost_cents = cost_cents(&pricing, &tokens);
        debug!(provider, model = %model, latency_ms, cost_cents, "Provider call completed");

        Ok(LlmResponse {
            output,
            tokens,
            cost_cents,
            model,
            provider: provider.to_string(),
            latency_ms,
        })
    }
}

/// Decode one SSE payload into a delta. Events carrying neither content nor
/// usage are skipped, as are unparseable ones.
fn decode_stream_event(data: &str) -> Option<Result<StreamDelta, ProviderError>> {
    let value: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            debug!(data, error = %e, "Skipping unparseable SSE payload");
            return None;
        }
    };

    if let Some(err) = value.get("error") {
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| err.to_string(), str::to_string);
        return Some(Err(ProviderError::Stream(message)));
    }

    let chunk: StreamChunk = serde_json::from_value(value).ok()?;
    let content: String = chunk
        .choices
        .into_iter()
        .filter_map(|c| c.delta.and_then(|d| d.content))
        .collect();
    let usage = chunk.usage.map(TokenUsage::from);

    if content.is_empty() && usage.is_none() {
        return None;
    }
    Some(Ok(StreamDelta { content, usage }))
}
