//! LLM Provider Module
//!
//! Defines the `LlmProvider` adapter trait and its error type, plus
//! sub-modules for circuit breaking, model and provider selection, cost
//! calculation and the four concrete backends (relay, direct, budget, local).

pub mod budget;
pub mod cost;
pub mod direct;
pub mod health;
pub mod local;
pub mod models;
pub mod openai;
pub mod relay;
pub mod router;
pub mod types;

use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::config::ProvidersConfig;
use crate::providers::cost::Pricing;
use crate::providers::types::{LlmRequest, LlmResponse, StreamDelta};

// Re-exports for convenience.
pub use self::health::{CircuitBreaker, CircuitBreakerRegistry};
pub use self::router::ProviderSelector;

// ---------------------------------------------------------------------------
// ProviderError
// ---------------------------------------------------------------------------

/// Errors that can occur while talking to a backend.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {0}")]
    Decode(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("No model selected for request")]
    MissingModel,

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

// ---------------------------------------------------------------------------
// ProviderKind
// ---------------------------------------------------------------------------

/// The backends the gateway knows how to reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// First-party relay in front of hosted frontier models.
    Relay,
    /// Direct OpenAI API access.
    Direct,
    /// Low-cost or self-hosted OpenAI-compatible deployment.
    Budget,
    /// Local inference server; never charged.
    Local,
}

impl ProviderKind {
    /// Selection priority: richest first, free/local last.
    pub const PRIORITY: [ProviderKind; 4] = [Self::Relay, Self::Direct, Self::Budget, Self::Local];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Relay => "relay",
            Self::Direct => "direct",
            Self::Budget => "budget",
            Self::Local => "local",
        }
    }

    /// Position in [`Self::PRIORITY`]; lower is preferred.
    pub fn priority(self) -> usize {
        match self {
            Self::Relay => 0,
            Self::Direct => 1,
            Self::Budget => 2,
            Self::Local => 3,
        }
    }

    /// Whether calls to this provider are free of charge.
    pub fn is_free(self) -> bool {
        matches!(self, Self::Local)
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "relay" => Ok(Self::Relay),
            "direct" => Ok(Self::Direct),
            "budget" => Ok(Self::Budget),
            "local" => Ok(Self::Local),
            _ => Err(format!("Unknown provider: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// LlmProvider trait
// ---------------------------------------------------------------------------

/// Boxed future returned by adapter calls.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// Stream of incremental completion pieces produced by a streaming adapter.
/// Dropping it closes the underlying connection.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<StreamDelta, ProviderError>> + Send>>;

/// Translates canonical requests into one backend's wire protocol.
///
/// Async methods return boxed futures so the trait is dyn-compatible (can be
/// used as `Arc<dyn LlmProvider>`). Adapters never retry internally.
pub trait LlmProvider: Send + Sync {
    /// Which backend this adapter talks to.
    fn kind(&self) -> ProviderKind;

    /// Name reported in responses and usage records.
    fn name(&self) -> &str {
        self.kind().as_str()
    }

    /// Whether `call` accepts `TaskType::Embed` requests.
    fn supports_embeddings(&self) -> bool;

    /// Price list entry for `model`.
    fn pricing(&self, model: &str) -> Pricing;

    /// One non-streaming call. `request.model` must already be set.
    fn call<'a>(&'a self, request: &'a LlmRequest) -> ProviderFuture<'a, LlmResponse>;

    /// Open a streaming completion, or `None` when the backend cannot stream.
    ///
    /// The returned stream owns its connection and outlives the borrow.
    fn call_stream<'a>(&'a self, _request: &'a LlmRequest) -> Option<ProviderFuture<'a, DeltaStream>> {
        None
    }
}

/// Build every provider whose configuration is complete.
///
/// Paid providers without a usable API key are skipped; absence is not an
/// error.
pub fn build_providers(config: &ProvidersConfig) -> Vec<Arc<dyn LlmProvider>> {
    let mut providers: Vec<Arc<dyn LlmProvider>> = Vec::new();

    if let Some(ref relay) = config.relay {
        match (relay.usable_key(), relay.base_url.as_deref()) {
            (Some(_), Some(_)) => providers.push(Arc::new(relay::RelayProvider::new(relay))),
            (None, _) => tracing::info!(provider = "relay", "No API key configured, skipping"),
            (_, None) => tracing::warn!(provider = "relay", "No base URL configured, skipping"),
        }
    }

    if let Some(ref direct) = config.direct {
        if direct.usable_key().is_some() {
            providers.push(Arc::new(direct::DirectProvider::new(direct)));
        } else {
            tracing::info!(provider = "direct", "No API key configured, skipping");
        }
    }

    if let Some(ref budget) = config.budget {
        if budget.usable_key().is_some() {
            providers.push(Arc::new(budget::BudgetProvider::new(budget)));
        } else {
            tracing::info!(provider = "budget", "No API key configured, skipping");
        }
    }

    if let Some(ref local) = config.local {
        providers.push(Arc::new(local::LocalProvider::new(local)));
    }

    for p in &providers {
        tracing::info!(provider = %p.name(), "Provider registered");
    }

    providers
}
