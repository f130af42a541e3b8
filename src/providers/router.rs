//! Provider Selector
//!
//! Chooses the adapter for a request. Providers are always tried in the
//! fixed [`ProviderKind::PRIORITY`] order regardless of registration order;
//! a provider is skipped when its circuit breaker is open, when the request's
//! budget is below one chargeable cent and the provider is not free, or when
//! the request is an embedding and the provider cannot embed.

use std::sync::Arc;

use tracing::debug;

use crate::providers::cost::MIN_CHARGE_CENTS;
use crate::providers::health::CircuitBreakerRegistry;
use crate::providers::types::{LlmRequest, TaskType};
use crate::providers::{LlmProvider, ProviderKind};

// ---------------------------------------------------------------------------
// ProviderSelector
// ---------------------------------------------------------------------------

pub struct ProviderSelector {
    /// Registered adapters, kept sorted by priority.
    providers: Vec<Arc<dyn LlmProvider>>,
    breakers: Arc<CircuitBreakerRegistry>,
    /// Preferred adapter for embedding requests.
    embedding_provider: Option<ProviderKind>,
}

impl ProviderSelector {
    pub fn new(breakers: Arc<CircuitBreakerRegistry>) -> Self {
        Self {
            providers: Vec::new(),
            breakers,
            embedding_provider: None,
        }
    }

    /// Designate the provider embedding requests try first.
    pub fn with_embedding_provider(mut self, kind: Option<ProviderKind>) -> Self {
        self.embedding_provider = kind;
        self
    }

    /// Register an adapter, replacing any existing one of the same kind.
    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        let kind = provider.kind();
        if self.providers.iter().any(|p| p.kind() == kind) {
            tracing::warn!(provider = %kind, "Provider already registered, replacing");
            self.providers.retain(|p| p.kind() != kind);
        }
        self.providers.push(provider);
        self.providers.sort_by_key(|p| p.kind().priority());
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    /// Every registered adapter in priority order.
    pub fn providers(&self) -> &[Arc<dyn LlmProvider>] {
        &self.providers
    }

    fn budget_excludes(request: &LlmRequest, kind: ProviderKind) -> bool {
        request.budget_cents.is_some_and(|b| b < MIN_CHARGE_CENTS) && !kind.is_free()
    }

    fn eligible(&self, request: &LlmRequest, provider: &dyn LlmProvider) -> bool {
        let kind = provider.kind();
        if request.task == TaskType::Embed && !provider.supports_embeddings() {
            return false;
        }
        if Self::budget_excludes(request, kind) {
            debug!(provider = %kind, "Skipping paid provider for zero-budget request");
            return false;
        }
        if self.breakers.is_open(kind) {
            debug!(provider = %kind, "Skipping provider with open circuit");
            return false;
        }
        true
    }

    /// All eligible adapters for `request`, best first.
    ///
    /// For embeddings, the designated embedding provider (when eligible)
    /// leads and the rest follow in priority order.
    pub fn candidates(&self, request: &LlmRequest) -> Vec<Arc<dyn LlmProvider>> {
        let mut out: Vec<Arc<dyn LlmProvider>> = self
            .providers
            .iter()
            .filter(|p| self.eligible(request, p.as_ref()))
            .cloned()
            .collect();

        if request.task == TaskType::Embed {
            if let Some(preferred) = self.embedding_provider {
                if let Some(pos) = out.iter().position(|p| p.kind() == preferred) {
                    let p = out.remove(pos);
                    out.insert(0, p);
                }
            }
        }
        out
    }

    /// The single best adapter for `request`, or `None` when nothing
    /// qualifies.
    pub fn select(&self, request: &LlmRequest) -> Option<Arc<dyn LlmProvider>> {
        self.candidates(request).into_iter().next()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
