//! Local Provider
//!
//! Local inference server (Ollama's OpenAI-compatible API by default).
//! Never charged, needs no key.

use crate::config::ProviderEndpoint;
use crate::providers::cost::Pricing;
use crate::providers::openai::OpenAiCompat;
use crate::providers::types::{LlmRequest, LlmResponse};
use crate::providers::{DeltaStream, LlmProvider, ProviderError, ProviderFuture, ProviderKind};

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434/v1";

pub struct LocalProvider {
    wire: OpenAiCompat,
}

impl LocalProvider {
    pub fn new(endpoint: &ProviderEndpoint) -> Self {
        Self {
            wire: OpenAiCompat::new(endpoint, DEFAULT_BASE_URL),
        }
    }
}

impl LlmProvider for LocalProvider {
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
            let model = request.model.as_deref().ok_or(ProviderError::MissingModel)?;
            self.wire.respond(self.name(), request, self.pricing(model)).await
        })
    }

    fn call_stream<'a>(&'a self, request: &'a LlmRequest) -> Option<ProviderFuture<'a, DeltaStream>> {
        Some(Box::pin(async move {
            let model = request.model.as_deref().ok_or(ProviderError::MissingModel)?;
            self.wire.stream(request, model).await
        }))
    }
}
