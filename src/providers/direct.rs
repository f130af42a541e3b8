//! Direct Provider
//!
//! Talks to the OpenAI API with the operator's own key.

use crate::config::ProviderEndpoint;
use crate::providers::cost::{Pricing, price_for};
use crate::providers::openai::OpenAiCompat;
use crate::providers::types::{LlmRequest, LlmResponse};
use crate::providers::{DeltaStream, LlmProvider, ProviderError, ProviderFuture, ProviderKind};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const PRICES: &[(&str, Pricing)] = &[
    ("gpt-4o-mini", Pricing::new(0.00015, 0.0006)),
    ("gpt-4o", Pricing::new(0.0025, 0.01)),
    ("text-embedding-3-small", Pricing::new(0.00002, 0.0)),
    ("text-embedding-3-large", Pricing::new(0.00013, 0.0)),
];

pub struct DirectProvider {
    wire: OpenAiCompat,
}

impl DirectProvider {
    pub fn new(endpoint: &ProviderEndpoint) -> Self {
        Self {
            wire: OpenAiCompat::new(endpoint, DEFAULT_BASE_URL),
        }
    }
}

impl LlmProvider for DirectProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Direct
    }

    fn supports_embeddings(&self) -> bool {
        true
    }

    fn pricing(&self, model: &str) -> Pricing {
        price_for(PRICES, model, Pricing::new(0.0025, 0.01))
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
