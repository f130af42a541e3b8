//! Relay Provider
//!
//! First-party relay in front of hosted frontier models. Model ids are
//! vendor-qualified (`anthropic/...`, `openai/...`). Requires an explicit
//! base URL; there is no public default.

use crate::config::ProviderEndpoint;
use crate::net::HttpClient;
use crate::providers::cost::{Pricing, price_for};
use crate::providers::openai::OpenAiCompat;
use crate::providers::types::{LlmRequest, LlmResponse};
use crate::providers::{DeltaStream, LlmProvider, ProviderError, ProviderFuture, ProviderKind};

/// Header identifying gateway traffic to the relay.
const SOURCE_HEADER: &str = "x-relay-source";

const PRICES: &[(&str, Pricing)] = &[
    ("anthropic/claude-3.5-haiku", Pricing::new(0.0008, 0.004)),
    ("anthropic/claude-sonnet-4", Pricing::new(0.003, 0.015)),
    ("openai/gpt-4o-mini", Pricing::new(0.00015, 0.0006)),
    ("openai/gpt-4o", Pricing::new(0.0025, 0.01)),
    ("openai/text-embedding-3-small", Pricing::new(0.00002, 0.0)),
];

/// Unknown relay models are priced like the premium chat model.
const FALLBACK: Pricing = Pricing::new(0.003, 0.015);

pub struct RelayProvider {
    wire: OpenAiCompat,
}

impl RelayProvider {
    pub fn new(endpoint: &ProviderEndpoint) -> Self {
        let builder = HttpClient::builder().default_header(SOURCE_HEADER, "aigate");
        Self {
            wire: OpenAiCompat::with_builder(endpoint, "", builder),
        }
    }
}

impl LlmProvider for RelayProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Relay
    }

    fn supports_embeddings(&self) -> bool {
        true
    }

    fn pricing(&self, model: &str) -> Pricing {
        price_for(PRICES, model, FALLBACK)
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
