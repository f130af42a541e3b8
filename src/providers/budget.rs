//! Budget Provider
//!
//! Low-cost OpenAI-compatible deployment (DeepSeek by default, or any
//! self-hosted server behind `base_url`). Non-streaming only and no
//! embeddings; streaming callers get the whole response as one fragment.

use crate::config::ProviderEndpoint;
use crate::providers::cost::{Pricing, price_for};
use crate::providers::openai::OpenAiCompat;
use crate::providers::types::{LlmRequest, LlmResponse, TaskType};
use crate::providers::{LlmProvider, ProviderError, ProviderFuture, ProviderKind};

pub const DEFAULT_BASE_URL: &str = "https://api.deepseek.com/v1";

const PRICES: &[(&str, Pricing)] = &[
    ("deepseek-chat", Pricing::new(0.00027, 0.0011)),
    ("deepseek-reasoner", Pricing::new(0.00055, 0.00219)),
];

pub struct BudgetProvider {
    wire: OpenAiCompat,
}

impl BudgetProvider {
    pub fn new(endpoint: &ProviderEndpoint) -> Self {
        Self {
            wire: OpenAiCompat::new(endpoint, DEFAULT_BASE_URL),
        }
    }
}

impl LlmProvider for BudgetProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Budget
    }

    fn supports_embeddings(&self) -> bool {
        false
    }

    fn pricing(&self, model: &str) -> Pricing {
        price_for(PRICES, model, Pricing::new(0.00027, 0.0011))
    }

    fn call<'a>(&'a self, request: &'a LlmRequest) -> ProviderFuture<'a, LlmResponse> {
        Box::pin(async move {
            if request.task == TaskType::Embed {
                return Err(ProviderError::Unsupported("budget provider has no embeddings endpoint".into()));
            }
            let model = request.model.as_deref().ok_or(ProviderError::MissingModel)?;
            self.wire.respond(self.name(), request, self.pricing(model)).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::types::EmbedRequest;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_budget_capabilities() {
        let budget = BudgetProvider::new(&ProviderEndpoint::default());
        assert!(!budget.supports_embeddings());
        let req = LlmRequest::prompt("hi");
        assert!(budget.call_stream(&req).is_none());
        assert_eq!(budget.pricing("unknown"), budget.pricing("deepseek-chat"));
    }

    #[tokio::test]
    async fn test_budget_rejects_embeddings() {
        let budget = BudgetProvider::new(&ProviderEndpoint::default());
        let mut req: LlmRequest = EmbedRequest::new("vector").into();
        req.model = Some("deepseek-chat".into());

        let err = budget.call(&req).await.unwrap_err();
        assert!(matches!(err, ProviderError::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_budget_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({"model": "deepseek-chat"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "cheap answer"}}],
                "usage": {"prompt_tokens": 10, "completion_tokens": 10}
            })))
            .mount(&server)
            .await;

        let budget = BudgetProvider::new(&ProviderEndpoint {
            base_url: Some(format!("{}/v1", server.uri())),
            api_key: Some("budget-key".into()),
            ..ProviderEndpoint::default()
        });
        let mut req = LlmRequest::prompt("hi");
        req.model = Some("deepseek-chat".into());

        let resp = budget.call(&req).await.unwrap();
        assert_eq!(resp.provider, "budget");
        assert_eq!(resp.cost_cents, 1);
    }
}
