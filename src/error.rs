use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::credits::LedgerError;
use crate::providers::ProviderError;

/// Failure of one gateway call.
///
/// Everything before dispatch (`NoProviderAvailable`, `InsufficientCredits`,
/// `CreditCheckFailed`, `InvalidRequest`) happens without contacting a
/// provider. Usage-persistence and deduction failures never appear here;
/// the usage writer logs and drops them.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("No AI provider available")]
    NoProviderAvailable,

    #[error("Insufficient credits. Please upgrade your plan or top up your balance to continue.")]
    InsufficientCredits,

    #[error("AI request failed ({provider}): {message}")]
    ProviderCallFailed { provider: String, message: String },

    #[error("Credit check failed: {0}")]
    CreditCheckFailed(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Structured failure body: `{ "success": false, "error": "...", "code": "..." }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub success: bool,
    pub error: String,
    pub code: &'static str,
}

impl GatewayError {
    pub fn provider(provider: impl Into<String>, err: &ProviderError) -> Self {
        Self::ProviderCallFailed {
            provider: provider.into(),
            message: err.to_string(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NoProviderAvailable | Self::CreditCheckFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::InsufficientCredits => StatusCode::PAYMENT_REQUIRED,
            Self::ProviderCallFailed { .. } => StatusCode::BAD_GATEWAY,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::NoProviderAvailable => "no_provider_available",
            Self::InsufficientCredits => "insufficient_credits",
            Self::ProviderCallFailed { .. } => "provider_call_failed",
            Self::CreditCheckFailed(_) => "credit_check_failed",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Internal(_) => "internal_error",
        }
    }

    pub fn failure(&self) -> Failure {
        Failure {
            success: false,
            error: self.to_string(),
            code: self.code(),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (self.status_code(), axum::Json(self.failure())).into_response()
    }
}

impl From<LedgerError> for GatewayError {
    fn from(err: LedgerError) -> Self {
        tracing::warn!(error = %err, "Credit ledger error");
        Self::CreditCheckFailed(err.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidRequest(format!("JSON error: {err}"))
    }
}

impl From<anyhow::Error> for GatewayError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}
