//! Usage accounting.
//!
//! Every completed or failed call attempt produces exactly one
//! [`UsageRecord`]. The recorder appends it to an in-memory ring buffer and
//! hands it to a background writer, which charges the subject and persists
//! the record in batches. Persistence is best-effort and never fails the
//! call that produced the record.

pub mod recorder;
pub mod store;
pub mod writer;

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::providers::cost::cents_to_usd;
use crate::providers::types::{TaskType, TokenUsage};

pub use self::recorder::{UsageRecorder, UsageRing};
pub use self::store::SqliteUsageStore;
pub use self::writer::spawn_usage_writer;

// ---------------------------------------------------------------------------
// UsageRecord
// ---------------------------------------------------------------------------

/// One accounting row. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub id: String,
    pub user_id: String,
    pub org_id: Option<String>,
    pub provider: String,
    pub model: String,
    pub task_type: TaskType,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub cost_cents: u64,
    pub cost_usd: f64,
    pub request_id: String,
    pub response_time_ms: u64,
    pub success: bool,
    pub error_message: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl UsageRecord {
    /// A successful, zero-cost record for `user_id`; refine with the
    /// `with_*` builders.
    pub fn new(user_id: impl Into<String>, request_id: impl Into<String>, task_type: TaskType) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            org_id: None,
            provider: String::new(),
            model: String::new(),
            task_type,
            prompt_tokens: 0,
            completion_tokens: 0,
            cost_cents: 0,
            cost_usd: 0.0,
            request_id: request_id.into(),
            response_time_ms: 0,
            success: true,
            error_message: None,
            metadata: serde_json::Value::Object(serde_json::Map::new()),
            created_at: Utc::now(),
        }
    }

    pub fn with_org(mut self, org_id: Option<String>) -> Self {
        self.org_id = org_id;
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>, model: impl Into<String>) -> Self {
        self.provider = provider.into();
        self.model = model.into();
        self
    }

    pub fn with_usage(mut self, tokens: TokenUsage, cost_cents: u64) -> Self {
        self.prompt_tokens = tokens.prompt;
        self.completion_tokens = tokens.completion;
        self.cost_cents = cost_cents;
        self.cost_usd = cents_to_usd(cost_cents);
        self
    }

    pub fn with_latency(mut self, response_time_ms: u64) -> Self {
        self.response_time_ms = response_time_ms;
        self
    }

    /// Mark the attempt failed. Failed attempts are never charged.
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error_message = Some(error.into());
        self.cost_cents = 0;
        self.cost_usd = 0.0;
        self
    }

    /// Set one metadata key.
    pub fn with_meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        if let serde_json::Value::Object(ref mut map) = self.metadata {
            map.insert(key.to_string(), value.into());
        }
        self
    }

    pub fn tokens(&self) -> TokenUsage {
        TokenUsage::new(self.prompt_tokens, self.completion_tokens)
    }

    /// Whether the background writer should charge for this record.
    pub fn is_chargeable(&self) -> bool {
        self.success && self.cost_cents > 0
    }
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum UsageStoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Usage store unavailable: {0}")]
    Unavailable(String),
}

pub type UsageFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, UsageStoreError>> + Send + 'a>>;

/// Durable destination for usage records.
pub trait UsageStore: Send + Sync {
    /// Persist a batch. Either all records are stored or none are.
    fn persist<'a>(&'a self, records: &'a [UsageRecord]) -> UsageFuture<'a, ()>;
}
