//! Credit ledger collaborator and the credit gate.
//!
//! The ledger reports whether a subject may run inference and records
//! deductions after the fact. [`CreditGate`] turns that into the gateway's
//! admission decision.

pub mod gate;
pub mod ledger;

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::providers::types::SubscriptionTier;

pub use self::gate::{Authorization, CreditGate, resolve_subject};
pub use self::ledger::SqliteCreditLedger;

/// Subject that internal and onboarding traffic is attributed to. Never
/// blocked by credit status.
pub const SYSTEM_USER_ID: &str = "system";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
}

// ---------------------------------------------------------------------------
// Credit status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionFeatures {
    #[serde(default)]
    pub tier: SubscriptionTier,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    #[serde(default)]
    pub features: SubscriptionFeatures,
}

/// What the ledger reports for one subject. Fetched fresh for every call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditStatus {
    pub can_run_inference: bool,
    #[serde(default)]
    pub subscription: Subscription,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance_cents: Option<i64>,
}

impl CreditStatus {
    pub fn new(can_run_inference: bool, tier: SubscriptionTier) -> Self {
        Self {
            can_run_inference,
            subscription: Subscription {
                features: SubscriptionFeatures { tier },
            },
            balance_cents: None,
        }
    }

    pub fn tier(&self) -> SubscriptionTier {
        self.subscription.features.tier
    }
}

/// One post-call charge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deduction {
    pub user_id: String,
    pub org_id: Option<String>,
    pub amount_cents: u64,
    pub description: String,
    /// Deductions for the same user sharing a key are applied at most once.
    /// The usage writer uses `<request id>:<usage record id>`.
    pub idempotency_key: String,
}

// ---------------------------------------------------------------------------
// Ledger trait
// ---------------------------------------------------------------------------

pub type LedgerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, LedgerError>> + Send + 'a>>;

/// External credit ledger. Implementations must be safe for concurrent use.
pub trait CreditLedger: Send + Sync {
    /// Current status of `user_id`. Unknown subjects are reported as unable
    /// to run inference rather than as an error.
    fn status<'a>(&'a self, user_id: &'a str) -> LedgerFuture<'a, CreditStatus>;

    /// Apply a deduction. Replaying a deduction with the same idempotency
    /// key succeeds without charging again.
    fn deduct<'a>(&'a self, deduction: &'a Deduction) -> LedgerFuture<'a, ()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_shape() {
        let json = serde_json::json!({
            "canRunInference": true,
            "subscription": {"features": {"tier": "premium"}}
        });
        let status: CreditStatus = serde_json::from_value(json).unwrap();
        assert!(status.can_run_inference);
        assert_eq!(status.tier(), SubscriptionTier::Premium);

        let status: CreditStatus =
            serde_json::from_value(serde_json::json!({"canRunInference": false})).unwrap();
        assert_eq!(status.tier(), SubscriptionTier::Basic);
    }
}
