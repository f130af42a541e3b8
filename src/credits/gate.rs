use std::sync::Arc;

use crate::credits::{CreditLedger, Deduction, LedgerError, SYSTEM_USER_ID};
use crate::providers::types::SubscriptionTier;

/// User ids that are attributed to the system subject.
const SYSTEM_ALIASES: &[&str] = &["anonymous", "onboarding"];

/// Resolve the accounting subject for a request. Missing, blank and
/// anonymous/onboarding callers map to [`SYSTEM_USER_ID`].
pub fn resolve_subject(user_id: Option<&str>) -> String {
    match user_id.map(str::trim) {
        Some(id) if !id.is_empty() && !SYSTEM_ALIASES.iter().any(|a| a.eq_ignore_ascii_case(id)) => {
            id.to_string()
        }
        _ => SYSTEM_USER_ID.to_string(),
    }
}

/// Outcome of a credit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Authorization {
    pub allowed: bool,
    pub tier: SubscriptionTier,
}

/// Admission control in front of every dispatch.
#[derive(Clone)]
pub struct CreditGate {
    ledger: Arc<dyn CreditLedger>,
}

impl CreditGate {
    pub fn new(ledger: Arc<dyn CreditLedger>) -> Self {
        Self { ledger }
    }

    /// Ask the ledger whether `user_id` may run inference.
    ///
    /// The system subject is always allowed, even when the ledger is down
    /// (it then runs on the basic tier).
    pub async fn authorize(&self, user_id: &str) -> Result<Authorization, LedgerError> {
        let is_system = user_id == SYSTEM_USER_ID;
        match self.ledger.status(user_id).await {
            Ok(status) => Ok(Authorization {
                allowed: status.can_run_inference || is_system,
                tier: status.tier(),
            }),
            Err(e) if is_system => {
                tracing::warn!(error = %e, "Credit ledger unavailable, allowing system subject");
                Ok(Authorization {
                    allowed: true,
                    tier: SubscriptionTier::Basic,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Charge a completed call. Zero-cent deductions are not sent.
    pub async fn deduct(&self, deduction: &Deduction) -> Result<(), LedgerError> {
        if deduction.amount_cents == 0 {
            return Ok(());
        }
        self.ledger.deduct(deduction).await
    }
}
