//! SQLite-backed credit ledger.
//!
//! Balances are whole cents and may go negative: charges are applied after
//! the call they pay for has already completed. Unlimited accounts are never
//! debited.

use rusqlite::{OptionalExtension, params};
use uuid::Uuid;

use crate::credits::{CreditLedger, CreditStatus, Deduction, LedgerError, LedgerFuture};
use crate::db::Database;
use crate::providers::types::SubscriptionTier;

pub struct SqliteCreditLedger {
    db: Database,
}

impl SqliteCreditLedger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create or replace an account.
    pub fn set_account(&self, user_id: &str, balance_cents: i64, tier: SubscriptionTier) -> Result<(), LedgerError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO credit_accounts (user_id, balance_cents, tier) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(user_id) DO UPDATE SET balance_cents = ?2, tier = ?3, \
                 updated_at = datetime('now')",
                params![user_id, balance_cents, tier.as_str()],
            )?;
            Ok(())
        })?;
        Ok(())
    }

    /// Add `cents` to an account, creating a basic-tier account if needed.
    pub fn top_up(&self, user_id: &str, cents: i64) -> Result<i64, LedgerError> {
        let balance = self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO credit_accounts (user_id, balance_cents) VALUES (?1, ?2) \
                 ON CONFLICT(user_id) DO UPDATE SET balance_cents = balance_cents + ?2, \
                 updated_at = datetime('now')",
                params![user_id, cents],
            )?;
            conn.query_row(
                "SELECT balance_cents FROM credit_accounts WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
        })?;
        tracing::info!(user_id, cents, balance, "Credits topped up");
        Ok(balance)
    }

    pub fn balance(&self, user_id: &str) -> Result<Option<i64>, LedgerError> {
        let balance = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT balance_cents FROM credit_accounts WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()
        })?;
        Ok(balance)
    }

    fn lookup(&self, user_id: &str) -> Result<CreditStatus, LedgerError> {
        let row: Option<(i64, String)> = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT balance_cents, tier FROM credit_accounts WHERE user_id = ?1",
                params![user_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
        })?;

        Ok(match row {
            Some((balance, tier)) => {
                let tier = SubscriptionTier::parse_lenient(&tier);
                let mut status = CreditStatus::new(tier == SubscriptionTier::Unlimited || balance > 0, tier);
                status.balance_cents = Some(balance);
                status
            }
            None => CreditStatus::new(false, SubscriptionTier::Basic),
        })
    }

    /// Apply `deduction` once. Returns `false` when its idempotency key was
    /// already used.
    fn apply(&self, deduction: &Deduction) -> Result<bool, LedgerError> {
        let amount = i64::try_from(deduction.amount_cents).unwrap_or(i64::MAX);
        let applied = self.db.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO credit_transactions \
                 (id, user_id, org_id, amount_cents, description, idempotency_key) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    Uuid::new_v4().to_string(),
                    deduction.user_id,
                    deduction.org_id,
                    amount,
                    deduction.description,
                    deduction.idempotency_key,
                ],
            )?;
            if inserted == 1 {
                tx.execute(
                    "UPDATE credit_accounts SET balance_cents = balance_cents - ?1, \
                     updated_at = datetime('now') WHERE user_id = ?2 AND tier != 'unlimited'",
                    params![amount, deduction.user_id],
                )?;
            }
            tx.commit()?;
            Ok(inserted == 1)
        })?;

        if applied {
            tracing::debug!(
                user_id = %deduction.user_id,
                cost_cents = deduction.amount_cents,
                key = %deduction.idempotency_key,
                "Credits deducted"
            );
        } else {
            tracing::debug!(key = %deduction.idempotency_key, "Duplicate deduction ignored");
        }
        Ok(applied)
    }
}

impl CreditLedger for SqliteCreditLedger {
    fn status<'a>(&'a self, user_id: &'a str) -> LedgerFuture<'a, CreditStatus> {
        Box::pin(async move { self.lookup(user_id) })
    }

    fn deduct<'a>(&'a self, deduction: &'a Deduction) -> LedgerFuture<'a, ()> {
        Box::pin(async move { self.apply(deduction).map(|_| ()) })
    }
}
