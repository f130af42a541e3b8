use chrono::{DateTime, Utc};
use rusqlite::{Row, params};
use serde::Serialize;

use crate::db::Database;
use crate::providers::types::TaskType;
use crate::usage::{UsageFuture, UsageRecord, UsageStore, UsageStoreError};

/// Aggregate usage for one subject.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageTotals {
    pub requests: u64,
    pub failures: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost_cents: u64,
}

/// Usage store over the `usage_records` table.
pub struct SqliteUsageStore {
    db: Database,
}

impl SqliteUsageStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a batch in one transaction.
    pub fn insert_batch(&self, records: &[UsageRecord]) -> Result<(), UsageStoreError> {
        let metadata: Vec<String> = records
            .iter()
            .map(|r| serde_json::to_string(&r.metadata))
            .collect::<Result<_, _>>()?;

        self.db.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT OR IGNORE INTO usage_records (id, user_id, org_id, provider, model, \
                     task_type, prompt_tokens, completion_tokens, cost_cents, cost_usd, request_id, \
                     response_time_ms, success, error_message, metadata, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                )?;
                for (r, meta) in records.iter().zip(&metadata) {
                    stmt.execute(params![
                        r.id,
                        r.user_id,
                        r.org_id,
                        r.provider,
                        r.model,
                        r.task_type.as_str(),
                        r.prompt_tokens,
                        r.completion_tokens,
                        i64::try_from(r.cost_cents).unwrap_or(i64::MAX),
                        r.cost_usd,
                        r.request_id,
                        i64::try_from(r.response_time_ms).unwrap_or(i64::MAX),
                        r.success,
                        r.error_message,
                        meta,
                        r.created_at.to_rfc3339(),
                    ])?;
                }
            }
            tx.commit()
        })?;
        Ok(())
    }

    /// Most recent persisted records, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<UsageRecord>, UsageStoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let records = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, org_id, provider, model, task_type, prompt_tokens, \
                 completion_tokens, cost_cents, cost_usd, request_id, response_time_ms, success, \
                 error_message, metadata, created_at \
                 FROM usage_records ORDER BY created_at DESC, rowid DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit], read_record)?;
            rows.collect::<Result<Vec<_>, _>>()
        })?;
        Ok(records)
    }

    pub fn totals_for_user(&self, user_id: &str) -> Result<UsageTotals, UsageStoreError> {
        let totals = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(success = 0), 0), \
                 COALESCE(SUM(prompt_tokens), 0), COALESCE(SUM(completion_tokens), 0), \
                 COALESCE(SUM(cost_cents), 0) FROM usage_records WHERE user_id = ?1",
                params![user_id],
                |row| {
                    let get = |i: usize| row.get::<_, i64>(i).map(|v| u64::try_from(v).unwrap_or(0));
                    Ok(UsageTotals {
                        requests: get(0)?,
                        failures: get(1)?,
                        prompt_tokens: get(2)?,
                        completion_tokens: get(3)?,
                        cost_cents: get(4)?,
                    })
                },
            )
        })?;
        Ok(totals)
    }
}

fn read_record(row: &Row<'_>) -> rusqlite::Result<UsageRecord> {
    let task: String = row.get(5)?;
    let metadata: String = row.get(14)?;
    let created_at: String = row.get(15)?;
    Ok(UsageRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        org_id: row.get(2)?,
        provider: row.get(3)?,
        model: row.get(4)?,
        task_type: if task == "embed" { TaskType::Embed } else { TaskType::Chat },
        prompt_tokens: row.get(6)?,
        completion_tokens: row.get(7)?,
        cost_cents: u64::try_from(row.get::<_, i64>(8)?).unwrap_or(0),
        cost_usd: row.get(9)?,
        request_id: row.get(10)?,
        response_time_ms: u64::try_from(row.get::<_, i64>(11)?).unwrap_or(0),
        success: row.get(12)?,
        error_message: row.get(13)?,
        metadata: serde_json::from_str(&metadata).unwrap_or_default(),
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_default(),
    })
}

impl UsageStore for SqliteUsageStore {
    fn persist<'a>(&'a self, records: &'a [UsageRecord]) -> UsageFuture<'a, ()> {
        Box::pin(async move { self.insert_batch(records) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::types::TokenUsage;

    fn store() -> SqliteUsageStore {
        SqliteUsageStore::new(Database::open_in_memory().unwrap())
    }

    #[tokio::test]
    async fn test_persist_and_read_back() {
        let s = store();
        let rec = UsageRecord::new("alice", "req-1", TaskType::Embed)
            .with_org(Some("org-9".into()))
            .with_provider("local", "nomic-embed-text")
            .with_usage(TokenUsage::new(12, 0), 0)
            .with_latency(33)
            .with_meta("streamed", false);
        s.persist(std::slice::from_ref(&rec)).await.unwrap();

        let back = s.recent(10).unwrap();
        assert_eq!(back.len(), 1);
        let got = &back[0];
        assert_eq!(got.id, rec.id);
        assert_eq!(got.org_id.as_deref(), Some("org-9"));
        assert_eq!(got.task_type, TaskType::Embed);
        assert_eq!(got.prompt_tokens, 12);
        assert_eq!(got.response_time_ms, 33);
        assert_eq!(got.metadata["streamed"], false);
        assert_eq!(got.created_at.timestamp(), rec.created_at.timestamp());
    }

    #[test]
    fn test_totals_for_user() {
        let s = store();
        let records = vec![
            UsageRecord::new("alice", "r1", TaskType::Chat).with_usage(TokenUsage::new(10, 5), 2),
            UsageRecord::new("alice", "r2", TaskType::Chat).with_usage(TokenUsage::new(4, 1), 1),
            UsageRecord::new("alice", "r3", TaskType::Chat).failed("boom"),
            UsageRecord::new("bob", "r4", TaskType::Chat).with_usage(TokenUsage::new(1, 1), 9),
        ];
        s.insert_batch(&records).unwrap();

        let t = s.totals_for_user("alice").unwrap();
        assert_eq!(t.requests, 3);
        assert_eq!(t.failures, 1);
        assert_eq!(t.prompt_tokens, 14);
        assert_eq!(t.completion_tokens, 6);
        assert_eq!(t.cost_cents, 3);

        assert_eq!(s.totals_for_user("nobody").unwrap(), UsageTotals::default());
    }

    #[test]
    fn test_duplicate_ids_are_ignored() {
        let s = store();
        let rec = UsageRecord::new("alice", "r1", TaskType::Chat);
        s.insert_batch(&[rec.clone(), rec]).unwrap();
        assert_eq!(s.recent(10).unwrap().len(), 1);
    }
}
