use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::credits::{CreditGate, Deduction};
use crate::usage::{UsageRecord, UsageStore};

/// Batches retained across failed flushes before the oldest are dropped.
const MAX_RETAINED_BATCHES: usize = 10;

/// Spawn a background task that reads usage records from the channel,
/// deducts credits for chargeable ones and batch-writes them to `store`.
///
/// The task exits once every sender is dropped and the remaining records
/// are flushed; await the returned handle for a clean shutdown.
pub fn spawn_usage_writer(
    store: Arc<dyn UsageStore>,
    gate: CreditGate,
    mut rx: mpsc::UnboundedReceiver<UsageRecord>,
    batch_size: usize,
    flush_interval: Duration,
) -> tokio::task::JoinHandle<()> {
    let batch_size = batch_size.max(1);
    tokio::spawn(async move {
        let mut buffer: Vec<UsageRecord> = Vec::with_capacity(batch_size);
        // After a failed flush, only the interval (or shutdown) retries.
        let mut store_down = false;
        let mut interval =
            tokio::time::interval_at(tokio::time::Instant::now() + flush_interval, flush_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                record = rx.recv() => {
                    match record {
                        Some(r) => {
                            charge(&gate, &r).await;
                            buffer.push(r);
                            if buffer.len() >= batch_size && !store_down {
                                store_down = !flush_batch(store.as_ref(), &mut buffer, batch_size).await;
                            }
                        }
                        None => {
                            if !buffer.is_empty() {
                                flush_batch(store.as_ref(), &mut buffer, batch_size).await;
                            }
                            tracing::info!("Usage writer shutting down");
                            break;
                        }
                    }
                }
                _ = interval.tick() => {
                    if !buffer.is_empty() {
                        store_down = !flush_batch(store.as_ref(), &mut buffer, batch_size).await;
                    }
                }
            }
        }
    })
}

/// Deduct the cost of a successful priced call. Failures are logged only;
/// the inference result has already been delivered.
async fn charge(gate: &CreditGate, record: &UsageRecord) {
    if !record.is_chargeable() {
        return;
    }
    let deduction = Deduction {
        user_id: record.user_id.clone(),
        org_id: record.org_id.clone(),
        amount_cents: record.cost_cents,
        description: format!("AI {} via {} ({})", record.task_type, record.provider, record.model),
        // Request ids are caller-supplied; the record id makes the key per call.
        idempotency_key: format!("{}:{}", record.request_id, record.id),
    };
    if let Err(e) = gate.deduct(&deduction).await {
        tracing::error!(
            user_id = %record.user_id,
            request_id = %record.request_id,
            cost_cents = record.cost_cents,
            error = %e,
            "Credit deduction failed"
        );
    }
}

/// Persist the buffer. On failure the records are put back (bounded) and
/// `false` is returned.
async fn flush_batch(store: &dyn UsageStore, buffer: &mut Vec<UsageRecord>, batch_size: usize) -> bool {
    let entries = std::mem::take(buffer);
    let count = entries.len();

    match store.persist(&entries).await {
        Ok(()) => {
            tracing::debug!(count, "Flushed usage batch");
            true
        }
        Err(e) => {
            tracing::error!(count, error = %e, "Failed to flush usage batch");
            // Keep for the next tick, bounded.
            *buffer = entries;
            let limit = batch_size * MAX_RETAINED_BATCHES;
            if buffer.len() > limit {
                let dropped = buffer.len() - limit;
                buffer.drain(..dropped);
                tracing::warn!(dropped, "Dropping oldest unpersisted usage records");
            }
            false
        }
    }
}
