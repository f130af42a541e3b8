use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::usage::UsageRecord;

/// Bounded buffer of the most recent usage records.
///
/// Append and trim happen under one lock, so trimming can never drop a
/// concurrent append.
#[derive(Debug)]
pub struct UsageRing {
    capacity: usize,
    records: Mutex<VecDeque<UsageRecord>>,
}

impl UsageRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            records: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn push(&self, record: UsageRecord) {
        let mut records = self.records.lock();
        records.push_back(record);
        while records.len() > self.capacity {
            records.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Up to `limit` most recent records, newest first.
    pub fn recent(&self, limit: usize) -> Vec<UsageRecord> {
        self.records.lock().iter().rev().take(limit).cloned().collect()
    }
}

/// Sink for finished call attempts.
///
/// `record` is synchronous: the ring append is immediate and persistence is
/// handed to the background writer.
#[derive(Clone)]
pub struct UsageRecorder {
    ring: Arc<UsageRing>,
    tx: mpsc::UnboundedSender<UsageRecord>,
}

impl UsageRecorder {
    pub fn new(ring: Arc<UsageRing>, tx: mpsc::UnboundedSender<UsageRecord>) -> Self {
        Self { ring, tx }
    }

    pub fn ring(&self) -> &Arc<UsageRing> {
        &self.ring
    }

    pub fn record(&self, record: UsageRecord) {
        tracing::debug!(
            user_id = %record.user_id,
            request_id = %record.request_id,
            provider = %record.provider,
            model = %record.model,
            cost_cents = record.cost_cents,
            success = record.success,
            "Usage recorded"
        );
        self.ring.push(record.clone());
        if self.tx.send(record).is_err() {
            tracing::warn!("Usage writer has stopped; record kept in memory only");
        }
    }
}
