use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Minimal counters for operational visibility.
#[derive(Clone, Default)]
pub struct Counters {
    pub fetch_ok: Arc<AtomicU64>,
    pub fetch_failed: Arc<AtomicU64>,
    pub validation_failed: Arc<AtomicU64>,

    // store
    pub cache_write_failed: Arc<AtomicU64>,
    pub cache_read_failed: Arc<AtomicU64>,
    pub durable_write_failed: Arc<AtomicU64>,

    // distributor
    pub published: Arc<AtomicU64>,
    pub publish_filtered: Arc<AtomicU64>,
    pub publish_failed: Arc<AtomicU64>,

    // updater
    pub updater_received: Arc<AtomicU64>,
    pub updater_filtered: Arc<AtomicU64>,
    pub updater_rejected: Arc<AtomicU64>,
    pub decode_failed: Arc<AtomicU64>,

    // settlement
    pub submissions_confirmed: Arc<AtomicU64>,
    pub submissions_failed: Arc<AtomicU64>,
    pub retries: Arc<AtomicU64>,
    pub abandoned: Arc<AtomicU64>,
    pub superseded: Arc<AtomicU64>,
}

impl Counters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        let get = |c: &Arc<AtomicU64>| c.load(Ordering::Relaxed);

        CountersSnapshot {
            fetch_ok: get(&self.fetch_ok),
            fetch_failed: get(&self.fetch_failed),
            validation_failed: get(&self.validation_failed),
            cache_write_failed: get(&self.cache_write_failed),
            cache_read_failed: get(&self.cache_read_failed),
            durable_write_failed: get(&self.durable_write_failed),
            published: get(&self.published),
            publish_filtered: get(&self.publish_filtered),
            publish_failed: get(&self.publish_failed),
            updater_received: get(&self.updater_received),
            updater_filtered: get(&self.updater_filtered),
            updater_rejected: get(&self.updater_rejected),
            decode_failed: get(&self.decode_failed),
            submissions_confirmed: get(&self.submissions_confirmed),
            submissions_failed: get(&self.submissions_failed),
            retries: get(&self.retries),
            abandoned: get(&self.abandoned),
            superseded: get(&self.superseded),
        }
    }
}

/// Point-in-time copy of [`Counters`], safe to serialize.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CountersSnapshot {
    pub fetch_ok: u64,
    pub fetch_failed: u64,
    pub validation_failed: u64,
    pub cache_write_failed: u64,
    pub cache_read_failed: u64,
    pub durable_write_failed: u64,
    pub published: u64,
    pub publish_filtered: u64,
    pub publish_failed: u64,
    pub updater_received: u64,
    pub updater_filtered: u64,
    pub updater_rejected: u64,
    pub decode_failed: u64,
    pub submissions_confirmed: u64,
    pub submissions_failed: u64,
    pub retries: u64,
    pub abandoned: u64,
    pub superseded: u64,
}
