use std::collections::BTreeMap;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, instrument};

use crate::error::CacheError;
use crate::store::model::PricePoint;
use crate::time::{now_ms, to_millis};

/// Fast-read side of the price store.
///
/// Holds one "latest" slot with no expiry plus a history of points keyed by
/// their timestamp, each of which expires after the configured retention.
pub trait PriceCache: Send + Sync {
    fn set_latest(&self, point: &PricePoint) -> Result<(), CacheError>;

    fn get_latest(&self) -> Result<Option<PricePoint>, CacheError>;

    /// Inserts a history entry; a point with an identical timestamp replaces the old one.
    fn add_history(&self, point: &PricePoint) -> Result<(), CacheError>;

    /// Up to `limit` live entries, newest first.
    fn history(&self, limit: usize) -> Result<Vec<PricePoint>, CacheError>;

    /// Drops expired history entries and returns how many were removed.
    fn prune_expired(&self) -> Result<usize, CacheError>;

    fn ping(&self) -> Result<(), CacheError>;
}

struct HistoryEntry {
    point: PricePoint,
    expires_at_ms: i64,
}

/// In-process cache guarded by `parking_lot` locks. Last write wins.
pub struct MemoryPriceCache {
    history_ttl: Duration,
    latest: Mutex<Option<PricePoint>>,
    /// Keyed by timestamp in ms so iteration order is chronological.
    history: Mutex<BTreeMap<i64, HistoryEntry>>,
}

impl MemoryPriceCache {
    pub fn new(history_ttl: Duration) -> Self {
        Self {
            history_ttl,
            latest: Mutex::new(None),
            history: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn history_len(&self) -> usize {
        self.history.lock().len()
    }

    fn ttl_ms(&self) -> i64 {
        i64::try_from(self.history_ttl.as_millis()).unwrap_or(i64::MAX)
    }
}

impl PriceCache for MemoryPriceCache {
    fn set_latest(&self, point: &PricePoint) -> Result<(), CacheError> {
        *self.latest.lock() = Some(point.clone());
        Ok(())
    }

    fn get_latest(&self) -> Result<Option<PricePoint>, CacheError> {
        Ok(self.latest.lock().clone())
    }

    fn add_history(&self, point: &PricePoint) -> Result<(), CacheError> {
        let entry = HistoryEntry {
            point: point.clone(),
            expires_at_ms: now_ms().saturating_add(self.ttl_ms()),
        };
        self.history.lock().insert(to_millis(&point.timestamp), entry);
        Ok(())
    }

    fn history(&self, limit: usize) -> Result<Vec<PricePoint>, CacheError> {
        let now = now_ms();
        let history = self.history.lock();

        Ok(history
            .values()
            .rev()
            .filter(|e| e.expires_at_ms > now)
            .take(limit)
            .map(|e| e.point.clone())
            .collect())
    }

    #[instrument(skip(self), target = "cache")]
    fn prune_expired(&self) -> Result<usize, CacheError> {
        let now = now_ms();
        let mut history = self.history.lock();

        let before = history.len();
        history.retain(|_, e| e.expires_at_ms > now);
        let removed = before - history.len();

        debug!(removed, remaining = history.len(), "expired history entries pruned");
        Ok(removed)
    }

    fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }
}
