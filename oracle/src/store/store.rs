use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::logger::warn_if_slow;
use tracing::{debug, instrument, warn};

use crate::error::StoreError;
use crate::metrics::counters::Counters;
use crate::store::cache::PriceCache;
use crate::store::model::{PricePoint, PriceRecord};
use crate::store::repository::PriceRepository;

/// Which parts of a write landed. Each part is attempted regardless of the others.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOutcome {
    /// The cache's latest slot now holds this point.
    pub cached: bool,
    /// The point was appended to the cache history.
    pub history: bool,
    pub record_id: Option<i64>,
}

impl WriteOutcome {
    pub fn durable(&self) -> bool {
        self.record_id.is_some()
    }
}

/// Cache-aside price store: reads prefer the cache, writes go to both sides.
pub struct PriceStore {
    cache: Arc<dyn PriceCache>,
    repo: Arc<dyn PriceRepository>,
    counters: Counters,
}

impl PriceStore {
    pub fn new(
        cache: Arc<dyn PriceCache>,
        repo: Arc<dyn PriceRepository>,
        counters: Counters,
    ) -> Self {
        Self {
            cache,
            repo,
            counters,
        }
    }

    /// Writes the point to the cache (latest slot + history) and appends a
    /// durable row. A failure on one side is logged and counted and never
    /// prevents the other.
    #[instrument(skip(self, point), target = "store", fields(price = point.price))]
    pub async fn write(&self, point: &PricePoint) -> WriteOutcome {
        let cached = match self.cache.set_latest(point) {
            Ok(()) => true,
            Err(e) => {
                Counters::incr(&self.counters.cache_write_failed);
                warn!(error = %e, "cache latest write failed");
                false
            }
        };

        let history = match self.cache.add_history(point) {
            Ok(()) => true,
            Err(e) => {
                Counters::incr(&self.counters.cache_write_failed);
                warn!(error = %e, "cache history write failed");
                false
            }
        };

        let record_id = match warn_if_slow("db_insert_price", Duration::from_millis(100), async {
            self.repo.insert(point).await
        })
        .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                Counters::incr(&self.counters.durable_write_failed);
                warn!(error = %format!("{e:#}"), "durable write failed");
                None
            }
        };

        debug!(cached, history, ?record_id, "price written");
        WriteOutcome {
            cached,
            history,
            record_id,
        }
    }

    /// Latest price: cache first, durable store on miss or cache failure.
    #[instrument(skip(self), target = "store")]
    pub async fn latest(&self) -> Result<PricePoint, StoreError> {
        match self.cache.get_latest() {
            Ok(Some(p)) => return Ok(p),
            Ok(None) => debug!("latest cache miss; falling back to durable store"),
            Err(e) => {
                Counters::incr(&self.counters.cache_read_failed);
                warn!(error = %e, "cache read failed; falling back to durable store");
            }
        }

        let record = warn_if_slow("db_latest_price", Duration::from_millis(100), async {
            self.repo.latest().await
        })
        .await
        .map_err(StoreError::durable)?;

        record
            .map(PricePoint::from)
            .ok_or(StoreError::NoPriceAvailable)
    }

    /// Up to `limit` points, newest first.
    #[instrument(skip(self), target = "store")]
    pub async fn history(&self, limit: usize) -> Result<Vec<PricePoint>, StoreError> {
        match self.cache.history(limit) {
            Ok(points) if !points.is_empty() => return Ok(points),
            Ok(_) => debug!("history cache empty; falling back to durable store"),
            Err(e) => {
                Counters::incr(&self.counters.cache_read_failed);
                warn!(error = %e, "history cache read failed; falling back to durable store");
            }
        }

        let records = warn_if_slow("db_price_history", Duration::from_millis(200), async {
            self.repo.history(limit).await
        })
        .await
        .map_err(StoreError::durable)?;

        Ok(records.into_iter().map(PricePoint::from).collect())
    }

    /// Durable rows in `[now - window, now]`, oldest first.
    pub async fn records_in_window(&self, window: Duration) -> Result<Vec<PriceRecord>, StoreError> {
        let end = Utc::now();
        let start = cutoff(end, window);

        warn_if_slow("db_price_range", Duration::from_millis(200), async {
            self.repo.range(start, end).await
        })
        .await
        .map_err(StoreError::durable)
    }

    /// True when the cached latest point is older than `max_age`, or when it
    /// cannot be read at all.
    pub fn is_stale(&self, max_age: Duration) -> bool {
        match self.cache.get_latest() {
            Ok(Some(p)) => {
                let age = Utc::now().signed_duration_since(p.timestamp);
                age.to_std().map(|a| a > max_age).unwrap_or(false)
            }
            Ok(None) => true,
            Err(e) => {
                Counters::incr(&self.counters.cache_read_failed);
                debug!(error = %e, "staleness check could not read cache");
                true
            }
        }
    }

    /// Prior cached latest price, used as the distribution reference.
    /// `0.0` on miss or error, which forces the next publish.
    pub fn cached_latest_price(&self) -> f64 {
        match self.cache.get_latest() {
            Ok(Some(p)) => p.price,
            Ok(None) => 0.0,
            Err(e) => {
                Counters::incr(&self.counters.cache_read_failed);
                warn!(error = %e, "could not read cached latest price");
                0.0
            }
        }
    }

    pub async fn record_count(&self) -> Result<u64, StoreError> {
        self.repo.count().await.map_err(StoreError::durable)
    }

    /// Deletes durable rows observed more than `age` ago.
    #[instrument(skip(self), target = "store")]
    pub async fn prune_older_than(&self, age: Duration) -> Result<u64, StoreError> {
        let cutoff = cutoff(Utc::now(), age);
        let removed = self
            .repo
            .delete_older_than(cutoff)
            .await
            .map_err(StoreError::durable)?;

        debug!(removed, %cutoff, "durable records pruned");
        Ok(removed)
    }

    pub fn prune_cache_history(&self) -> Result<usize, StoreError> {
        Ok(self.cache.prune_expired()?)
    }

    pub fn cache_healthy(&self) -> bool {
        self.cache.ping().is_ok()
    }
}

/// `now - age`, saturating at the earliest representable instant.
fn cutoff(now: DateTime<Utc>, age: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(age)
        .ok()
        .and_then(|d| now.checked_sub_signed(d))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
