use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::error::{StoreError, TwapError};
use crate::metrics::counters::{Counters, CountersSnapshot};
use crate::store::{PricePoint, PriceStore};
use crate::twap::TwapEngine;

pub const DEFAULT_HISTORY_LIMIT: usize = 100;
pub const MAX_HISTORY_LIMIT: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatestPriceResponse {
    pub price: f64,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub stale: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryResponse {
    pub count: usize,
    pub prices: Vec<PricePoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TwapResponse {
    pub twap: f64,
    pub window_secs: u64,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsResponse {
    pub record_count: u64,
    pub latest_price: Option<f64>,
    pub stale: bool,
    pub max_age_secs: u64,
    pub cache_healthy: bool,
    pub counters: CountersSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub cache_healthy: bool,
    pub database_healthy: bool,
    pub timestamp: DateTime<Utc>,
}

/// Read-side facade over the store, the TWAP engine and the counters.
pub struct QueryService {
    store: Arc<PriceStore>,
    twap: TwapEngine,
    counters: Counters,
    max_age: Duration,
}

impl QueryService {
    pub fn new(store: Arc<PriceStore>, counters: Counters, max_age: Duration) -> Self {
        Self {
            twap: TwapEngine::new(store.clone()),
            store,
            counters,
            max_age,
        }
    }

    pub async fn latest(&self) -> Result<LatestPriceResponse, StoreError> {
        let p = self.store.latest().await?;
        Ok(LatestPriceResponse {
            stale: self.store.is_stale(self.max_age),
            price: p.price,
            timestamp: p.timestamp,
            source: p.source,
        })
    }

    /// `limit` defaults to 100 and is clamped to `1..=1000`.
    pub async fn history(&self, limit: Option<usize>) -> Result<HistoryResponse, StoreError> {
        let limit = clamp_limit(limit);
        let prices = self.store.history(limit).await?;
        Ok(HistoryResponse {
            count: prices.len(),
            prices,
        })
    }

    pub async fn twap(&self, window: Duration) -> Result<TwapResponse, TwapError> {
        let twap = self.twap.compute(window).await?;
        Ok(TwapResponse {
            twap,
            window_secs: window.as_secs(),
            computed_at: Utc::now(),
        })
    }

    pub async fn stats(&self) -> Result<StatsResponse, StoreError> {
        let record_count = self.store.record_count().await?;

        let latest_price = match self.store.latest().await {
            Ok(p) => Some(p.price),
            Err(StoreError::NoPriceAvailable) => None,
            Err(e) => return Err(e),
        };

        Ok(StatsResponse {
            record_count,
            latest_price,
            stale: self.store.is_stale(self.max_age),
            max_age_secs: self.max_age.as_secs(),
            cache_healthy: self.store.cache_healthy(),
            counters: self.counters.snapshot(),
        })
    }

    pub async fn health(&self) -> HealthResponse {
        let cache_healthy = self.store.cache_healthy();
        let database_healthy = match self.store.record_count().await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "database health probe failed");
                false
            }
        };

        HealthResponse {
            status: if cache_healthy && database_healthy {
                "healthy"
            } else {
                "degraded"
            },
            cache_healthy,
            database_healthy,
            timestamp: Utc::now(),
        }
    }
}

fn clamp_limit(limit: Option<usize>) -> usize {
    limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_limit_defaults_and_clamps() {
        assert_eq!(clamp_limit(None), 100);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(50)), 50);
        assert_eq!(clamp_limit(Some(5000)), 1000);
    }
}
