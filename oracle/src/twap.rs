use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use crate::error::TwapError;
use crate::store::PriceStore;
use crate::store::model::PriceRecord;

/// Time-weighted average over `records` (ascending by timestamp).
///
/// Each record is weighted by how long it stayed current: the gap to the next
/// record, and for the last one the gap to `now`. Weights are seconds with
/// millisecond resolution.
pub fn time_weighted_average(
    records: &[PriceRecord],
    now: DateTime<Utc>,
) -> Result<f64, TwapError> {
    match records {
        [] => Err(TwapError::NoDataInWindow),
        [only] => Ok(only.price),
        _ => {
            let mut weighted_sum = 0.0;
            let mut total_weight = 0.0;

            for (i, r) in records.iter().enumerate() {
                let until = records.get(i + 1).map_or(now, |next| next.timestamp);
                let weight = seconds_between(r.timestamp, until);

                weighted_sum += r.price * weight;
                total_weight += weight;
            }

            if total_weight == 0.0 {
                return Err(TwapError::InvalidWeights);
            }

            Ok(weighted_sum / total_weight)
        }
    }
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0
}

/// Computes TWAPs from the durable price history.
pub struct TwapEngine {
    store: Arc<PriceStore>,
}

impl TwapEngine {
    pub fn new(store: Arc<PriceStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self), fields(window_secs = window.as_secs()))]
    pub async fn compute(&self, window: Duration) -> Result<f64, TwapError> {
        let records = self
            .store
            .records_in_window(window)
            .await
            .map_err(|e| TwapError::Store(e.to_string()))?;

        let twap = time_weighted_average(&records, Utc::now())?;
        debug!(records = records.len(), twap, "twap computed");

        Ok(twap)
    }
}
