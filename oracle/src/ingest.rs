//! Ingestion loop
//!
//! On a fixed cadence: fetch one observation, validate and normalize it,
//! publish it when it moved enough against the prior cached value, then
//! write it to the store.
//!
//! Data flow:
//! PriceSource → pricing → Distributor (vs prior cache) → PriceStore

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::logger::{TraceId, annotate_span, root_span};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{Instrument, debug, info, warn};

use crate::distributor::{Distributor, PublishOutcome};
use crate::error::{FetchError, ValidationError};
use crate::market::PriceSource;
use crate::metrics::counters::Counters;
use crate::pricing::{normalize, validate};
use crate::shutdown::ShutdownListener;
use crate::store::{PricePoint, PriceStore, WriteOutcome};

#[derive(Debug)]
pub enum CycleReport {
    FetchFailed(FetchError),
    Invalid(ValidationError),
    Completed {
        point: PricePoint,
        published: Option<PublishOutcome>,
        write: WriteOutcome,
    },
}

pub struct IngestionService {
    source: Arc<dyn PriceSource>,
    store: Arc<PriceStore>,
    distributor: Distributor,
    precision: u32,
    counters: Counters,
}

impl IngestionService {
    pub fn new(
        source: Arc<dyn PriceSource>,
        store: Arc<PriceStore>,
        distributor: Distributor,
        precision: u32,
        counters: Counters,
    ) -> Self {
        Self {
            source,
            store,
            distributor,
            precision,
            counters,
        }
    }

    /// One full cycle. Failures are logged and counted here; the loop never stops on them.
    pub async fn run_cycle(&self) -> CycleReport {
        let raw = match self.source.fetch().await {
            Ok(p) => {
                Counters::incr(&self.counters.fetch_ok);
                p
            }
            Err(e) => {
                Counters::incr(&self.counters.fetch_failed);
                warn!(error = %e, kind = e.kind(), source = self.source.name(), "price fetch failed");
                return CycleReport::FetchFailed(e);
            }
        };

        if let Err(e) = validate(raw) {
            Counters::incr(&self.counters.validation_failed);
            warn!(error = %e, raw, "fetched price failed validation");
            return CycleReport::Invalid(e);
        }

        let point = PricePoint::new(normalize(raw, self.precision), Utc::now(), self.source.name());
        annotate_span(point.price, Some(&point.source));

        // reference must be read before this cycle's write replaces it
        let last_known = self.store.cached_latest_price();

        // publish failures are logged by the distributor and never retried
        let published = self.distributor.publish(&point, last_known).ok();

        let write = self.store.write(&point).await;

        debug!(price = point.price, last_known, ?published, "ingestion cycle complete");
        CycleReport::Completed {
            point,
            published,
            write,
        }
    }

    /// Runs cycles until shutdown. Ticks missed while a slow cycle was
    /// running are skipped, so cycles never overlap or burst.
    pub async fn run(self, every: Duration, mut shutdown: ShutdownListener) {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            source = self.source.name(),
            every_ms = every.as_millis() as u64,
            "ingestion loop started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                _ = ticker.tick() => {}
            }

            let span = root_span("ingestion_cycle", &TraceId::default());
            self.run_cycle().instrument(span).await;
        }

        info!("ingestion loop stopped");
    }
}
