use tracing::{debug, info, instrument, warn};

use crate::error::PublishError;
use crate::metrics::counters::Counters;
use crate::pricing::{relative_change, should_update};
use crate::relay::{Relay, RelayMessage};
use crate::store::model::PricePoint;

#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    /// Change below threshold; nothing sent.
    Filtered,
    Published { id: String, receivers: usize },
}

/// Decides whether a fresh point is worth broadcasting and sends it on the relay.
///
/// Holds no reference price of its own; the caller passes the prior cached
/// latest value, so the gate is independent of the updater's.
pub struct Distributor {
    threshold: f64,
    relay: Relay,
    counters: Counters,
}

impl Distributor {
    pub fn new(threshold: f64, relay: Relay, counters: Counters) -> Self {
        Self {
            threshold,
            relay,
            counters,
        }
    }

    #[instrument(skip(self, point), fields(price = point.price))]
    pub fn publish(
        &self,
        point: &PricePoint,
        last_known: f64,
    ) -> Result<PublishOutcome, PublishError> {
        if !should_update(point.price, last_known, self.threshold) {
            Counters::incr(&self.counters.publish_filtered);
            debug!(
                change = relative_change(point.price, last_known).unwrap_or_default(),
                threshold = self.threshold,
                "price change below distribution threshold"
            );
            return Ok(PublishOutcome::Filtered);
        }

        let msg = RelayMessage::from_point(point);
        match self.relay.publish(&msg) {
            Ok(receivers) => {
                Counters::incr(&self.counters.published);
                info!(id = %msg.id, receivers, "price published");
                Ok(PublishOutcome::Published {
                    id: msg.id,
                    receivers,
                })
            }
            Err(e) => {
                Counters::incr(&self.counters.publish_failed);
                warn!(error = %e, "price publish failed");
                Err(e)
            }
        }
    }
}
