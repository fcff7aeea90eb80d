use common::logger::{TraceId, annotate_span, root_span};
use tokio::sync::mpsc;
use tracing::{Instrument, debug, error, info, warn};

use crate::error::ValidationError;
use crate::metrics::counters::Counters;
use crate::pricing::{should_update, to_fixed_point, validate};
use crate::relay::{RelayMessage, RelaySubscription};
use crate::settlement::{SubmissionHandle, SubmissionJob, SubmissionOutcome};
use crate::shutdown::ShutdownListener;

/// What happened to one relay message.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    DecodeFailed,
    /// Change against the last accepted price is below threshold.
    Filtered,
    Rejected(ValidationError),
    Enqueued(SubmissionJob),
    /// Passed every gate but the submission queue is gone.
    Dropped,
}

/// Relay consumer that decides, independently of the distributor, whether a
/// price is worth an on-chain transaction.
///
/// The gate compares against `last_accepted`: the newest price handed to the
/// submission worker, confirmed or not. `last_submitted` only moves on a
/// confirmed transaction. Once no submission is outstanding, `last_accepted`
/// falls back to `last_submitted`, which undoes abandoned jobs.
pub struct Updater {
    threshold: f64,
    last_submitted: f64,
    last_accepted: f64,
    in_flight: u32,
    submissions: SubmissionHandle,
    counters: Counters,
}

impl Updater {
    pub fn new(threshold: f64, submissions: SubmissionHandle, counters: Counters) -> Self {
        Self {
            threshold,
            last_submitted: 0.0,
            last_accepted: 0.0,
            in_flight: 0,
            submissions,
            counters,
        }
    }

    pub fn last_submitted(&self) -> f64 {
        self.last_submitted
    }

    pub fn last_accepted(&self) -> f64 {
        self.last_accepted
    }

    pub async fn on_message(&mut self, raw: &str) -> Disposition {
        Counters::incr(&self.counters.updater_received);

        let msg = match RelayMessage::decode(raw) {
            Ok(m) => m,
            Err(e) => {
                Counters::incr(&self.counters.decode_failed);
                warn!(error = %e, len = raw.len(), "undecodable relay message dropped");
                return Disposition::DecodeFailed;
            }
        };

        let span = root_span("relay_message", &TraceId::new(msg.id.clone()));
        self.gate_and_enqueue(msg).instrument(span).await
    }

    async fn gate_and_enqueue(&mut self, msg: RelayMessage) -> Disposition {
        annotate_span(msg.price, Some(&msg.source));

        if !should_update(msg.price, self.last_accepted, self.threshold) {
            Counters::incr(&self.counters.updater_filtered);
            debug!(
                last_accepted = self.last_accepted,
                in_flight = self.in_flight,
                threshold = self.threshold,
                "change below updater threshold"
            );
            return Disposition::Filtered;
        }

        if let Err(e) = validate(msg.price) {
            Counters::incr(&self.counters.updater_rejected);
            warn!(error = %e, "relay price failed validation");
            return Disposition::Rejected(e);
        }

        let job = SubmissionJob {
            price: msg.price,
            fixed: to_fixed_point(msg.price),
            trace_id: msg.id,
        };

        match self.submissions.enqueue(job.clone()).await {
            Ok(()) => {
                self.last_accepted = job.price;
                self.in_flight += 1;
                info!(fixed = job.fixed, in_flight = self.in_flight, "submission enqueued");
                Disposition::Enqueued(job)
            }
            Err(e) => {
                error!(error = %e, "could not enqueue submission");
                Disposition::Dropped
            }
        }
    }

    pub fn on_outcome(&mut self, outcome: &SubmissionOutcome) {
        self.in_flight = self.in_flight.saturating_sub(1);

        match outcome {
            SubmissionOutcome::Confirmed { price, tx_hash, .. } => {
                debug!(previous = self.last_submitted, price, %tx_hash, "last submitted price advanced");
                self.last_submitted = *price;
            }
            SubmissionOutcome::Abandoned { price, error, .. } => {
                debug!(price, %error, "submission abandoned; last submitted unchanged");
            }
            SubmissionOutcome::Superseded { price, .. } => {
                debug!(price, "submission superseded; last submitted unchanged");
            }
        }

        if self.in_flight == 0 && self.last_accepted != self.last_submitted {
            debug!(
                from = self.last_accepted,
                to = self.last_submitted,
                "no submission outstanding; gate reference reset to last confirmed"
            );
            self.last_accepted = self.last_submitted;
        }
    }

    pub async fn run(
        mut self,
        mut relay: RelaySubscription,
        mut outcomes: mpsc::UnboundedReceiver<SubmissionOutcome>,
        mut shutdown: ShutdownListener,
    ) {
        info!(threshold = self.threshold, "updater started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                Some(outcome) = outcomes.recv() => self.on_outcome(&outcome),
                raw = relay.recv() => match raw {
                    Some(raw) => {
                        self.on_message(&raw).await;
                    }
                    None => {
                        info!("relay closed");
                        break;
                    }
                },
            }
        }

        // outcomes that raced the shutdown signal
        while let Ok(outcome) = outcomes.try_recv() {
            self.on_outcome(&outcome);
        }

        info!(last_submitted = self.last_submitted, "updater stopped");
    }
}
