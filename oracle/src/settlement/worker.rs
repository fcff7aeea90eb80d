use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::error::SettlementError;
use crate::metrics::counters::Counters;
use crate::settlement::ChainSettlement;
use crate::shutdown::ShutdownListener;

#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionJob {
    pub price: f64,
    pub fixed: u64,
    /// Relay message id, carried through for log correlation.
    pub trace_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionOutcome {
    Confirmed {
        price: f64,
        fixed: u64,
        tx_hash: String,
        attempts: u32,
    },
    /// Every attempt failed.
    Abandoned {
        price: f64,
        fixed: u64,
        attempts: u32,
        error: SettlementError,
    },
    /// A newer job was queued while this one was waiting to retry.
    Superseded { price: f64, fixed: u64, attempts: u32 },
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    /// Delay before retry `n` is `retry_base * 2^n`.
    pub retry_base: Duration,
    pub max_retries: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            retry_base: Duration::from_secs(1),
            max_retries: 5,
        }
    }
}

/// Producer side of the submission queue.
#[derive(Clone)]
pub struct SubmissionHandle {
    tx: mpsc::Sender<SubmissionJob>,
}

impl SubmissionHandle {
    /// Waits for queue space when the worker is behind.
    pub async fn enqueue(&self, job: SubmissionJob) -> Result<(), SettlementError> {
        self.tx
            .send(job)
            .await
            .map_err(|_| SettlementError::QueueClosed)
    }
}

pub fn submission_queue(capacity: usize) -> (SubmissionHandle, mpsc::Receiver<SubmissionJob>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (SubmissionHandle { tx }, rx)
}

enum Step {
    Done(SubmissionOutcome),
    Interrupted,
}

/// Sole owner of on-chain submissions: drains jobs FIFO with one submission
/// in flight, retrying failures with exponential backoff.
pub struct SubmissionWorker {
    chain: Arc<dyn ChainSettlement>,
    cfg: WorkerConfig,
    counters: Counters,
}

impl SubmissionWorker {
    pub fn new(chain: Arc<dyn ChainSettlement>, cfg: WorkerConfig, counters: Counters) -> Self {
        Self {
            chain,
            cfg,
            counters,
        }
    }

    pub async fn run(
        self,
        mut rx: mpsc::Receiver<SubmissionJob>,
        outcomes: mpsc::UnboundedSender<SubmissionOutcome>,
        mut shutdown: ShutdownListener,
    ) {
        info!(
            retry_base_ms = self.cfg.retry_base.as_millis() as u64,
            max_retries = self.cfg.max_retries,
            "submission worker started"
        );

        let mut interrupted = None;

        loop {
            let job = tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                job = rx.recv() => match job {
                    Some(j) => j,
                    None => {
                        info!("submission queue closed");
                        break;
                    }
                },
            };

            let span = info_span!(
                "submission",
                trace_id = %job.trace_id,
                price = job.price,
                fixed = job.fixed
            );

            match self.process(&job, &rx, &mut shutdown).instrument(span).await {
                Step::Done(outcome) => {
                    if outcomes.send(outcome).is_err() {
                        debug!("outcome receiver gone");
                    }
                }
                Step::Interrupted => {
                    interrupted = Some(job);
                    break;
                }
            }
        }

        rx.close();
        let mut abandoned = Vec::new();
        abandoned.extend(interrupted);
        while let Ok(job) = rx.try_recv() {
            abandoned.push(job);
        }

        if !abandoned.is_empty() {
            self.counters
                .abandoned
                .fetch_add(abandoned.len() as u64, Ordering::Relaxed);
            for job in &abandoned {
                warn!(trace_id = %job.trace_id, fixed = job.fixed, "submission abandoned at shutdown");
            }
            warn!(count = abandoned.len(), "pending submissions abandoned at shutdown");
        }

        info!("submission worker stopped");
    }

    async fn process(
        &self,
        job: &SubmissionJob,
        rx: &mpsc::Receiver<SubmissionJob>,
        shutdown: &mut ShutdownListener,
    ) -> Step {
        let mut retry = 0u32;

        loop {
            // runs to receipt or timeout even during shutdown; once broadcast it may be mined
            let result = self.chain.submit_price(job.fixed).await;

            let err = match result {
                Ok(receipt) => {
                    Counters::incr(&self.counters.submissions_confirmed);
                    info!(
                        tx_hash = %receipt.tx_hash,
                        block = ?receipt.block_number,
                        attempts = retry + 1,
                        "price settled on chain"
                    );
                    return Step::Done(SubmissionOutcome::Confirmed {
                        price: job.price,
                        fixed: job.fixed,
                        tx_hash: receipt.tx_hash,
                        attempts: retry + 1,
                    });
                }
                Err(e) => e,
            };

            Counters::incr(&self.counters.submissions_failed);

            if retry >= self.cfg.max_retries {
                Counters::incr(&self.counters.abandoned);
                error!(error = %err, attempts = retry + 1, "retries exhausted; submission abandoned");
                return Step::Done(SubmissionOutcome::Abandoned {
                    price: job.price,
                    fixed: job.fixed,
                    attempts: retry + 1,
                    error: err,
                });
            }

            retry += 1;
            if let Some(step) = self.superseded(job, rx, retry) {
                return step;
            }

            let delay = backoff(self.cfg.retry_base, retry);
            warn!(
                error = %err,
                retry,
                delay_ms = delay.as_millis() as u64,
                "submission failed; retry scheduled"
            );

            tokio::select! {
                biased;
                _ = shutdown.wait() => return Step::Interrupted,
                _ = tokio::time::sleep(delay) => {}
            }

            if let Some(step) = self.superseded(job, rx, retry) {
                return step;
            }
            Counters::incr(&self.counters.retries);
        }
    }

    /// Older prices must never land after newer ones.
    fn superseded(
        &self,
        job: &SubmissionJob,
        rx: &mpsc::Receiver<SubmissionJob>,
        retry: u32,
    ) -> Option<Step> {
        if rx.is_empty() {
            return None;
        }

        Counters::incr(&self.counters.superseded);
        info!(retry, queued = rx.len(), "newer price queued; retry superseded");
        Some(Step::Done(SubmissionOutcome::Superseded {
            price: job.price,
            fixed: job.fixed,
            attempts: retry,
        }))
    }
}

/// `base * 2^n`, saturating.
pub fn backoff(base: Duration, n: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settlement::{OnChainPrice, TxReceipt};
    use crate::shutdown::Shutdown;
    use parking_lot::Mutex;
    use tokio::time::Instant;

    /// Fails the first `failures` calls, and every call for `poisoned`.
    /// Each call takes `mining` before it resolves.
    #[derive(Default)]
    struct ScriptedChain {
        failures: Mutex<u32>,
        poisoned: Option<u64>,
        mining: Duration,
        calls: Mutex<Vec<u64>>,
    }

    impl ScriptedChain {
        fn failing_first(n: u32) -> Self {
            Self {
                failures: Mutex::new(n),
                ..Default::default()
            }
        }
    }

    #[async_trait::async_trait]
    impl ChainSettlement for ScriptedChain {
        async fn submit_price(&self, value: u64) -> Result<TxReceipt, SettlementError> {
            self.calls.lock().push(value);
            if !self.mining.is_zero() {
                tokio::time::sleep(self.mining).await;
            }

            if self.poisoned == Some(value) {
                return Err(SettlementError::Submission("nonce too low".into()));
            }
            let mut left = self.failures.lock();
            if *left > 0 {
                *left -= 1;
                return Err(SettlementError::Submission("rpc unavailable".into()));
            }

            Ok(TxReceipt {
                tx_hash: format!("0x{value:x}"),
                block_number: Some(1),
                gas_used: Some(21_000),
            })
        }

        async fn latest_price(&self) -> Result<OnChainPrice, SettlementError> {
            Err(SettlementError::Call("unused".into()))
        }

        async fn is_stale(&self) -> Result<bool, SettlementError> {
            Ok(false)
        }

        async fn price_age(&self) -> Result<u64, SettlementError> {
            Ok(0)
        }
    }

    fn job(fixed: u64) -> SubmissionJob {
        SubmissionJob {
            price: fixed as f64 / 1e8,
            fixed,
            trace_id: format!("t-{fixed}"),
        }
    }

    const BASE: Duration = Duration::from_millis(100);

    fn assert_elapsed(start: Instant, expected: Duration) {
        let elapsed = start.elapsed();
        assert!(
            elapsed >= expected && elapsed < expected + Duration::from_millis(10),
            "elapsed {elapsed:?}, expected {expected:?}"
        );
    }

    struct Harness {
        handle: SubmissionHandle,
        outcomes: mpsc::UnboundedReceiver<SubmissionOutcome>,
        shutdown: Shutdown,
        counters: Counters,
        task: Option<tokio::task::JoinHandle<()>>,
        rx: Option<mpsc::Receiver<SubmissionJob>>,
        chain: Arc<ScriptedChain>,
    }

    impl Harness {
        fn new(chain: ScriptedChain) -> Self {
            let (handle, rx) = submission_queue(16);
            let (_, outcomes) = mpsc::unbounded_channel();
            Self {
                handle,
                outcomes,
                shutdown: Shutdown::new(),
                counters: Counters::default(),
                task: None,
                rx: Some(rx),
                chain: Arc::new(chain),
            }
        }

        fn start(&mut self) {
            let (out_tx, out_rx) = mpsc::unbounded_channel();
            self.outcomes = out_rx;

            let worker = SubmissionWorker::new(
                self.chain.clone(),
                WorkerConfig {
                    retry_base: BASE,
                    max_retries: 5,
                },
                self.counters.clone(),
            );
            let rx = self.rx.take().unwrap();
            let listener = self.shutdown.listener();
            self.task = Some(tokio::spawn(worker.run(rx, out_tx, listener)));
        }
    }

    #[test]
    fn backoff_doubles_from_base() {
        let base = Duration::from_secs(1);
        let delays: Vec<u64> = (1..=5).map(|n| backoff(base, n).as_secs()).collect();
        assert_eq!(delays, vec![2, 4, 8, 16, 32]);
    }

    #[tokio::test(start_paused = true)]
    async fn first_try_success_confirms_once() {
        let mut h = Harness::new(ScriptedChain::default());
        h.start();

        h.handle.enqueue(job(185_000_000_000)).await.unwrap();
        let out = h.outcomes.recv().await.unwrap();

        assert_eq!(
            out,
            SubmissionOutcome::Confirmed {
                price: 1850.0,
                fixed: 185_000_000_000,
                tx_hash: format!("0x{:x}", 185_000_000_000u64),
                attempts: 1,
            }
        );
        assert_eq!(h.counters.retries.load(Ordering::Relaxed), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_follow_exponential_schedule() {
        let mut h = Harness::new(ScriptedChain::failing_first(2));
        h.start();

        let start = Instant::now();
        h.handle.enqueue(job(1)).await.unwrap();
        let out = h.outcomes.recv().await.unwrap();

        // 2*base before retry 1, 4*base before retry 2
        assert!(matches!(out, SubmissionOutcome::Confirmed { attempts: 3, .. }));
        assert_elapsed(start, BASE * 6);
        assert_eq!(h.counters.retries.load(Ordering::Relaxed), 2);
        assert_eq!(h.counters.submissions_failed.load(Ordering::Relaxed), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn abandons_after_five_retries() {
        let mut h = Harness::new(ScriptedChain::failing_first(u32::MAX));
        h.start();

        let start = Instant::now();
        h.handle.enqueue(job(7)).await.unwrap();
        let out = h.outcomes.recv().await.unwrap();

        assert!(matches!(out, SubmissionOutcome::Abandoned { attempts: 6, .. }));
        assert_elapsed(start, BASE * (2 + 4 + 8 + 16 + 32));
        assert_eq!(h.chain.calls.lock().len(), 6);
        assert_eq!(h.counters.abandoned.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn queued_newer_price_supersedes_retry() {
        let mut h = Harness::new(ScriptedChain {
            poisoned: Some(100),
            ..Default::default()
        });

        h.handle.enqueue(job(100)).await.unwrap();
        h.handle.enqueue(job(200)).await.unwrap();
        h.start();

        let first = h.outcomes.recv().await.unwrap();
        let second = h.outcomes.recv().await.unwrap();

        assert!(matches!(
            first,
            SubmissionOutcome::Superseded { fixed: 100, attempts: 1, .. }
        ));
        assert!(matches!(second, SubmissionOutcome::Confirmed { fixed: 200, .. }));
        assert_eq!(*h.chain.calls.lock(), vec![100, 200]);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_backoff_and_counts_pending() {
        let mut h = Harness::new(ScriptedChain::failing_first(u32::MAX));
        h.start();

        h.handle.enqueue(job(1)).await.unwrap();
        // worker is now sleeping 2*base before its first retry
        tokio::time::sleep(BASE).await;
        h.handle.enqueue(job(2)).await.unwrap();

        h.shutdown.trigger();
        h.task.take().unwrap().await.unwrap();

        assert!(h.outcomes.try_recv().is_err());
        assert_eq!(h.counters.abandoned.load(Ordering::Relaxed), 2);
        assert_eq!(*h.chain.calls.lock(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_lets_in_flight_attempt_report() {
        let mut h = Harness::new(ScriptedChain {
            mining: Duration::from_secs(12),
            ..Default::default()
        });
        h.start();

        h.handle.enqueue(job(185_000_000_000)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        h.handle.enqueue(job(185_100_000_000)).await.unwrap();

        h.shutdown.trigger();
        h.task.take().unwrap().await.unwrap();

        assert!(matches!(
            h.outcomes.try_recv(),
            Ok(SubmissionOutcome::Confirmed { fixed: 185_000_000_000, .. })
        ));
        // only the job that never started is abandoned
        assert_eq!(h.counters.abandoned.load(Ordering::Relaxed), 1);
        assert_eq!(*h.chain.calls.lock(), vec![185_000_000_000]);
    }
}
