mod support;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

use oracle::distributor::Distributor;
use oracle::error::FetchError;
use oracle::ingest::{CycleReport, IngestionService};
use oracle::market::PriceSource;
use oracle::metrics::counters::Counters;
use oracle::query::QueryService;
use oracle::relay::Relay;
use oracle::settlement::{ChainSettlement, SubmissionWorker, WorkerConfig, submission_queue};
use oracle::shutdown::{Shutdown, TaskTracker};
use oracle::store::{MemoryPriceCache, PriceStore, SqlxPriceRepository};
use oracle::updater::Updater;

use support::{InMemoryOracleContract, setup_db};

struct QueuedSource(Mutex<VecDeque<f64>>);

impl QueuedSource {
    fn new(prices: &[f64]) -> Self {
        Self(Mutex::new(prices.iter().copied().collect()))
    }
}

#[async_trait]
impl PriceSource for QueuedSource {
    async fn fetch(&self) -> Result<f64, FetchError> {
        self.0
            .lock()
            .pop_front()
            .ok_or_else(|| FetchError::Protocol("script exhausted".into()))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

struct Pipeline {
    ingestion: IngestionService,
    query: QueryService,
    contract: InMemoryOracleContract,
    counters: Counters,
    shutdown: Shutdown,
    tracker: TaskTracker,
}

async fn pipeline(prices: &[f64]) -> Pipeline {
    let counters = Counters::default();
    let repo = Arc::new(SqlxPriceRepository::new(setup_db().await));
    let cache = Arc::new(MemoryPriceCache::new(Duration::from_secs(86_400)));
    let store = Arc::new(PriceStore::new(cache, repo, counters.clone()));

    let relay = Relay::new(16);
    let shutdown = Shutdown::new();
    let mut tracker = TaskTracker::new();
    let contract = InMemoryOracleContract::new(3600);

    let (submissions, jobs) = submission_queue(8);
    let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();

    let worker = SubmissionWorker::new(
        Arc::new(contract.clone()),
        WorkerConfig {
            retry_base: Duration::from_millis(10),
            max_retries: 5,
        },
        counters.clone(),
    );
    tracker.spawn("worker", worker.run(jobs, outcome_tx, shutdown.listener()));

    let updater = Updater::new(0.005, submissions, counters.clone());
    tracker.spawn(
        "updater",
        updater.run(relay.subscribe(), outcome_rx, shutdown.listener()),
    );

    let ingestion = IngestionService::new(
        Arc::new(QueuedSource::new(prices)),
        store.clone(),
        Distributor::new(0.005, relay, counters.clone()),
        8,
        counters.clone(),
    );

    Pipeline {
        ingestion,
        query: QueryService::new(store, counters.clone(), Duration::from_secs(60)),
        contract,
        counters,
        shutdown,
        tracker,
    }
}

async fn wait_for_on_chain(contract: &InMemoryOracleContract, expected: u64) {
    timeout(Duration::from_secs(5), async {
        while contract.latest_price().await.unwrap().price != expected {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("price never settled on chain");
}

#[tokio::test]
async fn fetched_price_settles_on_chain_as_fixed_point() {
    let p = pipeline(&[1850.0]).await;

    match p.ingestion.run_cycle().await {
        CycleReport::Completed { write, .. } => assert!(write.cached && write.durable()),
        other => panic!("unexpected cycle report: {other:?}"),
    }

    wait_for_on_chain(&p.contract, 185_000_000_000).await;
    assert_eq!(p.contract.submissions(), vec![185_000_000_000]);
    assert!(!p.contract.is_stale().await.unwrap());

    let latest = p.query.latest().await.unwrap();
    assert_eq!(latest.price, 1850.0);
    assert_eq!(latest.source, "scripted");
    assert!(!latest.stale);

    p.shutdown.trigger();
    assert!(p.tracker.join_all(Duration::from_secs(1)).await.is_empty());
}

#[tokio::test]
async fn failed_submissions_are_retried_until_they_land() {
    let p = pipeline(&[1850.0, 2000.0]).await;

    p.ingestion.run_cycle().await;
    wait_for_on_chain(&p.contract, 185_000_000_000).await;

    p.contract.fail_next(2);
    p.ingestion.run_cycle().await;
    wait_for_on_chain(&p.contract, 200_000_000_000).await;

    assert_eq!(
        p.contract.submissions(),
        vec![
            185_000_000_000,
            200_000_000_000,
            200_000_000_000,
            200_000_000_000
        ]
    );

    let snap = p.counters.snapshot();
    assert_eq!(snap.submissions_confirmed, 2);
    assert_eq!(snap.submissions_failed, 2);
    assert_eq!(snap.retries, 2);
    assert_eq!(snap.abandoned, 0);

    p.shutdown.trigger();
    p.tracker.join_all(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn small_moves_are_stored_but_not_distributed() {
    let p = pipeline(&[1850.0, 1851.0]).await;

    p.ingestion.run_cycle().await;
    wait_for_on_chain(&p.contract, 185_000_000_000).await;
    // cache history is keyed by millisecond
    sleep(Duration::from_millis(5)).await;

    match p.ingestion.run_cycle().await {
        CycleReport::Completed {
            published, write, ..
        } => {
            assert!(matches!(
                published,
                Some(oracle::distributor::PublishOutcome::Filtered)
            ));
            assert!(write.durable());
        }
        other => panic!("unexpected cycle report: {other:?}"),
    }

    let stats = p.query.stats().await.unwrap();
    assert_eq!(stats.record_count, 2);
    assert_eq!(stats.latest_price, Some(1851.0));
    assert_eq!(stats.counters.published, 1);
    assert_eq!(stats.counters.publish_filtered, 1);

    let history = p.query.history(None).await.unwrap();
    assert_eq!(history.count, 2);
    assert_eq!(history.prices[0].price, 1851.0);

    p.shutdown.trigger();
    p.tracker.join_all(Duration::from_secs(1)).await;
    assert_eq!(p.contract.submissions(), vec![185_000_000_000]);
}

#[tokio::test]
async fn twap_and_health_read_from_the_real_database() {
    let p = pipeline(&[1850.0, 2000.0]).await;

    p.ingestion.run_cycle().await;
    sleep(Duration::from_millis(50)).await;
    p.ingestion.run_cycle().await;
    sleep(Duration::from_millis(50)).await;

    let twap = p.query.twap(Duration::from_secs(60)).await.unwrap();
    assert!(twap.twap > 1850.0 && twap.twap < 2000.0, "twap = {}", twap.twap);
    assert_eq!(twap.window_secs, 60);

    let health = p.query.health().await;
    assert_eq!(health.status, "healthy");
    assert!(health.database_healthy);

    // third fetch fails: the loop reports it and nothing else changes
    assert!(matches!(
        p.ingestion.run_cycle().await,
        CycleReport::FetchFailed(_)
    ));
    assert_eq!(p.query.stats().await.unwrap().record_count, 2);

    p.shutdown.trigger();
    p.tracker.join_all(Duration::from_secs(1)).await;
}
