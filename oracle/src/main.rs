use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;

use common::logger::init_tracing;
use oracle::{
    config::AppConfig,
    db::Db,
    distributor::Distributor,
    ingest::IngestionService,
    maintenance::run_maintenance,
    market::{FetchMode, MarketDataSource, PriceFetcher, PriceSource},
    metrics::counters::Counters,
    query::QueryService,
    relay::Relay,
    settlement::{
        ChainSettlement, EthersSettlementClient, EthersSettlementConfig, SubmissionWorker,
        WorkerConfig, submission_queue,
    },
    shutdown::{Shutdown, TaskTracker},
    store::{MemoryPriceCache, PriceStore, SqlxPriceRepository},
    updater::Updater,
};

/// Connects the database, runs migrations and builds the cache-fronted store.
async fn init_store(cfg: &AppConfig, counters: &Counters) -> anyhow::Result<Arc<PriceStore>> {
    let db = Db::connect(&cfg.database_url).await?;
    db.migrate().await?;

    let repo = Arc::new(SqlxPriceRepository::new((*db.pool).clone()));
    let cache = Arc::new(MemoryPriceCache::new(cfg.cache_history_ttl));

    Ok(Arc::new(PriceStore::new(cache, repo, counters.clone())))
}

fn build_source(cfg: &AppConfig) -> anyhow::Result<Arc<dyn PriceSource>> {
    let fetcher = PriceFetcher::new(
        cfg.market_data_url.clone(),
        cfg.asset_id.clone(),
        cfg.quote_currency.clone(),
        cfg.fetch_timeout,
    )
    .context("failed to build market data client")?;

    let mode = if cfg.market_data_urls.is_empty() {
        FetchMode::Single
    } else {
        FetchMode::Aggregated(cfg.market_data_urls.clone())
    };

    Ok(Arc::new(MarketDataSource::new(
        fetcher,
        mode,
        cfg.price_source.clone(),
    )))
}

async fn connect_chain(cfg: &AppConfig) -> anyhow::Result<Arc<dyn ChainSettlement>> {
    let client = EthersSettlementClient::connect(&EthersSettlementConfig {
        rpc_url: cfg.rpc_url.clone(),
        contract_address: cfg.contract_address.clone(),
        private_key: cfg.private_key.clone(),
        gas_limit: cfg.gas_limit,
        confirmation_timeout: cfg.confirmation_timeout,
    })
    .await
    .context("failed to connect chain client")?;

    match client.account_balance().await {
        Ok(balance) => tracing::info!(signer = %client.signer_address(), %balance, "signer balance"),
        Err(e) => tracing::warn!(error = %e, "could not read signer balance"),
    }

    match client.latest_price().await {
        Ok(p) => tracing::info!(price = p.price, round = p.round_id, "current on-chain price"),
        Err(e) => tracing::warn!(error = %e, "could not read on-chain price"),
    }

    Ok(Arc::new(client))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = AppConfig::from_env().context("invalid configuration")?;
    init_tracing("oracle-node", cfg.json_logs);
    cfg.log_warnings();

    tracing::info!(config = ?cfg, "Starting price oracle node...");

    let counters = Counters::default();
    let store = init_store(&cfg, &counters).await?;
    let source = build_source(&cfg)?;
    let chain = connect_chain(&cfg).await?;

    let relay = Relay::new(cfg.relay_capacity);
    let shutdown = Shutdown::new();
    let mut tracker = TaskTracker::new();

    // Consumer side first so the first published price has a subscriber.
    let (submissions, jobs) = submission_queue(cfg.submission_queue_capacity);
    let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();

    let worker = SubmissionWorker::new(
        chain,
        WorkerConfig {
            retry_base: cfg.retry_base,
            max_retries: cfg.max_retries,
        },
        counters.clone(),
    );
    tracker.spawn(
        "submission_worker",
        worker.run(jobs, outcome_tx, shutdown.listener()),
    );

    let updater = Updater::new(cfg.updater_threshold, submissions, counters.clone());
    tracker.spawn(
        "updater",
        updater.run(relay.subscribe(), outcome_rx, shutdown.listener()),
    );

    let distributor = Distributor::new(cfg.price_change_threshold, relay.clone(), counters.clone());
    let ingestion = IngestionService::new(
        source,
        store.clone(),
        distributor,
        cfg.price_precision,
        counters.clone(),
    );
    tracker.spawn(
        "ingestion",
        ingestion.run(cfg.fetch_interval, shutdown.listener()),
    );

    let query = QueryService::new(store.clone(), counters.clone(), cfg.max_price_age);

    tracker.spawn(
        "maintenance",
        run_maintenance(
            store,
            cfg.record_retention,
            Duration::from_secs(3600),
            shutdown.listener(),
        ),
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    shutdown.trigger();
    relay.close();

    let unfinished = tracker.join_all(cfg.shutdown_grace).await;
    if !unfinished.is_empty() {
        tracing::warn!(?unfinished, "tasks aborted after grace period");
    }

    match query.stats().await {
        Ok(stats) => tracing::info!(?stats, "Shutdown complete"),
        Err(e) => tracing::info!(error = %e, counters = ?counters.snapshot(), "Shutdown complete"),
    }
    Ok(())
}
