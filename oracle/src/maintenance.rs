use std::sync::Arc;
use std::time::Duration;

use tokio::time::{MissedTickBehavior, interval};
use tracing::{info, warn};

use crate::shutdown::ShutdownListener;
use crate::store::PriceStore;

/// Periodically evicts expired cache history and, when a retention is
/// configured, prunes old durable rows.
pub async fn run_maintenance(
    store: Arc<PriceStore>,
    retention: Option<Duration>,
    every: Duration,
    mut shutdown: ShutdownListener,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // first tick fires immediately; nothing to prune at startup
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.wait() => break,
            _ = ticker.tick() => {}
        }

        match store.prune_cache_history() {
            Ok(removed) if removed > 0 => info!(removed, "expired cache history evicted"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "cache history pruning failed"),
        }

        if let Some(age) = retention {
            match store.prune_older_than(age).await {
                Ok(removed) if removed > 0 => info!(removed, "old price records pruned"),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "durable pruning failed"),
            }
        }
    }
}
