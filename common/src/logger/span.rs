use std::time::{Duration, Instant};

use tracing::{Span, field};

use super::TraceId;

/// Root span for one unit of pipeline work (an ingestion cycle, a relay message).
pub fn root_span(name: &'static str, trace_id: &TraceId) -> Span {
    tracing::info_span!(
        "root",
        name = %name,
        trace_id = %trace_id.as_str(),
        price = field::Empty,
        source = field::Empty
    )
}

/// Records the price (and optionally the source) on the current span.
pub fn annotate_span(price: f64, source: Option<&str>) {
    let span = Span::current();
    span.record("price", field::display(price));
    if let Some(src) = source {
        span.record("source", field::display(src));
    }
}

pub async fn warn_if_slow<F, T>(label: &'static str, max: Duration, fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    let start = Instant::now();
    let out = fut.await;
    let elapsed = start.elapsed();
    if elapsed > max {
        tracing::warn!(
            target: "performance",
            label = label,
            elapsed_ms = elapsed.as_millis() as u64,
            "slow operation detected"
        );
    }
    out
}
