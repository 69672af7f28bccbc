//! Observability metrics for the search runtime.
//!
//! Tracks query outcomes, retry behavior, throttle health, and persistence
//! failures so a long run can be watched from the outside.
//!
//! - Uses the `metrics` crate for low-overhead collection
//! - Optional Prometheus exporter for a scrape endpoint
//! - Graceful degradation when no exporter is installed

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Global metrics registry initialization flag
static METRICS_INITIALIZED: Lazy<Arc<RwLock<bool>>> = Lazy::new(|| Arc::new(RwLock::new(false)));

/// Initialize the metrics system with a Prometheus exporter.
///
/// Call once at startup. Idempotent: repeated calls are no-ops.
pub async fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    let mut initialized = METRICS_INITIALIZED.write().await;
    if *initialized {
        debug!("metrics already initialized, skipping");
        return Ok(());
    }

    info!("initializing metrics system on {}", addr);

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        "search_queries_total",
        Unit::Count,
        "Total queries issued against the registry, labelled by outcome"
    );
    describe_counter!(
        "search_matches_total",
        Unit::Count,
        "Total matches found"
    );
    describe_counter!(
        "search_retries_total",
        Unit::Count,
        "Total combination retries after transient errors"
    );
    describe_counter!(
        "search_transient_errors_total",
        Unit::Count,
        "Total transient query errors observed"
    );
    describe_counter!(
        "search_fatal_errors_total",
        Unit::Count,
        "Total fatal outcomes reported by workers"
    );
    describe_counter!(
        "result_batches_flushed_total",
        Unit::Count,
        "Total result batches flushed to the sink"
    );
    describe_counter!(
        "persist_failures_total",
        Unit::Count,
        "Total failed batch persist attempts"
    );
    describe_counter!(
        "checkpoint_saves_total",
        Unit::Count,
        "Total checkpoint records saved"
    );
    describe_histogram!(
        "query_duration_seconds",
        Unit::Seconds,
        "Duration of individual registry queries"
    );
    describe_histogram!(
        "throttle_wait_seconds",
        Unit::Seconds,
        "Time workers spent in throttle waits"
    );
    describe_histogram!(
        "result_batch_size",
        Unit::Count,
        "Matches per flushed batch"
    );
    describe_gauge!(
        "throttle_backoff_factor",
        Unit::Count,
        "Current delay multiplier per worker"
    );

    *initialized = true;
    info!("metrics system initialized successfully on {}", addr);
    Ok(())
}

/// Check if the metrics system is initialized.
pub async fn is_initialized() -> bool {
    *METRICS_INITIALIZED.read().await
}

/// Record one completed query attempt with its classified outcome.
pub fn record_query(outcome: &'static str, duration: Duration) {
    counter!("search_queries_total", "outcome" => outcome).increment(1);
    histogram!("query_duration_seconds", "outcome" => outcome).record(duration.as_secs_f64());
}

/// Record a confirmed match.
pub fn record_match() {
    counter!("search_matches_total").increment(1);
}

/// Record a retry of the same combination after a transient error.
pub fn record_retry(attempt: u32) {
    counter!("search_retries_total", "attempt" => attempt.to_string()).increment(1);
}

/// Record a transient query error.
pub fn record_transient_error() {
    counter!("search_transient_errors_total").increment(1);
}

/// Record a fatal outcome.
pub fn record_fatal_error() {
    counter!("search_fatal_errors_total").increment(1);
}

/// Record a worker's current throttle backoff factor.
pub fn record_backoff_factor(worker_id: usize, factor: f64) {
    gauge!("throttle_backoff_factor", "worker" => worker_id.to_string()).set(factor);
}

/// Record time spent in a throttle wait.
pub fn record_throttle_wait(duration: Duration) {
    histogram!("throttle_wait_seconds").record(duration.as_secs_f64());
}

/// Record a flushed result batch.
pub fn record_batch_flush(batch_size: usize) {
    counter!("result_batches_flushed_total").increment(1);
    histogram!("result_batch_size").record(batch_size as f64);
}

/// Record a failed persist attempt.
pub fn record_persist_failure() {
    counter!("persist_failures_total").increment(1);
}

/// Record a checkpoint save.
pub fn record_checkpoint_save() {
    counter!("checkpoint_saves_total").increment(1);
}
