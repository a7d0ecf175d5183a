//! Prometheus metrics for the cleaner.
//!
//! Provides metrics for:
//! - Cleanup runs and their duration
//! - Records fetched per owner
//! - Unlist outcomes
//! - Registry request retries
//!
//! Every recording function compiles to a no-op without the `prometheus`
//! feature.

#[cfg(feature = "prometheus")]
use metrics::{counter, histogram};
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::MetricsConfig;

/// Install the Prometheus recorder and serve the scrape endpoint.
///
/// Must be called from within a tokio runtime.
#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(config.listen)
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Suffix("_duration_seconds".to_string()),
            &config.duration_buckets_secs,
        )
        .map_err(|e| MetricsError::Setup(e.to_string()))?
        .install()
        .map_err(MetricsError::Install)?;

    tracing::info!(listen = %config.listen, "Prometheus metrics endpoint started");
    Ok(())
}

/// Initialize the metrics system (no-op without prometheus feature).
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(_config: &MetricsConfig) -> Result<(), MetricsError> {
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Metric Recording Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Record a finished cleanup run.
///
/// # Arguments
/// * `outcome` - "completed", "cancelled" or "failed"
/// * `duration_secs` - Wall time of the run
pub fn record_cleanup_run(outcome: &str, duration_secs: f64) {
    #[cfg(feature = "prometheus")]
    {
        counter!("cleanup_runs_total", "outcome" => outcome.to_string()).increment(1);
        histogram!("cleanup_run_duration_seconds").record(duration_secs);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (outcome, duration_secs);
    }
}

/// Record the records fetched for one owner.
pub fn record_records_fetched(source: &str, count: u64) {
    #[cfg(feature = "prometheus")]
    {
        counter!("cleanup_records_fetched_total", "source" => source.to_string())
            .increment(count);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (source, count);
    }
}

/// Record an owner whose records could not be fetched.
pub fn record_owner_failure(source: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("cleanup_owner_failures_total", "source" => source.to_string()).increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = source;
    }
}

/// Record an unlist decision outcome.
///
/// # Arguments
/// * `outcome` - "unlisted", "failed", "dry_run" or "skipped_limit"
pub fn record_unlist(outcome: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("cleanup_unlists_total", "outcome" => outcome.to_string()).increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = outcome;
    }
}

/// Record a retried registry request.
pub fn record_registry_retry(operation: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("registry_request_retries_total", "operation" => operation.to_string())
            .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = operation;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to set up metrics: {0}")]
    Setup(String),

    #[cfg(feature = "prometheus")]
    #[error("Failed to install metrics recorder: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),
}
