//! Tracing and Prometheus metrics setup.
//!
//! Exposes reconciliation outcomes, pending backlog per kind, and pass
//! duration so a stuck ledger or store shows up on a dashboard.

use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use crate::config::LogFormat;
use crate::domain::{EntityKind, RecordOutcome};

/// Prometheus handle for on-demand scrape output (e.g. GET /metrics).
pub type PrometheusHandle = metrics_exporter_prometheus::PrometheusHandle;

pub const RECORDS_TOTAL: &str = "reconciler_records_total";
pub const PASSES_SKIPPED_TOTAL: &str = "reconciler_passes_skipped_total";
pub const PENDING_RECORDS: &str = "reconciler_pending_records";
pub const PASS_DURATION_SECONDS: &str = "reconciler_pass_duration_seconds";

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the default `info` filter. Calling this twice is a
/// no-op for the second call.
pub fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let _ = match format {
        LogFormat::Json => builder.json().with_current_span(false).try_init(),
        LogFormat::Pretty => builder.try_init(),
    };
}

/// Install the global metrics recorder and return a handle for rendering.
///
/// Uses `PrometheusBuilder` without an HTTP listener; the application
/// exposes metrics via GET /metrics using `handle.render()`.
///
/// # Errors
/// Returns an error if a recorder is already installed or building fails.
pub fn init_metrics() -> Result<PrometheusHandle, metrics_exporter_prometheus::BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();
    Ok(handle)
}

/// Convenience to wrap the handle in Arc for shared use in app state.
#[must_use]
pub fn init_metrics_handle() -> Option<Arc<PrometheusHandle>> {
    init_metrics().ok().map(Arc::new)
}

fn describe_metrics() {
    metrics::describe_counter!(RECORDS_TOTAL, "Pending records processed, by kind and outcome");
    metrics::describe_counter!(
        PASSES_SKIPPED_TOTAL,
        "Passes not started because another pass held the lease"
    );
    metrics::describe_gauge!(PENDING_RECORDS, "Pending records seen by the last pass");
    metrics::describe_histogram!(
        PASS_DURATION_SECONDS,
        metrics::Unit::Seconds,
        "Wall time of one reconciliation pass"
    );
}

pub fn record_outcome(kind: EntityKind, outcome: RecordOutcome) {
    metrics::counter!(RECORDS_TOTAL, "kind" => kind.as_str(), "outcome" => outcome.as_str())
        .increment(1);
}

pub fn record_pending(kind: EntityKind, pending: usize) {
    metrics::gauge!(PENDING_RECORDS, "kind" => kind.as_str()).set(pending as f64);
}

pub fn record_pass_duration(elapsed: Duration) {
    metrics::histogram!(PASS_DURATION_SECONDS).record(elapsed.as_secs_f64());
}

pub fn record_pass_skipped() {
    metrics::counter!(PASSES_SKIPPED_TOTAL).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusBuilder;

    #[test]
    fn test_metrics_render_with_labels() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            record_outcome(EntityKind::Rental, RecordOutcome::Committed);
            record_outcome(EntityKind::Rental, RecordOutcome::Committed);
            record_pending(EntityKind::Token, 3);
            record_pass_skipped();
        });

        let rendered = handle.render();
        assert!(rendered.contains(
            "reconciler_records_total{kind=\"rental\",outcome=\"committed\"} 2"
        ));
        assert!(rendered.contains("reconciler_pending_records{kind=\"token\"} 3"));
        assert!(rendered.contains("reconciler_passes_skipped_total 1"));
    }
}
