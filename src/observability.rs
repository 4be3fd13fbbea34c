use std::net::SocketAddr;

use crate::engine::EngineError;

// ── Transition metrics ──────────────────────────────────────────

/// Counter: facade transitions. Labels: op, outcome.
pub const TRANSITIONS_TOTAL: &str = "slotwise_transitions_total";

/// Counter: rows whose version check lost to a concurrent writer.
pub const VERSION_CONFLICTS_TOTAL: &str = "slotwise_version_conflicts_total";

/// Counter: segment rows declared.
pub const SEGMENTS_CREATED_TOTAL: &str = "slotwise_segments_created_total";

/// Counter: disables that displaced at least one owner.
pub const TAKEOVERS_TOTAL: &str = "slotwise_takeovers_total";

// ── Journal ─────────────────────────────────────────────────────

/// Histogram: journal append + fsync duration in seconds.
pub const JOURNAL_FLUSH_DURATION_SECONDS: &str = "slotwise_journal_flush_duration_seconds";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), EngineError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| EngineError::Config(format!("metrics exporter on port {port}: {e}")))?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Label for the outcome of a facade transition.
pub fn outcome_label(accepted: bool) -> &'static str {
    if accepted { "accepted" } else { "rejected" }
}
