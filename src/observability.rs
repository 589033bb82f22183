use std::net::SocketAddr;

use crate::engine::EngineError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: engine operations. Labels: operation, status.
pub const OPERATIONS_TOTAL: &str = "roombook_operations_total";

/// Counter: notifications created. Labels: kind.
pub const NOTIFICATIONS_TOTAL: &str = "roombook_notifications_total";

/// Counter: bookings whose reminder went out.
pub const REMINDERS_SENT_TOTAL: &str = "roombook_reminders_sent_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roombook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (operations per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "roombook_wal_flush_batch_size";

/// Counter: compactions run.
pub const WAL_COMPACTIONS_TOTAL: &str = "roombook_wal_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Count an operation outcome and log it: committed at info, rejected at debug,
/// internal failures at error.
pub fn record<T>(operation: &'static str, result: &Result<T, EngineError>) {
    let status = match result {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    };
    metrics::counter!(OPERATIONS_TOTAL, "operation" => operation, "status" => status).increment(1);
    match result {
        Ok(_) => {}
        Err(EngineError::Internal(msg)) => tracing::error!(operation, "internal failure: {msg}"),
        Err(e) => tracing::debug!(operation, "rejected: {e}"),
    }
}
