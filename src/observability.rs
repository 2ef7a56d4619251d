use std::net::SocketAddr;

use crate::engine::EngineError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: HTTP requests served. Labels: route, status.
pub const HTTP_REQUESTS_TOTAL: &str = "parkd_http_requests_total";

/// Histogram: HTTP request latency in seconds. Labels: route.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "parkd_http_request_duration_seconds";

// ── Reservation lifecycle ───────────────────────────────────────

/// Counter: reservations created.
pub const RESERVATIONS_CREATED_TOTAL: &str = "parkd_reservations_created_total";

/// Counter: reservations cancelled by their owner.
pub const RESERVATIONS_CANCELLED_TOTAL: &str = "parkd_reservations_cancelled_total";

/// Counter: successful extensions.
pub const RESERVATIONS_EXTENDED_TOTAL: &str = "parkd_reservations_extended_total";

/// Counter: reservations moved to completed by the sweeper.
pub const RESERVATIONS_COMPLETED_TOTAL: &str = "parkd_reservations_completed_total";

/// Counter: rejected lifecycle operations. Labels: op, reason.
pub const LIFECYCLE_REJECTIONS_TOTAL: &str = "parkd_lifecycle_rejections_total";

/// Histogram: duration of one sweep pass in seconds.
pub const SWEEP_DURATION_SECONDS: &str = "parkd_sweep_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "parkd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "parkd_wal_flush_batch_size";

/// Counter: WAL compactions performed.
pub const WAL_COMPACTIONS_TOTAL: &str = "parkd_wal_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), String> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("failed to install Prometheus metrics exporter: {e}"))?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map an engine error to a short label for metrics.
pub fn error_label(err: &EngineError) -> &'static str {
    match err {
        EngineError::NotFound { .. } => "not_found",
        EngineError::Forbidden(_) => "forbidden",
        EngineError::SpotUnavailable(_) => "spot_unavailable",
        EngineError::TimeConflict(_) => "time_conflict",
        EngineError::InvalidState(_) => "invalid_state",
        EngineError::Validation(_) => "validation",
        EngineError::AlreadyExists(_) => "already_exists",
        EngineError::LimitExceeded(_) => "limit_exceeded",
        EngineError::Store(_) => "store_failure",
    }
}

/// Count a rejected lifecycle operation.
pub fn record_rejection(op: &'static str, err: &EngineError) {
    metrics::counter!(LIFECYCLE_REJECTIONS_TOTAL, "op" => op, "reason" => error_label(err))
        .increment(1);
}
