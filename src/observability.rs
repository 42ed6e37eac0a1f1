use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: booking operations. Labels: operation, outcome.
pub const BOOKINGS_TOTAL: &str = "pitchbook_bookings_total";

/// Histogram: booking operation latency in seconds. Labels: operation.
pub const BOOKING_DURATION_SECONDS: &str = "pitchbook_booking_duration_seconds";

/// Counter: online payments settled. Labels: outcome.
pub const PAYMENTS_TOTAL: &str = "pitchbook_payments_total";

// ── Background work ─────────────────────────────────────────────

/// Counter: pending reservations cancelled because payment never arrived.
pub const PENDING_EXPIRED_TOTAL: &str = "pitchbook_pending_expired_total";

/// Counter: WAL compactions performed.
pub const WAL_COMPACTIONS_TOTAL: &str = "pitchbook_wal_compactions_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "pitchbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "pitchbook_wal_flush_batch_size";

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

/// Record one booking operation: outcome counter plus latency histogram.
pub(crate) fn record(operation: &'static str, outcome: &'static str, started: std::time::Instant) {
    metrics::counter!(BOOKINGS_TOTAL, "operation" => operation, "outcome" => outcome).increment(1);
    metrics::histogram!(BOOKING_DURATION_SECONDS, "operation" => operation)
        .record(started.elapsed().as_secs_f64());
}
