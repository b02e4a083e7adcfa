use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: coordinator mutations. Labels: op, status (ok, rejected, error).
pub const MUTATIONS_TOTAL: &str = "rosterline_mutations_total";

/// Histogram: mutation latency in seconds, lock wait included. Labels: op.
pub const MUTATION_DURATION_SECONDS: &str = "rosterline_mutation_duration_seconds";

/// Counter: failed mutations by cause. Labels: reason.
pub const REJECTIONS_TOTAL: &str = "rosterline_rejections_total";

/// Counter: eligibility queries served. Labels: query.
pub const ELIGIBILITY_QUERIES_TOTAL: &str = "rosterline_eligibility_queries_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: time spent acquiring roster locks, in seconds.
pub const LOCK_WAIT_SECONDS: &str = "rosterline_lock_wait_seconds";

/// Counter: lock acquisitions that gave up with `Busy`.
pub const LOCK_TIMEOUTS_TOTAL: &str = "rosterline_lock_timeouts_total";

/// Gauge: clubs with a loaded engine.
pub const CLUBS_ACTIVE: &str = "rosterline_clubs_active";

/// Counter: assignments left on a member's previous subteam by a move.
pub const ORPHANED_ASSIGNMENTS_TOTAL: &str = "rosterline_orphaned_assignments_total";

/// Counter: ledger underflows. Any non-zero value is a bug.
pub const INVARIANT_VIOLATIONS_TOTAL: &str = "rosterline_invariant_violations_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "rosterline_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (records per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "rosterline_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), String> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("failed to install Prometheus exporter: {e}"))?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Install the default `tracing` fmt subscriber for hosts without their own.
/// Returns false if the host already installed one.
pub fn init_logging() -> bool {
    tracing_subscriber::fmt().try_init().is_ok()
}
