use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: HTTP requests served. Labels: method, route, status.
pub const HTTP_REQUESTS_TOTAL: &str = "zeroq_http_requests_total";

/// Histogram: HTTP request latency in seconds. Labels: method, route.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "zeroq_http_request_duration_seconds";

/// Counter: requests rejected by the API key gate.
pub const AUTH_FAILURES_TOTAL: &str = "zeroq_auth_failures_total";

// ── Domain metrics ──────────────────────────────────────────────

/// Counter: reservations created.
pub const RESERVATIONS_CREATED_TOTAL: &str = "zeroq_reservations_created_total";

/// Counter: reservation requests refused because the slot was taken.
pub const BOOKING_CONFLICTS_TOTAL: &str = "zeroq_booking_conflicts_total";

/// Counter: records written by bulk import.
pub const RECORDS_IMPORTED_TOTAL: &str = "zeroq_records_imported_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Counter: tenant resolutions. Labels: tier.
pub const TENANT_RESOLUTIONS_TOTAL: &str = "zeroq_tenant_resolutions_total";

/// Gauge: databases open in the connection pool (shared included).
pub const DATABASES_OPEN: &str = "zeroq_databases_open";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "zeroq_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "zeroq_wal_flush_batch_size";

/// Counter: WAL compactions performed.
pub const WAL_COMPACTIONS_TOTAL: &str = "zeroq_wal_compactions_total";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
