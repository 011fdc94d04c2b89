use std::net::SocketAddr;
use std::time::Instant;

use crate::engine::EngineError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: engine mutations. Labels: op, status.
pub const MUTATIONS_TOTAL: &str = "jobcard_mutations_total";

/// Histogram: mutation latency in seconds. Labels: op.
pub const MUTATION_DURATION_SECONDS: &str = "jobcard_mutation_duration_seconds";

/// Counter: time logs rejected for double-booking a resource. Labels: resource_kind.
pub const OVERLAP_REJECTIONS_TOTAL: &str = "jobcard_overlap_rejections_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "jobcard_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "jobcard_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "jobcard_wal_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Count and time one engine mutation. Errors are labelled by kind.
pub fn record_mutation<T>(op: &'static str, started: Instant, result: &Result<T, EngineError>) {
    let status = match result {
        Ok(_) => "ok",
        Err(e) => e.label(),
    };
    metrics::counter!(MUTATIONS_TOTAL, "op" => op, "status" => status).increment(1);
    metrics::histogram!(MUTATION_DURATION_SECONDS, "op" => op)
        .record(started.elapsed().as_secs_f64());
    if let Err(e) = result {
        tracing::debug!("{op} rejected: {e}");
    }
}
