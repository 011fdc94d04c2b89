use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use jobcard::compactor;
use jobcard::engine::Engine;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Print the replayed state as JSON lines: workstations, work orders, job cards.
async fn dump(engine: &Engine) -> Result<(), Box<dyn std::error::Error>> {
    for name in engine.list_workstations() {
        println!("{}", serde_json::json!({ "workstation": name }));
    }
    for wo in engine.list_work_orders().await {
        println!("{}", serde_json::json!({ "work_order": wo }));
    }
    for card in engine.list_job_cards().await {
        println!(
            "{}",
            serde_json::json!({
                "job_card": card,
                "status": card.status(),
                "total_completed_qty": card.total_completed_qty(),
                "total_time_in_mins": card.total_time_in_mins(),
            })
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let data_dir = std::env::var("JOBCARD_DATA_DIR").unwrap_or_else(|_| "./data".into());
    let metrics_port: Option<u16> = std::env::var("JOBCARD_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    let compact_threshold: u64 = env_or("JOBCARD_COMPACT_THRESHOLD", 1000);
    let compact_every = Duration::from_secs(env_or("JOBCARD_COMPACT_INTERVAL_SECS", 30));

    std::fs::create_dir_all(&data_dir)?;
    let wal_path = PathBuf::from(&data_dir).join("jobcard.wal");
    let engine = Arc::new(Engine::new(wal_path)?);

    if std::env::args().nth(1).as_deref() == Some("dump") {
        return dump(&engine).await;
    }

    jobcard::observability::init(metrics_port)?;
    info!("jobcard started");
    info!("  data_dir: {data_dir}");
    info!("  compact_threshold: {compact_threshold} every {}s", compact_every.as_secs());
    info!("  metrics: {}", metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    let compactor_task = tokio::spawn(compactor::run_compactor(
        engine.clone(),
        compact_threshold,
        compact_every,
    ));

    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {}
                        _ = sigterm.recv() => {}
                    }
                }
                Err(e) => {
                    tracing::warn!("SIGTERM handler unavailable: {e}");
                    ctrl_c.await.ok();
                }
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    shutdown.await;
    info!("shutdown signal received");

    compactor_task.abort();
    if let Err(e) = compactor::maybe_compact(&engine, compact_threshold).await {
        tracing::warn!("final compaction failed: {e}");
    }

    info!("jobcard stopped");
    Ok(())
}
