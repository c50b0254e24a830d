//! Orchestrator - supervises every source pipeline and the merge loop
//!
//! ## Usage
//!
//! ```bash
//! cargo run --release --bin orchestrator
//! ```
//!
//! Creates missing tables, migrates the schema to `SCHEMA_TARGET_VERSION`
//! (latest unit by default), spawns one `source_pipeline` process per entry
//! of `PIPELINE_SOURCES` and merges every `MERGE_INTERVAL_SECS` until CTRL+C
//! or SIGTERM.

use dotenv::dotenv;
use log::info;
use yieldfold::heartbeat::HeartbeatMonitor;
use yieldfold::merge::MergeEngine;
use yieldfold::migration::prepare_schema;
use yieldfold::orchestrator::{shutdown_signal, Orchestrator};
use yieldfold::sqlite_pragma::open_connection;
use yieldfold::AppConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let config = AppConfig::from_env()?;

    info!("🚀 yieldfold orchestrator");
    info!("   ├─ Database: {}", config.db.path);
    info!(
        "   ├─ Sources: {}",
        config
            .orchestrator
            .sources
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    info!("   ├─ Merge interval: {}s", config.merge.interval_secs);
    info!("   └─ Poll interval: {}s", config.orchestrator.poll_interval_secs);

    info!("🔧 Preparing schema...");
    let mut conn = open_connection(&config.db)?;
    let version = prepare_schema(&mut conn, &config.tables, config.schema_target_version)?;
    drop(conn);
    info!("✅ Schema at version {}", version);

    let merge = MergeEngine::open(&config.db, &config.tables, &config.merge)?;
    let liveness = HeartbeatMonitor::new(
        config.db.clone(),
        &config.tables.heartbeats,
        config.heartbeat_thresholds(),
    );
    let mut orchestrator = Orchestrator::from_config(&config, Box::new(merge), Box::new(liveness))?;

    let stop = orchestrator.stop_handle();
    tokio::spawn(async move {
        shutdown_signal().await;
        stop.request_stop();
    });

    orchestrator.run(None).await?;
    Ok(())
}
