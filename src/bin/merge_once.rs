//! Merge Once - fold the latest batch of every source into one snapshot
//!
//! ```bash
//! cargo run --release --bin merge_once
//! ```

use dotenv::dotenv;
use log::info;
use yieldfold::merge::{MergeEngine, MergeOutcome};
use yieldfold::AppConfig;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let config = AppConfig::from_env()?;
    let mut engine = MergeEngine::open(&config.db, &config.tables, &config.merge)?;

    match engine.run_once()? {
        MergeOutcome::Inserted { snapshot_id, rows, .. } => {
            info!("✅ Snapshot {} written ({} records)", snapshot_id, rows);
        }
        MergeOutcome::Duplicate { content_hash } => {
            info!("⏭️  Nothing new since snapshot {}", content_hash);
        }
    }
    Ok(())
}
