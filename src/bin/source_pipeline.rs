//! Source Pipeline - fetch, dedup and persist one source on its cadence
//!
//! ## Usage
//!
//! ```bash
//! cargo run --release --bin source_pipeline -- <bifrost|hydration|hydration_price|stellaswap> [--once]
//! ```
//!
//! Normally spawned by the orchestrator. `--once` runs a single cycle and
//! exits, which is handy from cron or for debugging a fetcher.

use dotenv::dotenv;
use log::{error, info};
use std::env;
use tokio::sync::watch;
use yieldfold::fetch::bifrost::BifrostFetcher;
use yieldfold::fetch::hydration::HydrationFetcher;
use yieldfold::fetch::hydration_price::HydrationPriceFetcher;
use yieldfold::fetch::stellaswap::StellaswapFetcher;
use yieldfold::fetch::Fetcher;
use yieldfold::heartbeat::HeartbeatStore;
use yieldfold::orchestrator::shutdown_signal;
use yieldfold::pipeline::SourcePipeline;
use yieldfold::sqlite_pragma::open_connection;
use yieldfold::store::{BifrostStore, HydrationPriceStore, HydrationStore, SourceStore, StellaswapStore};
use yieldfold::{AppConfig, SourceKind};

fn usage() -> String {
    let names: Vec<&str> = SourceKind::ALL.iter().map(|s| s.as_str()).collect();
    format!("usage: source_pipeline <{}> [--once]", names.join("|"))
}

async fn run_pipeline<F, S>(
    fetcher: F,
    store: S,
    config: &AppConfig,
    once: bool,
) -> Result<(), Box<dyn std::error::Error>>
where
    F: Fetcher,
    S: SourceStore<Batch = F::Batch>,
{
    let source = fetcher.source();
    let conn = open_connection(&config.db)?;
    let heartbeats = HeartbeatStore::new(config.tables.heartbeats.clone());
    let mut pipeline = SourcePipeline::new(fetcher, store, conn, heartbeats, config.source_settings(source))?;

    if once {
        let outcome = pipeline.run_once().await?;
        info!("✅ [{}] Single cycle finished: {}", source, outcome.label());
        return Ok(());
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = stop_tx.send(true);
    });

    pipeline.run(stop_rx).await;
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let once = args.iter().any(|a| a == "--once");
    let source: SourceKind = match args.iter().find(|a| !a.starts_with("--")) {
        Some(name) => name.parse()?,
        None => {
            error!("❌ {}", usage());
            std::process::exit(2);
        }
    };

    let config = AppConfig::from_env()?;
    let tables = &config.tables;

    match source {
        SourceKind::Bifrost => {
            run_pipeline(BifrostFetcher::new(&config.fetch)?, BifrostStore::new(tables), &config, once).await
        }
        SourceKind::Hydration => {
            run_pipeline(HydrationFetcher::new(&config.fetch)?, HydrationStore::new(tables), &config, once).await
        }
        SourceKind::HydrationPrice => {
            run_pipeline(
                HydrationPriceFetcher::new(&config.fetch),
                HydrationPriceStore::new(tables),
                &config,
                once,
            )
            .await
        }
        SourceKind::Stellaswap => {
            run_pipeline(StellaswapFetcher::new(&config.fetch)?, StellaswapStore::new(tables), &config, once).await
        }
    }
}
