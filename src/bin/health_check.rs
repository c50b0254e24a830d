//! Health Check - JSON status on stdout, exit code 0 (ok) or 1 (error)
//!
//! Checks the database connection, disk usage of `DISK_PATH` and the
//! heartbeat of every configured pipeline.

use dotenv::dotenv;
use yieldfold::health::run_health_checks;
use yieldfold::AppConfig;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .target(env_logger::Target::Stderr)
        .init();

    let config = AppConfig::from_env()?;
    let report = run_health_checks(&config);
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.is_ok() {
        std::process::exit(1);
    }
    Ok(())
}
