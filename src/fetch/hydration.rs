//! Hydration omnipool yields
//!
//! Farm APRs come from an auxiliary script printing `{"<asset id>": apr, ...}`.
//! TVL and 24h volume come from the Hydration stats API for each of those
//! assets; the pool APR is derived from them.

use super::{get_json, http_client, last_json_line, load_assets, run_script, FetchError, Fetcher};
use crate::config::FetchConfig;
use crate::numeric::json_f64;
use crate::records::HydrationRow;
use crate::source::SourceKind;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;

/// Omnipool trading fee applied to daily volume
pub const POOL_FEE_RATE: f64 = 0.0025;

pub struct HydrationFetcher {
    client: reqwest::Client,
    api_url: String,
    assets_path: String,
    farm_apr_cmd: String,
    script_timeout_secs: u64,
}

impl HydrationFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        Ok(Self {
            client: http_client(config.http_timeout_secs)?,
            api_url: config.hydration_api_url.trim_end_matches('/').to_string(),
            assets_path: config.hydration_assets_path.clone(),
            farm_apr_cmd: config.hydration_farm_apr_cmd.clone(),
            script_timeout_secs: config.script_timeout_secs,
        })
    }

    /// Most recent TVL entry; the endpoint lists newest first
    async fn fetch_tvl(&self, asset_id: &str) -> Result<f64, FetchError> {
        let body = get_json(&self.client, &format!("{}/stats/tvl/{}", self.api_url, asset_id)).await?;
        Ok(first_field(&body, "tvl_usd", false))
    }

    /// Latest bucket of the volume chart; the endpoint lists oldest first
    async fn fetch_volume(&self, asset_id: &str) -> Result<f64, FetchError> {
        let body = get_json(&self.client, &format!("{}/stats/volume/{}", self.api_url, asset_id)).await?;
        Ok(first_field(&body, "volume_usd", true))
    }
}

#[async_trait]
impl Fetcher for HydrationFetcher {
    type Batch = Vec<HydrationRow>;

    fn source(&self) -> SourceKind {
        SourceKind::Hydration
    }

    async fn fetch(&mut self) -> Result<Vec<HydrationRow>, FetchError> {
        let symbols: HashMap<String, String> = load_assets(&self.assets_path)?
            .into_iter()
            .map(|a| (a.id.to_string(), a.symbol))
            .collect();

        let stdout = run_script(&self.farm_apr_cmd, self.script_timeout_secs).await?;
        let farm_aprs = parse_farm_aprs(&last_json_line(&stdout)?)?;
        log::info!("📊 Farm APR script returned {} assets", farm_aprs.len());

        let observed_at = Utc::now().to_rfc3339();
        let mut rows = Vec::with_capacity(farm_aprs.len());
        for (asset_id, farm_apr) in farm_aprs {
            let tvl = self.fetch_tvl(&asset_id).await?;
            let volume = self.fetch_volume(&asset_id).await?;
            let symbol = symbols.get(&asset_id).cloned().unwrap_or_else(|| "N/A".to_string());
            rows.push(build_row(&asset_id, &symbol, farm_apr, tvl, volume, &observed_at));
        }
        Ok(rows)
    }
}

/// `{"5": 12.3, "0": "4.1"}` → sorted `(asset id, apr)` pairs
pub fn parse_farm_aprs(body: &Value) -> Result<Vec<(String, f64)>, FetchError> {
    let map = body
        .as_object()
        .ok_or_else(|| FetchError::Decode("farm APR output is not an object".to_string()))?;
    let mut aprs: Vec<(String, f64)> = map
        .iter()
        .map(|(id, apr)| (id.clone(), json_f64(apr).unwrap_or(0.0)))
        .collect();
    aprs.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(aprs)
}

fn first_field(body: &Value, key: &str, from_end: bool) -> f64 {
    let entries = match body.as_array() {
        Some(entries) if !entries.is_empty() => entries,
        _ => return 0.0,
    };
    let entry = if from_end { entries.last() } else { entries.first() };
    entry
        .and_then(|e| e.get(key))
        .and_then(json_f64)
        .unwrap_or(0.0)
}

/// `volume * fee * 365 / tvl`, as a percentage; zero when TVL is not positive
pub fn pool_apr(tvl: f64, volume_24h: f64) -> f64 {
    if tvl <= 0.0 {
        return 0.0;
    }
    volume_24h * POOL_FEE_RATE * 365.0 / tvl * 100.0
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn build_row(
    asset_id: &str,
    symbol: &str,
    farm_apr: f64,
    tvl: f64,
    volume: f64,
    observed_at: &str,
) -> HydrationRow {
    let pool = pool_apr(tvl, volume);
    HydrationRow {
        asset_id: asset_id.to_string(),
        symbol: symbol.to_string(),
        farm_apr: round2(farm_apr),
        pool_apr: round2(pool),
        total_apr: round2(farm_apr + pool),
        tvl_usd: round2(tvl),
        volume_usd: round2(volume),
        observed_at: observed_at.to_string(),
    }
}
