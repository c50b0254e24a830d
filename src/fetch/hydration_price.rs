//! Hydration spot prices in USDT
//!
//! The price script prints `[{"assetId": "5", "price": "7.12"}, ...]`. Only
//! assets with an id below [`MAX_PRICED_ASSET_ID`] are priced, and zero prices
//! are dropped.

use super::{last_json_line, load_assets, run_script, AssetEntry, FetchError, Fetcher};
use crate::config::FetchConfig;
use crate::numeric::json_f64;
use crate::records::PriceRow;
use crate::source::SourceKind;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

pub const MAX_PRICED_ASSET_ID: u32 = 30;

pub struct HydrationPriceFetcher {
    assets_path: String,
    price_cmd: String,
    script_timeout_secs: u64,
}

impl HydrationPriceFetcher {
    pub fn new(config: &FetchConfig) -> Self {
        Self {
            assets_path: config.hydration_assets_path.clone(),
            price_cmd: config.hydration_price_cmd.clone(),
            script_timeout_secs: config.script_timeout_secs,
        }
    }
}

#[async_trait]
impl Fetcher for HydrationPriceFetcher {
    type Batch = Vec<PriceRow>;

    fn source(&self) -> SourceKind {
        SourceKind::HydrationPrice
    }

    async fn fetch(&mut self) -> Result<Vec<PriceRow>, FetchError> {
        let assets = load_assets(&self.assets_path)?;
        let stdout = run_script(&self.price_cmd, self.script_timeout_secs).await?;
        let prices = parse_prices(&last_json_line(&stdout)?)?;
        Ok(build_rows(&assets, &prices))
    }
}

/// Script output → asset id → price
pub fn parse_prices(body: &Value) -> Result<HashMap<String, f64>, FetchError> {
    if let Some(err) = body.get("error") {
        return Err(FetchError::Decode(format!("price script reported: {}", err)));
    }
    let items = body
        .as_array()
        .ok_or_else(|| FetchError::Decode("price output is not an array".to_string()))?;

    let mut prices = HashMap::new();
    for item in items {
        let id = match item.get("assetId") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => continue,
        };
        if let Some(price) = item.get("price").and_then(json_f64) {
            prices.insert(id, price);
        }
    }
    Ok(prices)
}

pub fn build_rows(assets: &[AssetEntry], prices: &HashMap<String, f64>) -> Vec<PriceRow> {
    assets
        .iter()
        .filter(|asset| asset.id < MAX_PRICED_ASSET_ID)
        .filter_map(|asset| {
            let asset_id = asset.id.to_string();
            let price = *prices.get(&asset_id)?;
            if price == 0.0 {
                log::debug!("Skipping zero price for asset {} ({})", asset_id, asset.symbol);
                return None;
            }
            Some(PriceRow {
                asset_id,
                symbol: asset.symbol.clone(),
                price_usdt: price,
            })
        })
        .collect()
}
