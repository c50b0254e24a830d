//! Bifrost liquid-staking metrics
//!
//! Endpoints (relative to `BIFROST_API_URL`):
//! - `/site`: object keyed by asset; values are either metric objects or a bare
//!   number for chain-wide aggregates
//! - `/staking`: `{"supportedAssets": [...]}`

use super::{get_json, http_client, FetchError, Fetcher};
use crate::config::FetchConfig;
use crate::numeric::{json_decimal, json_i64};
use crate::records::{BifrostBatch, BifrostSiteRow, BifrostStakingRow};
use crate::source::SourceKind;
use async_trait::async_trait;
use serde_json::Value;

pub struct BifrostFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl BifrostFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        Ok(Self {
            client: http_client(config.http_timeout_secs)?,
            base_url: config.bifrost_api_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Fetcher for BifrostFetcher {
    type Batch = BifrostBatch;

    fn source(&self) -> SourceKind {
        SourceKind::Bifrost
    }

    async fn fetch(&mut self) -> Result<BifrostBatch, FetchError> {
        let site = get_json(&self.client, &format!("{}/site", self.base_url)).await?;
        let staking = get_json(&self.client, &format!("{}/staking", self.base_url)).await?;

        Ok(BifrostBatch {
            site: parse_site(&site)?,
            staking: parse_staking(&staking)?,
        })
    }
}

/// Flatten the `/site` object into one row per asset, sorted by asset
pub fn parse_site(body: &Value) -> Result<Vec<BifrostSiteRow>, FetchError> {
    let entries = body
        .as_object()
        .ok_or_else(|| FetchError::Decode("/site is not an object".to_string()))?;

    let mut rows: Vec<BifrostSiteRow> = entries
        .iter()
        .map(|(asset, value)| match value {
            Value::Object(m) => {
                let field = |key: &str| m.get(key).and_then(json_decimal);
                BifrostSiteRow {
                    asset: asset.clone(),
                    value: field("value"),
                    tvl: field("tvl"),
                    tvm: field("tvm"),
                    holders: m.get("holders").and_then(json_i64),
                    apy: field("apy"),
                    apy_base: field("apyBase"),
                    apy_reward: field("apyReward"),
                    total_issuance: field("totalIssuance"),
                }
            }
            scalar => BifrostSiteRow {
                asset: asset.clone(),
                value: json_decimal(scalar),
                tvl: None,
                tvm: None,
                holders: None,
                apy: None,
                apy_base: None,
                apy_reward: None,
                total_issuance: None,
            },
        })
        .collect();
    rows.sort_by(|a, b| a.asset.cmp(&b.asset));
    Ok(rows)
}

pub fn parse_staking(body: &Value) -> Result<Vec<BifrostStakingRow>, FetchError> {
    let assets = body
        .get("supportedAssets")
        .and_then(Value::as_array)
        .ok_or_else(|| FetchError::Decode("/staking has no supportedAssets array".to_string()))?;

    let text = |m: &Value, key: &str| {
        m.get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let rows = assets
        .iter()
        .filter_map(|asset| {
            let symbol = text(asset, "symbol")?;
            Some(BifrostStakingRow {
                contract_address: text(asset, "contractAddress"),
                symbol,
                slug: text(asset, "slug"),
                base_slug: text(asset, "baseSlug"),
                unstaking_time: asset.get("unstakingTime").and_then(json_i64),
                users: asset.get("users").and_then(json_i64),
                apr: asset.get("apr").and_then(json_decimal),
                fee: asset.get("fee").and_then(json_decimal),
                price: asset.get("price").and_then(json_decimal),
                exchange_ratio: asset.get("exchangeRatio").and_then(json_decimal),
                supply: asset.get("supply").and_then(json_decimal),
            })
        })
        .collect();
    Ok(rows)
}
