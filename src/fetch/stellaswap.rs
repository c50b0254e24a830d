//! Stellaswap concentrated-liquidity pools on Moonbeam
//!
//! Pool state comes from the Stellaswap subgraph (needs an API key); pool and
//! farming APRs come from the Stellaswap APR service. Final APR is their sum.

use super::{get_json, http_client, FetchError, Fetcher};
use crate::config::FetchConfig;
use crate::numeric::{json_f64, json_i64};
use crate::records::PoolRow;
use crate::source::SourceKind;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;

const POOL_LIMIT: usize = 55;

pub struct StellaswapFetcher {
    client: reqwest::Client,
    apr_url: String,
    graph_url: Option<String>,
}

impl StellaswapFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        let graph_url = config.stellaswap_graph_api_key.as_ref().map(|key| {
            format!(
                "https://gateway.thegraph.com/api/{}/subgraphs/id/{}",
                key, config.stellaswap_subgraph_id
            )
        });
        Ok(Self {
            client: http_client(config.http_timeout_secs)?,
            apr_url: config.stellaswap_apr_url.trim_end_matches('/').to_string(),
            graph_url,
        })
    }

    async fn query_pools(&self, graph_url: &str) -> Result<Value, FetchError> {
        let now = Utc::now().timestamp();
        let query = pool_query(now - 23 * 3_600, now - 25 * 3_600);

        let response = self
            .client
            .post(graph_url)
            .json(&json!({ "query": query }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: "subgraph".to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(response.json::<Value>().await?)
    }
}

#[async_trait]
impl Fetcher for StellaswapFetcher {
    type Batch = Vec<PoolRow>;

    fn source(&self) -> SourceKind {
        SourceKind::Stellaswap
    }

    async fn fetch(&mut self) -> Result<Vec<PoolRow>, FetchError> {
        let graph_url = self
            .graph_url
            .clone()
            .ok_or_else(|| FetchError::Decode("STELLASWAP_GRAPH_API_KEY is not set".to_string()))?;

        let pools_apr = parse_pools_apr(&get_json(&self.client, &format!("{}/poolsApr", self.apr_url)).await?);
        let farming_apr = parse_farming_apr(
            &get_json(&self.client, &format!("{}/offchain/farmingAPR", self.apr_url)).await?,
        );
        let graph = self.query_pools(&graph_url).await?;

        parse_pools(&graph, &pools_apr, &farming_apr)
    }
}

fn pool_query(until: i64, since: i64) -> String {
    format!(
        "{{
  pools(first: {limit}) {{
    id
    token0 {{ symbol }}
    token1 {{ symbol }}
    liquidity
    volumeUSD
    txCount
    feesUSD
    totalValueLockedToken0
    totalValueLockedToken1
    poolHourData(
      where: {{ periodStartUnix_gte: {since}, periodStartUnix_lte: {until} }}
      orderBy: periodStartUnix
      orderDirection: desc
      first: 1
    ) {{ feesUSD volumeUSD }}
  }}
}}",
        limit = POOL_LIMIT,
        since = since,
        until = until
    )
}

/// `{"isSuccess": true, "result": {"<pool>": apr}}` → pool → apr
pub fn parse_pools_apr(body: &Value) -> HashMap<String, f64> {
    if body.get("isSuccess").and_then(Value::as_bool) != Some(true) {
        log::warn!("⚠️  Pools APR response not successful, using 0 for every pool");
        return HashMap::new();
    }
    body.get("result")
        .and_then(Value::as_object)
        .map(|m| {
            m.iter()
                .filter_map(|(id, apr)| Some((id.to_lowercase(), json_f64(apr)?)))
                .collect()
        })
        .unwrap_or_default()
}

/// `{"code": 200, "result": {"pools": {"<pool>": {"apr": ..}}}}` → pool → apr
pub fn parse_farming_apr(body: &Value) -> HashMap<String, f64> {
    if body.get("code").and_then(Value::as_i64) != Some(200) {
        log::warn!("⚠️  Farming APR response not successful, using 0 for every pool");
        return HashMap::new();
    }
    body.pointer("/result/pools")
        .and_then(Value::as_object)
        .map(|m| {
            m.iter()
                .filter_map(|(id, entry)| Some((id.to_lowercase(), entry.get("apr").and_then(json_f64)?)))
                .collect()
        })
        .unwrap_or_default()
}

/// Subgraph response plus APR maps → pool rows
///
/// 24h volume and fees are the cumulative counters minus the hourly snapshot
/// from a day ago; without that snapshot they are 0.
pub fn parse_pools(
    graph: &Value,
    pools_apr: &HashMap<String, f64>,
    farming_apr: &HashMap<String, f64>,
) -> Result<Vec<PoolRow>, FetchError> {
    if let Some(errors) = graph.get("errors") {
        return Err(FetchError::Decode(format!("subgraph errors: {}", errors)));
    }
    let pools = graph
        .pointer("/data/pools")
        .and_then(Value::as_array)
        .ok_or_else(|| FetchError::Decode("subgraph response has no data.pools".to_string()))?;

    let mut rows = Vec::with_capacity(pools.len());
    for pool in pools {
        let pool_id = match pool.get("id").and_then(Value::as_str) {
            Some(id) => id.to_lowercase(),
            None => continue,
        };
        let symbol = |token: &str| {
            pool.get(token)
                .and_then(|t| t.get("symbol"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let num = |key: &str| pool.get(key).and_then(json_f64).unwrap_or(0.0);

        let (volume_24h, fees_24h) = match pool
            .get("poolHourData")
            .and_then(Value::as_array)
            .and_then(|h| h.first())
        {
            Some(day_ago) => (
                (num("volumeUSD") - day_ago.get("volumeUSD").and_then(json_f64).unwrap_or(0.0)).max(0.0),
                (num("feesUSD") - day_ago.get("feesUSD").and_then(json_f64).unwrap_or(0.0)).max(0.0),
            ),
            None => (0.0, 0.0),
        };

        let pools_apr = pools_apr.get(&pool_id).copied().unwrap_or(0.0);
        let farming_apr = farming_apr.get(&pool_id).copied().unwrap_or(0.0);

        rows.push(PoolRow {
            token0_symbol: symbol("token0"),
            token1_symbol: symbol("token1"),
            liquidity: num("liquidity"),
            volume_usd_24h: volume_24h,
            tx_count: pool.get("txCount").and_then(json_i64).unwrap_or(0),
            fees_usd_24h: fees_24h,
            amount_token0: num("totalValueLockedToken0"),
            amount_token1: num("totalValueLockedToken1"),
            pools_apr,
            farming_apr,
            final_apr: pools_apr + farming_apr,
            pool_id,
        });
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apr_maps() {
        let pools = parse_pools_apr(&json!({"isSuccess": true, "result": {"0xAB": 12.5, "0xcd": "3"}}));
        assert_eq!(pools.get("0xab"), Some(&12.5));
        assert_eq!(pools.get("0xcd"), Some(&3.0));
        assert!(parse_pools_apr(&json!({"isSuccess": false})).is_empty());

        let farming = parse_farming_apr(&json!({"code": 200, "result": {"pools": {"0xab": {"apr": 7.5}}}}));
        assert_eq!(farming.get("0xab"), Some(&7.5));
        assert!(parse_farming_apr(&json!({"code": 500})).is_empty());
    }

    #[test]
    fn test_parse_pools_derives_daily_figures() {
        let graph = json!({"data": {"pools": [
            {
                "id": "0xAB",
                "token0": {"symbol": "WGLMR"},
                "token1": {"symbol": "USDC"},
                "liquidity": "1000",
                "volumeUSD": "5000",
                "txCount": "321",
                "feesUSD": "50",
                "totalValueLockedToken0": "10.5",
                "totalValueLockedToken1": "20.25",
                "poolHourData": [{"volumeUSD": "4000", "feesUSD": "45"}]
            },
            {
                "id": "0xcd",
                "token0": {"symbol": "xcDOT"},
                "token1": {"symbol": "WGLMR"},
                "liquidity": "1",
                "volumeUSD": "1",
                "txCount": "1",
                "feesUSD": "1",
                "poolHourData": []
            }
        ]}});
        let pools_apr = HashMap::from([("0xab".to_string(), 12.0)]);
        let farming_apr = HashMap::from([("0xab".to_string(), 8.0)]);

        let rows = parse_pools(&graph, &pools_apr, &farming_apr).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].pool_id, "0xab");
        assert_eq!(rows[0].volume_usd_24h, 1000.0);
        assert_eq!(rows[0].fees_usd_24h, 5.0);
        assert_eq!(rows[0].tx_count, 321);
        assert_eq!(rows[0].final_apr, 20.0);
        assert_eq!(rows[0].amount_token1, 20.25);
        assert_eq!(rows[1].volume_usd_24h, 0.0);
        assert_eq!(rows[1].final_apr, 0.0);
    }

    #[test]
    fn test_subgraph_errors_surface() {
        let empty = HashMap::new();
        assert!(parse_pools(&json!({"errors": [{"message": "bad"}]}), &empty, &empty).is_err());
        assert!(parse_pools(&json!({"data": {}}), &empty, &empty).is_err());
    }
}
