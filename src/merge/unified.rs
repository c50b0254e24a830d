//! Source batches → unified per-symbol records

use super::price::PriceMap;
use super::sanitize::PayloadValue;
use crate::numeric::decimal_from_f64;
use crate::records::{BifrostBatch, HydrationRow, PoolRow, PriceRow};
use crate::source::SourceKind;
use crate::store::bifrost::AGGREGATE_ASSETS;
use rust_decimal::Decimal;
use serde_json::json;

/// One yield-bearing entry from any source, in a common shape
#[derive(Debug, Clone, PartialEq)]
pub struct UnifiedRecord {
    pub source: SourceKind,
    pub batch_id: i64,
    pub created_at: i64,
    /// `{"symbol": ..}`, or `{"token0_symbol": .., "token1_symbol": ..}` for pools
    pub symbol: serde_json::Value,
    pub farm_apy: Option<Decimal>,
    pub pool_apy: Option<Decimal>,
    pub apy: Option<Decimal>,
    pub tvl: Option<Decimal>,
    pub volume: Option<Decimal>,
    pub tx_count: Option<i64>,
    pub price: Option<Decimal>,
}

impl UnifiedRecord {
    fn empty(source: SourceKind, batch_id: i64, created_at: i64, symbol: serde_json::Value) -> Self {
        Self {
            source,
            batch_id,
            created_at,
            symbol,
            farm_apy: None,
            pool_apy: None,
            apy: None,
            tvl: None,
            volume: None,
            tx_count: None,
            price: None,
        }
    }

    pub fn chain(&self) -> &'static str {
        self.source.chain()
    }

    pub fn symbol_json(&self) -> String {
        self.symbol.to_string()
    }

    /// Flat payload entry; symbol keys sit next to the metrics
    pub fn to_payload(&self) -> PayloadValue {
        let mut entries: Vec<(String, PayloadValue)> = vec![
            ("source".to_string(), PayloadValue::from(self.source.as_str())),
            ("chain".to_string(), PayloadValue::from(self.chain())),
            ("batch_id".to_string(), PayloadValue::Int(self.batch_id)),
        ];
        if let Some(fields) = self.symbol.as_object() {
            entries.extend(fields.iter().map(|(k, v)| {
                (k.clone(), v.as_str().map_or(PayloadValue::Null, PayloadValue::from))
            }));
        }
        entries.extend([
            ("farm_apy".to_string(), self.farm_apy.into()),
            ("pool_apy".to_string(), self.pool_apy.into()),
            ("apy".to_string(), self.apy.into()),
            ("tvl".to_string(), self.tvl.into()),
            ("volume".to_string(), self.volume.into()),
            ("tx".to_string(), self.tx_count.into()),
            ("price".to_string(), self.price.into()),
        ]);
        PayloadValue::map(entries)
    }
}

fn is_aggregate(asset: &str) -> bool {
    AGGREGATE_ASSETS.iter().any(|a| a.eq_ignore_ascii_case(asset))
}

/// Site rows minus the chain-wide aggregates; APY falls back to base + reward
pub fn from_bifrost(batch_id: i64, created_at: i64, batch: &BifrostBatch, prices: &PriceMap) -> Vec<UnifiedRecord> {
    batch
        .site
        .iter()
        .filter(|row| !is_aggregate(&row.asset))
        .map(|row| {
            let mut record =
                UnifiedRecord::empty(SourceKind::Bifrost, batch_id, created_at, json!({ "symbol": row.asset }));
            record.farm_apy = row.apy_reward;
            record.pool_apy = row.apy_base;
            record.apy = row.apy.or_else(|| Some(row.apy_base? + row.apy_reward?));
            record.tvl = row.tvl;
            record.price = prices.get(&row.asset);
            record
        })
        .collect()
}

pub fn from_hydration(batch_id: i64, created_at: i64, rows: &[HydrationRow], prices: &PriceMap) -> Vec<UnifiedRecord> {
    rows.iter()
        .map(|row| {
            let mut record =
                UnifiedRecord::empty(SourceKind::Hydration, batch_id, created_at, json!({ "symbol": row.symbol }));
            record.farm_apy = decimal_from_f64(row.farm_apr);
            record.pool_apy = decimal_from_f64(row.pool_apr);
            record.apy = decimal_from_f64(row.total_apr);
            record.tvl = decimal_from_f64(row.tvl_usd);
            record.volume = decimal_from_f64(row.volume_usd);
            record.price = prices.get(&row.symbol);
            record
        })
        .collect()
}

pub fn from_prices(batch_id: i64, created_at: i64, rows: &[PriceRow]) -> Vec<UnifiedRecord> {
    rows.iter()
        .map(|row| {
            let mut record = UnifiedRecord::empty(
                SourceKind::HydrationPrice,
                batch_id,
                created_at,
                json!({ "symbol": row.symbol }),
            );
            record.price = decimal_from_f64(row.price_usdt);
            record
        })
        .collect()
}

/// Two-token pools carry no single price
pub fn from_pools(batch_id: i64, created_at: i64, rows: &[PoolRow]) -> Vec<UnifiedRecord> {
    rows.iter()
        .map(|row| {
            let mut record = UnifiedRecord::empty(
                SourceKind::Stellaswap,
                batch_id,
                created_at,
                json!({ "token0_symbol": row.token0_symbol, "token1_symbol": row.token1_symbol }),
            );
            record.farm_apy = decimal_from_f64(row.farming_apr);
            record.pool_apy = decimal_from_f64(row.pools_apr);
            record.apy = decimal_from_f64(row.final_apr);
            record.volume = decimal_from_f64(row.volume_usd_24h);
            record.tx_count = Some(row.tx_count);
            record
        })
        .collect()
}

/// Price rows as stored: `asset_id`, `symbol`, `price_usdt`
pub fn price_payload(rows: &[PriceRow]) -> Vec<PayloadValue> {
    rows.iter()
        .map(|row| {
            PayloadValue::map([
                ("asset_id", PayloadValue::from(row.asset_id.as_str())),
                ("symbol", PayloadValue::from(row.symbol.as_str())),
                ("price_usdt", PayloadValue::Float(row.price_usdt)),
            ])
        })
        .collect()
}

/// Bifrost site assets that Hydration also lists, matched on symbol
pub fn bifrost_hydration_pairs(bifrost: &BifrostBatch, hydration: &[HydrationRow]) -> Vec<PayloadValue> {
    let mut pairs = Vec::new();
    for site in bifrost.site.iter().filter(|row| !is_aggregate(&row.asset)) {
        for hyd in hydration.iter().filter(|h| h.symbol == site.asset) {
            pairs.push(PayloadValue::map([
                ("asset", PayloadValue::from(site.asset.as_str())),
                ("bifrost_tvl", site.tvl.into()),
                ("bifrost_apy", site.apy.into()),
                ("bifrost_apy_base", site.apy_base.into()),
                ("bifrost_apy_reward", site.apy_reward.into()),
                ("hydration_asset_id", PayloadValue::from(hyd.asset_id.as_str())),
                ("hydration_farm_apr", hyd.farm_apr.into()),
                ("hydration_pool_apr", hyd.pool_apr.into()),
                ("hydration_total_apr", hyd.total_apr.into()),
                ("hydration_tvl_usd", hyd.tvl_usd.into()),
                ("hydration_volume_usd", hyd.volume_usd.into()),
            ]));
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::sanitize::sanitize;
    use crate::records::fixtures::{dec, hydration_row, pool_row, price_row, site_row, staking_row};

    fn bifrost_batch() -> BifrostBatch {
        let mut no_apy = site_row("vKSM", "1");
        no_apy.apy = None;
        BifrostBatch {
            site: vec![site_row("vDOT", "6.5"), site_row("TVL", "0"), site_row("bncPrice", "0"), no_apy],
            staking: vec![staking_row("vDOT", "9.5")],
        }
    }

    #[test]
    fn test_bifrost_skips_aggregates_and_resolves_price() {
        let prices = PriceMap::build(&[price_row("1", "vdot", 9.0)], &[]);
        let records = from_bifrost(7, 100, &bifrost_batch(), &prices);

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].symbol, json!({"symbol": "vDOT"}));
        assert_eq!(records[0].apy, dec("6.5"));
        assert_eq!(records[0].farm_apy, dec("2.0"));
        assert_eq!(records[0].pool_apy, dec("4.0"));
        assert_eq!(records[0].price, dec("9"));
        assert_eq!(records[0].chain(), "bifrost");

        // base 4.0 + reward 2.0
        assert_eq!(records[1].apy, dec("6"));
        assert_eq!(records[1].price, None);
    }

    #[test]
    fn test_hydration_nan_becomes_none() {
        let mut row = hydration_row("5", "DOT", f64::NAN);
        row.volume_usd = f64::INFINITY;
        let prices = PriceMap::build(&[price_row("5", "DOT", 7.0)], &[]);

        let records = from_hydration(3, 100, &[row], &prices);
        assert_eq!(records[0].tvl, None);
        assert_eq!(records[0].volume, None);
        assert_eq!(records[0].apy, dec("8"));
        assert_eq!(records[0].price, dec("7"));
    }

    #[test]
    fn test_pools_have_two_symbols_and_no_price() {
        let records = from_pools(9, 100, &[pool_row("0xab", "WGLMR", "USDC")]);
        assert_eq!(records[0].symbol_json(), r#"{"token0_symbol":"WGLMR","token1_symbol":"USDC"}"#);
        assert_eq!(records[0].price, None);
        assert_eq!(records[0].chain(), "moonbeam");
        assert!(records[0].tx_count.is_some());
    }

    #[test]
    fn test_payload_entries_are_flat() {
        let pool = &from_pools(9, 100, &[pool_row("0xab", "WGLMR", "USDC")])[0];
        let value = sanitize(&pool.to_payload());
        assert_eq!(value["token0_symbol"], json!("WGLMR"));
        assert_eq!(value["token1_symbol"], json!("USDC"));
        assert_eq!(value["chain"], json!("moonbeam"));
        assert!(value.get("symbol").is_none());

        let prices = PriceMap::build(&[], &[]);
        let hyd = &from_hydration(3, 100, &[hydration_row("5", "DOT", 10.0)], &prices)[0];
        let value = sanitize(&hyd.to_payload());
        assert_eq!(value["symbol"], json!("DOT"));
        assert_eq!(value["apy"], json!(8.0));
    }

    #[test]
    fn test_price_payload_keeps_stored_fields() {
        let rows = price_payload(&[price_row("5", "DOT", 7.25), price_row("0", "HDX", f64::NAN)]);
        let value = sanitize(&PayloadValue::List(rows));
        assert_eq!(value, json!([
            {"asset_id": "5", "symbol": "DOT", "price_usdt": 7.25},
            {"asset_id": "0", "symbol": "HDX", "price_usdt": null},
        ]));
    }

    #[test]
    fn test_pairs_join_on_symbol() {
        let hydration = vec![hydration_row("15", "vDOT", 10.0), hydration_row("5", "DOT", 10.0)];
        let pairs = bifrost_hydration_pairs(&bifrost_batch(), &hydration);
        assert_eq!(pairs.len(), 1);
        match &pairs[0] {
            PayloadValue::Map(fields) => {
                assert_eq!(fields.get("hydration_asset_id"), Some(&PayloadValue::from("15")));
            }
            other => panic!("unexpected pair shape: {:?}", other),
        }
    }
}
