//! Record types produced by the fetchers and persisted by the stores

use crate::pipeline::validate::{
    require_finite, require_non_negative, require_non_negative_decimal, require_records,
    require_text, ValidationError,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A fetched batch: countable, checkable and hashable
pub trait BatchPayload: Send + Sync {
    fn record_count(&self) -> usize;

    fn validate(&self) -> Result<(), ValidationError>;

    /// JSON view the content hash is computed over
    fn canonical(&self) -> serde_json::Result<Value>;
}

/// One asset entry of the Bifrost `/site` endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BifrostSiteRow {
    pub asset: String,
    pub value: Option<Decimal>,
    pub tvl: Option<Decimal>,
    pub tvm: Option<Decimal>,
    pub holders: Option<i64>,
    pub apy: Option<Decimal>,
    pub apy_base: Option<Decimal>,
    pub apy_reward: Option<Decimal>,
    pub total_issuance: Option<Decimal>,
}

/// One entry of the Bifrost `/staking` `supportedAssets` array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BifrostStakingRow {
    pub contract_address: Option<String>,
    pub symbol: String,
    pub slug: Option<String>,
    pub base_slug: Option<String>,
    pub unstaking_time: Option<i64>,
    pub users: Option<i64>,
    pub apr: Option<Decimal>,
    pub fee: Option<Decimal>,
    pub price: Option<Decimal>,
    pub exchange_ratio: Option<Decimal>,
    pub supply: Option<Decimal>,
}

/// Both Bifrost endpoints are fetched together and share one batch id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BifrostBatch {
    pub site: Vec<BifrostSiteRow>,
    pub staking: Vec<BifrostStakingRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HydrationRow {
    pub asset_id: String,
    pub symbol: String,
    pub farm_apr: f64,
    pub pool_apr: f64,
    pub total_apr: f64,
    pub tvl_usd: f64,
    pub volume_usd: f64,
    /// When the row was fetched; not part of the content
    pub observed_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRow {
    pub asset_id: String,
    pub symbol: String,
    pub price_usdt: f64,
}

/// One Stellaswap pool on Moonbeam
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolRow {
    pub pool_id: String,
    pub token0_symbol: String,
    pub token1_symbol: String,
    pub liquidity: f64,
    pub volume_usd_24h: f64,
    pub tx_count: i64,
    pub fees_usd_24h: f64,
    pub amount_token0: f64,
    pub amount_token1: f64,
    pub pools_apr: f64,
    pub farming_apr: f64,
    pub final_apr: f64,
}

impl BatchPayload for BifrostBatch {
    fn record_count(&self) -> usize {
        self.site.len() + self.staking.len()
    }

    fn validate(&self) -> Result<(), ValidationError> {
        require_records(self.record_count())?;
        for (i, row) in self.site.iter().enumerate() {
            require_text(i, "asset", &row.asset)?;
            require_non_negative_decimal(i, "tvl", row.tvl)?;
            require_non_negative_decimal(i, "tvm", row.tvm)?;
            if matches!(row.holders, Some(h) if h < 0) {
                return Err(ValidationError::Negative { row: i, field: "holders" });
            }
        }
        for (i, row) in self.staking.iter().enumerate() {
            require_text(i, "symbol", &row.symbol)?;
            require_non_negative_decimal(i, "price", row.price)?;
            require_non_negative_decimal(i, "supply", row.supply)?;
        }
        Ok(())
    }

    fn canonical(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

impl BatchPayload for Vec<HydrationRow> {
    fn record_count(&self) -> usize {
        self.len()
    }

    fn validate(&self) -> Result<(), ValidationError> {
        require_records(self.len())?;
        for (i, row) in self.iter().enumerate() {
            require_text(i, "asset_id", &row.asset_id)?;
            require_text(i, "symbol", &row.symbol)?;
            require_non_negative(i, "tvl_usd", row.tvl_usd)?;
            require_non_negative(i, "volume_usd", row.volume_usd)?;
            require_finite(i, "farm_apr", row.farm_apr)?;
            require_finite(i, "pool_apr", row.pool_apr)?;
            require_finite(i, "total_apr", row.total_apr)?;
        }
        Ok(())
    }

    fn canonical(&self) -> serde_json::Result<Value> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Array(rows) = &mut value {
            for row in rows.iter_mut() {
                if let Value::Object(map) = row {
                    map.remove("observed_at");
                }
            }
        }
        Ok(value)
    }
}

impl BatchPayload for Vec<PriceRow> {
    fn record_count(&self) -> usize {
        self.len()
    }

    fn validate(&self) -> Result<(), ValidationError> {
        require_records(self.len())?;
        for (i, row) in self.iter().enumerate() {
            require_text(i, "asset_id", &row.asset_id)?;
            require_text(i, "symbol", &row.symbol)?;
            require_non_negative(i, "price_usdt", row.price_usdt)?;
        }
        Ok(())
    }

    fn canonical(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

impl BatchPayload for Vec<PoolRow> {
    fn record_count(&self) -> usize {
        self.len()
    }

    fn validate(&self) -> Result<(), ValidationError> {
        require_records(self.len())?;
        for (i, row) in self.iter().enumerate() {
            require_text(i, "pool_id", &row.pool_id)?;
            require_text(i, "token0_symbol", &row.token0_symbol)?;
            require_text(i, "token1_symbol", &row.token1_symbol)?;
            require_non_negative(i, "liquidity", row.liquidity)?;
            require_non_negative(i, "volume_usd_24h", row.volume_usd_24h)?;
            require_non_negative(i, "fees_usd_24h", row.fees_usd_24h)?;
            require_finite(i, "pools_apr", row.pools_apr)?;
            require_finite(i, "farming_apr", row.farming_apr)?;
            require_finite(i, "final_apr", row.final_apr)?;
            if row.tx_count < 0 {
                return Err(ValidationError::Negative { row: i, field: "tx_count" });
            }
        }
        Ok(())
    }

    fn canonical(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::hash::compute_hash;

    #[test]
    fn test_observed_at_excluded_from_canonical_view() {
        let first = vec![hydration_row("5", "DOT", 100.0)];
        let mut second = first.clone();
        second[0].observed_at = "2026-01-01T12:00:00Z".to_string();

        let h1 = compute_hash(&first.canonical().unwrap());
        let h2 = compute_hash(&second.canonical().unwrap());
        assert_eq!(h1, h2);

        second[0].tvl_usd = 101.0;
        let h3 = compute_hash(&second.canonical().unwrap());
        assert_ne!(h1, h3);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert_eq!(Vec::<PriceRow>::new().validate(), Err(ValidationError::EmptyBatch));

        let negative_price = vec![price_row("0", "HDX", -0.5)];
        assert!(negative_price.validate().is_err());

        let blank_symbol = vec![hydration_row("5", " ", 100.0)];
        assert!(matches!(
            blank_symbol.validate(),
            Err(ValidationError::MissingField { field: "symbol", .. })
        ));

        let mut pool = pool_row("0x1", "GLMR", "USDC");
        pool.volume_usd_24h = -1.0;
        assert!(vec![pool].validate().is_err());

        let mut batch = BifrostBatch {
            site: vec![site_row("vDOT", "12.5")],
            staking: vec![staking_row("DOT", "7.1")],
        };
        assert!(batch.validate().is_ok());
        batch.site[0].tvl = dec("-3");
        assert!(batch.validate().is_err());
    }

    #[test]
    fn test_record_counts() {
        let batch = BifrostBatch {
            site: vec![site_row("vDOT", "12.5"), site_row("vKSM", "9.0")],
            staking: vec![staking_row("DOT", "7.1")],
        };
        assert_eq!(batch.record_count(), 3);
        assert_eq!(vec![pool_row("0x1", "GLMR", "USDC")].record_count(), 1);
    }
}
