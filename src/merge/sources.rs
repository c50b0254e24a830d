//! Consistent read of the latest batch of every source

use crate::config::TableNames;
use crate::records::{BifrostBatch, HydrationRow, PoolRow, PriceRow};
use crate::source::SourceKind;
use crate::store::{
    BatchRef, BifrostStore, HydrationPriceStore, HydrationStore, SourceStore, StellaswapStore,
    StoreError,
};
use rusqlite::{Connection, TransactionBehavior};
use rust_decimal::Decimal;

/// A source's newest batch together with its identity
#[derive(Debug, Clone)]
pub struct Latest<B> {
    pub batch: BatchRef,
    pub records: B,
}

/// Everything one merge cycle needs, read under a single snapshot
#[derive(Debug, Clone, Default)]
pub struct MergeInputs {
    pub bifrost: Option<Latest<BifrostBatch>>,
    pub hydration: Option<Latest<Vec<HydrationRow>>>,
    pub hydration_price: Option<Latest<Vec<PriceRow>>>,
    pub stellaswap: Option<Latest<Vec<PoolRow>>>,
    /// Latest staking price per symbol across all Bifrost batches
    pub staking_prices: Vec<(String, Decimal)>,
    /// Sources that could not be read this cycle
    pub degraded: Vec<SourceKind>,
}

impl MergeInputs {
    pub fn batch(&self, source: SourceKind) -> Option<BatchRef> {
        match source {
            SourceKind::Bifrost => self.bifrost.as_ref().map(|l| l.batch),
            SourceKind::Hydration => self.hydration.as_ref().map(|l| l.batch),
            SourceKind::HydrationPrice => self.hydration_price.as_ref().map(|l| l.batch),
            SourceKind::Stellaswap => self.stellaswap.as_ref().map(|l| l.batch),
        }
    }
}

pub struct SourceReader {
    bifrost: BifrostStore,
    hydration: HydrationStore,
    hydration_price: HydrationPriceStore,
    stellaswap: StellaswapStore,
}

impl SourceReader {
    pub fn new(tables: &TableNames) -> Self {
        Self {
            bifrost: BifrostStore::new(tables),
            hydration: HydrationStore::new(tables),
            hydration_price: HydrationPriceStore::new(tables),
            stellaswap: StellaswapStore::new(tables),
        }
    }

    /// Read every source inside one deferred transaction
    ///
    /// In WAL mode the transaction sees one snapshot across all tables, so a
    /// batch committed mid-read is picked up by the next cycle instead. A
    /// source that fails to read is left empty and listed in `degraded`.
    pub fn read(&self, conn: &mut Connection) -> Result<MergeInputs, StoreError> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
        let mut inputs = MergeInputs::default();

        inputs.bifrost = degrade(read_latest(&self.bifrost, &tx), SourceKind::Bifrost, &mut inputs.degraded);
        inputs.hydration = degrade(read_latest(&self.hydration, &tx), SourceKind::Hydration, &mut inputs.degraded);
        inputs.hydration_price = degrade(
            read_latest(&self.hydration_price, &tx),
            SourceKind::HydrationPrice,
            &mut inputs.degraded,
        );
        inputs.stellaswap = degrade(read_latest(&self.stellaswap, &tx), SourceKind::Stellaswap, &mut inputs.degraded);

        inputs.staking_prices = match self.bifrost.latest_staking_prices(&tx) {
            Ok(prices) => prices,
            Err(e) => {
                log::warn!("⚠️  Fallback staking prices unavailable: {}", e);
                Vec::new()
            }
        };

        tx.commit()?;
        Ok(inputs)
    }
}

pub fn read_latest<S: SourceStore>(store: &S, conn: &Connection) -> Result<Option<Latest<S::Batch>>, StoreError> {
    match store.latest_batch(conn)? {
        Some(batch) => {
            let records = store.read_batch(conn, batch.batch_id)?;
            Ok(Some(Latest { batch, records }))
        }
        None => Ok(None),
    }
}

fn degrade<B>(
    result: Result<Option<Latest<B>>, StoreError>,
    source: SourceKind,
    degraded: &mut Vec<SourceKind>,
) -> Option<Latest<B>> {
    match result {
        Ok(latest) => latest,
        Err(e) => {
            log::warn!("⚠️  Could not read {} for merge, treating as empty: {}", source, e);
            degraded.push(source);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::fixtures::{price_row, site_row, staking_row};

    fn setup() -> (Connection, TableNames) {
        let conn = Connection::open_in_memory().unwrap();
        let tables = TableNames::default();
        BifrostStore::new(&tables).create_tables(&conn).unwrap();
        HydrationStore::new(&tables).create_tables(&conn).unwrap();
        HydrationPriceStore::new(&tables).create_tables(&conn).unwrap();
        StellaswapStore::new(&tables).create_tables(&conn).unwrap();
        (conn, tables)
    }

    #[test]
    fn test_reads_latest_batch_per_source() {
        let (mut conn, tables) = setup();
        let prices = HydrationPriceStore::new(&tables);
        prices
            .insert_batch_at(&mut conn, 1, Some("a"), &vec![price_row("5", "DOT", 6.0)], 100)
            .unwrap();
        prices
            .insert_batch_at(&mut conn, 2, Some("b"), &vec![price_row("5", "DOT", 7.0)], 200)
            .unwrap();
        let bifrost = BifrostStore::new(&tables);
        let batch = BifrostBatch {
            site: vec![site_row("vDOT", "5")],
            staking: vec![staking_row("vDOT", "9")],
        };
        bifrost.insert_batch_at(&mut conn, 50, None, &batch, 150).unwrap();

        let inputs = SourceReader::new(&tables).read(&mut conn).unwrap();
        let latest = inputs.hydration_price.as_ref().unwrap();
        assert_eq!(latest.batch, BatchRef { batch_id: 2, created_at: 200 });
        assert_eq!(latest.records[0].price_usdt, 7.0);
        assert_eq!(inputs.batch(SourceKind::Bifrost).map(|b| b.batch_id), Some(50));
        assert!(inputs.hydration.is_none());
        assert!(inputs.stellaswap.is_none());
        assert_eq!(inputs.staking_prices.len(), 1);
        assert!(inputs.degraded.is_empty());
    }

    #[test]
    fn test_missing_table_degrades_one_source() {
        let (mut conn, tables) = setup();
        conn.execute_batch(&format!("DROP TABLE {}", tables.pool_data)).unwrap();
        HydrationPriceStore::new(&tables)
            .insert_batch_at(&mut conn, 1, None, &vec![price_row("5", "DOT", 6.0)], 100)
            .unwrap();

        let inputs = SourceReader::new(&tables).read(&mut conn).unwrap();
        assert_eq!(inputs.degraded, vec![SourceKind::Stellaswap]);
        assert!(inputs.hydration_price.is_some());
    }
}
