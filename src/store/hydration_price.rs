use super::{create_batch_table, latest_batch_in, BatchRef, SourceStore, StoreError};
use crate::config::TableNames;
use crate::records::PriceRow;
use crate::source::SourceKind;
use rusqlite::{params, Connection};

pub struct HydrationPriceStore {
    price_table: String,
    batch_table: String,
}

impl HydrationPriceStore {
    pub fn new(tables: &TableNames) -> Self {
        Self {
            price_table: tables.hydration_price.clone(),
            batch_table: tables.hydration_price_batches.clone(),
        }
    }
}

impl SourceStore for HydrationPriceStore {
    type Batch = Vec<PriceRow>;

    fn source(&self) -> SourceKind {
        SourceKind::HydrationPrice
    }

    fn batch_table(&self) -> &str {
        &self.batch_table
    }

    fn create_tables(&self, conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                batch_id INTEGER NOT NULL,
                asset_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                price_usdt REAL,
                created_at INTEGER NOT NULL
            );",
            self.price_table
        ))?;
        create_batch_table(conn, &self.batch_table)
    }

    fn insert_rows(
        &self,
        conn: &Connection,
        batch_id: i64,
        created_at: i64,
        batch: &Vec<PriceRow>,
    ) -> Result<usize, StoreError> {
        let mut stmt = conn.prepare_cached(&format!(
            "INSERT INTO {} (batch_id, asset_id, symbol, price_usdt, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            self.price_table
        ))?;
        for row in batch {
            stmt.execute(params![batch_id, row.asset_id, row.symbol, row.price_usdt, created_at])?;
        }
        Ok(batch.len())
    }

    fn latest_batch(&self, conn: &Connection) -> Result<Option<BatchRef>, StoreError> {
        latest_batch_in(conn, &self.price_table)
    }

    fn read_batch(&self, conn: &Connection, batch_id: i64) -> Result<Vec<PriceRow>, StoreError> {
        let mut stmt = conn.prepare(&format!(
            "SELECT asset_id, symbol, price_usdt FROM {} WHERE batch_id = ?1 ORDER BY id",
            self.price_table
        ))?;
        let rows = stmt.query_map(params![batch_id], |row| {
            Ok(PriceRow {
                asset_id: row.get(0)?,
                symbol: row.get(1)?,
                price_usdt: row.get::<_, Option<f64>>(2)?.unwrap_or(f64::NAN),
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }
}
