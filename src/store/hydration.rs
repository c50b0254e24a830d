use super::{create_batch_table, latest_batch_in, BatchRef, SourceStore, StoreError};
use crate::config::TableNames;
use crate::records::HydrationRow;
use crate::source::SourceKind;
use rusqlite::{params, Connection};

pub struct HydrationStore {
    data_table: String,
    batch_table: String,
}

impl HydrationStore {
    pub fn new(tables: &TableNames) -> Self {
        Self {
            data_table: tables.hydration_data.clone(),
            batch_table: tables.hydration_batches.clone(),
        }
    }
}

impl SourceStore for HydrationStore {
    type Batch = Vec<HydrationRow>;

    fn source(&self) -> SourceKind {
        SourceKind::Hydration
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
                farm_apr REAL,
                pool_apr REAL,
                total_apr REAL,
                tvl_usd REAL,
                volume_usd REAL,
                observed_at TEXT,
                created_at INTEGER NOT NULL
            );",
            self.data_table
        ))?;
        create_batch_table(conn, &self.batch_table)
    }

    fn insert_rows(
        &self,
        conn: &Connection,
        batch_id: i64,
        created_at: i64,
        batch: &Vec<HydrationRow>,
    ) -> Result<usize, StoreError> {
        let mut stmt = conn.prepare_cached(&format!(
            "INSERT INTO {} (batch_id, asset_id, symbol, farm_apr, pool_apr, total_apr, tvl_usd,
                             volume_usd, observed_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            self.data_table
        ))?;
        for row in batch {
            stmt.execute(params![
                batch_id,
                row.asset_id,
                row.symbol,
                row.farm_apr,
                row.pool_apr,
                row.total_apr,
                row.tvl_usd,
                row.volume_usd,
                row.observed_at,
                created_at,
            ])?;
        }
        Ok(batch.len())
    }

    fn latest_batch(&self, conn: &Connection) -> Result<Option<BatchRef>, StoreError> {
        latest_batch_in(conn, &self.data_table)
    }

    fn read_batch(&self, conn: &Connection, batch_id: i64) -> Result<Vec<HydrationRow>, StoreError> {
        let mut stmt = conn.prepare(&format!(
            "SELECT asset_id, symbol, farm_apr, pool_apr, total_apr, tvl_usd, volume_usd, observed_at
             FROM {} WHERE batch_id = ?1 ORDER BY id",
            self.data_table
        ))?;
        let rows = stmt.query_map(params![batch_id], |row| {
            Ok(HydrationRow {
                asset_id: row.get(0)?,
                symbol: row.get(1)?,
                farm_apr: row.get::<_, Option<f64>>(2)?.unwrap_or(f64::NAN),
                pool_apr: row.get::<_, Option<f64>>(3)?.unwrap_or(f64::NAN),
                total_apr: row.get::<_, Option<f64>>(4)?.unwrap_or(f64::NAN),
                tvl_usd: row.get::<_, Option<f64>>(5)?.unwrap_or(f64::NAN),
                volume_usd: row.get::<_, Option<f64>>(6)?.unwrap_or(f64::NAN),
                observed_at: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}
