use super::{create_batch_table, latest_batch_in, BatchRef, SourceStore, StoreError};
use crate::config::TableNames;
use crate::records::PoolRow;
use crate::source::SourceKind;
use rusqlite::{params, Connection};

pub struct StellaswapStore {
    pool_table: String,
    batch_table: String,
}

impl StellaswapStore {
    pub fn new(tables: &TableNames) -> Self {
        Self {
            pool_table: tables.pool_data.clone(),
            batch_table: tables.pool_batches.clone(),
        }
    }
}

impl SourceStore for StellaswapStore {
    type Batch = Vec<PoolRow>;

    fn source(&self) -> SourceKind {
        SourceKind::Stellaswap
    }

    fn batch_table(&self) -> &str {
        &self.batch_table
    }

    fn create_tables(&self, conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                batch_id INTEGER NOT NULL,
                pool_id TEXT NOT NULL,
                token0_symbol TEXT NOT NULL,
                token1_symbol TEXT NOT NULL,
                liquidity REAL,
                volume_usd_24h REAL,
                tx_count INTEGER,
                fees_usd_24h REAL,
                amount_token0 REAL,
                amount_token1 REAL,
                pools_apr REAL,
                farming_apr REAL,
                final_apr REAL,
                created_at INTEGER NOT NULL
            );",
            self.pool_table
        ))?;
        create_batch_table(conn, &self.batch_table)
    }

    fn insert_rows(
        &self,
        conn: &Connection,
        batch_id: i64,
        created_at: i64,
        batch: &Vec<PoolRow>,
    ) -> Result<usize, StoreError> {
        let mut stmt = conn.prepare_cached(&format!(
            "INSERT INTO {} (batch_id, pool_id, token0_symbol, token1_symbol, liquidity,
                             volume_usd_24h, tx_count, fees_usd_24h, amount_token0, amount_token1,
                             pools_apr, farming_apr, final_apr, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            self.pool_table
        ))?;
        for row in batch {
            stmt.execute(params![
                batch_id,
                row.pool_id,
                row.token0_symbol,
                row.token1_symbol,
                row.liquidity,
                row.volume_usd_24h,
                row.tx_count,
                row.fees_usd_24h,
                row.amount_token0,
                row.amount_token1,
                row.pools_apr,
                row.farming_apr,
                row.final_apr,
                created_at,
            ])?;
        }
        Ok(batch.len())
    }

    fn latest_batch(&self, conn: &Connection) -> Result<Option<BatchRef>, StoreError> {
        latest_batch_in(conn, &self.pool_table)
    }

    fn read_batch(&self, conn: &Connection, batch_id: i64) -> Result<Vec<PoolRow>, StoreError> {
        let mut stmt = conn.prepare(&format!(
            "SELECT pool_id, token0_symbol, token1_symbol, liquidity, volume_usd_24h, tx_count,
                    fees_usd_24h, amount_token0, amount_token1, pools_apr, farming_apr, final_apr
             FROM {} WHERE batch_id = ?1 ORDER BY id",
            self.pool_table
        ))?;
        let rows = stmt.query_map(params![batch_id], |row| {
            let real = |idx: usize| -> rusqlite::Result<f64> {
                Ok(row.get::<_, Option<f64>>(idx)?.unwrap_or(f64::NAN))
            };
            Ok(PoolRow {
                pool_id: row.get(0)?,
                token0_symbol: row.get(1)?,
                token1_symbol: row.get(2)?,
                liquidity: real(3)?,
                volume_usd_24h: real(4)?,
                tx_count: row.get::<_, Option<i64>>(5)?.unwrap_or(0),
                fees_usd_24h: real(6)?,
                amount_token0: real(7)?,
                amount_token1: real(8)?,
                pools_apr: real(9)?,
                farming_apr: real(10)?,
                final_apr: real(11)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }
}
