use super::{
    create_batch_table, decimal_from_sql, decimal_to_sql, latest_batch_in, BatchRef, SourceStore,
    StoreError,
};
use crate::config::TableNames;
use crate::records::{BifrostBatch, BifrostSiteRow, BifrostStakingRow};
use crate::source::SourceKind;
use rusqlite::{params, Connection};
use rust_decimal::Decimal;

/// Site-table assets that are chain-wide aggregates, not yield-bearing tokens
pub const AGGREGATE_ASSETS: [&str; 4] = ["tvl", "addresses", "revenue", "bncprice"];

pub struct BifrostStore {
    site_table: String,
    staking_table: String,
    batch_table: String,
}

impl BifrostStore {
    pub fn new(tables: &TableNames) -> Self {
        Self {
            site_table: tables.bifrost_site.clone(),
            staking_table: tables.bifrost_staking.clone(),
            batch_table: tables.bifrost_batches.clone(),
        }
    }

    pub fn site_table(&self) -> &str {
        &self.site_table
    }

    /// Latest price per distinct staking symbol across all batches
    ///
    /// Ties on `created_at` go to the highest batch id.
    pub fn latest_staking_prices(&self, conn: &Connection) -> Result<Vec<(String, Decimal)>, StoreError> {
        let mut stmt = conn.prepare(&format!(
            "SELECT symbol, price FROM (
                SELECT symbol, price,
                       ROW_NUMBER() OVER (
                           PARTITION BY symbol ORDER BY created_at DESC, batch_id DESC, id DESC
                       ) AS rn
                FROM {}
                WHERE symbol IS NOT NULL AND price IS NOT NULL
             ) WHERE rn = 1",
            self.staking_table
        ))?;

        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
        })?;

        let mut prices = Vec::new();
        for row in rows {
            let (symbol, raw) = row?;
            if let Some(price) = decimal_from_sql("price", raw)? {
                prices.push((symbol, price));
            }
        }
        Ok(prices)
    }
}

impl SourceStore for BifrostStore {
    type Batch = BifrostBatch;

    fn source(&self) -> SourceKind {
        SourceKind::Bifrost
    }

    fn batch_table(&self) -> &str {
        &self.batch_table
    }

    fn create_tables(&self, conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {site} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                batch_id INTEGER NOT NULL,
                asset TEXT NOT NULL,
                value TEXT,
                tvl TEXT,
                tvm TEXT,
                holders INTEGER,
                apy TEXT,
                apy_base TEXT,
                apy_reward TEXT,
                total_issuance TEXT,
                created_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS {staking} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                batch_id INTEGER NOT NULL,
                contract_address TEXT,
                symbol TEXT NOT NULL,
                slug TEXT,
                base_slug TEXT,
                unstaking_time INTEGER,
                users INTEGER,
                apr TEXT,
                fee TEXT,
                price TEXT,
                exchange_ratio TEXT,
                supply TEXT,
                created_at INTEGER NOT NULL
            );",
            site = self.site_table,
            staking = self.staking_table,
        ))?;
        create_batch_table(conn, &self.batch_table)
    }

    fn insert_rows(
        &self,
        conn: &Connection,
        batch_id: i64,
        created_at: i64,
        batch: &BifrostBatch,
    ) -> Result<usize, StoreError> {
        let mut site_stmt = conn.prepare_cached(&format!(
            "INSERT INTO {} (batch_id, asset, value, tvl, tvm, holders, apy, apy_base, apy_reward,
                             total_issuance, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            self.site_table
        ))?;
        for row in &batch.site {
            site_stmt.execute(params![
                batch_id,
                row.asset,
                decimal_to_sql(&row.value),
                decimal_to_sql(&row.tvl),
                decimal_to_sql(&row.tvm),
                row.holders,
                decimal_to_sql(&row.apy),
                decimal_to_sql(&row.apy_base),
                decimal_to_sql(&row.apy_reward),
                decimal_to_sql(&row.total_issuance),
                created_at,
            ])?;
        }

        let mut staking_stmt = conn.prepare_cached(&format!(
            "INSERT INTO {} (batch_id, contract_address, symbol, slug, base_slug, unstaking_time,
                             users, apr, fee, price, exchange_ratio, supply, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            self.staking_table
        ))?;
        for row in &batch.staking {
            staking_stmt.execute(params![
                batch_id,
                row.contract_address,
                row.symbol,
                row.slug,
                row.base_slug,
                row.unstaking_time,
                row.users,
                decimal_to_sql(&row.apr),
                decimal_to_sql(&row.fee),
                decimal_to_sql(&row.price),
                decimal_to_sql(&row.exchange_ratio),
                decimal_to_sql(&row.supply),
                created_at,
            ])?;
        }

        Ok(batch.site.len() + batch.staking.len())
    }

    fn latest_batch(&self, conn: &Connection) -> Result<Option<BatchRef>, StoreError> {
        latest_batch_in(conn, &self.site_table)
    }

    fn read_batch(&self, conn: &Connection, batch_id: i64) -> Result<BifrostBatch, StoreError> {
        let mut stmt = conn.prepare(&format!(
            "SELECT asset, value, tvl, tvm, holders, apy, apy_base, apy_reward, total_issuance
             FROM {} WHERE batch_id = ?1 ORDER BY id",
            self.site_table
        ))?;
        let raw_site = stmt.query_map(params![batch_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<i64>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, Option<String>>(7)?,
                row.get::<_, Option<String>>(8)?,
            ))
        })?;

        let mut site = Vec::new();
        for row in raw_site {
            let (asset, value, tvl, tvm, holders, apy, apy_base, apy_reward, total_issuance) = row?;
            site.push(BifrostSiteRow {
                asset,
                value: decimal_from_sql("value", value)?,
                tvl: decimal_from_sql("tvl", tvl)?,
                tvm: decimal_from_sql("tvm", tvm)?,
                holders,
                apy: decimal_from_sql("apy", apy)?,
                apy_base: decimal_from_sql("apy_base", apy_base)?,
                apy_reward: decimal_from_sql("apy_reward", apy_reward)?,
                total_issuance: decimal_from_sql("total_issuance", total_issuance)?,
            });
        }

        let mut stmt = conn.prepare(&format!(
            "SELECT contract_address, symbol, slug, base_slug, unstaking_time, users,
                    apr, fee, price, exchange_ratio, supply
             FROM {} WHERE batch_id = ?1 ORDER BY id",
            self.staking_table
        ))?;
        let raw_staking = stmt.query_map(params![batch_id], |row| {
            Ok((
                row.get::<_, Option<String>>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<i64>>(4)?,
                row.get::<_, Option<i64>>(5)?,
                [
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, Option<String>>(7)?,
                    row.get::<_, Option<String>>(8)?,
                    row.get::<_, Option<String>>(9)?,
                    row.get::<_, Option<String>>(10)?,
                ],
            ))
        })?;

        let mut staking = Vec::new();
        for row in raw_staking {
            let (contract_address, symbol, slug, base_slug, unstaking_time, users, decimals) = row?;
            let [apr, fee, price, exchange_ratio, supply] = decimals;
            staking.push(BifrostStakingRow {
                contract_address,
                symbol,
                slug,
                base_slug,
                unstaking_time,
                users,
                apr: decimal_from_sql("apr", apr)?,
                fee: decimal_from_sql("fee", fee)?,
                price: decimal_from_sql("price", price)?,
                exchange_ratio: decimal_from_sql("exchange_ratio", exchange_ratio)?,
                supply: decimal_from_sql("supply", supply)?,
            });
        }

        Ok(BifrostBatch { site, staking })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::fixtures::{dec, site_row, staking_row};
    use crate::store::count_batches;

    fn setup() -> (Connection, BifrostStore) {
        let conn = Connection::open_in_memory().unwrap();
        let store = BifrostStore::new(&TableNames::default());
        store.create_tables(&conn).unwrap();
        (conn, store)
    }

    #[test]
    fn test_insert_and_read_back_batch() {
        let (mut conn, store) = setup();
        let batch = BifrostBatch {
            site: vec![site_row("vDOT", "12.5"), site_row("vKSM", "9.75")],
            staking: vec![staking_row("DOT", "7.10")],
        };

        let rows = store.insert_batch_at(&mut conn, 1_000, Some("h1"), &batch, 1_000).unwrap();
        assert_eq!(rows, 3);

        assert_eq!(store.get_last_content_hash(&conn).unwrap(), Some("h1".to_string()));
        assert_eq!(store.get_last_batch_id(&conn).unwrap(), Some(1_000));
        assert_eq!(
            store.latest_batch(&conn).unwrap(),
            Some(BatchRef { batch_id: 1_000, created_at: 1_000 })
        );
        assert_eq!(store.read_batch(&conn, 1_000).unwrap(), batch);
    }

    #[test]
    fn test_failed_insert_leaves_nothing_behind() {
        let (mut conn, store) = setup();
        conn.execute_batch("DROP TABLE bifrost_staking").unwrap();

        let batch = BifrostBatch {
            site: vec![site_row("vDOT", "12.5")],
            staking: vec![staking_row("DOT", "7.1")],
        };
        assert!(store.insert_batch(&mut conn, 5, Some("h"), &batch).is_err());

        let site_rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM bifrost_site", [], |r| r.get(0))
            .unwrap();
        assert_eq!(site_rows, 0);
        assert_eq!(count_batches(&conn, "bifrost_batches").unwrap(), 0);
    }

    #[test]
    fn test_latest_staking_price_per_symbol() {
        let (mut conn, store) = setup();
        let older = BifrostBatch {
            site: vec![],
            staking: vec![staking_row("DOT", "6.0"), staking_row("KSM", "30.0")],
        };
        let newer = BifrostBatch {
            site: vec![],
            staking: vec![staking_row("DOT", "7.0")],
        };
        store.insert_batch_at(&mut conn, 1, None, &older, 100).unwrap();
        store.insert_batch_at(&mut conn, 2, None, &newer, 200).unwrap();

        let mut prices = store.latest_staking_prices(&conn).unwrap();
        prices.sort();
        assert_eq!(
            prices,
            vec![
                ("DOT".to_string(), dec("7.0").unwrap()),
                ("KSM".to_string(), dec("30.0").unwrap()),
            ]
        );
    }
}
