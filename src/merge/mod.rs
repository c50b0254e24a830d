//! Multi-source merge engine
//!
//! Each cycle reads the latest batch of every source under one read
//! snapshot, resolves prices, builds one sanitized payload and appends it to
//! `unified_snapshots` unless its hash matches the previous snapshot.
//!
//! Payload layout (keys sorted when hashed):
//! - `batch_id_<k>`, `created_at_<k>` and `<k>_data` per source key
//!   `k ∈ {bifrost, hydration, hydration_price, moonbeam}`
//! - `bifrost_hydration_data`: Bifrost assets Hydration also lists
//! - `combined_created_at`: newest source timestamp

pub mod price;
pub mod sanitize;
pub mod sources;
pub mod unified;

pub use price::PriceMap;
pub use sanitize::{sanitize, PayloadValue};
pub use sources::{MergeInputs, SourceReader};
pub use unified::UnifiedRecord;

use crate::config::{DbConfig, MergeConfig, TableNames};
use crate::hash::compute_hash;
use crate::retry::{retry_blocking, ExponentialBackoff};
use crate::source::SourceKind;
use crate::sqlite_pragma::open_connection;
use crate::store::StoreError;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde_json::Value;

const DB_RETRIES: u32 = 3;

#[derive(Debug)]
pub enum MergeError {
    Store(StoreError),
    Encode(serde_json::Error),
}

impl std::fmt::Display for MergeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MergeError::Store(e) => write!(f, "Merge store error: {}", e),
            MergeError::Encode(e) => write!(f, "Payload encoding failed: {}", e),
        }
    }
}

impl std::error::Error for MergeError {}

impl From<StoreError> for MergeError {
    fn from(err: StoreError) -> Self {
        MergeError::Store(err)
    }
}

impl From<rusqlite::Error> for MergeError {
    fn from(err: rusqlite::Error) -> Self {
        MergeError::Store(StoreError::Database(err))
    }
}

impl From<serde_json::Error> for MergeError {
    fn from(err: serde_json::Error) -> Self {
        MergeError::Encode(err)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    Inserted {
        snapshot_id: i64,
        content_hash: Option<String>,
        rows: usize,
    },
    Duplicate {
        content_hash: String,
    },
}

/// One merge cycle on demand; the orchestrator drives it on an interval
pub trait MergeRunner: Send {
    fn run_cycle(&mut self) -> Result<MergeOutcome, MergeError>;
}

pub struct MergeEngine {
    conn: Connection,
    reader: SourceReader,
    snapshot_table: String,
    full_table: String,
    write_rows: bool,
}

impl MergeEngine {
    /// Wrap an open connection and make sure the unified tables exist
    pub fn new(conn: Connection, tables: &TableNames, config: &MergeConfig) -> Result<Self, MergeError> {
        let engine = Self {
            conn,
            reader: SourceReader::new(tables),
            snapshot_table: tables.unified_snapshots.clone(),
            full_table: tables.full_table.clone(),
            write_rows: config.write_rows,
        };
        engine.ensure_tables()?;
        Ok(engine)
    }

    pub fn open(db: &DbConfig, tables: &TableNames, config: &MergeConfig) -> Result<Self, MergeError> {
        let conn = open_connection(db)?;
        Self::new(conn, tables, config)
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn ensure_tables(&self) -> Result<(), MergeError> {
        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {snapshots} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                payload TEXT NOT NULL,
                content_hash TEXT,
                created_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS {full} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                snapshot_id INTEGER NOT NULL,
                source TEXT NOT NULL,
                chain_label TEXT NOT NULL,
                batch_id INTEGER NOT NULL,
                symbol_json TEXT NOT NULL,
                farm_apy REAL,
                pool_apy REAL,
                apy REAL,
                tvl REAL,
                volume REAL,
                tx_count INTEGER,
                price REAL,
                created_at INTEGER NOT NULL,
                inserted_at INTEGER NOT NULL
            );",
            snapshots = self.snapshot_table,
            full = self.full_table,
        ))?;
        Ok(())
    }

    pub fn last_snapshot_hash(&self) -> Result<Option<String>, MergeError> {
        let hash: Option<Option<String>> = self
            .conn
            .query_row(
                &format!("SELECT content_hash FROM {} ORDER BY id DESC LIMIT 1", self.snapshot_table),
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hash.flatten())
    }

    /// Read, assemble, dedup and (maybe) append one snapshot
    pub fn run_once(&mut self) -> Result<MergeOutcome, MergeError> {
        log::info!("🔁 Merge cycle starting");

        let mut backoff = ExponentialBackoff::new(1, 5, DB_RETRIES);
        let reader = &self.reader;
        let conn = &mut self.conn;
        let inputs = retry_blocking(&mut backoff, StoreError::is_transient, || reader.read(conn))?;

        let prices = PriceMap::build(
            inputs.hydration_price.as_ref().map_or(&[][..], |l| l.records.as_slice()),
            &inputs.staking_prices,
        );
        log::info!(
            "📊 Price map: {} symbols ({} from fallback)",
            prices.len(),
            prices.fallback_count()
        );

        let (payload, records) = assemble_payload(&inputs, &prices);
        let payload = sanitize(&payload);
        let content_hash = compute_hash(&payload);

        for source in SourceKind::ALL {
            match inputs.batch(source) {
                Some(batch) => log::info!("   ├─ {}: batch {}", source.payload_key(), batch.batch_id),
                None => log::info!("   ├─ {}: no data", source.payload_key()),
            }
        }

        let last_hash = self.last_snapshot_hash()?;
        if let (Some(current), Some(last)) = (&content_hash, &last_hash) {
            if current == last {
                log::info!("   └─ ⏭️  Duplicate snapshot {}, skipping insert", short(current));
                return Ok(MergeOutcome::Duplicate {
                    content_hash: current.clone(),
                });
            }
        }

        let snapshot_id = self.insert_snapshot(&payload, content_hash.as_deref(), &records)?;
        log::info!(
            "   └─ ✅ Snapshot {} stored ({} records, hash {})",
            snapshot_id,
            records.len(),
            content_hash.as_deref().map(short).unwrap_or("none")
        );

        Ok(MergeOutcome::Inserted {
            snapshot_id,
            content_hash,
            rows: records.len(),
        })
    }

    fn insert_snapshot(
        &mut self,
        payload: &Value,
        content_hash: Option<&str>,
        records: &[UnifiedRecord],
    ) -> Result<i64, MergeError> {
        let payload_text = serde_json::to_string(payload)?;
        let now = Utc::now().timestamp();

        let tx = self.conn.transaction()?;
        tx.execute(
            &format!(
                "INSERT INTO {} (payload, content_hash, created_at) VALUES (?1, ?2, ?3)",
                self.snapshot_table
            ),
            params![payload_text, content_hash, now],
        )?;
        let snapshot_id = tx.last_insert_rowid();

        if self.write_rows {
            let mut stmt = tx.prepare_cached(&format!(
                "INSERT INTO {} (snapshot_id, source, chain_label, batch_id, symbol_json, farm_apy,
                                 pool_apy, apy, tvl, volume, tx_count, price, created_at, inserted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                self.full_table
            ))?;
            for record in records {
                stmt.execute(params![
                    snapshot_id,
                    record.source.as_str(),
                    record.chain(),
                    record.batch_id,
                    record.symbol_json(),
                    real(record.farm_apy),
                    real(record.pool_apy),
                    real(record.apy),
                    real(record.tvl),
                    real(record.volume),
                    record.tx_count,
                    real(record.price),
                    record.created_at,
                    now,
                ])?;
            }
            log::debug!("Appended {} rows to {}", records.len(), self.full_table);
        }

        tx.commit()?;
        Ok(snapshot_id)
    }
}

impl MergeRunner for MergeEngine {
    fn run_cycle(&mut self) -> Result<MergeOutcome, MergeError> {
        self.run_once()
    }
}

/// Build the payload tree and the flat record list it was made from
pub fn assemble_payload(inputs: &MergeInputs, prices: &PriceMap) -> (PayloadValue, Vec<UnifiedRecord>) {
    let bifrost = inputs
        .bifrost
        .as_ref()
        .map(|l| unified::from_bifrost(l.batch.batch_id, l.batch.created_at, &l.records, prices))
        .unwrap_or_default();
    let hydration = inputs
        .hydration
        .as_ref()
        .map(|l| unified::from_hydration(l.batch.batch_id, l.batch.created_at, &l.records, prices))
        .unwrap_or_default();
    let hydration_price = inputs
        .hydration_price
        .as_ref()
        .map(|l| unified::from_prices(l.batch.batch_id, l.batch.created_at, &l.records))
        .unwrap_or_default();
    let moonbeam = inputs
        .stellaswap
        .as_ref()
        .map(|l| unified::from_pools(l.batch.batch_id, l.batch.created_at, &l.records))
        .unwrap_or_default();

    let pairs = match (&inputs.bifrost, &inputs.hydration) {
        (Some(b), Some(h)) => unified::bifrost_hydration_pairs(&b.records, &h.records),
        _ => Vec::new(),
    };

    let to_list = |records: &[UnifiedRecord]| records.iter().map(UnifiedRecord::to_payload).collect::<Vec<_>>();
    let price_rows = inputs
        .hydration_price
        .as_ref()
        .map(|l| unified::price_payload(&l.records))
        .unwrap_or_default();

    let mut entries: Vec<(String, PayloadValue)> = Vec::new();
    for (source, data) in [
        (SourceKind::Bifrost, to_list(&bifrost)),
        (SourceKind::Hydration, to_list(&hydration)),
        (SourceKind::HydrationPrice, price_rows),
        (SourceKind::Stellaswap, to_list(&moonbeam)),
    ] {
        let key = source.payload_key();
        let batch = inputs.batch(source);
        entries.push((format!("batch_id_{}", key), batch.map(|b| b.batch_id).into()));
        entries.push((
            format!("created_at_{}", key),
            batch.and_then(|b| rfc3339(b.created_at)).map_or(PayloadValue::Null, |s| PayloadValue::from(s.as_str())),
        ));
        entries.push((
            format!("{}_data", key),
            PayloadValue::List(data),
        ));
    }

    let combined = SourceKind::ALL
        .iter()
        .filter_map(|s| inputs.batch(*s))
        .map(|b| b.created_at)
        .max()
        .and_then(rfc3339);
    entries.push((
        "combined_created_at".to_string(),
        combined.map_or(PayloadValue::Null, |s| PayloadValue::from(s.as_str())),
    ));
    entries.push(("bifrost_hydration_data".to_string(), PayloadValue::List(pairs)));

    let records = bifrost
        .into_iter()
        .chain(hydration)
        .chain(hydration_price)
        .chain(moonbeam)
        .collect();
    (PayloadValue::map(entries), records)
}

fn rfc3339(unix_secs: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp(unix_secs, 0).map(|dt| dt.to_rfc3339())
}

fn real(value: Option<Decimal>) -> Option<f64> {
    value.and_then(|d| sanitize::sanitize_decimal(&d).as_f64())
}

fn short(hash: &str) -> &str {
    &hash[..hash.len().min(12)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::fixtures::{hydration_row, pool_row, price_row};
    use crate::store::BatchRef;
    use serde_json::json;
    use sources::Latest;

    fn inputs() -> MergeInputs {
        MergeInputs {
            hydration: Some(Latest {
                batch: BatchRef { batch_id: 10, created_at: 1_700_000_000 },
                records: vec![hydration_row("5", "DOT", 1_000.0)],
            }),
            hydration_price: Some(Latest {
                batch: BatchRef { batch_id: 11, created_at: 1_700_000_600 },
                records: vec![price_row("5", "DOT", 7.5)],
            }),
            stellaswap: Some(Latest {
                batch: BatchRef { batch_id: 12, created_at: 1_699_000_000 },
                records: vec![pool_row("0xab", "WGLMR", "USDC")],
            }),
            ..MergeInputs::default()
        }
    }

    #[test]
    fn test_payload_layout() {
        let inputs = inputs();
        let prices = PriceMap::build(&inputs.hydration_price.as_ref().unwrap().records, &[]);
        let (payload, records) = assemble_payload(&inputs, &prices);
        let payload = sanitize(&payload);

        assert_eq!(records.len(), 3);
        assert_eq!(payload["batch_id_bifrost"], Value::Null);
        assert_eq!(payload["created_at_bifrost"], Value::Null);
        assert_eq!(payload["bifrost_data"], json!([]));
        assert_eq!(payload["batch_id_hydration"], json!(10));
        assert_eq!(payload["batch_id_moonbeam"], json!(12));
        assert_eq!(payload["hydration_data"][0]["price"], json!(7.5));
        assert_eq!(payload["moonbeam_data"][0]["price"], Value::Null);
        assert_eq!(
            payload["hydration_price_data"][0],
            json!({"asset_id": "5", "symbol": "DOT", "price_usdt": 7.5})
        );
        assert_eq!(payload["hydration_data"][0]["symbol"], json!("DOT"));
        assert_eq!(payload["moonbeam_data"][0]["token0_symbol"], json!("WGLMR"));
        assert_eq!(payload["combined_created_at"], json!("2023-11-14T22:23:20+00:00"));
        assert_eq!(payload["bifrost_hydration_data"], json!([]));
    }

    #[test]
    fn test_empty_inputs_still_produce_payload() {
        let (payload, records) = assemble_payload(&MergeInputs::default(), &PriceMap::default());
        let payload = sanitize(&payload);
        assert!(records.is_empty());
        assert_eq!(payload["combined_created_at"], Value::Null);
        assert_eq!(payload["moonbeam_data"], json!([]));
    }
}
