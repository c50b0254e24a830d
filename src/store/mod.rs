//! Per-source persistence
//!
//! Each source owns its raw table(s) and a batch-tracking table. Writes of one
//! batch (rows plus tracking record) happen in a single transaction, so a
//! failed insert never leaves a half-written batch behind.

pub mod bifrost;
pub mod hydration;
pub mod hydration_price;
pub mod stellaswap;

pub use bifrost::BifrostStore;
pub use hydration::HydrationStore;
pub use hydration_price::HydrationPriceStore;
pub use stellaswap::StellaswapStore;

use crate::records::BatchPayload;
use crate::source::SourceKind;
use chrono::Utc;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};

pub const STATUS_COMPLETE: &str = "complete";

#[derive(Debug)]
pub enum StoreError {
    Database(rusqlite::Error),
    Corrupt(String),
}

impl StoreError {
    /// Busy, locked or cannot-open errors are worth retrying
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Database(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::CannotOpen
            ),
            _ => false,
        }
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Database(e) => write!(f, "Database error: {}", e),
            StoreError::Corrupt(msg) => write!(f, "Unreadable stored value: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err)
    }
}

/// Identity of one persisted batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchRef {
    pub batch_id: i64,
    pub created_at: i64,
}

pub trait SourceStore: Send {
    type Batch: BatchPayload;

    fn source(&self) -> SourceKind;

    fn batch_table(&self) -> &str;

    fn create_tables(&self, conn: &Connection) -> Result<(), StoreError>;

    /// Insert every record tagged with `batch_id`; returns the row count
    fn insert_rows(
        &self,
        conn: &Connection,
        batch_id: i64,
        created_at: i64,
        batch: &Self::Batch,
    ) -> Result<usize, StoreError>;

    /// Most recent batch in the raw table(s)
    fn latest_batch(&self, conn: &Connection) -> Result<Option<BatchRef>, StoreError>;

    fn read_batch(&self, conn: &Connection, batch_id: i64) -> Result<Self::Batch, StoreError>;

    fn get_last_content_hash(&self, conn: &Connection) -> Result<Option<String>, StoreError> {
        last_content_hash(conn, self.batch_table())
    }

    fn get_last_batch_id(&self, conn: &Connection) -> Result<Option<i64>, StoreError> {
        last_batch_id(conn, self.batch_table())
    }

    fn insert_batch(
        &self,
        conn: &mut Connection,
        batch_id: i64,
        content_hash: Option<&str>,
        batch: &Self::Batch,
    ) -> Result<usize, StoreError> {
        self.insert_batch_at(conn, batch_id, content_hash, batch, Utc::now().timestamp())
    }

    /// Rows and tracking record in one transaction
    fn insert_batch_at(
        &self,
        conn: &mut Connection,
        batch_id: i64,
        content_hash: Option<&str>,
        batch: &Self::Batch,
        created_at: i64,
    ) -> Result<usize, StoreError> {
        let tx = conn.transaction()?;
        let rows = self.insert_rows(&tx, batch_id, created_at, batch)?;
        record_batch(
            &tx,
            self.batch_table(),
            batch_id,
            self.source().as_str(),
            content_hash,
            created_at,
        )?;
        tx.commit()?;
        Ok(rows)
    }
}

pub fn create_batch_table(conn: &Connection, table: &str) -> Result<(), StoreError> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            batch_id INTEGER NOT NULL,
            source_label TEXT NOT NULL,
            status TEXT NOT NULL,
            content_hash TEXT,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_{table}_batch ON {table}(batch_id);",
        table = table
    ))?;
    Ok(())
}

/// Hash of the most recent completed batch; `None` if there is none or it
/// was stored without a hash
pub fn last_content_hash(conn: &Connection, table: &str) -> Result<Option<String>, StoreError> {
    let hash: Option<Option<String>> = conn
        .query_row(
            &format!(
                "SELECT content_hash FROM {} WHERE status = ?1 ORDER BY id DESC LIMIT 1",
                table
            ),
            params![STATUS_COMPLETE],
            |row| row.get(0),
        )
        .optional()?;
    Ok(hash.flatten())
}

pub fn last_batch_id(conn: &Connection, table: &str) -> Result<Option<i64>, StoreError> {
    let id: Option<i64> = conn.query_row(
        &format!("SELECT MAX(batch_id) FROM {}", table),
        [],
        |row| row.get(0),
    )?;
    Ok(id)
}

pub fn count_batches(conn: &Connection, table: &str) -> Result<i64, StoreError> {
    let count = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
    Ok(count)
}

fn record_batch(
    conn: &Connection,
    table: &str,
    batch_id: i64,
    source_label: &str,
    content_hash: Option<&str>,
    created_at: i64,
) -> Result<(), StoreError> {
    conn.execute(
        &format!(
            "INSERT INTO {} (batch_id, source_label, status, content_hash, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            table
        ),
        params![batch_id, source_label, STATUS_COMPLETE, content_hash, created_at],
    )?;
    Ok(())
}

/// `(batch_id, created_at)` of the newest row in a raw table
pub(crate) fn latest_batch_in(conn: &Connection, table: &str) -> Result<Option<BatchRef>, StoreError> {
    let latest = conn
        .query_row(
            &format!(
                "SELECT batch_id, created_at FROM {} ORDER BY created_at DESC, batch_id DESC LIMIT 1",
                table
            ),
            [],
            |row| {
                Ok(BatchRef {
                    batch_id: row.get(0)?,
                    created_at: row.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(latest)
}

/// Decimals are stored as TEXT so no precision is lost
pub(crate) fn decimal_to_sql(value: &Option<rust_decimal::Decimal>) -> Option<String> {
    value.map(|d| d.normalize().to_string())
}

pub(crate) fn decimal_from_sql(
    column: &str,
    raw: Option<String>,
) -> Result<Option<rust_decimal::Decimal>, StoreError> {
    match raw {
        Some(text) => text
            .parse::<rust_decimal::Decimal>()
            .map(Some)
            .map_err(|e| StoreError::Corrupt(format!("{} = '{}': {}", column, text, e))),
        None => Ok(None),
    }
}
