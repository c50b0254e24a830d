//! Pipeline liveness records
//!
//! Each pipeline upserts one row after every cycle. The orchestrator and the
//! health probe read them to spot pipelines that are still running but no
//! longer completing cycles.

use crate::config::DbConfig;
use crate::source::SourceKind;
use crate::sqlite_pragma::open_connection;
use crate::store::StoreError;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

#[derive(Debug, Clone, PartialEq)]
pub struct Heartbeat {
    pub source: String,
    pub beat_at: i64,
    pub last_outcome: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Liveness {
    Fresh { age_secs: i64 },
    Stale { age_secs: i64 },
    Missing,
}

impl Liveness {
    pub fn label(&self) -> &'static str {
        match self {
            Liveness::Fresh { .. } => "ok",
            Liveness::Stale { .. } => "stale",
            Liveness::Missing => "missing",
        }
    }
}

#[derive(Debug, Clone)]
pub struct HeartbeatStore {
    table: String,
}

impl HeartbeatStore {
    pub fn new(table: impl Into<String>) -> Self {
        Self { table: table.into() }
    }

    pub fn create_table(&self, conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                source TEXT PRIMARY KEY,
                beat_at INTEGER NOT NULL,
                last_outcome TEXT NOT NULL
            );",
            self.table
        ))?;
        Ok(())
    }

    pub fn beat(&self, conn: &Connection, source: SourceKind, outcome: &str) -> Result<(), StoreError> {
        self.beat_at(conn, source, outcome, Utc::now().timestamp())
    }

    pub fn beat_at(
        &self,
        conn: &Connection,
        source: SourceKind,
        outcome: &str,
        beat_at: i64,
    ) -> Result<(), StoreError> {
        conn.execute(
            &format!(
                "INSERT INTO {} (source, beat_at, last_outcome) VALUES (?1, ?2, ?3)
                 ON CONFLICT(source) DO UPDATE SET
                    beat_at = excluded.beat_at,
                    last_outcome = excluded.last_outcome",
                self.table
            ),
            params![source.as_str(), beat_at, outcome],
        )?;
        Ok(())
    }

    pub fn get(&self, conn: &Connection, source: SourceKind) -> Result<Option<Heartbeat>, StoreError> {
        let beat = conn
            .query_row(
                &format!(
                    "SELECT source, beat_at, last_outcome FROM {} WHERE source = ?1",
                    self.table
                ),
                params![source.as_str()],
                |row| {
                    Ok(Heartbeat {
                        source: row.get(0)?,
                        beat_at: row.get(1)?,
                        last_outcome: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(beat)
    }

    /// Classify each source against its own maximum age as of `now`
    pub fn liveness(
        &self,
        conn: &Connection,
        thresholds: &[(SourceKind, i64)],
        now: i64,
    ) -> Result<Vec<(SourceKind, Liveness)>, StoreError> {
        let mut out = Vec::with_capacity(thresholds.len());
        for &(source, max_age_secs) in thresholds {
            let state = match self.get(conn, source)? {
                Some(beat) => {
                    let age_secs = (now - beat.beat_at).max(0);
                    if age_secs > max_age_secs {
                        Liveness::Stale { age_secs }
                    } else {
                        Liveness::Fresh { age_secs }
                    }
                }
                None => Liveness::Missing,
            };
            out.push((source, state));
        }
        Ok(out)
    }
}

/// Reports pipelines that stopped making progress
pub trait LivenessCheck: Send {
    fn check(&mut self) -> Result<Vec<(SourceKind, Liveness)>, StoreError>;
}

/// [`LivenessCheck`] backed by the heartbeat table
pub struct HeartbeatMonitor {
    db: DbConfig,
    store: HeartbeatStore,
    thresholds: Vec<(SourceKind, i64)>,
}

impl HeartbeatMonitor {
    /// `thresholds` pairs every watched source with its maximum heartbeat age
    pub fn new(db: DbConfig, table: &str, thresholds: Vec<(SourceKind, i64)>) -> Self {
        Self {
            db,
            store: HeartbeatStore::new(table),
            thresholds,
        }
    }
}

impl LivenessCheck for HeartbeatMonitor {
    fn check(&mut self) -> Result<Vec<(SourceKind, Liveness)>, StoreError> {
        let conn = open_connection(&self.db)?;
        self.store.create_table(&conn)?;
        self.store
            .liveness(&conn, &self.thresholds, Utc::now().timestamp())
    }
}
