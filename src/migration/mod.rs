//! Integer schema versioning against the `db_version` table
//!
//! The version only moves forward. Every unit runs in the same transaction as
//! the row recording its version, so a crash can never leave a unit applied
//! but unrecorded (which would make a non-idempotent `ALTER TABLE` fail on the
//! next start).

pub mod units;

use crate::config::TableNames;
use crate::store::{
    BifrostStore, HydrationPriceStore, HydrationStore, SourceStore, StellaswapStore, StoreError,
};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

pub type ApplyFn = fn(&Connection, &TableNames) -> rusqlite::Result<()>;

/// One registered schema change
#[derive(Clone, Copy)]
pub struct MigrationUnit {
    pub identifier: &'static str,
    pub apply: ApplyFn,
}

impl std::fmt::Debug for MigrationUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationUnit")
            .field("identifier", &self.identifier)
            .finish()
    }
}

#[derive(Debug)]
pub enum MigrationError {
    Database(rusqlite::Error),
    Store(StoreError),
    UnitFailed {
        identifier: &'static str,
        version: u32,
        error: rusqlite::Error,
    },
}

impl std::fmt::Display for MigrationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationError::Database(e) => write!(f, "Migration bookkeeping failed: {}", e),
            MigrationError::Store(e) => write!(f, "Table setup failed: {}", e),
            MigrationError::UnitFailed {
                identifier,
                version,
                error,
            } => write!(f, "{} (version {}) failed: {}", identifier, version, error),
        }
    }
}

impl std::error::Error for MigrationError {}

impl From<rusqlite::Error> for MigrationError {
    fn from(err: rusqlite::Error) -> Self {
        MigrationError::Database(err)
    }
}

impl From<StoreError> for MigrationError {
    fn from(err: StoreError) -> Self {
        MigrationError::Store(err)
    }
}

pub struct MigrationEngine<'a> {
    conn: &'a mut Connection,
    tables: TableNames,
    version_table: String,
    registry: Vec<MigrationUnit>,
}

impl<'a> MigrationEngine<'a> {
    pub fn new(conn: &'a mut Connection, tables: &TableNames) -> Result<Self, MigrationError> {
        Self::with_units(conn, tables, units::registry())
    }

    /// Engine over a caller-supplied registry
    pub fn with_units(
        conn: &'a mut Connection,
        tables: &TableNames,
        registry: Vec<MigrationUnit>,
    ) -> Result<Self, MigrationError> {
        let engine = Self {
            conn,
            tables: tables.clone(),
            version_table: tables.db_version.clone(),
            registry,
        };
        engine.ensure_version_table()?;
        Ok(engine)
    }

    fn ensure_version_table(&self) -> Result<(), MigrationError> {
        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                version INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL
            );",
            self.version_table
        ))?;

        let rows: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", self.version_table),
            [],
            |row| row.get(0),
        )?;
        if rows == 0 {
            record_version(&*self.conn, &self.version_table, 0)?;
        }
        Ok(())
    }

    /// Version of the newest row, 0 when none exists
    pub fn get_version(&self) -> Result<u32, MigrationError> {
        let version: Option<u32> = self
            .conn
            .query_row(
                &format!("SELECT version FROM {} ORDER BY id DESC LIMIT 1", self.version_table),
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(version.unwrap_or(0))
    }

    /// Registered units with a parseable `migration_<N>` identifier, ascending
    pub fn discover_units(&self) -> Vec<(u32, MigrationUnit)> {
        let mut found: Vec<(u32, MigrationUnit)> = Vec::new();
        for unit in &self.registry {
            match parse_version(unit.identifier) {
                Some(version) if found.iter().any(|(v, _)| *v == version) => {
                    log::warn!(
                        "⚠️  Ignoring {}: version {} is already registered",
                        unit.identifier,
                        version
                    );
                }
                Some(version) => found.push((version, *unit)),
                None => {
                    log::warn!("⚠️  Ignoring migration unit with unparseable identifier '{}'", unit.identifier);
                }
            }
        }
        found.sort_by_key(|(version, _)| *version);
        found
    }

    pub fn latest_version(&self) -> u32 {
        self.discover_units().last().map(|(v, _)| *v).unwrap_or(0)
    }

    /// Bring the schema to `target`
    ///
    /// Units with `current < v <= target` run in ascending order. A failing unit
    /// aborts the run with the version left at the last unit that succeeded.
    /// After all units the version is set to `target` even if no unit carries
    /// that exact number.
    pub fn apply(&mut self, target: u32) -> Result<u32, MigrationError> {
        let current = self.get_version()?;
        if target <= current {
            log::info!("📊 Schema at version {} (target {}), nothing to apply", current, target);
            return Ok(current);
        }

        log::info!("🔧 Migrating schema {} → {}", current, target);
        let pending: Vec<(u32, MigrationUnit)> = self
            .discover_units()
            .into_iter()
            .filter(|(v, _)| *v > current && *v <= target)
            .collect();

        for (version, unit) in pending {
            log::info!("   ├─ Applying {}", unit.identifier);
            let tx = self.conn.transaction()?;
            if let Err(error) = (unit.apply)(&tx, &self.tables) {
                log::error!("   └─ ❌ {} failed: {}", unit.identifier, error);
                return Err(MigrationError::UnitFailed {
                    identifier: unit.identifier,
                    version,
                    error,
                });
            }
            record_version(&tx, &self.version_table, version)?;
            tx.commit()?;
        }

        if self.get_version()? != target {
            record_version(&*self.conn, &self.version_table, target)?;
        }
        log::info!("   └─ ✅ Schema at version {}", target);
        Ok(target)
    }
}

fn record_version(conn: &Connection, table: &str, version: u32) -> rusqlite::Result<()> {
    conn.execute(
        &format!("INSERT INTO {} (version, updated_at) VALUES (?1, ?2)", table),
        params![version, Utc::now().timestamp()],
    )?;
    Ok(())
}

fn parse_version(identifier: &str) -> Option<u32> {
    identifier.strip_prefix("migration_")?.parse().ok()
}

/// Create every source table, then migrate to `target` (latest unit if `None`)
pub fn prepare_schema(
    conn: &mut Connection,
    tables: &TableNames,
    target: Option<u32>,
) -> Result<u32, MigrationError> {
    BifrostStore::new(tables).create_tables(conn)?;
    HydrationStore::new(tables).create_tables(conn)?;
    HydrationPriceStore::new(tables).create_tables(conn)?;
    StellaswapStore::new(tables).create_tables(conn)?;

    let mut engine = MigrationEngine::new(conn, tables)?;
    let target = target.unwrap_or_else(|| engine.latest_version());
    engine.apply(target)
}
