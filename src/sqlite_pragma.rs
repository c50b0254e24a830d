//! Shared SQLite connection setup
//!
//! Every process (pipelines, merge, health probe) opens its own connection to
//! the same file, so WAL and a busy timeout are what let them coexist.

use crate::config::DbConfig;
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::time::Duration;

/// WAL journal, NORMAL sync, in-memory temp store, busy timeout
pub fn apply_optimized_pragmas(conn: &Connection, busy_timeout_ms: u64) -> rusqlite::Result<()> {
    conn.busy_timeout(Duration::from_millis(busy_timeout_ms))?;
    // journal_mode returns a row, pragma_update handles that
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

/// Open (creating if needed) the configured database with pragmas applied
pub fn open_connection(db: &DbConfig) -> rusqlite::Result<Connection> {
    if let Some(parent) = Path::new(&db.path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CANTOPEN),
                    Some(format!("Failed to create database directory {}: {}", parent.display(), e)),
                )
            })?;
        }
    }

    let conn = Connection::open(&db.path)?;
    apply_optimized_pragmas(&conn, db.busy_timeout_ms)?;
    Ok(conn)
}

/// Open an existing database without creating it
pub fn open_existing(db: &DbConfig) -> rusqlite::Result<Connection> {
    let conn = Connection::open_with_flags(
        &db.path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.busy_timeout(Duration::from_millis(db.busy_timeout_ms))?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_connection_enables_wal_and_creates_parent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("yieldfold.db");
        let db = DbConfig::new(path.to_string_lossy().to_string());

        let conn = open_connection(&db).unwrap();

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(journal_mode.to_lowercase(), "wal");
        assert!(path.exists());
    }

    #[test]
    fn test_unusable_parent_directory_is_an_error() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, b"x").unwrap();
        let db = DbConfig::new(blocker.join("yieldfold.db").to_string_lossy().to_string());

        match open_connection(&db) {
            Err(rusqlite::Error::SqliteFailure(err, Some(msg))) => {
                assert_eq!(err.code, rusqlite::ErrorCode::CannotOpen);
                assert!(msg.contains("Failed to create database directory"));
            }
            other => panic!("expected a cannot-open failure, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_open_existing_rejects_missing_file() {
        let dir = tempdir().unwrap();
        let db = DbConfig::new(dir.path().join("absent.db").to_string_lossy().to_string());

        assert!(open_existing(&db).is_err());
    }
}
