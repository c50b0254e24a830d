//! Health probes shared by the orchestrator loop and the `health_check` binary

use crate::config::{AppConfig, DbConfig};
use crate::heartbeat::{HeartbeatStore, Liveness};
use crate::sqlite_pragma::open_existing;
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::ffi::CString;

/// `true` when the database file opens and answers a trivial query
pub fn check_database_connection(db: &DbConfig) -> bool {
    match open_existing(db) {
        Ok(conn) => match conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)) {
            Ok(_) => true,
            Err(e) => {
                log::error!("❌ Database health query failed: {}", e);
                false
            }
        },
        Err(e) => {
            log::error!("❌ Database connection failed ({}): {}", db.path, e);
            false
        }
    }
}

/// Used share of the filesystem holding `path`, in percent
pub fn disk_usage_percent(path: &str) -> Option<f64> {
    let c_path = CString::new(path).ok()?;
    // SAFETY: statvfs only writes into the zeroed struct we own
    let stat = unsafe {
        let mut stat: libc::statvfs = std::mem::zeroed();
        if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
            let err = std::io::Error::last_os_error();
            log::warn!("⚠️  statvfs({}) failed: {}", path, err);
            return None;
        }
        stat
    };

    let frsize = stat.f_frsize as f64;
    let total = stat.f_blocks as f64 * frsize;
    if total <= 0.0 {
        return None;
    }
    let used = (stat.f_blocks as f64 - stat.f_bfree as f64) * frsize;
    Some(used / total * 100.0)
}

/// `true` while usage stays below `threshold_percent`
pub fn check_disk_space(path: &str, threshold_percent: f64) -> bool {
    match disk_usage_percent(path) {
        Some(percent) if percent >= threshold_percent => {
            log::warn!(
                "⚠️  Disk usage {:.1}% on {} exceeds {:.0}%",
                percent,
                path,
                threshold_percent
            );
            false
        }
        Some(_) => true,
        None => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Error,
}

/// Summary printed by `health_check`
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checks: BTreeMap<String, String>,
}

impl HealthReport {
    pub fn is_ok(&self) -> bool {
        self.status == HealthStatus::Ok
    }
}

/// Run every check
///
/// A failed database check or a stale heartbeat makes the report an error.
/// Disk pressure and heartbeats that were never written only show up as
/// warnings in `checks`.
pub fn run_health_checks(config: &AppConfig) -> HealthReport {
    let mut checks = BTreeMap::new();
    let mut status = HealthStatus::Ok;

    let db_ok = check_database_connection(&config.db);
    checks.insert(
        "database".to_string(),
        if db_ok { "ok" } else { "failed" }.to_string(),
    );
    if !db_ok {
        status = HealthStatus::Error;
    }

    let disk_ok = check_disk_space(&config.health.disk_path, config.health.disk_usage_threshold_pct);
    checks.insert(
        "disk_space".to_string(),
        if disk_ok { "ok" } else { "warning" }.to_string(),
    );

    if db_ok {
        match heartbeat_checks(config) {
            Ok(states) => {
                for (source, liveness) in states {
                    if matches!(liveness, Liveness::Stale { .. }) {
                        status = HealthStatus::Error;
                    }
                    checks.insert(format!("heartbeat_{}", source), liveness.label().to_string());
                }
            }
            Err(e) => {
                log::error!("❌ Heartbeat read failed: {}", e);
                checks.insert("heartbeats".to_string(), "failed".to_string());
                status = HealthStatus::Error;
            }
        }
    }

    HealthReport { status, checks }
}

fn heartbeat_checks(
    config: &AppConfig,
) -> Result<Vec<(crate::source::SourceKind, Liveness)>, crate::store::StoreError> {
    let conn = open_existing(&config.db)?;
    let store = HeartbeatStore::new(config.tables.heartbeats.as_str());
    store.create_table(&conn)?;
    store.liveness(&conn, &config.heartbeat_thresholds(), Utc::now().timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceKind;
    use crate::sqlite_pragma::open_connection;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn config_for(db_path: &str, threshold: &str) -> AppConfig {
        let vars: HashMap<&str, String> = [
            ("YIELDFOLD_DB_PATH", db_path.to_string()),
            ("DISK_USAGE_THRESHOLD_PCT", threshold.to_string()),
            ("PIPELINE_SOURCES", "bifrost,stellaswap".to_string()),
            ("HEARTBEAT_MAX_AGE_SECS", "600".to_string()),
        ]
        .into_iter()
        .collect();
        AppConfig::from_lookup(|k| vars.get(k).cloned()).unwrap()
    }

    #[test]
    fn test_database_check() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("health.db");
        let db = DbConfig::new(path.to_string_lossy().to_string());

        assert!(!check_database_connection(&db));
        open_connection(&db).unwrap();
        assert!(check_database_connection(&db));
    }

    #[test]
    fn test_disk_checks() {
        let usage = disk_usage_percent("/").unwrap();
        assert!((0.0..=100.0).contains(&usage));
        assert!(check_disk_space("/", 100.1));
        assert!(!check_disk_space("/", 0.0));
        assert!(disk_usage_percent("/definitely/not/here").is_none());
    }

    #[test]
    fn test_report_statuses() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("health.db").to_string_lossy().to_string();

        let missing_db = run_health_checks(&config_for(&path, "100"));
        assert_eq!(missing_db.status, HealthStatus::Error);
        assert_eq!(missing_db.checks["database"], "failed");

        let config = config_for(&path, "100");
        let conn = open_connection(&config.db).unwrap();
        let store = HeartbeatStore::new("pipeline_heartbeats");
        store.create_table(&conn).unwrap();
        store.beat(&conn, SourceKind::Bifrost, "persisted").unwrap();

        // disk over threshold and a never-seen source are warnings only
        let warning_only = run_health_checks(&config_for(&path, "0"));
        assert!(warning_only.is_ok());
        assert_eq!(warning_only.checks["disk_space"], "warning");
        assert_eq!(warning_only.checks["heartbeat_bifrost"], "ok");
        assert_eq!(warning_only.checks["heartbeat_stellaswap"], "missing");

        // hourly cadence: overdue well past interval, retries and timeouts
        store
            .beat_at(&conn, SourceKind::Stellaswap, "persisted", Utc::now().timestamp() - 6 * 3_600)
            .unwrap();
        let stale = run_health_checks(&config);
        assert_eq!(stale.status, HealthStatus::Error);
        assert_eq!(stale.checks["heartbeat_stellaswap"], "stale");

        let json = serde_json::to_value(&stale).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["checks"]["database"], "ok");
    }

    #[test]
    fn test_slow_source_between_cycles_is_healthy() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("health.db").to_string_lossy().to_string();
        let vars: HashMap<&str, String> = [
            ("YIELDFOLD_DB_PATH", path),
            ("DISK_USAGE_THRESHOLD_PCT", "100".to_string()),
            ("PIPELINE_SOURCES", "hydration".to_string()),
        ]
        .into_iter()
        .collect();
        let config = AppConfig::from_lookup(|k| vars.get(k).cloned()).unwrap();
        assert_eq!(config.interval_for(SourceKind::Hydration), 43_200);

        let conn = open_connection(&config.db).unwrap();
        let store = HeartbeatStore::new("pipeline_heartbeats");
        store.create_table(&conn).unwrap();
        store
            .beat_at(&conn, SourceKind::Hydration, "persisted", Utc::now().timestamp() - 3 * 3_600)
            .unwrap();

        let report = run_health_checks(&config);
        assert!(report.is_ok());
        assert_eq!(report.checks["heartbeat_hydration"], "ok");

        store
            .beat_at(&conn, SourceKind::Hydration, "persisted", Utc::now().timestamp() - 13 * 3_600)
            .unwrap();
        let overdue = run_health_checks(&config);
        assert!(!overdue.is_ok());
        assert_eq!(overdue.checks["heartbeat_hydration"], "stale");
    }
}
