//! Runtime configuration loaded from environment variables
//!
//! Every component receives the typed section it needs through its
//! constructor. Values that are present but malformed are rejected at load
//! time instead of surfacing later inside a query.

use crate::retry::ExponentialBackoff;
use crate::source::SourceKind;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug)]
pub enum ConfigError {
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// SQLite datastore shared by every process
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub path: String,
    pub busy_timeout_ms: u64,
}

impl DbConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: 5_000,
        }
    }
}

/// Cap on a single fetch retry delay
pub const FETCH_MAX_BACKOFF_SECS: u64 = 60;
/// Spread applied to fetch retry delays
pub const FETCH_JITTER: f64 = 0.1;
/// Headroom on top of a pipeline's worst-case cycle before it counts as stale
pub const HEARTBEAT_SLACK_SECS: u64 = 300;

/// Physical table names, each overridable through `TABLE_<NAME>`
#[derive(Debug, Clone, PartialEq)]
pub struct TableNames {
    pub bifrost_site: String,
    pub bifrost_staking: String,
    pub bifrost_batches: String,
    pub hydration_data: String,
    pub hydration_batches: String,
    pub hydration_price: String,
    pub hydration_price_batches: String,
    pub pool_data: String,
    pub pool_batches: String,
    pub db_version: String,
    pub heartbeats: String,
    pub unified_snapshots: String,
    pub full_table: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            bifrost_site: "bifrost_site".to_string(),
            bifrost_staking: "bifrost_staking".to_string(),
            bifrost_batches: "bifrost_batches".to_string(),
            hydration_data: "hydration_data".to_string(),
            hydration_batches: "hydration_batches".to_string(),
            hydration_price: "hydration_price".to_string(),
            hydration_price_batches: "hydration_price_batches".to_string(),
            pool_data: "pool_data".to_string(),
            pool_batches: "pool_batches".to_string(),
            db_version: "db_version".to_string(),
            heartbeats: "pipeline_heartbeats".to_string(),
            unified_snapshots: "unified_snapshots".to_string(),
            full_table: "full_table".to_string(),
        }
    }
}

impl TableNames {
    /// Apply `TABLE_<NAME>` overrides; names are spliced into SQL so they
    /// must be plain identifiers.
    fn from_lookup<F>(lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut tables = Self::default();
        {
            let slots: [(&str, &mut String); 13] = [
                ("TABLE_BIFROST_SITE", &mut tables.bifrost_site),
                ("TABLE_BIFROST_STAKING", &mut tables.bifrost_staking),
                ("TABLE_BIFROST_BATCHES", &mut tables.bifrost_batches),
                ("TABLE_HYDRATION_DATA", &mut tables.hydration_data),
                ("TABLE_HYDRATION_BATCHES", &mut tables.hydration_batches),
                ("TABLE_HYDRATION_PRICE", &mut tables.hydration_price),
                ("TABLE_HYDRATION_PRICE_BATCHES", &mut tables.hydration_price_batches),
                ("TABLE_POOL_DATA", &mut tables.pool_data),
                ("TABLE_POOL_BATCHES", &mut tables.pool_batches),
                ("TABLE_DB_VERSION", &mut tables.db_version),
                ("TABLE_HEARTBEATS", &mut tables.heartbeats),
                ("TABLE_UNIFIED_SNAPSHOTS", &mut tables.unified_snapshots),
                ("TABLE_FULL_TABLE", &mut tables.full_table),
            ];
            for (var, slot) in slots {
                if let Some(name) = lookup(var) {
                    let name = name.trim().to_string();
                    if !is_identifier(&name) {
                        return Err(ConfigError::InvalidValue(format!(
                            "{} must be a plain SQL identifier, got '{}'",
                            var, name
                        )));
                    }
                    *slot = name;
                }
            }
        }
        Ok(tables)
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(Debug, Clone)]
pub struct MergeConfig {
    pub interval_secs: u64,
    /// Also append one `full_table` row per unified record
    pub write_rows: bool,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub poll_interval_secs: u64,
    pub shutdown_grace_secs: u64,
    pub sources: Vec<SourceKind>,
    /// Program spawned per source; defaults to the `source_pipeline` binary
    /// next to the running executable
    pub pipeline_program: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub heartbeat_max_age_secs: i64,
    pub disk_path: String,
    pub disk_usage_threshold_pct: f64,
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub max_retries: u32,
    pub backoff_secs: u64,
    pub http_timeout_secs: u64,
    pub script_timeout_secs: u64,
    pub bifrost_api_url: String,
    pub hydration_api_url: String,
    pub hydration_assets_path: String,
    pub hydration_farm_apr_cmd: String,
    pub hydration_price_cmd: String,
    pub stellaswap_apr_url: String,
    pub stellaswap_graph_api_key: Option<String>,
    pub stellaswap_subgraph_id: String,
}

/// Full configuration surface of every binary
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db: DbConfig,
    pub tables: TableNames,
    pub merge: MergeConfig,
    pub orchestrator: OrchestratorConfig,
    pub health: HealthConfig,
    pub fetch: FetchConfig,
    /// `None` means "latest registered migration unit"
    pub schema_target_version: Option<u32>,
    pub source_intervals: HashMap<SourceKind, u64>,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables (all optional):
    /// - `YIELDFOLD_DB_PATH` (default: data/yieldfold.db)
    /// - `DB_BUSY_TIMEOUT_MS` (default: 5000)
    /// - `TABLE_<NAME>` per-table overrides
    /// - `MERGE_INTERVAL_SECS` (default: 3600), `MERGE_WRITE_ROWS` (default: false)
    /// - `ORCHESTRATOR_POLL_SECS` (default: 10), `SHUTDOWN_GRACE_SECS` (default: 2)
    /// - `PIPELINE_SOURCES` (default: all), `PIPELINE_PROGRAM`
    /// - `HEARTBEAT_MAX_AGE_SECS` (default: 7200)
    /// - `DISK_PATH` (default: /), `DISK_USAGE_THRESHOLD_PCT` (default: 90)
    /// - `SCHEMA_TARGET_VERSION`
    /// - `FETCH_MAX_RETRIES` (default: 3), `FETCH_BACKOFF_SECS` (default: 2)
    /// - `<SOURCE>_INTERVAL_SECS` per source
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let db = DbConfig {
            path: lookup("YIELDFOLD_DB_PATH").unwrap_or_else(|| "data/yieldfold.db".to_string()),
            busy_timeout_ms: parse_var(&lookup, "DB_BUSY_TIMEOUT_MS", 5_000)?,
        };
        if db.path.trim().is_empty() {
            return Err(ConfigError::InvalidValue("YIELDFOLD_DB_PATH cannot be empty".to_string()));
        }

        let tables = TableNames::from_lookup(&lookup)?;

        let merge = MergeConfig {
            interval_secs: parse_var(&lookup, "MERGE_INTERVAL_SECS", 3_600)?,
            write_rows: parse_var(&lookup, "MERGE_WRITE_ROWS", false)?,
        };

        let sources = match lookup("PIPELINE_SOURCES") {
            Some(raw) => {
                let mut sources = Vec::new();
                for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                    let kind = item
                        .parse::<SourceKind>()
                        .map_err(|e| ConfigError::InvalidValue(format!("PIPELINE_SOURCES: {}", e)))?;
                    if !sources.contains(&kind) {
                        sources.push(kind);
                    }
                }
                sources
            }
            None => SourceKind::ALL.to_vec(),
        };

        let orchestrator = OrchestratorConfig {
            poll_interval_secs: parse_var(&lookup, "ORCHESTRATOR_POLL_SECS", 10)?,
            shutdown_grace_secs: parse_var(&lookup, "SHUTDOWN_GRACE_SECS", 2)?,
            sources,
            pipeline_program: lookup("PIPELINE_PROGRAM").map(PathBuf::from),
        };
        if orchestrator.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "ORCHESTRATOR_POLL_SECS must be at least 1".to_string(),
            ));
        }

        let health = HealthConfig {
            heartbeat_max_age_secs: parse_var(&lookup, "HEARTBEAT_MAX_AGE_SECS", 7_200)?,
            disk_path: lookup("DISK_PATH").unwrap_or_else(|| "/".to_string()),
            disk_usage_threshold_pct: parse_var(&lookup, "DISK_USAGE_THRESHOLD_PCT", 90.0)?,
        };
        if !(0.0..=100.0).contains(&health.disk_usage_threshold_pct) {
            return Err(ConfigError::InvalidValue(format!(
                "DISK_USAGE_THRESHOLD_PCT must be within 0..=100, got {}",
                health.disk_usage_threshold_pct
            )));
        }

        let fetch = FetchConfig {
            max_retries: parse_var(&lookup, "FETCH_MAX_RETRIES", 3)?,
            backoff_secs: parse_var(&lookup, "FETCH_BACKOFF_SECS", 2)?,
            http_timeout_secs: parse_var(&lookup, "HTTP_TIMEOUT_SECS", 30)?,
            script_timeout_secs: parse_var(&lookup, "SCRIPT_TIMEOUT_SECS", 300)?,
            bifrost_api_url: lookup("BIFROST_API_URL")
                .unwrap_or_else(|| "https://dapi.bifrost.io/api".to_string()),
            hydration_api_url: lookup("HYDRATION_API_URL").unwrap_or_else(|| {
                "https://hydradx-api-app-2u5klwxkrq-ey.a.run.app/hydradx-ui/v1".to_string()
            }),
            hydration_assets_path: lookup("HYDRATION_ASSETS_PATH")
                .unwrap_or_else(|| "allAssets.json".to_string()),
            hydration_farm_apr_cmd: lookup("HYDRATION_FARM_APR_CMD").unwrap_or_else(|| {
                "npx tsx sdk/packages/sdk/test/script/examples/getTop35Apr3.ts".to_string()
            }),
            hydration_price_cmd: lookup("HYDRATION_PRICE_CMD")
                .unwrap_or_else(|| "npx tsx hy/script/getBatchPrice2.ts".to_string()),
            stellaswap_apr_url: lookup("STELLASWAP_APR_URL")
                .unwrap_or_else(|| "https://apr-api.stellaswap.com/api/v1/integral".to_string()),
            stellaswap_graph_api_key: lookup("STELLASWAP_GRAPH_API_KEY"),
            stellaswap_subgraph_id: lookup("STELLASWAP_SUBGRAPH_ID")
                .unwrap_or_else(|| "LgiKJnsTspbsPBLqDPqULPtnAdSZP6LfPCSo3GWuJ5a".to_string()),
        };
        for (var, url) in [
            ("BIFROST_API_URL", &fetch.bifrost_api_url),
            ("HYDRATION_API_URL", &fetch.hydration_api_url),
            ("STELLASWAP_APR_URL", &fetch.stellaswap_apr_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::InvalidValue(format!(
                    "{} must start with http:// or https://",
                    var
                )));
            }
        }

        let schema_target_version = match lookup("SCHEMA_TARGET_VERSION") {
            Some(raw) => Some(raw.trim().parse::<u32>().map_err(|_| {
                ConfigError::InvalidValue(format!("SCHEMA_TARGET_VERSION: '{}' is not a version", raw))
            })?),
            None => None,
        };

        let mut source_intervals = HashMap::new();
        for kind in SourceKind::ALL {
            let secs = parse_var(&lookup, kind.interval_var(), kind.default_interval_secs())?;
            if secs == 0 {
                return Err(ConfigError::InvalidValue(format!(
                    "{} must be at least 1",
                    kind.interval_var()
                )));
            }
            source_intervals.insert(kind, secs);
        }

        Ok(Self {
            db,
            tables,
            merge,
            orchestrator,
            health,
            fetch,
            schema_target_version,
            source_intervals,
        })
    }

    pub fn interval_for(&self, source: SourceKind) -> u64 {
        self.source_intervals
            .get(&source)
            .copied()
            .unwrap_or_else(|| source.default_interval_secs())
    }

    /// Heartbeat age after which `source` counts as stale
    ///
    /// A healthy pipeline beats once per cycle, so the threshold is never
    /// below one interval plus every fetch attempt timing out and every retry
    /// sleeping its longest. `HEARTBEAT_MAX_AGE_SECS` acts as a floor.
    pub fn heartbeat_max_age_for(&self, source: SourceKind) -> i64 {
        let settings = self.source_settings(source);
        let attempts = u64::from(settings.max_retries).saturating_add(1);
        let attempt_timeout = self.fetch.http_timeout_secs.max(self.fetch.script_timeout_secs);
        let worst_cycle = settings
            .interval_secs
            .saturating_add(settings.fetch_backoff().max_total_delay().as_secs() + 1)
            .saturating_add(attempts.saturating_mul(attempt_timeout))
            .saturating_add(HEARTBEAT_SLACK_SECS);
        let worst_cycle = i64::try_from(worst_cycle).unwrap_or(i64::MAX);
        self.health.heartbeat_max_age_secs.max(worst_cycle)
    }

    /// Staleness threshold of every supervised source
    pub fn heartbeat_thresholds(&self) -> Vec<(SourceKind, i64)> {
        self.orchestrator
            .sources
            .iter()
            .map(|&source| (source, self.heartbeat_max_age_for(source)))
            .collect()
    }

    pub fn source_settings(&self, source: SourceKind) -> SourceSettings {
        SourceSettings {
            source,
            interval_secs: self.interval_for(source),
            max_retries: self.fetch.max_retries,
            backoff_secs: self.fetch.backoff_secs,
        }
    }
}

/// Per-pipeline settings handed to a single source process
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceSettings {
    pub source: SourceKind,
    pub interval_secs: u64,
    pub max_retries: u32,
    pub backoff_secs: u64,
}

impl SourceSettings {
    /// Retry schedule for a failing fetch
    pub fn fetch_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(self.backoff_secs, FETCH_MAX_BACKOFF_SECS, self.max_retries)
            .with_jitter(FETCH_JITTER)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().to_lowercase().parse::<T>().map_err(|_| {
            ConfigError::InvalidValue(format!("{}: cannot parse '{}'", key, raw))
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::from_lookup(lookup_from(&[])).unwrap();

        assert_eq!(config.db.path, "data/yieldfold.db");
        assert_eq!(config.db.busy_timeout_ms, 5_000);
        assert_eq!(config.tables, TableNames::default());
        assert_eq!(config.merge.interval_secs, 3_600);
        assert!(!config.merge.write_rows);
        assert_eq!(config.orchestrator.poll_interval_secs, 10);
        assert_eq!(config.orchestrator.shutdown_grace_secs, 2);
        assert_eq!(config.orchestrator.sources, SourceKind::ALL.to_vec());
        assert_eq!(config.health.heartbeat_max_age_secs, 7_200);
        assert_eq!(config.schema_target_version, None);
        assert_eq!(config.interval_for(SourceKind::HydrationPrice), 600);
        assert_eq!(config.interval_for(SourceKind::Hydration), 43_200);
    }

    #[test]
    fn test_custom_config() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("YIELDFOLD_DB_PATH", "/tmp/test.db"),
            ("MERGE_INTERVAL_SECS", "120"),
            ("MERGE_WRITE_ROWS", "TRUE"),
            ("PIPELINE_SOURCES", "bifrost, stellaswap,bifrost"),
            ("TABLE_HYDRATION_PRICE", "Hydration_price_test"),
            ("SCHEMA_TARGET_VERSION", "1"),
            ("BIFROST_INTERVAL_SECS", "60"),
        ]))
        .unwrap();

        assert_eq!(config.db.path, "/tmp/test.db");
        assert_eq!(config.merge.interval_secs, 120);
        assert!(config.merge.write_rows);
        assert_eq!(
            config.orchestrator.sources,
            vec![SourceKind::Bifrost, SourceKind::Stellaswap]
        );
        assert_eq!(config.tables.hydration_price, "Hydration_price_test");
        assert_eq!(config.tables.pool_data, "pool_data");
        assert_eq!(config.schema_target_version, Some(1));
        assert_eq!(config.interval_for(SourceKind::Bifrost), 60);
    }

    #[test]
    fn test_heartbeat_threshold_follows_cadence() {
        let config = AppConfig::from_lookup(lookup_from(&[])).unwrap();

        // 43200 interval + 16 backoff + 4 attempts * 300 script timeout + 300 slack
        assert_eq!(config.heartbeat_max_age_for(SourceKind::Hydration), 44_716);
        assert_eq!(config.heartbeat_max_age_for(SourceKind::Bifrost), 7_200);
        assert_eq!(config.heartbeat_max_age_for(SourceKind::HydrationPrice), 7_200);

        let thresholds = config.heartbeat_thresholds();
        assert_eq!(thresholds.len(), SourceKind::ALL.len());
        assert!(thresholds.contains(&(SourceKind::Hydration, 44_716)));

        let floor = AppConfig::from_lookup(lookup_from(&[("HEARTBEAT_MAX_AGE_SECS", "100000")])).unwrap();
        assert_eq!(floor.heartbeat_max_age_for(SourceKind::Hydration), 100_000);
    }

    #[test]
    fn test_malformed_values_fail_fast() {
        let bad_number = AppConfig::from_lookup(lookup_from(&[("MERGE_INTERVAL_SECS", "hourly")]));
        assert!(matches!(bad_number, Err(ConfigError::InvalidValue(_))));

        let bad_table = AppConfig::from_lookup(lookup_from(&[("TABLE_POOL_DATA", "pool; DROP TABLE x")]));
        assert!(matches!(bad_table, Err(ConfigError::InvalidValue(_))));

        let bad_source = AppConfig::from_lookup(lookup_from(&[("PIPELINE_SOURCES", "bifrost,binance")]));
        assert!(matches!(bad_source, Err(ConfigError::InvalidValue(_))));

        let bad_url = AppConfig::from_lookup(lookup_from(&[("BIFROST_API_URL", "dapi.bifrost.io")]));
        assert!(matches!(bad_url, Err(ConfigError::InvalidValue(_))));

        let zero_poll = AppConfig::from_lookup(lookup_from(&[("ORCHESTRATOR_POLL_SECS", "0")]));
        assert!(zero_poll.is_err());
    }

    #[test]
    fn test_identifier_rules() {
        assert!(is_identifier("Bifrost_site_table"));
        assert!(is_identifier("_t1"));
        assert!(!is_identifier("1table"));
        assert!(!is_identifier("pool-data"));
        assert!(!is_identifier(""));
    }
}
