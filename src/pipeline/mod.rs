//! Fetch-and-dedup loop for one source
//!
//! Each cycle: fetch (with backoff) → validate → hash → compare with the last
//! persisted hash → skip or persist → heartbeat. A cycle either writes a whole
//! batch plus its tracking record, or nothing.

pub mod validate;

use crate::config::SourceSettings;
use crate::fetch::{FetchError, Fetcher};
use crate::hash::{compute_hash, BatchIdAllocator};
use crate::heartbeat::HeartbeatStore;
use crate::records::BatchPayload;
use crate::retry::{retry_blocking, ExponentialBackoff};
use crate::store::{SourceStore, StoreError};
use rusqlite::Connection;
use std::time::Duration;
use tokio::sync::watch;
use validate::ValidationError;

/// Upper bound for a single backoff sleep
const MAX_BACKOFF_SECS: u64 = 60;
const DB_RETRIES: u32 = 3;

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    FetchFailed(String),
    Invalid(ValidationError),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::FetchFailed(msg) => write!(f, "fetch failed: {}", msg),
            SkipReason::Invalid(e) => write!(f, "validation failed: {}", e),
        }
    }
}

/// What one pipeline cycle did
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Persisted {
        batch_id: i64,
        content_hash: Option<String>,
        rows: usize,
    },
    Duplicate {
        content_hash: String,
    },
    Skipped(SkipReason),
}

impl CycleOutcome {
    /// Short label stored with the heartbeat
    pub fn label(&self) -> &'static str {
        match self {
            CycleOutcome::Persisted { .. } => "persisted",
            CycleOutcome::Duplicate { .. } => "duplicate",
            CycleOutcome::Skipped(_) => "skipped",
        }
    }
}

#[derive(Debug)]
pub enum PipelineError {
    Store(StoreError),
    Fetch(FetchError),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::Store(e) => write!(f, "Pipeline datastore error: {}", e),
            PipelineError::Fetch(e) => write!(f, "Pipeline setup error: {}", e),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        PipelineError::Store(err)
    }
}

impl From<FetchError> for PipelineError {
    fn from(err: FetchError) -> Self {
        PipelineError::Fetch(err)
    }
}

pub struct SourcePipeline<F, S>
where
    F: Fetcher,
    S: SourceStore<Batch = F::Batch>,
{
    fetcher: F,
    store: S,
    conn: Connection,
    heartbeats: HeartbeatStore,
    allocator: BatchIdAllocator,
    settings: SourceSettings,
}

impl<F, S> SourcePipeline<F, S>
where
    F: Fetcher,
    S: SourceStore<Batch = F::Batch>,
{
    /// Create the source's tables (if absent) and the heartbeat table
    pub fn new(
        fetcher: F,
        store: S,
        conn: Connection,
        heartbeats: HeartbeatStore,
        settings: SourceSettings,
    ) -> Result<Self, PipelineError> {
        store.create_tables(&conn)?;
        heartbeats.create_table(&conn)?;

        Ok(Self {
            fetcher,
            store,
            conn,
            heartbeats,
            allocator: BatchIdAllocator::new(),
            settings,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn db_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(1, MAX_BACKOFF_SECS, DB_RETRIES)
    }

    /// One full cycle
    ///
    /// Fetch and validation problems come back as `Ok(Skipped)`; only datastore
    /// failures (after retries) are errors.
    pub async fn run_once(&mut self) -> Result<CycleOutcome, PipelineError> {
        let outcome = self.cycle().await;

        let label = match &outcome {
            Ok(outcome) => outcome.label(),
            Err(_) => "error",
        };
        if let Err(e) = self.heartbeats.beat(&self.conn, self.settings.source, label) {
            log::warn!("⚠️  [{}] Heartbeat write failed: {}", self.settings.source, e);
        }

        outcome
    }

    async fn cycle(&mut self) -> Result<CycleOutcome, PipelineError> {
        let source = self.settings.source;

        let mut backoff = self.settings.fetch_backoff();
        let batch = loop {
            match self.fetcher.fetch().await {
                Ok(batch) => break batch,
                Err(e) if e.is_transient() => {
                    log::warn!("⚠️  [{}] Fetch failed: {}", source, e);
                    if backoff.sleep().await.is_err() {
                        log::error!(
                            "❌ [{}] Fetch still failing after {} retries, skipping cycle",
                            source,
                            backoff.attempts()
                        );
                        return Ok(CycleOutcome::Skipped(SkipReason::FetchFailed(e.to_string())));
                    }
                }
                Err(e) => {
                    log::error!("❌ [{}] Fetch failed, skipping cycle: {}", source, e);
                    return Ok(CycleOutcome::Skipped(SkipReason::FetchFailed(e.to_string())));
                }
            }
        };

        if let Err(e) = batch.validate() {
            log::warn!("⚠️  [{}] Batch rejected, nothing written: {}", source, e);
            return Ok(CycleOutcome::Skipped(SkipReason::Invalid(e)));
        }

        let content_hash = match batch.canonical() {
            Ok(value) => compute_hash(&value),
            Err(e) => {
                log::warn!("⚠️  [{}] No canonical view ({}), dedup skipped", source, e);
                None
            }
        };

        let mut backoff = self.db_backoff();
        let last_hash = retry_blocking(&mut backoff, StoreError::is_transient, || {
            self.store.get_last_content_hash(&self.conn)
        })?;

        if let (Some(current), Some(last)) = (&content_hash, &last_hash) {
            if current == last {
                log::info!("🔁 [{}] Duplicate content {}, skipping insert", source, short(current));
                return Ok(CycleOutcome::Duplicate {
                    content_hash: current.clone(),
                });
            }
        }

        let mut backoff = self.db_backoff();
        let last_batch_id = retry_blocking(&mut backoff, StoreError::is_transient, || {
            self.store.get_last_batch_id(&self.conn)
        })?;
        let batch_id = self.allocator.next(last_batch_id);

        let mut backoff = self.db_backoff();
        let store = &self.store;
        let conn = &mut self.conn;
        let rows = retry_blocking(&mut backoff, StoreError::is_transient, || {
            store.insert_batch(conn, batch_id, content_hash.as_deref(), &batch)
        })?;

        log::info!(
            "✅ [{}] Persisted batch {} ({} rows, hash {})",
            source,
            batch_id,
            rows,
            content_hash.as_deref().map(short).unwrap_or("none")
        );

        Ok(CycleOutcome::Persisted {
            batch_id,
            content_hash,
            rows,
        })
    }

    /// Run cycles until `stop` flips to `true` (or its sender goes away)
    ///
    /// Datastore errors are logged and the loop carries on with the next cycle.
    pub async fn run(&mut self, mut stop: watch::Receiver<bool>) {
        let interval = Duration::from_secs(self.settings.interval_secs);
        log::info!(
            "🚀 [{}] Pipeline started (interval {}s)",
            self.settings.source,
            self.settings.interval_secs
        );

        loop {
            if *stop.borrow() {
                break;
            }

            if let Err(e) = self.run_once().await {
                log::error!("❌ [{}] Cycle aborted: {}", self.settings.source, e);
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        log::info!("🛑 [{}] Pipeline stopped", self.settings.source);
    }
}

fn short(hash: &str) -> &str {
    &hash[..hash.len().min(12)]
}
