//! Process orchestrator
//!
//! Starts one OS process per source pipeline, runs the merge engine on an
//! interval and watches datastore health and pipeline heartbeats. Exited
//! pipelines are logged once and never restarted. Shutdown sends SIGTERM to
//! every live unit, waits out the grace period, then SIGKILLs and reaps the
//! survivors.

use crate::config::{AppConfig, DbConfig, OrchestratorConfig};
use crate::health::check_database_connection;
use crate::heartbeat::{Liveness, LivenessCheck};
use crate::merge::{MergeOutcome, MergeRunner};
use crate::source::SourceKind;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tokio::sync::watch;

const REAP_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    NotStarted,
    Running { pid: u32 },
    /// `code` is `None` when the process died from a signal
    Exited { code: Option<i32> },
    Reaped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Starting,
    Running,
    Stopping,
    Stopped,
}

#[derive(Debug)]
pub enum OrchestratorError {
    Spawn { unit: String, source: io::Error },
    ProgramNotFound(io::Error),
}

impl std::fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrchestratorError::Spawn { unit, source } => write!(f, "Failed to spawn {}: {}", unit, source),
            OrchestratorError::ProgramNotFound(e) => write!(f, "Cannot locate pipeline program: {}", e),
        }
    }
}

impl std::error::Error for OrchestratorError {}

/// What to run for one supervised unit
#[derive(Debug, Clone)]
pub struct UnitSpec {
    pub name: String,
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl UnitSpec {
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>, args: &[&str]) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    pub fn for_source(program: &Path, source: SourceKind) -> Self {
        Self::new(source.as_str(), program, &[source.as_str()])
    }
}

/// One `source_pipeline <source>` unit per configured source
///
/// Without `PIPELINE_PROGRAM` the `source_pipeline` binary next to the
/// running executable is used.
pub fn pipeline_units(config: &OrchestratorConfig) -> Result<Vec<UnitSpec>, OrchestratorError> {
    let program = match &config.pipeline_program {
        Some(path) => path.clone(),
        None => std::env::current_exe()
            .map_err(OrchestratorError::ProgramNotFound)?
            .with_file_name("source_pipeline"),
    };
    Ok(config
        .sources
        .iter()
        .map(|source| UnitSpec::for_source(&program, *source))
        .collect())
}

struct Unit {
    spec: UnitSpec,
    child: Option<Child>,
    state: UnitState,
}

/// Requests a graceful stop from any task
#[derive(Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn request_stop(&self) {
        let _ = self.tx.send(true);
    }
}

pub struct Orchestrator {
    units: Vec<Unit>,
    merge: Box<dyn MergeRunner>,
    liveness: Option<Box<dyn LivenessCheck>>,
    health_db: Option<DbConfig>,
    poll_interval: Duration,
    merge_interval: Duration,
    grace: Duration,
    state: OrchestratorState,
    last_merge: Option<Instant>,
    stop_tx: Arc<watch::Sender<bool>>,
    stop_rx: watch::Receiver<bool>,
}

impl Orchestrator {
    pub fn new(
        units: Vec<UnitSpec>,
        merge: Box<dyn MergeRunner>,
        config: &OrchestratorConfig,
        merge_interval_secs: u64,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            units: units
                .into_iter()
                .map(|spec| Unit {
                    spec,
                    child: None,
                    state: UnitState::NotStarted,
                })
                .collect(),
            merge,
            liveness: None,
            health_db: None,
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            merge_interval: Duration::from_secs(merge_interval_secs),
            grace: Duration::from_secs(config.shutdown_grace_secs),
            state: OrchestratorState::Starting,
            last_merge: None,
            stop_tx: Arc::new(stop_tx),
            stop_rx,
        }
    }

    /// Everything the `orchestrator` binary wires up from the environment
    pub fn from_config(
        config: &AppConfig,
        merge: Box<dyn MergeRunner>,
        liveness: Box<dyn LivenessCheck>,
    ) -> Result<Self, OrchestratorError> {
        let units = pipeline_units(&config.orchestrator)?;
        Ok(Self::new(units, merge, &config.orchestrator, config.merge.interval_secs)
            .with_health_check(config.db.clone())
            .with_liveness(liveness))
    }

    pub fn with_liveness(mut self, check: Box<dyn LivenessCheck>) -> Self {
        self.liveness = Some(check);
        self
    }

    pub fn with_health_check(mut self, db: DbConfig) -> Self {
        self.health_db = Some(db);
        self
    }

    /// Override the poll interval (sub-second values are useful in tests)
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    pub fn unit_states(&self) -> Vec<(String, UnitState)> {
        self.units.iter().map(|u| (u.spec.name.clone(), u.state)).collect()
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            tx: self.stop_tx.clone(),
        }
    }

    /// Spawn every unit, then run one merge right away
    pub fn start(&mut self) -> Result<(), OrchestratorError> {
        if self.state != OrchestratorState::Starting {
            return Ok(());
        }

        log::info!("🚀 Starting {} pipeline units", self.units.len());
        let count = self.units.len();
        for (i, unit) in self.units.iter_mut().enumerate() {
            let child = Command::new(&unit.spec.program)
                .args(&unit.spec.args)
                .kill_on_drop(true)
                .spawn()
                .map_err(|source| OrchestratorError::Spawn {
                    unit: unit.spec.name.clone(),
                    source,
                })?;

            let pid = child.id().unwrap_or_default();
            let branch = if i + 1 == count { "└─" } else { "├─" };
            log::info!("   {} {} (pid {})", branch, unit.spec.name, pid);
            unit.state = UnitState::Running { pid };
            unit.child = Some(child);
        }

        self.state = OrchestratorState::Running;
        self.run_merge();
        Ok(())
    }

    /// Check every running unit for exit; returns how many exited since the
    /// last poll
    pub fn poll_units(&mut self) -> usize {
        let mut exited = 0;
        for unit in &mut self.units {
            if !matches!(unit.state, UnitState::Running { .. }) {
                continue;
            }
            let Some(child) = unit.child.as_mut() else {
                continue;
            };
            match child.try_wait() {
                Ok(Some(status)) => {
                    let code = status.code();
                    if code == Some(0) {
                        log::warn!("⚠️  Pipeline {} exited cleanly; it will not be restarted", unit.spec.name);
                    } else {
                        log::error!(
                            "❌ Pipeline {} exited unexpectedly ({}); it will not be restarted",
                            unit.spec.name,
                            status
                        );
                    }
                    unit.state = UnitState::Exited { code };
                    exited += 1;
                }
                Ok(None) => {}
                Err(e) => log::warn!("⚠️  Could not poll {}: {}", unit.spec.name, e),
            }
        }
        exited
    }

    fn run_merge(&mut self) {
        self.last_merge = Some(Instant::now());
        match self.merge.run_cycle() {
            Ok(MergeOutcome::Inserted { snapshot_id, rows, .. }) => {
                log::info!("✅ Merge stored snapshot {} ({} records)", snapshot_id, rows);
            }
            Ok(MergeOutcome::Duplicate { .. }) => {
                log::info!("⏭️  Merge found no new content");
            }
            Err(e) => log::error!("❌ Merge cycle failed: {}", e),
        }
    }

    fn merge_due(&self) -> bool {
        self.last_merge
            .map_or(true, |at| at.elapsed() >= self.merge_interval)
    }

    fn check_liveness(&mut self) {
        let Some(check) = self.liveness.as_mut() else {
            return;
        };
        match check.check() {
            Ok(report) => {
                for (source, liveness) in report {
                    match liveness {
                        Liveness::Stale { age_secs } => {
                            log::warn!("⚠️  Pipeline {} heartbeat is stale ({}s old)", source, age_secs);
                        }
                        Liveness::Missing => log::debug!("No heartbeat yet from {}", source),
                        Liveness::Fresh { .. } => {}
                    }
                }
            }
            Err(e) => log::warn!("⚠️  Heartbeat check failed: {}", e),
        }
    }

    /// One pass of the main loop
    fn tick(&mut self) {
        if let Some(db) = &self.health_db {
            if !check_database_connection(db) {
                log::error!("❌ Datastore health check failed for {}", db.path);
            }
        }
        self.poll_units();
        self.check_liveness();
        if self.merge_due() {
            self.run_merge();
        }
    }

    /// Start (if needed) and loop until a stop is requested or
    /// `max_iterations` passes have run, then shut down
    pub async fn run(&mut self, max_iterations: Option<u64>) -> Result<(), OrchestratorError> {
        self.start()?;

        let mut stop_rx = self.stop_rx.clone();
        let mut iterations = 0u64;
        loop {
            if *stop_rx.borrow() {
                log::info!("🛑 Stop requested");
                break;
            }

            self.tick();
            iterations += 1;
            if max_iterations.is_some_and(|max| iterations >= max) {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = stop_rx.changed() => {}
            }
        }

        self.stop().await;
        Ok(())
    }

    /// SIGTERM, grace period, SIGKILL, reap. Safe to call repeatedly.
    pub async fn stop(&mut self) {
        if matches!(self.state, OrchestratorState::Stopping | OrchestratorState::Stopped) {
            return;
        }
        self.state = OrchestratorState::Stopping;
        log::info!("🛑 Stopping {} pipeline units", self.live_units());

        for unit in &mut self.units {
            if let UnitState::Running { pid } = unit.state {
                if let Err(e) = send_sigterm(pid) {
                    log::debug!("SIGTERM to {} (pid {}) failed: {}", unit.spec.name, pid, e);
                }
            }
        }

        let deadline = Instant::now() + self.grace;
        while self.live_units() > 0 && Instant::now() < deadline {
            tokio::time::sleep(REAP_POLL).await;
            self.poll_units();
        }

        for unit in &mut self.units {
            let Some(mut child) = unit.child.take() else {
                continue;
            };
            if matches!(unit.state, UnitState::Running { .. }) {
                log::warn!("⚠️  {} ignored SIGTERM, killing", unit.spec.name);
                if let Err(e) = child.kill().await {
                    log::warn!("⚠️  Could not kill {}: {}", unit.spec.name, e);
                }
            }
            unit.state = UnitState::Reaped;
        }

        self.state = OrchestratorState::Stopped;
        log::info!("✅ Orchestrator stopped");
    }

    fn live_units(&self) -> usize {
        self.units
            .iter()
            .filter(|u| matches!(u.state, UnitState::Running { .. }))
            .count()
    }
}

fn send_sigterm(pid: u32) -> io::Result<()> {
    // SAFETY: kill(2) has no memory-safety requirements
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Resolves on CTRL+C or SIGTERM
pub async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => log::info!("⚠️  Received CTRL+C"),
                _ = term.recv() => log::info!("⚠️  Received SIGTERM"),
            }
        }
        Err(e) => {
            log::warn!("⚠️  Cannot listen for SIGTERM ({}), waiting for CTRL+C only", e);
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("❌ Failed to listen for CTRL+C: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::MergeError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingMerge(Arc<AtomicUsize>);

    impl MergeRunner for CountingMerge {
        fn run_cycle(&mut self) -> Result<MergeOutcome, MergeError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(MergeOutcome::Duplicate {
                content_hash: "abc".to_string(),
            })
        }
    }

    fn config() -> OrchestratorConfig {
        OrchestratorConfig {
            poll_interval_secs: 0,
            shutdown_grace_secs: 1,
            sources: Vec::new(),
            pipeline_program: Some(PathBuf::from("/usr/local/bin/source_pipeline")),
        }
    }

    #[test]
    fn test_units_follow_configured_sources() {
        let mut cfg = config();
        cfg.sources = vec![SourceKind::Bifrost, SourceKind::Stellaswap];
        let units = pipeline_units(&cfg).unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(units[1].name, "stellaswap");
        assert_eq!(units[1].args, vec!["stellaswap".to_string()]);
        assert_eq!(units[0].program, PathBuf::from("/usr/local/bin/source_pipeline"));
    }

    #[tokio::test]
    async fn test_merge_runs_at_start_then_on_interval() {
        let merges = Arc::new(AtomicUsize::new(0));
        let mut orch = Orchestrator::new(Vec::new(), Box::new(CountingMerge(merges.clone())), &config(), 3_600);

        orch.run(Some(3)).await.unwrap();

        // start merge only; interval not reached during three passes
        assert_eq!(merges.load(Ordering::SeqCst), 1);
        assert_eq!(orch.state(), OrchestratorState::Stopped);

        let merges = Arc::new(AtomicUsize::new(0));
        let mut orch = Orchestrator::new(Vec::new(), Box::new(CountingMerge(merges.clone())), &config(), 0);
        orch.run(Some(2)).await.unwrap();
        assert_eq!(merges.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported() {
        let merges = Arc::new(AtomicUsize::new(0));
        let units = vec![UnitSpec::new("ghost", "/nonexistent/yieldfold-pipeline", &[])];
        let mut orch = Orchestrator::new(units, Box::new(CountingMerge(merges)), &config(), 3_600);

        assert!(matches!(orch.start(), Err(OrchestratorError::Spawn { .. })));
    }
}
