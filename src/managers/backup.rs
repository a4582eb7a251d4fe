//! Backup orchestration
//!
//! Runs one service's full capture (primary artifact, auxiliary artifacts,
//! then retention) under a per-service lock, and drives fleet-wide runs in
//! which one failing service never aborts the rest. The run ledger carries
//! the per-service outcomes; the process exit code is derived from it.

use crate::config::{GlobalConfig, ServiceSpec};
use crate::managers::notification::NotificationManager;
use crate::retention::RetentionEngine;
use crate::strategies::{self, StrategyContext};
use crate::utils::locker::ServiceLock;
use crate::utils::runtime::ContainerRuntime;
use crate::utils::store::SnapshotStore;
use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

/// Outcome of one service's backup attempt
#[derive(Debug)]
pub struct BackupOutcome {
    pub service: String,
    pub succeeded: bool,
    pub snapshot_ids: Vec<String>,
    pub warnings: Vec<String>,
    pub failure_reason: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Per-run record of every service attempted
#[derive(Debug, Default)]
pub struct RunLedger {
    pub outcomes: Vec<BackupOutcome>,
}

impl RunLedger {
    pub fn successes(&self) -> usize {
        self.outcomes.iter().filter(|o| o.succeeded).count()
    }

    pub fn failures(&self) -> Vec<&BackupOutcome> {
        self.outcomes.iter().filter(|o| !o.succeeded).collect()
    }

    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(|o| !o.succeeded)
    }

    pub fn summary(&self) -> String {
        let failed = self.failures();
        if failed.is_empty() {
            format!("{} service(s) backed up", self.successes())
        } else {
            let names: Vec<&str> = failed.iter().map(|o| o.service.as_str()).collect();
            format!(
                "{} succeeded, {} failed ({})",
                self.successes(),
                failed.len(),
                names.join(", ")
            )
        }
    }
}

pub struct BackupOrchestrator<'a> {
    store: &'a dyn SnapshotStore,
    runtime: &'a dyn ContainerRuntime,
    retention: &'a RetentionEngine,
    notifier: &'a NotificationManager,
    global: &'a GlobalConfig,
}

impl<'a> BackupOrchestrator<'a> {
    pub fn new(
        store: &'a dyn SnapshotStore,
        runtime: &'a dyn ContainerRuntime,
        retention: &'a RetentionEngine,
        notifier: &'a NotificationManager,
        global: &'a GlobalConfig,
    ) -> Self {
        Self {
            store,
            runtime,
            retention,
            notifier,
            global,
        }
    }

    fn context(&self) -> StrategyContext<'_> {
        StrategyContext {
            store: self.store,
            runtime: self.runtime,
            compose_root: &self.global.compose_root,
            scratch_root: &self.global.scratch_dir,
        }
    }

    /// Back up one service end to end. Never panics the run; every failure
    /// lands in the returned outcome.
    pub fn backup_service(&self, spec: &ServiceSpec) -> BackupOutcome {
        let started_at = Utc::now();
        info!(service = %spec.name, "starting backup");

        let result = self.run_capture(spec);
        let finished_at = Utc::now();

        match result {
            Ok((snapshot_ids, warnings)) => {
                info!(
                    service = %spec.name,
                    snapshots = snapshot_ids.len(),
                    "backup complete"
                );
                if warnings.is_empty() {
                    self.notifier.send_success(
                        &format!("backup: {}", spec.name),
                        &format!("{} snapshot(s) created", snapshot_ids.len()),
                    );
                } else {
                    self.notifier.send_warning(
                        &format!("backup: {}", spec.name),
                        &warnings.join("\n"),
                    );
                }
                BackupOutcome {
                    service: spec.name.clone(),
                    succeeded: true,
                    snapshot_ids,
                    warnings,
                    failure_reason: None,
                    started_at,
                    finished_at,
                }
            }
            Err(e) => {
                let reason = format!("{:#}", e);
                error!(service = %spec.name, error = %reason, "backup failed");
                // A failed run can leave stale repository locks behind
                if let Err(unlock_err) = self.store.unlock() {
                    warn!(error = %unlock_err, "repository unlock after failure did not succeed");
                }
                self.notifier
                    .send_failure(&format!("backup: {}", spec.name), &reason);
                BackupOutcome {
                    service: spec.name.clone(),
                    succeeded: false,
                    snapshot_ids: Vec::new(),
                    warnings: Vec::new(),
                    failure_reason: Some(reason),
                    started_at,
                    finished_at,
                }
            }
        }
    }

    fn run_capture(&self, spec: &ServiceSpec) -> Result<(Vec<String>, Vec<String>)> {
        let mut lock = ServiceLock::open(&spec.name)?;
        let _guard = lock.try_acquire()?;

        let ctx = self.context();
        let strategy = strategies::strategy_for(&spec.capture);

        let mut report = strategy.capture(&ctx, spec)?;
        let aux = strategies::capture_aux_artifacts(&ctx, spec)?;
        report.snapshot_ids.extend(aux.snapshot_ids);
        report.warnings.extend(aux.warnings);

        // Retention runs only after a fully successful capture so a failed
        // run can never shrink the snapshot history
        self.retention.apply(self.store, spec)?;

        Ok((report.snapshot_ids, report.warnings))
    }

    /// Back up every given service in order, isolating failures
    pub fn backup_all(&self, services: &[&ServiceSpec]) -> RunLedger {
        let mut ledger = RunLedger::default();
        for spec in services {
            ledger.outcomes.push(self.backup_service(spec));
        }
        info!("{}", ledger.summary());

        if ledger.has_failures() {
            let body: Vec<String> = ledger
                .failures()
                .iter()
                .map(|o| {
                    format!(
                        "{}: {}",
                        o.service,
                        o.failure_reason.as_deref().unwrap_or("unknown error")
                    )
                })
                .collect();
            self.notifier
                .send_failure("backup run finished with failures", &body.join("\n"));
        } else {
            self.notifier
                .send_success("backup run complete", &ledger.summary());
        }
        ledger
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CaptureSpec, Priority};
    use crate::utils::runtime::mock::MockRuntime;
    use crate::utils::store::mock::{MemoryStore, StoreCall};
    use std::collections::HashMap;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn directory_service(name: &str, path: PathBuf) -> ServiceSpec {
        ServiceSpec {
            name: name.to_string(),
            priority: Priority::Medium,
            capture: CaptureSpec::Directory { path },
            compose: None,
            requires_quiesce: false,
            aux_volumes: Vec::new(),
            aux_directories: Vec::new(),
            allow_passwordless: false,
            retention: None,
        }
    }

    fn global(scratch: &TempDir) -> GlobalConfig {
        GlobalConfig {
            compose_root: PathBuf::from("/srv"),
            scratch_dir: scratch.path().to_path_buf(),
            log_directory: scratch.path().join("logs"),
            log_level: "info".to_string(),
            log_max_files: 10,
        }
    }

    #[test]
    fn one_failing_service_does_not_abort_the_rest() {
        let scratch = TempDir::new().unwrap();
        let store = MemoryStore::new().failing_backup_for("broken");
        let runtime = MockRuntime::new();
        let retention = RetentionEngine::new(HashMap::new());
        let notifier = NotificationManager::new(None);
        let global = global(&scratch);
        let orchestrator =
            BackupOrchestrator::new(&store, &runtime, &retention, &notifier, &global);

        let a = directory_service("alpha", scratch.path().join("a"));
        let b = directory_service("broken", scratch.path().join("b"));
        let c = directory_service("gamma", scratch.path().join("c"));

        let ledger = orchestrator.backup_all(&[&a, &b, &c]);

        assert_eq!(ledger.successes(), 2);
        assert_eq!(ledger.failures().len(), 1);
        assert_eq!(ledger.failures()[0].service, "broken");
        assert!(ledger.has_failures());
    }

    #[test]
    fn retention_runs_only_after_a_successful_capture() {
        let scratch = TempDir::new().unwrap();
        let store = MemoryStore::new().failing_backup_for("ret-broken");
        let runtime = MockRuntime::new();
        let retention = RetentionEngine::new(HashMap::new());
        let notifier = NotificationManager::new(None);
        let global = global(&scratch);
        let orchestrator =
            BackupOrchestrator::new(&store, &runtime, &retention, &notifier, &global);

        let outcome = orchestrator
            .backup_service(&directory_service("ret-broken", scratch.path().join("b")));
        assert!(!outcome.succeeded);
        assert!(store.forget_calls().is_empty());

        let outcome =
            orchestrator.backup_service(&directory_service("ret-ok", scratch.path().join("a")));
        assert!(outcome.succeeded);
        assert_eq!(store.forget_calls().len(), 1);
    }

    #[test]
    fn failed_run_drops_stale_repository_locks() {
        let scratch = TempDir::new().unwrap();
        let store = MemoryStore::new().failing_backup_for("unlock-broken");
        let runtime = MockRuntime::new();
        let retention = RetentionEngine::new(HashMap::new());
        let notifier = NotificationManager::new(None);
        let global = global(&scratch);
        let orchestrator =
            BackupOrchestrator::new(&store, &runtime, &retention, &notifier, &global);

        orchestrator
            .backup_service(&directory_service("unlock-broken", scratch.path().join("b")));
        assert!(store
            .calls()
            .iter()
            .any(|c| matches!(c, StoreCall::Unlock)));
    }

    #[test]
    fn aux_artifacts_ride_along_with_the_primary() {
        let scratch = TempDir::new().unwrap();
        let aux_dir = scratch.path().join("aux-data");
        std::fs::create_dir_all(&aux_dir).unwrap();

        let store = MemoryStore::new();
        let runtime = MockRuntime::new();
        let retention = RetentionEngine::new(HashMap::new());
        let notifier = NotificationManager::new(None);
        let global = global(&scratch);
        let orchestrator =
            BackupOrchestrator::new(&store, &runtime, &retention, &notifier, &global);

        let mut spec = directory_service("aux-host", scratch.path().join("a"));
        spec.aux_directories = vec![aux_dir];

        let outcome = orchestrator.backup_service(&spec);
        assert!(outcome.succeeded);
        assert_eq!(outcome.snapshot_ids.len(), 2);
        assert_eq!(store.backup_count(), 2);
    }

    #[test]
    fn repeated_runs_accumulate_snapshot_generations() {
        let scratch = TempDir::new().unwrap();
        let store = MemoryStore::new();
        let runtime = MockRuntime::new();
        let retention = RetentionEngine::new(HashMap::new());
        let notifier = NotificationManager::new(None);
        let global = global(&scratch);
        let orchestrator =
            BackupOrchestrator::new(&store, &runtime, &retention, &notifier, &global);

        let spec = directory_service("repeat-host", scratch.path().join("a"));
        assert!(orchestrator.backup_service(&spec).succeeded);
        assert!(orchestrator.backup_service(&spec).succeeded);
        assert_eq!(store.backup_count(), 2);
    }
}
