// End-to-end orchestration against the in-memory store and recording
// container runtime.

use backhaul::config::{CaptureSpec, GlobalConfig, Priority, ServiceSpec};
use backhaul::managers::{BackupOrchestrator, NotificationManager, RestoreOrchestrator};
use backhaul::retention::RetentionEngine;
use backhaul::strategies::SnapshotSelector;
use backhaul::utils::runtime::mock::MockRuntime;
use backhaul::utils::store::mock::{MemoryStore, StoreCall};
use backhaul::utils::store::{SnapshotStore, TagSet};
use std::collections::HashMap;
use std::path::PathBuf;
use tempfile::TempDir;

fn global(scratch: &TempDir) -> GlobalConfig {
    GlobalConfig {
        compose_root: scratch.path().join("compose"),
        scratch_dir: scratch.path().to_path_buf(),
        log_directory: scratch.path().join("logs"),
        log_level: "info".to_string(),
        log_max_files: 10,
    }
}

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

fn volume_service(name: &str, volumes: &[&str], quiesce: bool) -> ServiceSpec {
    ServiceSpec {
        name: name.to_string(),
        priority: Priority::High,
        capture: CaptureSpec::VolumeSet {
            volumes: volumes.iter().map(|s| s.to_string()).collect(),
        },
        compose: Some(PathBuf::from(name)),
        requires_quiesce: quiesce,
        aux_volumes: Vec::new(),
        aux_directories: Vec::new(),
        allow_passwordless: false,
        retention: None,
    }
}

#[test]
fn fleet_run_isolates_a_failing_service() {
    let scratch = TempDir::new().unwrap();
    let store = MemoryStore::new().failing_backup_for("fleet-broken");
    let runtime = MockRuntime::new();
    let retention = RetentionEngine::new(HashMap::new());
    let notifier = NotificationManager::new(None);
    let global = global(&scratch);
    let orchestrator = BackupOrchestrator::new(&store, &runtime, &retention, &notifier, &global);

    let a = directory_service("fleet-a", scratch.path().join("a"));
    let b = directory_service("fleet-broken", scratch.path().join("b"));
    let c = directory_service("fleet-c", scratch.path().join("c"));

    let ledger = orchestrator.backup_all(&[&a, &b, &c]);

    assert_eq!(ledger.successes(), 2);
    assert_eq!(ledger.failures().len(), 1);
    assert_eq!(ledger.failures()[0].service, "fleet-broken");

    // the failing service still got its attempt recorded with a reason
    assert!(ledger.failures()[0].failure_reason.is_some());
    // successful services went through retention; the failed one did not
    assert_eq!(store.forget_calls().len(), 2);
}

#[test]
fn quiesced_stack_restarts_after_a_mid_capture_failure() {
    let scratch = TempDir::new().unwrap();
    let mount = TempDir::new().unwrap();
    let store = MemoryStore::new().failing_backup_for("q-media_data");
    let runtime = MockRuntime::new().with_mountpoint("q-media_data", mount.path());
    let retention = RetentionEngine::new(HashMap::new());
    let notifier = NotificationManager::new(None);
    let global = global(&scratch);
    let orchestrator = BackupOrchestrator::new(&store, &runtime, &retention, &notifier, &global);

    let spec = volume_service("q-media", &["q-media_data"], true);
    let outcome = orchestrator.backup_service(&spec);

    assert!(!outcome.succeeded);
    assert_eq!(runtime.stop_count(), 1);
    // the stack came back up even though the capture failed
    assert_eq!(runtime.start_count(), 1);
    // stale repository locks were dropped
    assert!(store.calls().iter().any(|c| matches!(c, StoreCall::Unlock)));
}

#[test]
fn aux_artifacts_get_their_own_tagged_generations() {
    let scratch = TempDir::new().unwrap();
    let aux_dir = scratch.path().join("uploads");
    std::fs::create_dir_all(&aux_dir).unwrap();

    let store = MemoryStore::new();
    let runtime = MockRuntime::new();
    let retention = RetentionEngine::new(HashMap::new());
    let notifier = NotificationManager::new(None);
    let global = global(&scratch);
    let orchestrator = BackupOrchestrator::new(&store, &runtime, &retention, &notifier, &global);

    let mut spec = directory_service("gen-wiki", scratch.path().join("wiki"));
    spec.aux_directories = vec![aux_dir];

    let outcome = orchestrator.backup_service(&spec);
    assert!(outcome.succeeded);
    assert_eq!(outcome.snapshot_ids.len(), 2);

    let all = store.snapshots(&TagSet::service("gen-wiki")).unwrap();
    assert_eq!(all.len(), 2);
    assert!(all.iter().any(|s| s.tags.contains(&"primary".to_string())));
    assert!(all.iter().any(|s| s.tags.contains(&"aux".to_string())));
}

#[test]
fn missing_aux_generation_degrades_to_a_warning_on_restore() {
    let scratch = TempDir::new().unwrap();
    let primary = scratch.path().join("data");
    std::fs::create_dir_all(&primary).unwrap();

    let store = MemoryStore::new();
    let runtime = MockRuntime::new();
    let retention = RetentionEngine::new(HashMap::new());
    let notifier = NotificationManager::new(None);
    let global = global(&scratch);

    // capture only the primary artifact, then declare an aux directory that
    // was never backed up
    let backup = BackupOrchestrator::new(&store, &runtime, &retention, &notifier, &global);
    let mut spec = directory_service("tol-host", primary);
    assert!(backup.backup_service(&spec).succeeded);
    spec.aux_directories = vec![scratch.path().join("never-captured")];

    let restore = RestoreOrchestrator::new(&store, &runtime, &notifier, &global);
    let report = restore
        .restore_service(&spec, &SnapshotSelector::Latest)
        .unwrap();

    assert_eq!(report.restored.len(), 1);
    assert!(report
        .warnings
        .iter()
        .any(|w| w.contains("not restored")));
}

#[test]
fn explicit_snapshot_id_selects_an_older_generation() {
    let scratch = TempDir::new().unwrap();
    let primary = scratch.path().join("data");
    std::fs::create_dir_all(&primary).unwrap();

    let store = MemoryStore::new();
    let runtime = MockRuntime::new();
    let retention = RetentionEngine::new(HashMap::new());
    let notifier = NotificationManager::new(None);
    let global = global(&scratch);

    let backup = BackupOrchestrator::new(&store, &runtime, &retention, &notifier, &global);
    let spec = directory_service("gen-host", primary);
    let first = backup.backup_service(&spec);
    let _second = backup.backup_service(&spec);
    assert_eq!(store.backup_count(), 2);

    let restore = RestoreOrchestrator::new(&store, &runtime, &notifier, &global);
    let selector = SnapshotSelector::Id(first.snapshot_ids[0].clone());
    restore.restore_service(&spec, &selector).unwrap();

    let restores = store.restore_calls();
    assert_eq!(restores.len(), 1);
    assert!(matches!(
        &restores[0],
        StoreCall::Restore { snapshot_id, .. } if *snapshot_id == first.snapshot_ids[0]
    ));
}

#[test]
fn unknown_snapshot_id_fails_cleanly() {
    let scratch = TempDir::new().unwrap();
    let primary = scratch.path().join("data");
    std::fs::create_dir_all(&primary).unwrap();

    let store = MemoryStore::new();
    let runtime = MockRuntime::new();
    let notifier = NotificationManager::new(None);
    let global = global(&scratch);

    let restore = RestoreOrchestrator::new(&store, &runtime, &notifier, &global);
    let spec = directory_service("ghost-host", primary);
    let err = restore
        .restore_service(&spec, &SnapshotSelector::Id("feedface".to_string()))
        .unwrap_err();
    assert!(err.to_string().contains("no snapshot found"));
}
