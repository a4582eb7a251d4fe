//! Restic CLI adapter
//!
//! Implements the snapshot store contract by shelling out to restic against a
//! single repository. All artifact addressing goes through tags; retention
//! runs with `forget --prune` scoped to one service's tag set.

use super::command::{run_command, run_command_stdout};
use super::store::{Snapshot, SnapshotStore, TagSet};
use crate::config::{RetentionPolicy, StoreConfig};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info, warn};

/// Environment handed to every restic invocation
#[derive(Debug, Clone)]
pub struct ResticEnv {
    vars: Vec<(String, String)>,
}

impl ResticEnv {
    pub fn new(password_file: &Path, repository: &str) -> Self {
        Self {
            vars: vec![
                (
                    "RESTIC_PASSWORD_FILE".to_string(),
                    password_file.display().to_string(),
                ),
                ("RESTIC_REPOSITORY".to_string(), repository.to_string()),
            ],
        }
    }

    pub fn vars(&self) -> &[(String, String)] {
        &self.vars
    }
}

/// Snapshot store backed by a restic repository
pub struct ResticStore {
    env: ResticEnv,
}

impl ResticStore {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            env: ResticEnv::new(&config.password_file, &config.repository),
        }
    }
}

impl SnapshotStore for ResticStore {
    fn ensure_initialized(&self) -> Result<()> {
        init_repository(&self.env)
    }

    fn backup(&self, path: &Path, tags: &TagSet) -> Result<String> {
        backup(&self.env, path, tags)
    }

    fn snapshots(&self, tags: &TagSet) -> Result<Vec<Snapshot>> {
        list_snapshots(&self.env, tags)
    }

    fn restore(&self, snapshot_id: &str, target: &Path) -> Result<()> {
        restore_snapshot(&self.env, snapshot_id, target)
    }

    fn forget(&self, tags: &TagSet, policy: &RetentionPolicy, prune: bool) -> Result<()> {
        forget(&self.env, tags, policy, prune)
    }

    fn unlock(&self) -> Result<()> {
        unlock_repository(&self.env)
    }
}

/// Initialize the repository if it doesn't exist yet
pub fn init_repository(env: &ResticEnv) -> Result<()> {
    debug!("Ensuring restic repository is initialized");

    let output = std::process::Command::new("restic")
        .arg("init")
        .envs(env.vars().iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .output()
        .context("Failed to execute restic init")?;

    if output.status.success() {
        info!("Repository initialized");
        return Ok(());
    }

    // Repository might already exist - that's fine
    let stderr = String::from_utf8_lossy(&output.stderr);
    if stderr.contains("already initialized") || stderr.contains("already exists") {
        debug!("Repository already initialized");
        Ok(())
    } else {
        anyhow::bail!("Failed to initialize repository: {}", stderr)
    }
}

/// One line of `restic backup --json` output
#[derive(Debug, Deserialize)]
struct BackupMessage {
    message_type: String,
    #[serde(default)]
    snapshot_id: Option<String>,
}

/// Snapshot a single path with the given tags, returning the snapshot id
pub fn backup(env: &ResticEnv, path: &Path, tags: &TagSet) -> Result<String> {
    info!("Creating snapshot of {:?} tagged [{}]", path, tags);

    let path_arg = path.display().to_string();
    let mut args: Vec<&str> = vec!["backup", &path_arg, "--json", "--exclude-caches"];
    let tag_args: Vec<String> = tags
        .as_slice()
        .iter()
        .flat_map(|t| ["--tag".to_string(), t.clone()])
        .collect();
    args.extend(tag_args.iter().map(|s| s.as_str()));

    let stdout = run_command_stdout("restic", &args, None, env.vars())?;

    // The summary line carries the snapshot id
    for line in stdout.lines().rev() {
        if let Ok(msg) = serde_json::from_str::<BackupMessage>(line) {
            if msg.message_type == "summary" {
                if let Some(id) = msg.snapshot_id {
                    info!("Snapshot created: {}", id);
                    return Ok(id);
                }
            }
        }
    }

    anyhow::bail!("restic backup produced no summary with a snapshot id")
}

/// Raw snapshot record from `restic snapshots --json`
#[derive(Debug, Deserialize)]
struct RawSnapshot {
    id: String,
    short_id: String,
    time: DateTime<Utc>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    paths: Vec<String>,
    #[serde(default)]
    hostname: String,
}

/// List snapshots carrying all of the given tags, ascending by creation time
pub fn list_snapshots(env: &ResticEnv, tags: &TagSet) -> Result<Vec<Snapshot>> {
    debug!("Listing snapshots tagged [{}]", tags);

    let joined = tags.joined();
    let args = ["snapshots", "--json", "--tag", joined.as_str()];

    let stdout = run_command_stdout("restic", &args, None, env.vars())?;

    let raw: Vec<RawSnapshot> =
        serde_json::from_str(stdout.trim()).context("Failed to parse restic snapshots JSON")?;

    let mut snapshots: Vec<Snapshot> = raw
        .into_iter()
        .map(|r| Snapshot {
            id: r.id,
            short_id: r.short_id,
            time: r.time,
            tags: r.tags,
            paths: r.paths,
            hostname: r.hostname,
        })
        .collect();
    snapshots.sort_by_key(|s| s.time);

    debug!("Found {} snapshots", snapshots.len());
    Ok(snapshots)
}

/// Restore a snapshot's content under `target`
pub fn restore_snapshot(env: &ResticEnv, snapshot_id: &str, target: &Path) -> Result<()> {
    info!("Restoring snapshot {} to {:?}", snapshot_id, target);

    let target_arg = target.display().to_string();
    let args = ["restore", snapshot_id, "--target", target_arg.as_str()];

    run_command("restic", &args, None, env.vars())
        .with_context(|| format!("Failed to restore snapshot {}", snapshot_id))?;

    info!("Restore of snapshot {} completed", snapshot_id);
    Ok(())
}

/// Apply keep-counts to snapshots matching the tags, optionally pruning data
pub fn forget(env: &ResticEnv, tags: &TagSet, policy: &RetentionPolicy, prune: bool) -> Result<()> {
    info!(
        "Applying retention to [{}]: keep {} daily / {} weekly / {} monthly",
        tags, policy.daily, policy.weekly, policy.monthly
    );

    let args = forget_args(tags, policy, prune);
    let args: Vec<&str> = args.iter().map(|s| s.as_str()).collect();

    run_command("restic", &args, None, env.vars()).context("Failed to apply retention policy")?;

    info!("Retention applied");
    Ok(())
}

fn forget_args(tags: &TagSet, policy: &RetentionPolicy, prune: bool) -> Vec<String> {
    let mut args = vec![
        "forget".to_string(),
        "--tag".to_string(),
        tags.joined(),
        "--group-by".to_string(),
        "tags".to_string(),
        "--keep-daily".to_string(),
        policy.daily.to_string(),
        "--keep-weekly".to_string(),
        policy.weekly.to_string(),
        "--keep-monthly".to_string(),
        policy.monthly.to_string(),
    ];
    if prune {
        args.push("--prune".to_string());
    }
    args
}

/// Drop stale repository locks (after a failed run)
pub fn unlock_repository(env: &ResticEnv) -> Result<()> {
    debug!("Unlocking restic repository");

    match run_command("restic", &["unlock"], None, env.vars()) {
        Ok(_) => debug!("Repository unlocked"),
        // The repository might not be locked; never escalate
        Err(e) => warn!("Failed to unlock repository: {}", e),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restic_env_carries_password_file_and_repository() {
        let env = ResticEnv::new(Path::new("/etc/backhaul/pw"), "sftp://host/backups");
        let vars = env.vars();
        assert!(vars
            .iter()
            .any(|(k, v)| k == "RESTIC_PASSWORD_FILE" && v == "/etc/backhaul/pw"));
        assert!(vars
            .iter()
            .any(|(k, v)| k == "RESTIC_REPOSITORY" && v == "sftp://host/backups"));
    }

    #[test]
    fn backup_summary_line_parses() {
        let line = r#"{"message_type":"summary","files_new":3,"snapshot_id":"deadbeef"}"#;
        let msg: BackupMessage = serde_json::from_str(line).unwrap();
        assert_eq!(msg.message_type, "summary");
        assert_eq!(msg.snapshot_id.as_deref(), Some("deadbeef"));
    }

    #[test]
    fn forget_builds_keep_counts_scoped_to_the_service_tag() {
        let policy = RetentionPolicy {
            daily: 7,
            weekly: 4,
            monthly: 6,
        };

        let args = forget_args(&TagSet::service("wiki"), &policy, true);
        assert_eq!(
            args,
            vec![
                "forget",
                "--tag",
                "wiki",
                "--group-by",
                "tags",
                "--keep-daily",
                "7",
                "--keep-weekly",
                "4",
                "--keep-monthly",
                "6",
                "--prune",
            ]
        );

        // without prune the data stays; only the snapshot records go
        let args = forget_args(&TagSet::service("wiki"), &policy, false);
        assert!(!args.contains(&"--prune".to_string()));
    }

    #[test]
    fn snapshot_json_parses_and_sorts() {
        let json = r#"[
            {"id":"bbb","short_id":"bbb","time":"2026-02-02T10:00:00Z","tags":["wiki"],"paths":["/data/wiki"],"hostname":"h"},
            {"id":"aaa","short_id":"aaa","time":"2026-01-01T10:00:00Z","tags":["wiki"],"paths":["/data/wiki"],"hostname":"h"}
        ]"#;
        let mut raw: Vec<RawSnapshot> = serde_json::from_str(json).unwrap();
        raw.sort_by_key(|s| s.time);
        assert_eq!(raw[0].id, "aaa");
        assert_eq!(raw[1].id, "bbb");
    }
}
