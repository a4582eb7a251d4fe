//! Snapshot store contract
//!
//! Thin trait over the remote encrypted snapshot backend so strategies and
//! orchestrators can be exercised against an in-memory store in tests. The
//! real implementation shells out to restic (see `utils::restic`).
//!
//! Artifacts are identified purely by tags: `{service, kind, resource name,
//! scope}`. Listing filters are AND-combined. The orchestrators never mutate
//! snapshot content; deletion happens only through `forget`.

use crate::config::RetentionPolicy;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::Path;

/// Artifact kind tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Database,
    Volume,
    Directory,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Database => f.write_str("database"),
            ArtifactKind::Volume => f.write_str("volume"),
            ArtifactKind::Directory => f.write_str("directory"),
        }
    }
}

/// Whether an artifact is the service's primary capture or an auxiliary one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactScope {
    Primary,
    Aux,
}

impl fmt::Display for ArtifactScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactScope::Primary => f.write_str("primary"),
            ArtifactScope::Aux => f.write_str("aux"),
        }
    }
}

/// Ordered set of snapshot tags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagSet(Vec<String>);

impl TagSet {
    /// Full artifact tag set: service, kind, resource name, scope
    pub fn artifact(
        service: &str,
        kind: ArtifactKind,
        resource: &str,
        scope: ArtifactScope,
    ) -> Self {
        Self(vec![
            service.to_string(),
            kind.to_string(),
            resource.to_string(),
            scope.to_string(),
        ])
    }

    /// Service-wide tag set; retention is always scoped this way so a prune
    /// can never cross services
    pub fn service(service: &str) -> Self {
        Self(vec![service.to_string()])
    }

    /// Add an extra tag (e.g. the database kind)
    pub fn with(mut self, tag: &str) -> Self {
        self.0.push(tag.to_string());
        self
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Comma-joined form: restic treats a comma-joined `--tag` value as an
    /// AND filter
    pub fn joined(&self) -> String {
        self.0.join(",")
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.joined())
    }
}

/// Snapshot metadata as reported by the store
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub id: String,
    pub short_id: String,
    pub time: DateTime<Utc>,
    pub tags: Vec<String>,
    pub paths: Vec<String>,
    pub hostname: String,
}

impl Snapshot {
    /// Whether this snapshot carries every tag in the set
    pub fn matches(&self, tags: &TagSet) -> bool {
        tags.as_slice().iter().all(|t| self.tags.contains(t))
    }
}

/// Contract consumed by strategies, retention, and orchestrators
pub trait SnapshotStore: Send + Sync {
    /// Create the repository if it does not exist yet
    fn ensure_initialized(&self) -> Result<()>;

    /// Snapshot a path under the given tags, returning the snapshot id
    fn backup(&self, path: &Path, tags: &TagSet) -> Result<String>;

    /// Snapshots matching all given tags, ascending by creation time
    fn snapshots(&self, tags: &TagSet) -> Result<Vec<Snapshot>>;

    /// Restore a snapshot's content under `target` (original absolute paths
    /// are recreated beneath it)
    fn restore(&self, snapshot_id: &str, target: &Path) -> Result<()>;

    /// Drop snapshots matching the tags outside the keep window
    fn forget(&self, tags: &TagSet, policy: &RetentionPolicy, prune: bool) -> Result<()>;

    /// Drop stale repository locks (after a failed run)
    fn unlock(&self) -> Result<()>;
}

/// In-memory store for tests: records every call, serves configured
/// snapshots, and can be told to fail backups.
#[allow(dead_code)]
pub mod mock {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Debug)]
    pub enum StoreCall {
        EnsureInitialized,
        Backup { path: String, tags: Vec<String> },
        Snapshots { tags: Vec<String> },
        Restore { snapshot_id: String, target: String },
        Forget { tags: Vec<String>, policy: RetentionPolicy, prune: bool },
        Unlock,
    }

    #[derive(Clone, Default)]
    pub struct MemoryStore {
        pub calls: Arc<Mutex<Vec<StoreCall>>>,
        snapshots: Arc<Mutex<Vec<Snapshot>>>,
        fail_backup_for: Arc<Mutex<Vec<String>>>,
        next_id: Arc<Mutex<u32>>,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Seed a snapshot with the given id, tags and timestamp
        pub fn with_snapshot(self, id: &str, tags: &TagSet, time: DateTime<Utc>) -> Self {
            self.snapshots.lock().unwrap().push(Snapshot {
                id: id.to_string(),
                short_id: id.chars().take(8).collect(),
                time,
                tags: tags.as_slice().to_vec(),
                paths: vec![],
                hostname: "testhost".to_string(),
            });
            self
        }

        /// Make `backup` fail whenever the tag set contains this tag
        pub fn failing_backup_for(self, tag: &str) -> Self {
            self.fail_backup_for.lock().unwrap().push(tag.to_string());
            self
        }

        pub fn calls(&self) -> Vec<StoreCall> {
            self.calls.lock().unwrap().clone()
        }

        pub fn backup_count(&self) -> usize {
            self.calls()
                .iter()
                .filter(|c| matches!(c, StoreCall::Backup { .. }))
                .count()
        }

        pub fn forget_calls(&self) -> Vec<StoreCall> {
            self.calls()
                .into_iter()
                .filter(|c| matches!(c, StoreCall::Forget { .. }))
                .collect()
        }

        pub fn restore_calls(&self) -> Vec<StoreCall> {
            self.calls()
                .into_iter()
                .filter(|c| matches!(c, StoreCall::Restore { .. }))
                .collect()
        }

        fn record(&self, call: StoreCall) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl SnapshotStore for MemoryStore {
        fn ensure_initialized(&self) -> Result<()> {
            self.record(StoreCall::EnsureInitialized);
            Ok(())
        }

        fn backup(&self, path: &Path, tags: &TagSet) -> Result<String> {
            self.record(StoreCall::Backup {
                path: path.display().to_string(),
                tags: tags.as_slice().to_vec(),
            });

            let failing = self.fail_backup_for.lock().unwrap();
            if tags.as_slice().iter().any(|t| failing.contains(t)) {
                anyhow::bail!("injected backup failure for tags {}", tags);
            }
            drop(failing);

            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            let id = format!("snap{:04}", *next);
            self.snapshots.lock().unwrap().push(Snapshot {
                id: id.clone(),
                short_id: id.clone(),
                time: Utc::now(),
                tags: tags.as_slice().to_vec(),
                paths: vec![path.display().to_string()],
                hostname: "testhost".to_string(),
            });
            Ok(id)
        }

        fn snapshots(&self, tags: &TagSet) -> Result<Vec<Snapshot>> {
            self.record(StoreCall::Snapshots {
                tags: tags.as_slice().to_vec(),
            });
            let mut matching: Vec<Snapshot> = self
                .snapshots
                .lock()
                .unwrap()
                .iter()
                .filter(|s| s.matches(tags))
                .cloned()
                .collect();
            matching.sort_by_key(|s| s.time);
            Ok(matching)
        }

        fn restore(&self, snapshot_id: &str, target: &Path) -> Result<()> {
            self.record(StoreCall::Restore {
                snapshot_id: snapshot_id.to_string(),
                target: target.display().to_string(),
            });
            let known = self
                .snapshots
                .lock()
                .unwrap()
                .iter()
                .any(|s| s.id == snapshot_id || s.short_id == snapshot_id);
            if !known {
                anyhow::bail!("unknown snapshot id: {}", snapshot_id);
            }
            std::fs::create_dir_all(target)?;
            Ok(())
        }

        fn forget(&self, tags: &TagSet, policy: &RetentionPolicy, prune: bool) -> Result<()> {
            self.record(StoreCall::Forget {
                tags: tags.as_slice().to_vec(),
                policy: *policy,
                prune,
            });
            Ok(())
        }

        fn unlock(&self) -> Result<()> {
            self.record(StoreCall::Unlock);
            Ok(())
        }
    }
}
