//! Capture strategies
//!
//! One strategy per capture type. Each knows how to turn a service's declared
//! data locations into point-in-time snapshot store artifacts, and how to
//! reverse that into a running state. Auxiliary volumes/directories reuse the
//! same per-kind logic but always produce independently tagged snapshot
//! generations, never merged into the primary artifact.

pub mod database;
pub mod directory;
pub mod volume;

use crate::config::{CaptureSpec, DatabaseKind, ServiceSpec};
use crate::utils::runtime::ContainerRuntime;
use crate::utils::secrets::CredentialError;
use crate::utils::store::{ArtifactScope, Snapshot, SnapshotStore, TagSet};
use std::path::Path;
use thiserror::Error;
use tracing::warn;

/// Everything a strategy needs from the outside world
pub struct StrategyContext<'a> {
    pub store: &'a dyn SnapshotStore,
    pub runtime: &'a dyn ContainerRuntime,
    /// Base for resolving relative compose locations
    pub compose_root: &'a Path,
    /// Root for run-scoped scratch directories
    pub scratch_root: &'a Path,
}

/// Which snapshot a restore targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotSelector {
    Latest,
    Id(String),
}

impl SnapshotSelector {
    pub fn parse(arg: Option<&str>) -> Self {
        match arg {
            None => SnapshotSelector::Latest,
            Some(s) if s.eq_ignore_ascii_case("latest") => SnapshotSelector::Latest,
            Some(s) => SnapshotSelector::Id(s.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("service '{0}' has no compose location")]
    MissingCompose(String),

    #[error("volume '{0}' does not exist")]
    VolumeNotFound(String),

    #[error("dump failed: {0}")]
    Dump(#[source] anyhow::Error),

    #[error("snapshot upload failed: {0}")]
    Store(#[source] anyhow::Error),

    #[error("container runtime operation failed: {0}")]
    Runtime(#[source] anyhow::Error),

    #[error("scratch directory setup failed: {0}")]
    Scratch(#[source] anyhow::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum RestoreError {
    #[error("could not take the service lock: {0}")]
    Locked(#[source] anyhow::Error),

    #[error("no snapshot found matching tags [{0}]")]
    NoSnapshot(String),

    #[error("restored dump {path:?} is implausibly small ({size} bytes); refusing to replay")]
    CorruptDump { path: std::path::PathBuf, size: u64 },

    #[error("service '{0}' has no compose location")]
    MissingCompose(String),

    #[error("snapshot store operation failed: {0}")]
    Store(#[source] anyhow::Error),

    #[error("container runtime operation failed: {0}")]
    Runtime(#[source] anyhow::Error),

    #[error("scratch directory setup failed: {0}")]
    Scratch(#[source] anyhow::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of a capture: the snapshot generation(s) created plus any
/// non-fatal findings
#[derive(Debug, Default)]
pub struct CaptureReport {
    pub snapshot_ids: Vec<String>,
    pub warnings: Vec<String>,
}

/// Result of a restore: human-readable summaries of what was restored plus
/// any non-fatal findings (zero-table/zero-file smoke checks land here)
#[derive(Debug, Default)]
pub struct RestoreReport {
    pub restored: Vec<String>,
    pub warnings: Vec<String>,
}

impl RestoreReport {
    pub fn merge(&mut self, other: RestoreReport) {
        self.restored.extend(other.restored);
        self.warnings.extend(other.warnings);
    }
}

/// A capture strategy produces a restorable artifact for a service and can
/// reverse it into a running state
pub trait CaptureStrategy {
    fn name(&self) -> &'static str;

    fn capture(
        &self,
        ctx: &StrategyContext<'_>,
        spec: &ServiceSpec,
    ) -> Result<CaptureReport, CaptureError>;

    fn restore(
        &self,
        ctx: &StrategyContext<'_>,
        spec: &ServiceSpec,
        selector: &SnapshotSelector,
    ) -> Result<RestoreReport, RestoreError>;
}

/// Pick the strategy for a service's declared capture type
pub fn strategy_for(capture: &CaptureSpec) -> Box<dyn CaptureStrategy> {
    match capture {
        CaptureSpec::Postgres { .. } => {
            Box::new(database::DatabaseStrategy::new(DatabaseKind::Postgres))
        }
        CaptureSpec::Mariadb { .. } => {
            Box::new(database::DatabaseStrategy::new(DatabaseKind::Mariadb))
        }
        CaptureSpec::VolumeSet { .. } => Box::new(volume::VolumeSetStrategy),
        CaptureSpec::Directory { .. } => Box::new(directory::DirectoryStrategy),
    }
}

/// Resolve a selector against the snapshots matching `tags`.
pub(crate) fn select_snapshot(
    store: &dyn SnapshotStore,
    tags: &TagSet,
    selector: &SnapshotSelector,
) -> Result<Snapshot, RestoreError> {
    let snapshots = store.snapshots(tags).map_err(RestoreError::Store)?;

    match selector {
        SnapshotSelector::Latest => snapshots
            .into_iter()
            .last()
            .ok_or_else(|| RestoreError::NoSnapshot(tags.joined())),
        SnapshotSelector::Id(id) => snapshots
            .into_iter()
            .find(|s| s.id.starts_with(id.as_str()) || s.short_id == *id)
            .ok_or_else(|| RestoreError::NoSnapshot(format!("{} id={}", tags.joined(), id))),
    }
}

/// Capture every auxiliary volume and directory as independently tagged
/// artifacts. A failure here fails the service's backup as a whole; the
/// warn-and-skip tolerance applies to restore only.
pub fn capture_aux_artifacts(
    ctx: &StrategyContext<'_>,
    spec: &ServiceSpec,
) -> Result<CaptureReport, CaptureError> {
    let mut report = CaptureReport::default();

    for vol in &spec.aux_volumes {
        let id = volume::capture_volume(ctx, &spec.name, vol, ArtifactScope::Aux)?;
        report.snapshot_ids.push(id);
    }

    for dir in &spec.aux_directories {
        let id = directory::capture_directory(ctx, &spec.name, dir, ArtifactScope::Aux)?;
        report.snapshot_ids.push(id);
    }

    Ok(report)
}

/// Restore the latest auxiliary artifacts. Each sub-step is independently
/// caught: a missing or failing auxiliary restore warns and skips, because
/// the primary artifact is the operation's critical path. Volume restores
/// are cold, so the owning stack is cycled around the volume loop.
pub fn restore_aux_artifacts(ctx: &StrategyContext<'_>, spec: &ServiceSpec) -> RestoreReport {
    let mut report = RestoreReport::default();

    if !spec.aux_volumes.is_empty() {
        restore_aux_volumes(ctx, spec, &mut report);
    }

    for dir in &spec.aux_directories {
        match directory::restore_directory_artifact(
            ctx,
            &spec.name,
            dir,
            ArtifactScope::Aux,
            &SnapshotSelector::Latest,
        ) {
            Ok(sub) => report.merge(sub),
            Err(e) => {
                let msg = format!("auxiliary directory {:?} not restored: {}", dir, e);
                warn!("{}", msg);
                report.warnings.push(msg);
            }
        }
    }

    report
}

/// Stop the owning compose stack, restore every auxiliary volume into its
/// mountpoint, and restart the stack. Without a compose location or with a
/// stack that refuses to stop, the volumes are skipped with a warning rather
/// than written under a running container.
fn restore_aux_volumes(ctx: &StrategyContext<'_>, spec: &ServiceSpec, report: &mut RestoreReport) {
    let Some(compose_dir) = spec.compose_dir(ctx.compose_root) else {
        let msg = format!(
            "auxiliary volumes of '{}' not restored: no compose location to stop the stack",
            spec.name
        );
        warn!("{}", msg);
        report.warnings.push(msg);
        return;
    };

    let _quiesce = match volume::QuiesceGuard::stop(ctx.runtime, &compose_dir) {
        Ok(guard) => guard,
        Err(e) => {
            let msg = format!(
                "auxiliary volumes of '{}' not restored: could not stop the stack: {}",
                spec.name, e
            );
            warn!("{}", msg);
            report.warnings.push(msg);
            return;
        }
    };

    for vol in &spec.aux_volumes {
        match volume::restore_volume_artifact(
            ctx,
            spec,
            vol,
            ArtifactScope::Aux,
            &SnapshotSelector::Latest,
        ) {
            Ok(sub) => report.merge(sub),
            Err(e) => {
                let msg = format!("auxiliary volume '{}' not restored: {}", vol, e);
                warn!("{}", msg);
                report.warnings.push(msg);
            }
        }
    }
}

/// Copy a tree, returning the number of files copied. Symlinks are
/// recreated, not followed.
pub(crate) fn copy_tree(src: &Path, dst: &Path) -> std::io::Result<u64> {
    std::fs::create_dir_all(dst)?;
    let mut count = 0u64;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            count += copy_tree(&entry.path(), &target)?;
        } else if file_type.is_symlink() {
            let link = std::fs::read_link(entry.path())?;
            #[cfg(unix)]
            std::os::unix::fs::symlink(link, &target)?;
            count += 1;
        } else {
            std::fs::copy(entry.path(), &target)?;
            count += 1;
        }
    }
    Ok(count)
}

/// Number of regular files under a path
pub(crate) fn count_files(path: &Path) -> std::io::Result<u64> {
    let mut count = 0u64;
    if !path.exists() {
        return Ok(0);
    }
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            count += count_files(&entry.path())?;
        } else {
            count += 1;
        }
    }
    Ok(count)
}

/// Remove a directory's contents without removing the directory itself
/// (mountpoints must stay in place)
pub(crate) fn clear_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
        return Ok(());
    }
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            std::fs::remove_dir_all(entry.path())?;
        } else {
            std::fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}
