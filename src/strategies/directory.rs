//! Host directory capture and restore.
//!
//! The simplest capture kind: snapshot an absolute host path directly. The
//! restore is staged, never in place. Content lands in scratch first, then
//! the live directory is swapped aside and replaced, so an interrupted
//! restore leaves either the old tree or the new one, not a blend.

use super::{
    copy_tree, count_files, select_snapshot, CaptureError, CaptureReport, RestoreError,
    RestoreReport, SnapshotSelector, StrategyContext,
};
use crate::config::{CaptureSpec, ServiceSpec};
use crate::utils::scratch::ScratchDir;
use crate::utils::store::{ArtifactKind, ArtifactScope, TagSet};
use std::path::Path;
use tracing::{info, warn};

pub struct DirectoryStrategy;

/// Snapshot one host directory, tagged by its basename
pub(crate) fn capture_directory(
    ctx: &StrategyContext<'_>,
    service_name: &str,
    path: &Path,
    scope: ArtifactScope,
) -> Result<String, CaptureError> {
    let resource = resource_name(path);
    let tags = TagSet::artifact(service_name, ArtifactKind::Directory, &resource, scope);
    let id = ctx.store.backup(path, &tags).map_err(CaptureError::Store)?;
    info!(service = service_name, path = %path.display(), snapshot = %id, "directory snapshot stored");
    Ok(id)
}

/// Staged restore of one directory artifact: restore into scratch, move the
/// live tree aside, move the restored tree in, then drop the old tree.
pub(crate) fn restore_directory_artifact(
    ctx: &StrategyContext<'_>,
    service_name: &str,
    path: &Path,
    scope: ArtifactScope,
    selector: &SnapshotSelector,
) -> Result<RestoreReport, RestoreError> {
    let resource = resource_name(path);
    let tags = TagSet::artifact(service_name, ArtifactKind::Directory, &resource, scope);
    let snapshot = select_snapshot(ctx.store, &tags, selector)?;

    let scratch =
        ScratchDir::create(ctx.scratch_root, service_name).map_err(RestoreError::Scratch)?;
    let restored_root = scratch.join("restored");
    ctx.store
        .restore(&snapshot.id, &restored_root)
        .map_err(RestoreError::Store)?;

    let source = restored_root.join(path.to_string_lossy().trim_start_matches('/'));

    let mut report = RestoreReport::default();
    let mut warnings = Vec::new();
    let restored_files = swap_into_place(&source, path)?;
    if restored_files == 0 {
        let msg = format!("directory {:?} restored with zero files", path);
        warn!("{}", msg);
        warnings.push(msg);
    }

    info!(path = %path.display(), snapshot = %snapshot.short_id, files = restored_files, "directory restored");
    report.warnings = warnings;
    report.restored.push(format!(
        "directory {:?} from snapshot {}",
        path, snapshot.short_id
    ));
    Ok(report)
}

/// Replace `dest` with the tree at `source`, keeping the old tree until the
/// new one is fully in place. Copies instead of renaming when scratch and
/// destination sit on different filesystems.
fn swap_into_place(source: &Path, dest: &Path) -> Result<u64, RestoreError> {
    let parent = dest
        .parent()
        .ok_or_else(|| RestoreError::Io(std::io::Error::other("destination has no parent")))?;
    std::fs::create_dir_all(parent)?;

    let name = resource_name(dest);
    let stamp = chrono::Utc::now().timestamp();
    let incoming = parent.join(format!(".{name}.incoming-{stamp}"));
    let outgoing = parent.join(format!(".{name}.outgoing-{stamp}"));

    if source.exists() {
        if std::fs::rename(source, &incoming).is_err() {
            copy_tree(source, &incoming)?;
        }
    } else {
        // snapshot held no content for this path
        std::fs::create_dir_all(&incoming)?;
    }

    if dest.exists() {
        std::fs::rename(dest, &outgoing)?;
    }
    if let Err(e) = std::fs::rename(&incoming, dest) {
        // put the old tree back before surfacing the failure
        if outgoing.exists() {
            let _ = std::fs::rename(&outgoing, dest);
        }
        return Err(e.into());
    }
    if outgoing.exists() {
        std::fs::remove_dir_all(&outgoing)?;
    }

    Ok(count_files(dest)?)
}

fn resource_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "root".to_string())
}

impl DirectoryStrategy {
    fn path(spec: &ServiceSpec) -> &Path {
        match &spec.capture {
            CaptureSpec::Directory { path } => path,
            _ => unreachable!("directory strategy dispatched for non-directory capture"),
        }
    }
}

impl super::CaptureStrategy for DirectoryStrategy {
    fn name(&self) -> &'static str {
        "directory"
    }

    fn capture(
        &self,
        ctx: &StrategyContext<'_>,
        spec: &ServiceSpec,
    ) -> Result<CaptureReport, CaptureError> {
        let id = capture_directory(ctx, &spec.name, Self::path(spec), ArtifactScope::Primary)?;
        Ok(CaptureReport {
            snapshot_ids: vec![id],
            warnings: Vec::new(),
        })
    }

    fn restore(
        &self,
        ctx: &StrategyContext<'_>,
        spec: &ServiceSpec,
        selector: &SnapshotSelector,
    ) -> Result<RestoreReport, RestoreError> {
        restore_directory_artifact(
            ctx,
            &spec.name,
            Self::path(spec),
            ArtifactScope::Primary,
            selector,
        )
    }
}
