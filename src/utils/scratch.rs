//! Run-scoped scratch directories
//!
//! Capture and restore stage temporary artifacts (dumps, restored trees)
//! under a service- and timestamp-scoped directory so concurrent runs on
//! different services never collide. The directory is removed when the
//! handle drops; no scratch content survives the run.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    /// Create `<root>/<service>-<unix-ts>/`
    pub fn create(root: &Path, service_name: &str) -> Result<Self> {
        let stamp = chrono::Utc::now().timestamp();
        let path = root.join(format!("{}-{}", service_name, stamp));
        std::fs::create_dir_all(&path)
            .with_context(|| format!("Failed to create scratch directory: {:?}", path))?;
        debug!("Created scratch directory: {:?}", path);
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A sub-path inside the scratch directory
    pub fn join(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            warn!("Failed to clean up scratch directory {:?}: {}", self.path, e);
        } else {
            debug!("Removed scratch directory: {:?}", self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn scratch_dir_is_removed_on_drop() {
        let root = TempDir::new().unwrap();
        let path;
        {
            let scratch = ScratchDir::create(root.path(), "wiki").unwrap();
            path = scratch.path().to_path_buf();
            std::fs::write(scratch.join("dump.sql.gz"), b"x").unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn scratch_dirs_are_service_scoped() {
        let root = TempDir::new().unwrap();
        let a = ScratchDir::create(root.path(), "alpha").unwrap();
        let b = ScratchDir::create(root.path(), "beta").unwrap();
        assert_ne!(a.path(), b.path());
    }
}
