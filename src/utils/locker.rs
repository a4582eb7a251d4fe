//! Per-service file locking
//!
//! The compose stack's running/stopped state is a shared mutable resource:
//! only one orchestrator operation (backup or restore) may hold it per
//! service at a time. The lock file lives in the system temp dir and is held
//! for the duration of the operation.

use anyhow::{Context, Result};
use fd_lock::{RwLock, RwLockWriteGuard};
use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use tracing::{debug, info};

/// Lock file for one service's orchestrator operations
pub struct ServiceLock {
    lock: RwLock<File>,
    path: PathBuf,
}

impl ServiceLock {
    /// Open (creating if needed) the lock file for a service
    pub fn open(service_name: &str) -> Result<Self> {
        let path = std::env::temp_dir().join(format!("backhaul-{}.lock", service_name));

        debug!("Opening lock file: {:?}", path);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("Failed to open lock file: {:?}", path))?;

        Ok(Self {
            lock: RwLock::new(file),
            path,
        })
    }

    /// Try to take the exclusive lock; fails if another operation holds it
    pub fn try_acquire(&mut self) -> Result<RwLockWriteGuard<'_, File>> {
        let path = self.path.clone();
        let guard = self.lock.try_write().with_context(|| {
            format!(
                "Another backup/restore operation holds the lock ({:?})",
                path
            )
        })?;
        info!("Acquired service lock: {:?}", self.path);
        Ok(guard)
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}
