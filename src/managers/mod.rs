//! Orchestration layer: backup and restore drivers, notifications, logging

pub mod backup;
pub mod logging;
pub mod notification;
pub mod restore;

pub use backup::{BackupOrchestrator, BackupOutcome, RunLedger};
pub use notification::NotificationManager;
pub use restore::RestoreOrchestrator;
