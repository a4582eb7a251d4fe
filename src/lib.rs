//! Backhaul
//!
//! Backup orchestration for compose-based self-hosted deployments: captures
//! databases, named volumes, and host directories into a single encrypted
//! restic repository, applies per-service retention, and restores any of it
//! back into a running stack.

pub mod config;
pub mod managers;
pub mod retention;
pub mod strategies;
pub mod utils;

// Re-export commonly used types
pub use config::{load_config, Config, ServiceRegistry, ServiceSpec};
pub use managers::backup::{BackupOrchestrator, RunLedger};
pub use managers::logging::{init_console_logging, init_logging, LogGuard};
pub use managers::notification::NotificationManager;
pub use managers::restore::RestoreOrchestrator;
pub use retention::RetentionEngine;
pub use strategies::SnapshotSelector;
