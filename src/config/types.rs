use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub global: GlobalConfig,
    pub store: StoreConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    /// Per-priority-class retention keep-counts, e.g. `[retention.critical]`
    #[serde(default)]
    pub retention: HashMap<Priority, ClassRetention>,
    #[serde(default)]
    pub services: Vec<ServiceSpec>,
}

/// Global settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GlobalConfig {
    /// Base directory under which compose stacks live; relative `compose`
    /// entries on services are resolved against it
    pub compose_root: PathBuf,

    /// Root for run-scoped scratch directories
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,

    /// Logging configuration
    #[serde(default = "default_log_directory")]
    pub log_directory: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_max_files")]
    pub log_max_files: u32,
}

/// Snapshot store (restic repository) settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    /// Repository URL (sftp://, s3:, local path, ...)
    pub repository: String,
    /// File holding the repository password
    pub password_file: PathBuf,
}

/// Push notification settings (ntfy-style endpoint)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotificationConfig {
    /// Full topic URL; empty disables notifications
    #[serde(default)]
    pub url: String,

    /// Optional bearer token
    #[serde(default)]
    pub token: Option<String>,

    /// Severities that actually get pushed
    #[serde(default = "default_notify_on")]
    pub notify_on: Vec<Severity>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            token: None,
            notify_on: default_notify_on(),
        }
    }
}

/// Notification severity
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Failure,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Success => "success",
            Severity::Warning => "warning",
            Severity::Failure => "failure",
        };
        f.write_str(s)
    }
}

/// Priority class, drives default retention. Ordering is most- to
/// least-critical so sorted listings put critical services first.
#[derive(
    Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        };
        f.write_str(s)
    }
}

/// One managed service
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ServiceSpec {
    /// Unique name; also the tag namespace in the snapshot store
    pub name: String,

    pub priority: Priority,

    /// Primary capture shape; immutable once snapshots exist for the service
    pub capture: CaptureSpec,

    /// Compose stack location (absolute, or relative to `global.compose_root`);
    /// resolves credentials for database types and drives stack stop/start
    #[serde(default)]
    pub compose: Option<PathBuf>,

    /// Stop the owning stack around volume-set capture
    #[serde(default)]
    pub requires_quiesce: bool,

    /// Extra volumes captured/restored as independently tagged artifacts
    #[serde(default)]
    pub aux_volumes: Vec<String>,

    /// Extra directories, same independence property
    #[serde(default)]
    pub aux_directories: Vec<PathBuf>,

    /// Explicit opt-in for passwordless database configurations
    #[serde(default)]
    pub allow_passwordless: bool,

    /// Keep-counts superseding the priority-class defaults
    #[serde(default)]
    pub retention: Option<ClassRetention>,
}

impl ServiceSpec {
    /// Resolve the compose stack directory against the global compose root.
    pub fn compose_dir(&self, compose_root: &Path) -> Option<PathBuf> {
        self.compose.as_ref().map(|p| {
            if p.is_absolute() {
                p.clone()
            } else {
                compose_root.join(p)
            }
        })
    }
}

/// Capture shape, one per service type. The tag selects the capture strategy.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum CaptureSpec {
    Postgres {
        container: String,
        database: String,
        user: String,
    },
    Mariadb {
        container: String,
        database: String,
        user: String,
    },
    VolumeSet {
        volumes: Vec<String>,
    },
    Directory {
        path: PathBuf,
    },
}

impl CaptureSpec {
    pub fn type_name(&self) -> &'static str {
        match self {
            CaptureSpec::Postgres { .. } => "postgres",
            CaptureSpec::Mariadb { .. } => "mariadb",
            CaptureSpec::VolumeSet { .. } => "volume-set",
            CaptureSpec::Directory { .. } => "directory",
        }
    }

    pub fn database_kind(&self) -> Option<DatabaseKind> {
        match self {
            CaptureSpec::Postgres { .. } => Some(DatabaseKind::Postgres),
            CaptureSpec::Mariadb { .. } => Some(DatabaseKind::Mariadb),
            _ => None,
        }
    }
}

/// Database engine kind for the two logical-dump strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseKind {
    Postgres,
    Mariadb,
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseKind::Postgres => f.write_str("postgres"),
            DatabaseKind::Mariadb => f.write_str("mariadb"),
        }
    }
}

/// Partial keep-counts, either a class default table or a service override
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ClassRetention {
    #[serde(default)]
    pub daily: Option<u32>,
    #[serde(default)]
    pub weekly: Option<u32>,
    #[serde(default)]
    pub monthly: Option<u32>,
}

/// Fully resolved keep-counts handed to the snapshot store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub daily: u32,
    pub weekly: u32,
    pub monthly: u32,
}

// Default value functions

fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir().join("backhaul")
}
fn default_log_directory() -> PathBuf {
    PathBuf::from("~/logs")
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_max_files() -> u32 {
    10
}
fn default_notify_on() -> Vec<Severity> {
    vec![Severity::Failure, Severity::Warning]
}
