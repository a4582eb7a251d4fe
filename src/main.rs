use anyhow::{Context, Result};
use backhaul::config::{
    self, load_config, CaptureSpec, Priority, ServiceRegistry, ServiceSpec,
};
use backhaul::managers::{
    self, BackupOrchestrator, NotificationManager, RestoreOrchestrator, RunLedger,
};
use backhaul::retention::RetentionEngine;
use backhaul::strategies::SnapshotSelector;
use backhaul::utils::restic::ResticStore;
use backhaul::utils::runtime::DockerRuntime;
use backhaul::utils::store::{SnapshotStore, TagSet};
use clap::{Parser, Subcommand};
use dialoguer::{Confirm, Input, Select};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "backhaul")]
#[command(about = "Backup orchestration for compose-based deployments", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file (default: ~/.config/backhaul/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured services, most critical first
    List {
        /// Only services of this priority class
        #[arg(long, value_enum)]
        priority: Option<Priority>,
    },

    /// Show one service's full configuration and effective retention
    Info {
        /// Service name
        service: String,
    },

    /// Back up one service
    Backup {
        /// Service name
        service: String,
    },

    /// Back up every service, isolating per-service failures
    BackupAll {
        /// Only services of this priority class
        #[arg(long, value_enum)]
        priority: Option<Priority>,
    },

    /// Restore a service from a snapshot
    Restore {
        /// Service name
        service: String,

        /// Snapshot id, or "latest" (default)
        snapshot: Option<String>,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// List a service's snapshots
    Snapshots {
        /// Service name
        service: String,
    },

    /// Interactively add a service to the configuration file
    Add {
        /// Service name
        service: String,
    },
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("backhaul")
        .join("config.toml")
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(default_config_path);

    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            managers::logging::init_console_logging();
            eprintln!("Failed to load config from {:?}: {}", config_path, e);
            std::process::exit(1);
        }
    };
    let _log_guard = managers::logging::init_logging(&config.global)?;

    let registry = ServiceRegistry::from_config(&config)?;
    let retention = RetentionEngine::new(config.retention.clone());
    let notifier = NotificationManager::new(Some(config.notifications.clone()));

    match cli.command {
        Commands::List { priority } => {
            for spec in registry.by_priority(priority) {
                println!(
                    "{:<20} {:<10} {}",
                    spec.name,
                    spec.priority,
                    spec.capture.type_name()
                );
            }
        }

        Commands::Info { service } => {
            let spec = registry.lookup(&service)?;
            print_info(spec, &retention);
        }

        Commands::Backup { service } => {
            let spec = registry.lookup(&service)?;
            let store = open_store(&config)?;
            let runtime = DockerRuntime::new();
            let orchestrator =
                BackupOrchestrator::new(&store, &runtime, &retention, &notifier, &config.global);

            let outcome = orchestrator.backup_service(spec);
            if !outcome.succeeded {
                eprintln!(
                    "Backup of '{}' failed: {}",
                    service,
                    outcome.failure_reason.as_deref().unwrap_or("unknown error")
                );
                std::process::exit(1);
            }
            println!(
                "✓ Backed up '{}' ({} snapshot(s))",
                service,
                outcome.snapshot_ids.len()
            );
            for warning in &outcome.warnings {
                println!("  warning: {warning}");
            }
        }

        Commands::BackupAll { priority } => {
            let store = open_store(&config)?;
            let runtime = DockerRuntime::new();
            let orchestrator =
                BackupOrchestrator::new(&store, &runtime, &retention, &notifier, &config.global);

            let services = registry.by_priority(priority);
            let ledger = orchestrator.backup_all(&services);
            print_ledger(&ledger);
            if ledger.has_failures() {
                std::process::exit(1);
            }
        }

        Commands::Restore {
            service,
            snapshot,
            yes,
        } => {
            let spec = registry.lookup(&service)?;
            let store = open_store(&config)?;
            let runtime = DockerRuntime::new();
            let orchestrator =
                RestoreOrchestrator::new(&store, &runtime, &notifier, &config.global);

            if !orchestrator.confirm(spec, yes)? {
                println!("Restore cancelled");
                return Ok(());
            }

            let selector = SnapshotSelector::parse(snapshot.as_deref());
            let report = orchestrator.restore_service(spec, &selector)?;
            for line in &report.restored {
                println!("✓ restored {line}");
            }
            for warning in &report.warnings {
                println!("  warning: {warning}");
            }
        }

        Commands::Snapshots { service } => {
            let spec = registry.lookup(&service)?;
            let store = open_store(&config)?;
            let snapshots = store.snapshots(&TagSet::service(&spec.name))?;
            if snapshots.is_empty() {
                println!("No snapshots for '{}'", service);
            } else {
                println!("{:<12} {:<22} TAGS", "ID", "TIME");
                for snap in snapshots {
                    println!(
                        "{:<12} {:<22} {}",
                        snap.short_id,
                        snap.time.format("%Y-%m-%d %H:%M:%S"),
                        snap.tags.join(",")
                    );
                }
            }
        }

        Commands::Add { service } => {
            if registry.lookup(&service).is_ok() {
                eprintln!("Service '{}' already exists in {:?}", service, config_path);
                std::process::exit(1);
            }
            let spec = prompt_service(service)?;
            config::append_service(&config_path, &spec)?;
            println!("✓ Added '{}' to {:?}", spec.name, config_path);
        }
    }

    Ok(())
}

fn open_store(config: &backhaul::Config) -> Result<ResticStore> {
    let store = ResticStore::new(&config.store);
    store
        .ensure_initialized()
        .context("failed to initialize snapshot repository")?;
    Ok(store)
}

fn print_info(spec: &ServiceSpec, retention: &RetentionEngine) {
    println!("Service:   {}", spec.name);
    println!("Priority:  {}", spec.priority);
    println!("Capture:   {}", spec.capture.type_name());
    if let Some(compose) = &spec.compose {
        println!("Compose:   {}", compose.display());
    }
    println!("Quiesce:   {}", spec.requires_quiesce);
    if !spec.aux_volumes.is_empty() {
        println!("Aux vols:  {}", spec.aux_volumes.join(", "));
    }
    if !spec.aux_directories.is_empty() {
        let dirs: Vec<String> = spec
            .aux_directories
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        println!("Aux dirs:  {}", dirs.join(", "));
    }
    let policy = retention.effective_policy(spec);
    println!(
        "Retention: {} daily / {} weekly / {} monthly",
        policy.daily, policy.weekly, policy.monthly
    );
}

fn print_ledger(ledger: &RunLedger) {
    for outcome in &ledger.outcomes {
        if outcome.succeeded {
            println!(
                "✓ {} ({} snapshot(s))",
                outcome.service,
                outcome.snapshot_ids.len()
            );
        } else {
            println!(
                "✗ {}: {}",
                outcome.service,
                outcome.failure_reason.as_deref().unwrap_or("unknown error")
            );
        }
    }
    println!("{}", ledger.summary());
}

/// Walk through the capture configuration for a new service
fn prompt_service(name: String) -> Result<ServiceSpec> {
    let kinds = ["postgres", "mariadb", "volume-set", "directory"];
    let kind = Select::new()
        .with_prompt("Capture type")
        .items(&kinds)
        .default(0)
        .interact()?;

    let capture = match kinds[kind] {
        "postgres" | "mariadb" => {
            let container: String = Input::new()
                .with_prompt("Database container name")
                .interact_text()?;
            let database: String = Input::new()
                .with_prompt("Database name")
                .default(name.clone())
                .interact_text()?;
            let user: String = Input::new()
                .with_prompt("Database user")
                .default(name.clone())
                .interact_text()?;
            if kinds[kind] == "postgres" {
                CaptureSpec::Postgres {
                    container,
                    database,
                    user,
                }
            } else {
                CaptureSpec::Mariadb {
                    container,
                    database,
                    user,
                }
            }
        }
        "volume-set" => {
            let volumes: String = Input::new()
                .with_prompt("Volume names (comma-separated)")
                .interact_text()?;
            CaptureSpec::VolumeSet {
                volumes: volumes
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            }
        }
        _ => {
            let path: String = Input::new()
                .with_prompt("Absolute directory path")
                .interact_text()?;
            CaptureSpec::Directory { path: path.into() }
        }
    };

    let priorities = [
        Priority::Critical,
        Priority::High,
        Priority::Medium,
        Priority::Low,
    ];
    let priority_labels: Vec<String> = priorities.iter().map(|p| p.to_string()).collect();
    let priority = priorities[Select::new()
        .with_prompt("Priority class")
        .items(&priority_labels)
        .default(2)
        .interact()?];

    let compose: String = Input::new()
        .with_prompt("Compose directory (relative to compose root, empty for none)")
        .allow_empty(true)
        .interact_text()?;
    let compose = if compose.is_empty() {
        None
    } else {
        Some(PathBuf::from(compose))
    };

    let requires_quiesce = matches!(capture, CaptureSpec::VolumeSet { .. })
        && Confirm::new()
            .with_prompt("Stop the stack while capturing volumes?")
            .default(false)
            .interact()?;

    Ok(ServiceSpec {
        name,
        priority,
        capture,
        compose,
        requires_quiesce,
        aux_volumes: Vec::new(),
        aux_directories: Vec::new(),
        allow_passwordless: false,
        retention: None,
    })
}
