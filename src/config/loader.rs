use super::types::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read registry file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse registry file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Duplicate service name '{0}' in registry")]
    DuplicateService(String),

    #[error("Service '{0}' not found in registry")]
    ServiceNotFound(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Load and validate the registry from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let contents = fs::read_to_string(path)?;
    let config: Config = toml::from_str(&contents)?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &Config) -> Result<()> {
    if config.store.repository.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "Snapshot store repository is empty".to_string(),
        ));
    }

    if !config.store.password_file.exists() {
        return Err(ConfigError::ValidationError(format!(
            "Store password file does not exist: {:?}",
            config.store.password_file
        )));
    }

    for service in &config.services {
        validate_service(service)?;
    }

    Ok(())
}

fn validate_service(service: &ServiceSpec) -> Result<()> {
    if service.name.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "Service with empty name".to_string(),
        ));
    }

    match &service.capture {
        CaptureSpec::Postgres { .. } | CaptureSpec::Mariadb { .. } => {
            // Credentials come from the compose stack's deploy-time env file
            if service.compose.is_none() && !service.allow_passwordless {
                return Err(ConfigError::ValidationError(format!(
                    "Service '{}': database capture needs 'compose' to resolve credentials \
                     (or allow_passwordless = true)",
                    service.name
                )));
            }
            if service.requires_quiesce {
                return Err(ConfigError::ValidationError(format!(
                    "Service '{}': requires_quiesce applies to volume-set captures only \
                     (database dumps are consistent while running)",
                    service.name
                )));
            }
        }
        CaptureSpec::VolumeSet { volumes } => {
            if volumes.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "Service '{}': volume-set capture with no volumes",
                    service.name
                )));
            }
            // Volume restore is always cold; the stack must be addressable
            if service.compose.is_none() {
                return Err(ConfigError::ValidationError(format!(
                    "Service '{}': volume-set capture needs 'compose' to stop/start the stack",
                    service.name
                )));
            }
        }
        CaptureSpec::Directory { path } => {
            if !path.is_absolute() {
                return Err(ConfigError::ValidationError(format!(
                    "Service '{}': directory path must be absolute: {:?}",
                    service.name, path
                )));
            }
            if service.requires_quiesce && service.compose.is_none() {
                return Err(ConfigError::ValidationError(format!(
                    "Service '{}': requires_quiesce needs 'compose'",
                    service.name
                )));
            }
        }
    }

    for dir in &service.aux_directories {
        if !dir.is_absolute() {
            return Err(ConfigError::ValidationError(format!(
                "Service '{}': auxiliary directory must be absolute: {:?}",
                service.name, dir
            )));
        }
    }

    Ok(())
}

/// Read-only view of the validated service registry
#[derive(Debug, Clone)]
pub struct ServiceRegistry {
    services: BTreeMap<String, ServiceSpec>,
}

impl ServiceRegistry {
    /// Build the registry, rejecting duplicate names
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut services = BTreeMap::new();
        for service in &config.services {
            if services
                .insert(service.name.clone(), service.clone())
                .is_some()
            {
                return Err(ConfigError::DuplicateService(service.name.clone()));
            }
        }
        Ok(Self { services })
    }

    pub fn lookup(&self, name: &str) -> Result<&ServiceSpec> {
        self.services
            .get(name)
            .ok_or_else(|| ConfigError::ServiceNotFound(name.to_string()))
    }

    /// Services, optionally filtered by priority class, in stable
    /// (priority, name) order for reproducible output
    pub fn by_priority(&self, priority: Option<Priority>) -> Vec<&ServiceSpec> {
        let mut services: Vec<&ServiceSpec> = self
            .services
            .values()
            .filter(|s| priority.map_or(true, |p| s.priority == p))
            .collect();
        services.sort_by(|a, b| (a.priority, &a.name).cmp(&(b.priority, &b.name)));
        services
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// Append a new service entry to the registry file (interactive `add`)
pub fn append_service<P: AsRef<Path>>(path: P, spec: &ServiceSpec) -> Result<()> {
    let config = load_config(path.as_ref())?;
    if config.services.iter().any(|s| s.name == spec.name) {
        return Err(ConfigError::DuplicateService(spec.name.clone()));
    }
    validate_service(spec)?;

    #[derive(serde::Serialize)]
    struct Entry<'a> {
        services: Vec<&'a ServiceSpec>,
    }

    let block = toml::to_string_pretty(&Entry {
        services: vec![spec],
    })
    .map_err(|e| ConfigError::ValidationError(format!("Failed to serialize service: {}", e)))?;

    let mut contents = fs::read_to_string(path.as_ref())?;
    if !contents.ends_with('\n') {
        contents.push('\n');
    }
    contents.push('\n');
    contents.push_str(&block);
    fs::write(path.as_ref(), contents)?;

    Ok(())
}
