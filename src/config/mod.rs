//! Configuration store
//!
//! Loads and validates the declarative service registry from a TOML file.
//! Services are an array of tables so duplicate names are representable in
//! the input and rejected with a typed error at load time. The capture shape
//! is an internally-tagged enum keyed by `type`, so a service has exactly one
//! primary capture shape by construction.
//!
//! ```toml
//! [[services]]
//! name = "wiki"
//! priority = "medium"
//!
//! [services.capture]
//! type = "directory"
//! path = "/data/wiki"
//! ```

mod loader;
mod types;

pub use loader::{append_service, load_config, ConfigError, Result, ServiceRegistry};
pub use types::*;

/// Expand a leading tilde to the home directory
pub fn expand_tilde(path: &std::path::Path) -> std::path::PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_expand_tilde() {
        let expanded = expand_tilde(&PathBuf::from("~/registry.toml"));
        assert!(!expanded.starts_with("~"));

        let absolute = PathBuf::from("/etc/backhaul/registry.toml");
        assert_eq!(expand_tilde(&absolute), absolute);
    }

    #[test]
    fn capture_spec_parses_tagged_variants() {
        let entry: ServiceSpec = toml::from_str(
            r#"
            name = "nextcloud-db"
            priority = "critical"
            compose = "nextcloud"

            [capture]
            type = "postgres"
            container = "nextcloud-db-1"
            database = "nextcloud"
            user = "nextcloud"
            "#,
        )
        .unwrap();

        assert_eq!(entry.capture.type_name(), "postgres");
        assert_eq!(entry.capture.database_kind(), Some(DatabaseKind::Postgres));
        assert_eq!(entry.priority, Priority::Critical);
    }

    #[test]
    fn unknown_capture_type_is_a_parse_error() {
        let result: std::result::Result<ServiceSpec, _> = toml::from_str(
            r#"
            name = "bad"
            priority = "low"

            [capture]
            type = "tarball"
            path = "/data/bad"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn unknown_priority_is_a_parse_error() {
        let result: std::result::Result<ServiceSpec, _> = toml::from_str(
            r#"
            name = "bad"
            priority = "urgent"

            [capture]
            type = "directory"
            path = "/data/bad"
            "#,
        );
        assert!(result.is_err());
    }
}
