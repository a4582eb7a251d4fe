//! Deploy-window credential resolution
//!
//! The secrets manager materializes a per-service env file next to the compose
//! stack for the duration of a deploy. Database strategies read it to find the
//! database password; they never persist or re-write secret material.

use crate::config::DatabaseKind;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Conventional password key names tried in order, per database kind.
const POSTGRES_KEYS: &[&str] = &["POSTGRES_PASSWORD", "DB_PASSWORD", "DATABASE_PASSWORD"];
const MARIADB_KEYS: &[&str] = &[
    "MARIADB_PASSWORD",
    "MYSQL_PASSWORD",
    "MYSQL_ROOT_PASSWORD",
    "DB_PASSWORD",
];

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("secret file not found: {0} (is the deploy window open?)")]
    FileMissing(PathBuf),

    #[error("failed to read secret file {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no database password in {path} (tried {tried:?})")]
    NoPassword { path: PathBuf, tried: Vec<String> },
}

/// Parse a `KEY=VALUE` env file. Blank lines and `#` comments are skipped,
/// surrounding single or double quotes on values are stripped.
pub fn parse_env_file(path: &Path) -> Result<HashMap<String, String>, CredentialError> {
    if !path.exists() {
        return Err(CredentialError::FileMissing(path.to_path_buf()));
    }

    let contents = std::fs::read_to_string(path).map_err(|source| CredentialError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;

    let mut vars = HashMap::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .unwrap_or(value);
            vars.insert(key.trim().to_string(), value.to_string());
        }
    }

    Ok(vars)
}

/// Resolve the database password from a compose stack's deploy-time env file.
///
/// Tries the conventional key names for the given kind. `allow_passwordless`
/// is the explicit opt-in for passwordless configurations; without it a
/// missing key is a hard `CredentialError`.
pub fn resolve_db_password(
    compose_dir: &Path,
    kind: DatabaseKind,
    allow_passwordless: bool,
) -> Result<Option<String>, CredentialError> {
    let env_path = compose_dir.join(".env");

    let keys: &[&str] = match kind {
        DatabaseKind::Postgres => POSTGRES_KEYS,
        DatabaseKind::Mariadb => MARIADB_KEYS,
    };

    let vars = match parse_env_file(&env_path) {
        Ok(vars) => vars,
        Err(e) if allow_passwordless => {
            tracing::warn!("{}; proceeding without a password (explicitly allowed)", e);
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    for key in keys {
        if let Some(value) = vars.get(*key) {
            if !value.is_empty() {
                return Ok(Some(value.clone()));
            }
        }
    }

    if allow_passwordless {
        tracing::warn!(
            "No password key in {:?}; proceeding without a password (explicitly allowed)",
            env_path
        );
        Ok(None)
    } else {
        Err(CredentialError::NoPassword {
            path: env_path,
            tried: keys.iter().map(|k| k.to_string()).collect(),
        })
    }
}
