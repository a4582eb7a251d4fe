//! Logical database capture and restore for Postgres and MariaDB
//! containers.
//!
//! Captures run a dump client inside the database container and compress the
//! result on the host, so the database can keep serving while the dump is
//! consistent (`pg_dump` snapshots; `--single-transaction` for MariaDB).
//! Passwords travel only through the process environment and `docker exec -e`
//! pass-through, never on a command line.

use super::{
    select_snapshot, CaptureError, CaptureReport, RestoreError, RestoreReport, SnapshotSelector,
    StrategyContext,
};
use crate::config::{CaptureSpec, DatabaseKind, ServiceSpec};
use crate::utils::scratch::ScratchDir;
use crate::utils::secrets::resolve_db_password;
use crate::utils::store::{ArtifactKind, ArtifactScope, TagSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Dumps smaller than this are treated as corrupt rather than replayed over
/// a live database
const MIN_PLAUSIBLE_DUMP_BYTES: u64 = 512;

pub struct DatabaseStrategy {
    kind: DatabaseKind,
}

impl DatabaseStrategy {
    pub fn new(kind: DatabaseKind) -> Self {
        Self { kind }
    }

    fn target(spec: &ServiceSpec) -> (&str, &str, &str) {
        match &spec.capture {
            CaptureSpec::Postgres {
                container,
                database,
                user,
            }
            | CaptureSpec::Mariadb {
                container,
                database,
                user,
            } => (container, database, user),
            _ => unreachable!("database strategy dispatched for non-database capture"),
        }
    }

    fn password_env(
        &self,
        ctx: &StrategyContext<'_>,
        spec: &ServiceSpec,
    ) -> Result<Vec<(String, String)>, CaptureError> {
        let var = match self.kind {
            DatabaseKind::Postgres => "PGPASSWORD",
            DatabaseKind::Mariadb => "MYSQL_PWD",
        };
        let password = match spec.compose_dir(ctx.compose_root) {
            Some(dir) => resolve_db_password(&dir, self.kind, spec.allow_passwordless)?,
            None if spec.allow_passwordless => None,
            None => return Err(CaptureError::MissingCompose(spec.name.clone())),
        };
        Ok(password
            .map(|p| vec![(var.to_string(), p)])
            .unwrap_or_default())
    }
}

fn exec_env_flags(pass_env: &[(String, String)]) -> String {
    pass_env
        .iter()
        .map(|(name, _)| format!("-e {} ", name))
        .collect()
}

impl super::CaptureStrategy for DatabaseStrategy {
    fn name(&self) -> &'static str {
        match self.kind {
            DatabaseKind::Postgres => "postgres",
            DatabaseKind::Mariadb => "mariadb",
        }
    }

    fn capture(
        &self,
        ctx: &StrategyContext<'_>,
        spec: &ServiceSpec,
    ) -> Result<CaptureReport, CaptureError> {
        let (container, database, user) = Self::target(spec);
        let pass_env = self.password_env(ctx, spec)?;

        let scratch =
            ScratchDir::create(ctx.scratch_root, &spec.name).map_err(CaptureError::Scratch)?;
        let raw_path = scratch.join(&format!("{database}.sql"));
        let dump_path = scratch.join(&format!("{database}.sql.gz"));

        // Dump to a file first, then compress. Piping straight into gzip
        // would let the shell report gzip's exit status and mask a failed
        // dump as success.
        let dump_cmd = match self.kind {
            DatabaseKind::Postgres => format!(
                "docker exec {}{} pg_dump -U {} --clean --if-exists {} > {}",
                exec_env_flags(&pass_env),
                container,
                user,
                database,
                raw_path.display()
            ),
            DatabaseKind::Mariadb => format!(
                "docker exec {}{} mariadb-dump --single-transaction -u {} {} > {}",
                exec_env_flags(&pass_env),
                container,
                user,
                database,
                raw_path.display()
            ),
        };
        info!(service = %spec.name, database, "dumping database");
        ctx.runtime
            .exec_pipeline(&dump_cmd, &pass_env)
            .map_err(CaptureError::Dump)?;

        ctx.runtime
            .exec_pipeline(&format!("gzip {}", raw_path.display()), &[])
            .map_err(CaptureError::Dump)?;

        let tags = TagSet::artifact(
            &spec.name,
            ArtifactKind::Database,
            database,
            ArtifactScope::Primary,
        )
        .with(&self.kind.to_string());
        let snapshot_id = ctx
            .store
            .backup(dump_path.as_path(), &tags)
            .map_err(CaptureError::Store)?;
        info!(service = %spec.name, snapshot = %snapshot_id, "database snapshot stored");

        Ok(CaptureReport {
            snapshot_ids: vec![snapshot_id],
            warnings: Vec::new(),
        })
    }

    fn restore(
        &self,
        ctx: &StrategyContext<'_>,
        spec: &ServiceSpec,
        selector: &SnapshotSelector,
    ) -> Result<RestoreReport, RestoreError> {
        let (container, database, user) = Self::target(spec);

        let tags = TagSet::artifact(
            &spec.name,
            ArtifactKind::Database,
            database,
            ArtifactScope::Primary,
        );
        let snapshot = select_snapshot(ctx.store, &tags, selector)?;
        info!(service = %spec.name, snapshot = %snapshot.short_id, "restoring database dump");

        let scratch =
            ScratchDir::create(ctx.scratch_root, &spec.name).map_err(RestoreError::Scratch)?;
        let restored_root = scratch.join("restored");
        ctx.store
            .restore(&snapshot.id, &restored_root)
            .map_err(RestoreError::Store)?;

        let dump_gz = locate_dump(&restored_root, &snapshot.paths)?;
        let sql_path = scratch.join(&format!("{database}.sql"));
        ctx.runtime
            .exec_pipeline(
                &format!("gunzip -c {} > {}", dump_gz.display(), sql_path.display()),
                &[],
            )
            .map_err(RestoreError::Runtime)?;

        let size = std::fs::metadata(&sql_path)?.len();
        if size < MIN_PLAUSIBLE_DUMP_BYTES {
            return Err(RestoreError::CorruptDump {
                path: sql_path,
                size,
            });
        }
        debug!(bytes = size, "decompressed dump passed plausibility check");

        let pass_env = self
            .password_env(ctx, spec)
            .map_err(|e| RestoreError::Runtime(anyhow::anyhow!(e)))?;

        let mut report = RestoreReport::default();
        match self.kind {
            DatabaseKind::Postgres => {
                restore_postgres(ctx, container, database, user, &sql_path, &pass_env)?
            }
            DatabaseKind::Mariadb => {
                restore_mariadb(ctx, container, database, user, &sql_path, &pass_env)?
            }
        }

        match table_count(ctx, self.kind, container, database, user, &pass_env) {
            Ok(0) => {
                let msg = format!("database '{}' has zero tables after restore", database);
                warn!("{}", msg);
                report.warnings.push(msg);
            }
            Ok(n) => info!(tables = n, "post-restore table count"),
            Err(e) => {
                let msg = format!("post-restore table count failed: {}", e);
                warn!("{}", msg);
                report.warnings.push(msg);
            }
        }

        report.restored.push(format!(
            "database '{}' from snapshot {}",
            database, snapshot.short_id
        ));
        Ok(report)
    }
}

/// Find the dump file inside the restored tree. The snapshot records the
/// absolute path it was taken from; the store recreates that path under the
/// restore target.
fn locate_dump(restored_root: &Path, snapshot_paths: &[String]) -> Result<PathBuf, RestoreError> {
    if let Some(original) = snapshot_paths.first() {
        let candidate = restored_root.join(original.trim_start_matches('/'));
        if candidate.exists() {
            return Ok(candidate);
        }
    }
    find_by_extension(restored_root, "gz")?.ok_or_else(|| RestoreError::CorruptDump {
        path: restored_root.to_path_buf(),
        size: 0,
    })
}

fn find_by_extension(root: &Path, ext: &str) -> Result<Option<PathBuf>, RestoreError> {
    if !root.exists() {
        return Ok(None);
    }
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            if let Some(found) = find_by_extension(&path, ext)? {
                return Ok(Some(found));
            }
        } else if path.extension().map(|e| e == ext).unwrap_or(false) {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

fn restore_postgres(
    ctx: &StrategyContext<'_>,
    container: &str,
    database: &str,
    user: &str,
    sql_path: &Path,
    pass_env: &[(String, String)],
) -> Result<(), RestoreError> {
    // Connections must be gone before the drop; maintenance statements run
    // against the postgres database, not the one being replaced.
    let terminate = format!(
        "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
         WHERE datname = '{database}' AND pid <> pg_backend_pid();"
    );
    let admin = |sql: &str| {
        ctx.runtime
            .exec_in_container(
                container,
                pass_env,
                &["psql", "-U", user, "-d", "postgres", "-c", sql],
            )
            .map_err(RestoreError::Runtime)
    };
    admin(&terminate)?;
    admin(&format!("DROP DATABASE IF EXISTS \"{database}\";"))?;
    admin(&format!(
        "CREATE DATABASE \"{database}\" OWNER \"{user}\";"
    ))?;

    ctx.runtime
        .exec_pipeline(
            &format!(
                "docker exec -i {}{} psql -U {} -d {} -v ON_ERROR_STOP=1 < {}",
                exec_env_flags(pass_env),
                container,
                user,
                database,
                sql_path.display()
            ),
            pass_env,
        )
        .map_err(RestoreError::Runtime)?;
    Ok(())
}

fn restore_mariadb(
    ctx: &StrategyContext<'_>,
    container: &str,
    database: &str,
    user: &str,
    sql_path: &Path,
    pass_env: &[(String, String)],
) -> Result<(), RestoreError> {
    ctx.runtime
        .exec_in_container(
            container,
            pass_env,
            &[
                "mariadb",
                "-u",
                user,
                "-e",
                &format!("DROP DATABASE IF EXISTS `{database}`; CREATE DATABASE `{database}`;"),
            ],
        )
        .map_err(RestoreError::Runtime)?;

    ctx.runtime
        .exec_pipeline(
            &format!(
                "docker exec -i {}{} mariadb -u {} {} < {}",
                exec_env_flags(pass_env),
                container,
                user,
                database,
                sql_path.display()
            ),
            pass_env,
        )
        .map_err(RestoreError::Runtime)?;
    Ok(())
}

fn table_count(
    ctx: &StrategyContext<'_>,
    kind: DatabaseKind,
    container: &str,
    database: &str,
    user: &str,
    pass_env: &[(String, String)],
) -> anyhow::Result<u64> {
    let output = match kind {
        DatabaseKind::Postgres => ctx.runtime.exec_in_container(
            container,
            pass_env,
            &[
                "psql",
                "-U",
                user,
                "-d",
                database,
                "-tA",
                "-c",
                "SELECT count(*) FROM information_schema.tables \
                 WHERE table_schema NOT IN ('pg_catalog', 'information_schema');",
            ],
        )?,
        DatabaseKind::Mariadb => ctx.runtime.exec_in_container(
            container,
            pass_env,
            &[
                "mariadb",
                "-N",
                "-u",
                user,
                "-e",
                &format!(
                    "SELECT COUNT(*) FROM information_schema.tables \
                     WHERE table_schema = '{database}';"
                ),
            ],
        )?,
    };
    Ok(output.trim().parse::<u64>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Priority;
    use crate::strategies::CaptureStrategy;
    use crate::utils::runtime::mock::MockRuntime;
    use crate::utils::store::mock::MemoryStore;
    use crate::utils::store::SnapshotStore;
    use tempfile::TempDir;

    fn postgres_spec(compose: Option<&str>) -> ServiceSpec {
        ServiceSpec {
            name: "wiki".to_string(),
            priority: Priority::High,
            capture: CaptureSpec::Postgres {
                container: "wiki-db".to_string(),
                database: "wiki".to_string(),
                user: "wiki".to_string(),
            },
            compose: compose.map(Into::into),
            requires_quiesce: false,
            aux_volumes: Vec::new(),
            aux_directories: Vec::new(),
            allow_passwordless: true,
            retention: None,
        }
    }

    #[test]
    fn capture_dumps_then_stores_tagged_snapshot() {
        let scratch = TempDir::new().unwrap();
        let store = MemoryStore::new();
        let runtime = MockRuntime::new();
        let ctx = StrategyContext {
            store: &store,
            runtime: &runtime,
            compose_root: Path::new("/srv"),
            scratch_root: scratch.path(),
        };

        let spec = postgres_spec(None);
        let strategy = DatabaseStrategy::new(DatabaseKind::Postgres);
        let report = strategy.capture(&ctx, &spec).unwrap();

        assert_eq!(report.snapshot_ids.len(), 1);
        let snapshots = store
            .snapshots(&crate::utils::store::TagSet::service("wiki"))
            .unwrap();
        assert_eq!(snapshots.len(), 1);
        assert!(snapshots[0].tags.contains(&"database".to_string()));
        assert!(snapshots[0].tags.contains(&"postgres".to_string()));

        let pipelines = runtime.pipelines();
        assert!(pipelines[0].contains("pg_dump -U wiki --clean --if-exists wiki"));
        // the password never appears on the pipeline text
        assert!(!pipelines[0].contains("secret"));
    }

    #[test]
    fn restore_rejects_missing_snapshot() {
        let scratch = TempDir::new().unwrap();
        let store = MemoryStore::new();
        let runtime = MockRuntime::new();
        let ctx = StrategyContext {
            store: &store,
            runtime: &runtime,
            compose_root: Path::new("/srv"),
            scratch_root: scratch.path(),
        };

        let spec = postgres_spec(None);
        let strategy = DatabaseStrategy::new(DatabaseKind::Postgres);
        let err = strategy
            .restore(&ctx, &spec, &SnapshotSelector::Latest)
            .unwrap_err();
        assert!(matches!(err, RestoreError::NoSnapshot(_)));
    }

    #[test]
    fn locate_dump_finds_gz_in_restored_tree() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("wiki.sql.gz"), b"short").unwrap();
        let found = locate_dump(dir.path(), &[]).unwrap();
        assert!(found.ends_with("wiki.sql.gz"));
    }
}
