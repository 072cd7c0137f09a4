//! CLI command implementations.

pub mod history;
pub mod init;
pub mod migrate;
pub mod new;
pub mod status;
pub mod unlock;
pub mod version;

use std::path::{Path, PathBuf};

use tidemark_migrate::{
    AdvisoryLock, Backend, CancelSignal, LockPolicy, MigrationConfig, MigrationEngine,
    MigrationError, TargetDatabase,
};
use tracing::debug;

use crate::cli::GlobalArgs;
use crate::config::Config;
use crate::error::{CliError, CliResult};

/// An engine over whichever backend the database URL names.
pub type Engine = MigrationEngine<Box<dyn TargetDatabase>, Box<dyn AdvisoryLock>>;

/// Settings resolved from the config file and the command line.
#[derive(Debug, Clone)]
pub struct Context {
    /// Path of the config file, whether or not it exists
    pub config_path: PathBuf,
    /// Loaded configuration
    pub config: Config,
    /// Database URL: `--database-url`, then `DATABASE_URL`, then the config file
    pub database_url: Option<String>,
    /// Migrations directory
    pub migrations_dir: PathBuf,
    /// Lock policy for runs
    pub lock_policy: LockPolicy,
    /// Set on Ctrl-C
    pub cancel: CancelSignal,
}

impl Context {
    /// Resolve settings. A missing config file means defaults.
    pub fn load(args: &GlobalArgs, cancel: CancelSignal) -> CliResult<Self> {
        let config = Config::load_or_default(&args.config)?;

        // Relative paths in the config file are relative to the file itself.
        let base = args
            .config
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let migrations_dir = args
            .migrations_dir
            .clone()
            .unwrap_or_else(|| base.join(&config.migrations.directory));

        let database_url = args
            .database_url
            .clone()
            .or_else(|| config.database.url.clone());

        let lock_policy = if args.no_wait {
            LockPolicy::FailFast
        } else {
            config.lock.policy()
        };

        Ok(Self {
            config_path: args.config.clone(),
            config,
            database_url,
            migrations_dir,
            lock_policy,
            cancel,
        })
    }

    /// The database URL, or a configuration error naming the ways to set it.
    pub fn database_url(&self) -> CliResult<&str> {
        self.database_url.as_deref().ok_or_else(|| {
            CliError::Config(
                "no database URL: pass --database-url, set DATABASE_URL or add [database] url to the config file"
                    .to_string(),
            )
        })
    }

    /// Engine configuration.
    pub fn migration_config(&self) -> CliResult<MigrationConfig> {
        Ok(MigrationConfig::new()
            .migrations_dir(&self.migrations_dir)
            .ledger(self.config.ledger.names()?)
            .lock_name(&self.config.lock.name)
            .lock_policy(self.lock_policy)
            .id_scheme(self.config.migrations.id_scheme))
    }

    /// Connect to the target database and build an engine.
    pub async fn engine(&self) -> CliResult<Engine> {
        let url = self.database_url()?;
        let config = self.migration_config()?;
        let backend = Backend::from_url(url)?;
        debug!(backend = %backend, "Connecting to target database");

        let (db, lock) = connect(backend, url, &config).await?;
        Ok(MigrationEngine::new(config, db, lock).with_cancel_signal(self.cancel.clone()))
    }
}

async fn connect(
    backend: Backend,
    url: &str,
    config: &MigrationConfig,
) -> CliResult<(Box<dyn TargetDatabase>, Box<dyn AdvisoryLock>)> {
    match backend {
        #[cfg(feature = "sqlite")]
        Backend::Sqlite => {
            let db = tidemark_sqlite::SqliteDatabase::connect(url, config.ledger.clone())
                .await
                .map_err(MigrationError::from)?;
            let lock: Box<dyn AdvisoryLock> = Box::new(db.advisory_lock(&config.lock_name));
            Ok((Box::new(db) as Box<dyn TargetDatabase>, lock))
        }
        #[cfg(feature = "postgres")]
        Backend::Postgres => {
            let db = tidemark_postgres::PgDatabase::connect_url(url, config.ledger.clone())
                .await
                .map_err(MigrationError::from)?;
            let lock: Box<dyn AdvisoryLock> = Box::new(
                db.advisory_lock(&config.lock_name)
                    .await
                    .map_err(MigrationError::from)?,
            );
            Ok((Box::new(db) as Box<dyn TargetDatabase>, lock))
        }
        #[allow(unreachable_patterns)]
        other => Err(MigrationError::storage_unavailable(format!(
            "this build of tidemark has no {} support",
            other
        ))
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn global(config: &Path) -> GlobalArgs {
        GlobalArgs {
            config: config.to_path_buf(),
            database_url: None,
            migrations_dir: None,
            no_wait: false,
            verbose: 0,
        }
    }

    #[test]
    fn test_context_resolves_relative_to_config() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("tidemark.toml");
        std::fs::write(
            &config_path,
            "[database]\nurl = \"sqlite::memory:\"\n[migrations]\ndirectory = \"db/migrations\"\n",
        )
        .unwrap();

        let ctx = Context::load(&global(&config_path), CancelSignal::new()).unwrap();
        assert_eq!(ctx.migrations_dir, dir.path().join("db/migrations"));
        assert_eq!(ctx.database_url().unwrap(), "sqlite::memory:");
    }

    #[test]
    fn test_command_line_overrides_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = global(&dir.path().join("missing.toml"));
        args.database_url = Some("postgres://localhost/app".to_string());
        args.migrations_dir = Some(PathBuf::from("sql"));
        args.no_wait = true;

        let ctx = Context::load(&args, CancelSignal::new()).unwrap();
        assert_eq!(ctx.database_url().unwrap(), "postgres://localhost/app");
        assert_eq!(ctx.migrations_dir, PathBuf::from("sql"));
        assert_eq!(ctx.lock_policy, LockPolicy::FailFast);
    }

    #[test]
    fn test_missing_database_url() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Context::load(&global(&dir.path().join("missing.toml")), CancelSignal::new()).unwrap();
        assert!(matches!(ctx.database_url(), Err(CliError::Config(_))));
    }
}
