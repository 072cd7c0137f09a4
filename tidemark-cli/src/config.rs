//! CLI configuration handling.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use tidemark_migrate::{IdScheme, LedgerNames, LockPolicy, DEFAULT_LOCK_NAME};

use crate::error::CliResult;

/// Default config file name (lives in project root)
pub const CONFIG_FILE_NAME: &str = "tidemark.toml";

/// Default migrations directory (relative to the config file)
pub const MIGRATIONS_DIR: &str = "migrations";

/// Tidemark CLI configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Migration configuration
    pub migrations: MigrationsConfig,

    /// Ledger table names
    pub ledger: LedgerConfig,

    /// Lock configuration
    pub lock: LockConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> CliResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration, falling back to defaults when the file is absent
    pub fn load_or_default(path: &Path) -> CliResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> CliResult<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Database configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database connection URL
    pub url: Option<String>,
}

/// Migration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationsConfig {
    /// Directory for migration files
    pub directory: String,

    /// How new migrations are numbered
    pub id_scheme: IdScheme,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            directory: MIGRATIONS_DIR.to_string(),
            id_scheme: IdScheme::Sequence,
        }
    }
}

/// Ledger table names
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Applied migrations table
    pub table: String,

    /// Audit log table
    pub log_table: String,

    /// Lock table (SQLite only)
    pub lock_table: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        let names = LedgerNames::default();
        Self {
            table: names.table,
            log_table: names.log_table,
            lock_table: names.lock_table,
        }
    }
}

impl LedgerConfig {
    /// Validated table names
    pub fn names(&self) -> CliResult<LedgerNames> {
        Ok(LedgerNames::new(&self.table, &self.log_table, &self.lock_table)?)
    }
}

/// What to do when another run holds the lock
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LockMode {
    /// Poll until the lock frees up
    #[default]
    Wait,
    /// Fail immediately
    FailFast,
}

/// Lock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Advisory lock name
    pub name: String,

    /// Wait or fail fast
    pub mode: LockMode,

    /// Give up waiting after this many seconds (0 waits forever)
    pub timeout_secs: u64,

    /// Delay between lock attempts
    pub poll_interval_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_LOCK_NAME.to_string(),
            mode: LockMode::Wait,
            timeout_secs: 60,
            poll_interval_ms: 500,
        }
    }
}

impl LockConfig {
    /// The lock policy this configuration describes
    pub fn policy(&self) -> LockPolicy {
        match self.mode {
            LockMode::FailFast => LockPolicy::FailFast,
            LockMode::Wait => LockPolicy::Wait {
                timeout: (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs)),
                poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.migrations.directory, "migrations");
        assert_eq!(config.ledger.names().unwrap(), LedgerNames::default());
        assert_eq!(config.lock.policy(), LockPolicy::default());
    }

    #[test]
    fn test_partial_file() {
        let config: Config = toml::from_str(
            r#"
[database]
url = "sqlite://app.db"

[migrations]
id_scheme = "timestamp"

[ledger]
table = "schema_history"

[lock]
mode = "fail-fast"
"#,
        )
        .unwrap();

        assert_eq!(config.database.url.as_deref(), Some("sqlite://app.db"));
        assert_eq!(config.migrations.directory, "migrations");
        assert_eq!(config.migrations.id_scheme, IdScheme::Timestamp);
        assert_eq!(config.ledger.names().unwrap().table, "schema_history");
        assert_eq!(config.ledger.log_table, "_tidemark_log");
        assert_eq!(config.lock.policy(), LockPolicy::FailFast);
    }

    #[test]
    fn test_wait_forever() {
        let lock = LockConfig {
            timeout_secs: 0,
            poll_interval_ms: 250,
            ..Default::default()
        };
        assert_eq!(
            lock.policy(),
            LockPolicy::Wait {
                timeout: None,
                poll_interval: Duration::from_millis(250),
            }
        );
    }

    #[test]
    fn test_invalid_ledger_name() {
        let ledger = LedgerConfig {
            table: "drop table; --".to_string(),
            ..Default::default()
        };
        assert!(ledger.names().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);

        let mut config = Config::default();
        config.database.url = Some("postgres://localhost/app".to_string());
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.database.url, config.database.url);
        assert_eq!(loaded.lock.mode, LockMode::Wait);
    }
}
