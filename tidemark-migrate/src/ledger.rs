//! Ledger of applied migrations and the operator audit log.
//!
//! The ledger lives inside the target database. Reads go through
//! [`LedgerStore`]; writes are only reachable from an open
//! [`Transaction`](crate::database::Transaction), so a ledger update always
//! commits or rolls back together with the schema change it records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::database::Backend;
use crate::error::{MigrateResult, MigrationError};
use crate::migration::{Checksum, Direction, MigrationId};

/// A record of an applied migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Migration ID.
    pub migration_id: MigrationId,
    /// Migration name at the time it was applied.
    pub name: String,
    /// Checksum of the up script at the time it was applied.
    pub checksum: Checksum,
    /// When the migration was applied.
    pub applied_at: DateTime<Utc>,
}

/// One row of the audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Migration ID.
    pub migration_id: MigrationId,
    /// Whether the migration was applied or reverted.
    pub operation: Direction,
    /// Operating system user that ran the step.
    pub username: String,
    /// Host the step ran from.
    pub hostname: String,
    /// When the step committed.
    pub created_at: DateTime<Utc>,
}

/// Who is running migrations, for the audit log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operator {
    /// User name.
    pub username: String,
    /// Host name.
    pub hostname: String,
}

impl Operator {
    /// Create an operator identity.
    pub fn new(username: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            hostname: hostname.into(),
        }
    }

    /// Detect the current user and host from the environment.
    pub fn current() -> Self {
        let username = ["USER", "USERNAME"]
            .iter()
            .find_map(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
            .unwrap_or_else(|| "unknown".to_string());

        let hostname = ["HOSTNAME", "COMPUTERNAME"]
            .iter()
            .find_map(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
            .or_else(|| {
                std::fs::read_to_string("/etc/hostname")
                    .ok()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
            })
            .unwrap_or_else(|| "unknown".to_string());

        Self { username, hostname }
    }

    /// Build the audit row for a step that is about to commit.
    pub fn audit(&self, migration_id: MigrationId, operation: Direction) -> AuditEntry {
        AuditEntry {
            migration_id,
            operation,
            username: self.username.clone(),
            hostname: self.hostname.clone(),
            created_at: Utc::now(),
        }
    }
}

/// Read access to the ledger.
#[async_trait::async_trait]
pub trait LedgerStore: Send {
    /// Create the ledger, audit and lock tables if they do not exist.
    async fn initialize(&mut self) -> MigrateResult<()>;

    /// Whether the ledger and audit tables exist. Never creates anything.
    async fn is_initialized(&mut self) -> MigrateResult<bool>;

    /// All ledger entries, ordered by migration ID.
    async fn list_applied(&mut self) -> MigrateResult<Vec<LedgerEntry>>;

    /// All audit rows, oldest first.
    async fn list_history(&mut self) -> MigrateResult<Vec<AuditEntry>>;
}

/// Names of the tables the engine owns inside the target database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerNames {
    /// Applied migrations.
    pub table: String,
    /// Audit log.
    pub log_table: String,
    /// Lock rows (backends without native advisory locks).
    pub lock_table: String,
}

impl Default for LedgerNames {
    fn default() -> Self {
        Self {
            table: "_tidemark_ledger".to_string(),
            log_table: "_tidemark_log".to_string(),
            lock_table: "_tidemark_lock".to_string(),
        }
    }
}

impl LedgerNames {
    /// Create table names, validating each as a plain SQL identifier.
    pub fn new(
        table: impl Into<String>,
        log_table: impl Into<String>,
        lock_table: impl Into<String>,
    ) -> MigrateResult<Self> {
        let names = Self {
            table: table.into(),
            log_table: log_table.into(),
            lock_table: lock_table.into(),
        };
        names.validate()?;
        Ok(names)
    }

    /// Check every name is a plain identifier, since they are spliced into SQL.
    pub fn validate(&self) -> MigrateResult<()> {
        for name in [&self.table, &self.log_table, &self.lock_table] {
            if !is_identifier(name) {
                return Err(MigrationError::config(format!(
                    "invalid ledger table name '{}'",
                    name
                )));
            }
        }
        if self.table == self.log_table || self.table == self.lock_table || self.log_table == self.lock_table {
            return Err(MigrationError::config("ledger table names must be distinct"));
        }
        Ok(())
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// SQL text for the ledger tables, per backend dialect.
#[derive(Debug, Clone)]
pub struct LedgerSql {
    backend: Backend,
    names: LedgerNames,
}

impl LedgerSql {
    /// Create the SQL set for a backend.
    pub fn new(backend: Backend, names: LedgerNames) -> Self {
        Self { backend, names }
    }

    /// Table names in use.
    pub fn names(&self) -> &LedgerNames {
        &self.names
    }

    fn param(&self, n: usize) -> String {
        match self.backend {
            Backend::Sqlite => format!("?{}", n),
            Backend::Postgres => format!("${}", n),
        }
    }

    /// Create the ledger and audit tables.
    pub fn create_tables(&self) -> String {
        let LedgerNames {
            table, log_table, ..
        } = &self.names;

        match self.backend {
            Backend::Sqlite => format!(
                r#"
CREATE TABLE IF NOT EXISTS "{table}" (
    migration_id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    checksum TEXT NOT NULL,
    applied_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS "{log_table}" (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    migration_id INTEGER NOT NULL,
    operation TEXT NOT NULL,
    username TEXT NOT NULL,
    hostname TEXT NOT NULL,
    created_at TEXT NOT NULL
);
"#
            ),
            Backend::Postgres => format!(
                r#"
CREATE TABLE IF NOT EXISTS "{table}" (
    migration_id BIGINT PRIMARY KEY,
    name VARCHAR(255) NOT NULL,
    checksum VARCHAR(64) NOT NULL,
    applied_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS "{log_table}" (
    id BIGSERIAL PRIMARY KEY,
    migration_id BIGINT NOT NULL,
    operation VARCHAR(8) NOT NULL,
    username VARCHAR(255) NOT NULL,
    hostname VARCHAR(255) NOT NULL,
    created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
);
"#
            ),
        }
    }

    /// Count how many of the ledger and audit tables exist (0 to 2).
    pub fn count_ledger_tables(&self) -> String {
        match self.backend {
            Backend::Sqlite => format!(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ({}, {})",
                self.param(1),
                self.param(2)
            ),
            Backend::Postgres => format!(
                "SELECT COUNT(*) FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND table_name::text IN ({}::text, {}::text)",
                self.param(1),
                self.param(2)
            ),
        }
    }

    /// Select every entry ordered by ID: `migration_id, name, checksum, applied_at`.
    pub fn select_applied(&self) -> String {
        format!(
            r#"SELECT migration_id, name, checksum, applied_at FROM "{}" ORDER BY migration_id ASC"#,
            self.names.table
        )
    }

    /// Check for an entry: one parameter, `migration_id`.
    pub fn select_entry(&self) -> String {
        format!(
            r#"SELECT 1 FROM "{}" WHERE migration_id = {}"#,
            self.names.table,
            self.param(1)
        )
    }

    /// Insert an entry: `migration_id, name, checksum, applied_at`.
    pub fn insert_entry(&self) -> String {
        format!(
            r#"INSERT INTO "{}" (migration_id, name, checksum, applied_at) VALUES ({}, {}, {}, {})"#,
            self.names.table,
            self.param(1),
            self.param(2),
            self.param(3),
            self.param(4)
        )
    }

    /// Delete an entry: one parameter, `migration_id`.
    pub fn delete_entry(&self) -> String {
        format!(
            r#"DELETE FROM "{}" WHERE migration_id = {}"#,
            self.names.table,
            self.param(1)
        )
    }

    /// Insert an audit row: `migration_id, operation, username, hostname, created_at`.
    pub fn insert_audit(&self) -> String {
        format!(
            r#"INSERT INTO "{}" (migration_id, operation, username, hostname, created_at) VALUES ({}, {}, {}, {}, {})"#,
            self.names.log_table,
            self.param(1),
            self.param(2),
            self.param(3),
            self.param(4),
            self.param(5)
        )
    }

    /// Select audit rows oldest first.
    pub fn select_audit(&self) -> String {
        format!(
            r#"SELECT migration_id, operation, username, hostname, created_at FROM "{}" ORDER BY id ASC"#,
            self.names.log_table
        )
    }

    /// Create the lock table (SQLite).
    pub fn create_lock_table(&self) -> String {
        format!(
            r#"CREATE TABLE IF NOT EXISTS "{}" (name TEXT PRIMARY KEY, owner TEXT NOT NULL, acquired_at TEXT NOT NULL)"#,
            self.names.lock_table
        )
    }

    /// Claim the lock row if free: `name, owner, acquired_at`.
    pub fn acquire_lock(&self) -> String {
        format!(
            r#"INSERT OR IGNORE INTO "{}" (name, owner, acquired_at) VALUES ({}, {}, {})"#,
            self.names.lock_table,
            self.param(1),
            self.param(2),
            self.param(3)
        )
    }

    /// Current holder of the lock row: `name`.
    pub fn select_lock_owner(&self) -> String {
        format!(
            r#"SELECT owner FROM "{}" WHERE name = {}"#,
            self.names.lock_table,
            self.param(1)
        )
    }

    /// Drop the lock row if we own it: `name, owner`.
    pub fn release_lock(&self) -> String {
        format!(
            r#"DELETE FROM "{}" WHERE name = {} AND owner = {}"#,
            self.names.lock_table,
            self.param(1),
            self.param(2)
        )
    }

    /// Drop the lock row whoever owns it: `name`.
    pub fn clear_lock(&self) -> String {
        format!(
            r#"DELETE FROM "{}" WHERE name = {}"#,
            self.names.lock_table,
            self.param(1)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_names_are_valid() {
        assert!(LedgerNames::default().validate().is_ok());
    }

    #[test]
    fn test_names_reject_injection() {
        assert!(LedgerNames::new("ledger\"; DROP TABLE users; --", "log", "lock").is_err());
        assert!(LedgerNames::new("1ledger", "log", "lock").is_err());
        assert!(LedgerNames::new("same", "same", "lock").is_err());
        assert!(LedgerNames::new("app_ledger", "app_log", "app_lock").is_ok());
    }

    #[test]
    fn test_sqlite_sql_uses_numbered_params() {
        let sql = LedgerSql::new(Backend::Sqlite, LedgerNames::default());
        assert!(sql.insert_entry().contains("VALUES (?1, ?2, ?3, ?4)"));
        assert!(sql.delete_entry().ends_with("migration_id = ?1"));
        assert!(sql.create_tables().contains("_tidemark_ledger"));
        assert!(sql.create_tables().contains("_tidemark_log"));
        assert!(sql.acquire_lock().starts_with("INSERT OR IGNORE"));
        assert!(sql.count_ledger_tables().contains("sqlite_master"));
        assert!(sql.count_ledger_tables().ends_with("IN (?1, ?2)"));
    }

    #[test]
    fn test_postgres_sql_uses_dollar_params() {
        let sql = LedgerSql::new(Backend::Postgres, LedgerNames::default());
        assert!(sql.insert_entry().contains("VALUES ($1, $2, $3, $4)"));
        assert!(sql.create_tables().contains("BIGINT PRIMARY KEY"));
        assert!(sql.create_tables().contains("BIGSERIAL"));
        assert!(sql.count_ledger_tables().contains("information_schema.tables"));
        assert!(sql.count_ledger_tables().ends_with("IN ($1::text, $2::text)"));
    }

    #[test]
    fn test_operator_audit() {
        let operator = Operator::new("anakin", "tatooine");
        let entry = operator.audit(MigrationId::from(5u32), Direction::Down);
        assert_eq!(entry.operation, Direction::Down);
        assert_eq!(entry.username, "anakin");
        assert_eq!(entry.hostname, "tatooine");
    }
}
