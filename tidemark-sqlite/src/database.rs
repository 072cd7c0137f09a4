//! SQLite target database.

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;
use tracing::{debug, info};

use tidemark_migrate::{
    AuditEntry, Backend, Checksum, Direction, LedgerEntry, LedgerNames, LedgerSql, LedgerStore,
    MigrateResult, MigrationError, MigrationId, TargetDatabase, Transaction,
};

use crate::config::{DatabasePath, SqliteConfig};
use crate::error::{SqliteError, SqliteResult};
use crate::lock::SqliteLock;

/// A SQLite database under migration.
///
/// Holds a single connection. Every step transaction is a `BEGIN IMMEDIATE`
/// on it, so the write lock is taken up front instead of on first write.
pub struct SqliteDatabase {
    conn: Connection,
    sql: LedgerSql,
    config: SqliteConfig,
}

impl SqliteDatabase {
    /// Open a database with the default ledger table names.
    pub async fn open(config: SqliteConfig) -> SqliteResult<Self> {
        Self::open_with(config, LedgerNames::default()).await
    }

    /// Open a database with custom ledger table names.
    ///
    /// Fails with a connection error if the file does not exist, unless
    /// `create_if_missing` is set.
    pub async fn open_with(config: SqliteConfig, names: LedgerNames) -> SqliteResult<Self> {
        names
            .validate()
            .map_err(|e| SqliteError::config(e.to_string()))?;

        let conn = match &config.path {
            DatabasePath::Memory => Connection::open_in_memory().await?,
            DatabasePath::File(path) => {
                if !config.create_if_missing && !path.exists() {
                    return Err(SqliteError::connection(format!(
                        "database not found at {}",
                        path.display()
                    )));
                }
                Connection::open(path.clone()).await.map_err(|e| {
                    SqliteError::connection(format!("cannot open {}: {}", path.display(), e))
                })?
            }
        };

        let init_sql = config.init_sql();
        conn.call(move |conn| {
            conn.execute_batch(&init_sql)?;
            Ok(())
        })
        .await?;

        debug!(path = %config.path.display(), "Opened SQLite database");
        Ok(Self {
            conn,
            sql: LedgerSql::new(Backend::Sqlite, names),
            config,
        })
    }

    /// Parse a URL and open the database.
    pub async fn connect(url: &str, names: LedgerNames) -> SqliteResult<Self> {
        Self::open_with(SqliteConfig::from_url(url)?, names).await
    }

    /// The configuration this database was opened with.
    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// An advisory lock stored in this database's lock table.
    pub fn advisory_lock(&self, name: impl Into<String>) -> SqliteLock {
        SqliteLock::new(self.conn.clone(), self.sql.clone(), name)
    }

    /// Run a statement batch outside any migration.
    pub async fn execute_batch(&self, sql: &str) -> SqliteResult<()> {
        let sql = sql.to_string();
        debug!(sql = %sql, "Executing batch");
        self.conn
            .call(move |conn| {
                conn.execute_batch(&sql)?;
                Ok(())
            })
            .await
            .map_err(SqliteError::from)
    }

    /// Names of the user tables, sorted, ledger tables included.
    pub async fn table_names(&self) -> SqliteResult<Vec<String>> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
                )?;
                let names = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(names)
            })
            .await
            .map_err(SqliteError::from)
    }
}

fn parse_timestamp(value: &str) -> SqliteResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| SqliteError::deserialization(format!("invalid timestamp '{}': {}", value, e)))
}

#[async_trait::async_trait]
impl LedgerStore for SqliteDatabase {
    async fn initialize(&mut self) -> MigrateResult<()> {
        let sql = format!("{}\n{};", self.sql.create_tables(), self.sql.create_lock_table());
        self.execute_batch(&sql).await?;
        info!(table = %self.sql.names().table, "Ledger tables ready");
        Ok(())
    }

    async fn is_initialized(&mut self) -> MigrateResult<bool> {
        let sql = self.sql.count_ledger_tables();
        let names = self.sql.names().clone();
        let count = self
            .conn
            .call(move |conn| {
                let count = conn.query_row(&sql, [&names.table, &names.log_table], |row| {
                    row.get::<_, i64>(0)
                })?;
                Ok(count)
            })
            .await
            .map_err(SqliteError::from)?;
        Ok(count == 2)
    }

    async fn list_applied(&mut self) -> MigrateResult<Vec<LedgerEntry>> {
        let sql = self.sql.select_applied();
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(SqliteError::from)?;

        rows.into_iter()
            .map(|(id, name, checksum, applied_at)| -> MigrateResult<LedgerEntry> {
                Ok(LedgerEntry {
                    migration_id: MigrationId::from_i64(id)?,
                    name,
                    checksum: Checksum::from_hex(checksum),
                    applied_at: parse_timestamp(&applied_at)?,
                })
            })
            .collect()
    }

    async fn list_history(&mut self) -> MigrateResult<Vec<AuditEntry>> {
        let sql = self.sql.select_audit();
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(SqliteError::from)?;

        rows.into_iter()
            .map(|(id, operation, username, hostname, created_at)| -> MigrateResult<AuditEntry> {
                Ok(AuditEntry {
                    migration_id: MigrationId::from_i64(id)?,
                    operation: operation.parse::<Direction>()?,
                    username,
                    hostname,
                    created_at: parse_timestamp(&created_at)?,
                })
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl TargetDatabase for SqliteDatabase {
    fn backend(&self) -> Backend {
        Backend::Sqlite
    }

    async fn begin<'a>(&'a mut self) -> MigrateResult<Box<dyn Transaction + 'a>> {
        self.execute_batch("BEGIN IMMEDIATE").await?;
        Ok(Box::new(SqliteTransaction { db: self }))
    }
}

/// A step transaction on a [`SqliteDatabase`].
struct SqliteTransaction<'a> {
    db: &'a SqliteDatabase,
}

#[async_trait::async_trait]
impl Transaction for SqliteTransaction<'_> {
    async fn execute_script(&mut self, script: &str) -> MigrateResult<()> {
        self.db.execute_batch(script).await?;
        Ok(())
    }

    async fn record_applied(
        &mut self,
        migration_id: MigrationId,
        name: &str,
        checksum: &Checksum,
    ) -> MigrateResult<()> {
        let select = self.db.sql.select_entry();
        let insert = self.db.sql.insert_entry();
        let name = name.to_string();
        let checksum = checksum.as_str().to_string();
        let applied_at = Utc::now().to_rfc3339();
        let id = migration_id.as_i64();

        let inserted = self
            .db
            .conn
            .call(move |conn| {
                let exists = conn
                    .query_row(&select, [id], |_| Ok(()))
                    .optional()?
                    .is_some();
                if exists {
                    return Ok(false);
                }
                conn.execute(&insert, rusqlite::params![id, name, checksum, applied_at])?;
                Ok(true)
            })
            .await
            .map_err(SqliteError::from)?;

        if !inserted {
            return Err(MigrationError::DuplicateApplication(migration_id));
        }
        Ok(())
    }

    async fn remove_applied(&mut self, migration_id: MigrationId) -> MigrateResult<()> {
        let delete = self.db.sql.delete_entry();
        let id = migration_id.as_i64();

        let deleted = self
            .db
            .conn
            .call(move |conn| Ok(conn.execute(&delete, [id])?))
            .await
            .map_err(SqliteError::from)?;

        if deleted == 0 {
            return Err(MigrationError::NotApplied(migration_id));
        }
        Ok(())
    }

    async fn append_audit(&mut self, entry: &AuditEntry) -> MigrateResult<()> {
        let insert = self.db.sql.insert_audit();
        let entry = entry.clone();

        self.db
            .conn
            .call(move |conn| {
                conn.execute(
                    &insert,
                    rusqlite::params![
                        entry.migration_id.as_i64(),
                        entry.operation.as_str(),
                        entry.username,
                        entry.hostname,
                        entry.created_at.to_rfc3339(),
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(SqliteError::from)?;
        Ok(())
    }

    async fn commit(&mut self) -> MigrateResult<()> {
        self.db.execute_batch("COMMIT").await?;
        Ok(())
    }

    async fn rollback(&mut self) -> MigrateResult<()> {
        // A failed COMMIT or some script errors already end the transaction.
        self.db
            .conn
            .call(|conn| {
                if !conn.is_autocommit() {
                    conn.execute_batch("ROLLBACK")?;
                }
                Ok(())
            })
            .await
            .map_err(SqliteError::from)?;
        Ok(())
    }
}
