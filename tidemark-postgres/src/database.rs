//! PostgreSQL target database.

use chrono::{DateTime, Utc};
use tokio_postgres::{Client, NoTls};
use tracing::{debug, info, warn};

use tidemark_migrate::{
    AuditEntry, Backend, Checksum, LedgerEntry, LedgerNames, LedgerSql, LedgerStore,
    MigrateResult, MigrationError, MigrationId, TargetDatabase, Transaction,
};

use crate::config::PgConfig;
use crate::error::{PgError, PgResult};
use crate::lock::PgLock;

/// Open a session and drive its connection on a background task.
pub(crate) async fn open_session(config: &PgConfig) -> PgResult<Client> {
    let (client, connection) = config
        .to_pg_config()
        .connect(NoTls)
        .await
        .map_err(|e| PgError::connection(format!("cannot connect to {}: {}", config.display(), e)))?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            warn!(error = %e, "PostgreSQL connection closed with error");
        }
    });

    Ok(client)
}

/// A PostgreSQL database under migration.
pub struct PgDatabase {
    client: Client,
    sql: LedgerSql,
    config: PgConfig,
}

impl PgDatabase {
    /// Connect with the default ledger table names.
    pub async fn connect(config: PgConfig) -> PgResult<Self> {
        Self::connect_with(config, LedgerNames::default()).await
    }

    /// Connect with custom ledger table names.
    pub async fn connect_with(config: PgConfig, names: LedgerNames) -> PgResult<Self> {
        names
            .validate()
            .map_err(|e| PgError::config(e.to_string()))?;

        let client = open_session(&config).await?;
        info!(database = %config.display(), "Connected to PostgreSQL");

        Ok(Self {
            client,
            sql: LedgerSql::new(Backend::Postgres, names),
            config,
        })
    }

    /// Parse a URL and connect.
    pub async fn connect_url(url: &str, names: LedgerNames) -> PgResult<Self> {
        Self::connect_with(PgConfig::from_url(url)?, names).await
    }

    /// The configuration this database was opened with.
    pub fn config(&self) -> &PgConfig {
        &self.config
    }

    /// The underlying client.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// An advisory lock held on its own session.
    ///
    /// Session-level advisory locks belong to the connection that took them,
    /// so the lock gets a dedicated connection that step transactions never
    /// touch.
    pub async fn advisory_lock(&self, name: impl Into<String>) -> PgResult<PgLock> {
        let client = open_session(&self.config).await?;
        Ok(PgLock::new(client, name))
    }

    /// Run a statement batch outside any migration.
    pub async fn execute_batch(&self, sql: &str) -> PgResult<()> {
        debug!(sql = %sql, "Executing batch");
        self.client.batch_execute(sql).await?;
        Ok(())
    }

    /// Names of the tables in the current schema, sorted.
    pub async fn table_names(&self) -> PgResult<Vec<String>> {
        let rows = self
            .client
            .query(
                "SELECT table_name::TEXT FROM information_schema.tables \
                 WHERE table_schema = current_schema() ORDER BY table_name",
                &[],
            )
            .await?;
        rows.iter()
            .map(|row| row.try_get::<_, String>(0).map_err(PgError::from))
            .collect()
    }
}

fn ledger_id(value: i64) -> MigrateResult<MigrationId> {
    MigrationId::from_i64(value)
}

#[async_trait::async_trait]
impl LedgerStore for PgDatabase {
    async fn initialize(&mut self) -> MigrateResult<()> {
        self.execute_batch(&self.sql.create_tables()).await?;
        info!(table = %self.sql.names().table, "Ledger tables ready");
        Ok(())
    }

    async fn is_initialized(&mut self) -> MigrateResult<bool> {
        let names = self.sql.names();
        let row = self
            .client
            .query_one(&self.sql.count_ledger_tables(), &[&names.table, &names.log_table])
            .await
            .map_err(PgError::from)?;
        let count: i64 = row.try_get(0).map_err(PgError::from)?;
        Ok(count == 2)
    }

    async fn list_applied(&mut self) -> MigrateResult<Vec<LedgerEntry>> {
        let rows = self
            .client
            .query(&self.sql.select_applied(), &[])
            .await
            .map_err(PgError::from)?;

        rows.iter()
            .map(|row| -> MigrateResult<LedgerEntry> {
                Ok(LedgerEntry {
                    migration_id: ledger_id(row.try_get(0).map_err(PgError::from)?)?,
                    name: row.try_get(1).map_err(PgError::from)?,
                    checksum: Checksum::from_hex(row.try_get::<_, String>(2).map_err(PgError::from)?),
                    applied_at: row.try_get::<_, DateTime<Utc>>(3).map_err(PgError::from)?,
                })
            })
            .collect()
    }

    async fn list_history(&mut self) -> MigrateResult<Vec<AuditEntry>> {
        let rows = self
            .client
            .query(&self.sql.select_audit(), &[])
            .await
            .map_err(PgError::from)?;

        rows.iter()
            .map(|row| -> MigrateResult<AuditEntry> {
                let operation: String = row.try_get(1).map_err(PgError::from)?;
                Ok(AuditEntry {
                    migration_id: ledger_id(row.try_get(0).map_err(PgError::from)?)?,
                    operation: operation.parse().map_err(|e: MigrationError| {
                        PgError::deserialization(e.to_string())
                    })?,
                    username: row.try_get(2).map_err(PgError::from)?,
                    hostname: row.try_get(3).map_err(PgError::from)?,
                    created_at: row.try_get::<_, DateTime<Utc>>(4).map_err(PgError::from)?,
                })
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl TargetDatabase for PgDatabase {
    fn backend(&self) -> Backend {
        Backend::Postgres
    }

    async fn begin<'a>(&'a mut self) -> MigrateResult<Box<dyn Transaction + 'a>> {
        let tx = self.client.transaction().await.map_err(PgError::from)?;
        Ok(Box::new(PgTransaction {
            tx: Some(tx),
            sql: &self.sql,
        }))
    }
}

/// A step transaction on a [`PgDatabase`].
///
/// PostgreSQL DDL is transactional, so a failed script leaves no trace
/// once the transaction is rolled back.
struct PgTransaction<'a> {
    tx: Option<tokio_postgres::Transaction<'a>>,
    sql: &'a LedgerSql,
}

impl<'a> PgTransaction<'a> {
    fn active(&self) -> MigrateResult<&tokio_postgres::Transaction<'a>> {
        self.tx
            .as_ref()
            .ok_or_else(|| MigrationError::database("transaction already finished"))
    }
}

#[async_trait::async_trait]
impl Transaction for PgTransaction<'_> {
    async fn execute_script(&mut self, script: &str) -> MigrateResult<()> {
        self.active()?
            .batch_execute(script)
            .await
            .map_err(PgError::from)?;
        Ok(())
    }

    async fn record_applied(
        &mut self,
        migration_id: MigrationId,
        name: &str,
        checksum: &Checksum,
    ) -> MigrateResult<()> {
        let tx = self.active()?;
        let id = migration_id.as_i64();

        let existing = tx
            .query_opt(&self.sql.select_entry(), &[&id])
            .await
            .map_err(PgError::from)?;
        if existing.is_some() {
            return Err(MigrationError::DuplicateApplication(migration_id));
        }

        let result = tx
            .execute(
                &self.sql.insert_entry(),
                &[&id, &name, &checksum.as_str(), &Utc::now()],
            )
            .await
            .map_err(PgError::from);

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.is_unique_violation() => Err(MigrationError::DuplicateApplication(migration_id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_applied(&mut self, migration_id: MigrationId) -> MigrateResult<()> {
        let deleted = self
            .active()?
            .execute(&self.sql.delete_entry(), &[&migration_id.as_i64()])
            .await
            .map_err(PgError::from)?;

        if deleted == 0 {
            return Err(MigrationError::NotApplied(migration_id));
        }
        Ok(())
    }

    async fn append_audit(&mut self, entry: &AuditEntry) -> MigrateResult<()> {
        self.active()?
            .execute(
                &self.sql.insert_audit(),
                &[
                    &entry.migration_id.as_i64(),
                    &entry.operation.as_str(),
                    &entry.username,
                    &entry.hostname,
                    &entry.created_at,
                ],
            )
            .await
            .map_err(PgError::from)?;
        Ok(())
    }

    async fn commit(&mut self) -> MigrateResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| MigrationError::database("transaction already finished"))?;
        tx.commit().await.map_err(PgError::from)?;
        Ok(())
    }

    async fn rollback(&mut self) -> MigrateResult<()> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await.map_err(PgError::from)?;
        }
        Ok(())
    }
}
