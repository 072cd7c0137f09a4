//! Target database capabilities.
//!
//! The engine talks to a target database through two traits: a
//! [`TargetDatabase`] that can open step-scoped transactions, and the
//! [`Transaction`] handle itself, which runs scripts and mutates the ledger.
//! Only the backends listed in [`Backend`] are supported; anything else is
//! rejected up front with `StorageUnavailable`.

use std::fmt;

use crate::error::{MigrateResult, MigrationError};
use crate::ledger::{AuditEntry, LedgerEntry, LedgerStore};
use crate::migration::{Checksum, MigrationId};

/// Database backends with ledger storage and advisory locking support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// SQLite, with the lock emulated by a row in the lock table.
    Sqlite,
    /// PostgreSQL, with session-level `pg_advisory_lock`.
    Postgres,
}

impl Backend {
    /// Detect the backend from a connection URL.
    ///
    /// Fails with `StorageUnavailable` for schemes no backend handles.
    pub fn from_url(url: &str) -> MigrateResult<Self> {
        let scheme = url.split_once(':').map(|(scheme, _)| scheme).unwrap_or("");

        match scheme.to_ascii_lowercase().as_str() {
            "sqlite" | "file" => Ok(Self::Sqlite),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "" if url.ends_with(".db") || url.ends_with(".sqlite") || url == ":memory:" => {
                Ok(Self::Sqlite)
            }
            other => Err(MigrationError::storage_unavailable(format!(
                "unsupported database backend '{}': advisory locking is available for sqlite and postgres only",
                if other.is_empty() { url } else { other }
            ))),
        }
    }

    /// Whether the database provides a native advisory lock.
    pub fn has_native_advisory_lock(self) -> bool {
        matches!(self, Self::Postgres)
    }

    /// Backend name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transaction scoped to one plan step.
///
/// The holder must finish it with [`commit`](Transaction::commit) or
/// [`rollback`](Transaction::rollback); dropping an unfinished transaction is
/// a bug in the caller.
#[async_trait::async_trait]
pub trait Transaction: Send {
    /// Run a migration script.
    async fn execute_script(&mut self, script: &str) -> MigrateResult<()>;

    /// Insert the ledger entry for a migration.
    ///
    /// Fails with `DuplicateApplication` if one already exists.
    async fn record_applied(
        &mut self,
        migration_id: MigrationId,
        name: &str,
        checksum: &Checksum,
    ) -> MigrateResult<()>;

    /// Delete the ledger entry for a migration.
    ///
    /// Fails with `NotApplied` if none exists.
    async fn remove_applied(&mut self, migration_id: MigrationId) -> MigrateResult<()>;

    /// Append a row to the audit log.
    async fn append_audit(&mut self, entry: &AuditEntry) -> MigrateResult<()>;

    /// Commit the step.
    async fn commit(&mut self) -> MigrateResult<()>;

    /// Roll back the step. A no-op if the database already aborted it.
    async fn rollback(&mut self) -> MigrateResult<()>;
}

/// A database the engine can migrate.
#[async_trait::async_trait]
pub trait TargetDatabase: LedgerStore {
    /// Which backend this is.
    fn backend(&self) -> Backend;

    /// Open a transaction for one step.
    async fn begin<'a>(&'a mut self) -> MigrateResult<Box<dyn Transaction + 'a>>;
}

#[async_trait::async_trait]
impl<T: LedgerStore + ?Sized> LedgerStore for Box<T> {
    async fn initialize(&mut self) -> MigrateResult<()> {
        (**self).initialize().await
    }

    async fn is_initialized(&mut self) -> MigrateResult<bool> {
        (**self).is_initialized().await
    }

    async fn list_applied(&mut self) -> MigrateResult<Vec<LedgerEntry>> {
        (**self).list_applied().await
    }

    async fn list_history(&mut self) -> MigrateResult<Vec<AuditEntry>> {
        (**self).list_history().await
    }
}

#[async_trait::async_trait]
impl<T: TargetDatabase + ?Sized> TargetDatabase for Box<T> {
    fn backend(&self) -> Backend {
        (**self).backend()
    }

    async fn begin<'a>(&'a mut self) -> MigrateResult<Box<dyn Transaction + 'a>> {
        (**self).begin().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_from_url() {
        assert_eq!(Backend::from_url("sqlite::memory:").unwrap(), Backend::Sqlite);
        assert_eq!(Backend::from_url("sqlite://./app.db").unwrap(), Backend::Sqlite);
        assert_eq!(Backend::from_url("./app.db").unwrap(), Backend::Sqlite);
        assert_eq!(
            Backend::from_url("postgres://localhost/app").unwrap(),
            Backend::Postgres
        );
        assert_eq!(
            Backend::from_url("postgresql://localhost/app").unwrap(),
            Backend::Postgres
        );
    }

    #[test]
    fn test_unsupported_backend_fails_fast() {
        let err = Backend::from_url("mysql://localhost/app").unwrap_err();
        assert!(matches!(err, MigrationError::StorageUnavailable(_)));
        assert!(err.to_string().contains("mysql"));

        assert!(Backend::from_url("mongodb://localhost").is_err());
    }

    #[tokio::test]
    async fn test_boxed_database_delegates() {
        let mut db: Box<dyn TargetDatabase> = Box::new(crate::memory::MemoryDatabase::new());
        assert!(!db.is_initialized().await.unwrap());
        db.initialize().await.unwrap();
        assert!(db.is_initialized().await.unwrap());
        assert_eq!(db.backend(), Backend::Sqlite);

        let mut tx = db.begin().await.unwrap();
        tx.record_applied(MigrationId::from(1u32), "one", &Checksum::of("SELECT 1;"))
            .await
            .unwrap();
        tx.commit().await.unwrap();
        drop(tx);

        assert_eq!(db.list_applied().await.unwrap().len(), 1);
    }

    #[test]
    fn test_native_lock_capability() {
        assert!(Backend::Postgres.has_native_advisory_lock());
        assert!(!Backend::Sqlite.has_native_advisory_lock());
    }
}
