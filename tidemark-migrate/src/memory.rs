//! In-memory target database.
//!
//! Keeps the ledger, audit log and executed scripts in process memory, with
//! the same transactional behavior as the real backends: a transaction works
//! on a staged copy that replaces the shared state on commit. Clones share
//! state, so a test can hand one clone to the engine and inspect another.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::debug;

use crate::database::{Backend, TargetDatabase, Transaction};
use crate::error::{MigrateResult, MigrationError};
use crate::ledger::{AuditEntry, LedgerEntry, LedgerStore};
use crate::migration::{Checksum, MigrationId};

#[derive(Debug, Clone, Default)]
struct State {
    ledger: BTreeMap<MigrationId, LedgerEntry>,
    audit: Vec<AuditEntry>,
    scripts: Vec<String>,
    initialized: bool,
}

#[derive(Debug, Default)]
struct Faults {
    script_pattern: Option<String>,
    fail_commits: bool,
    unavailable: bool,
}

/// An in-memory [`TargetDatabase`].
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<State>>,
    faults: Arc<Mutex<Faults>>,
}

impl MemoryDatabase {
    /// Create an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every script containing `pattern`.
    pub fn fail_on(&self, pattern: impl Into<String>) {
        self.faults.lock().script_pattern = Some(pattern.into());
    }

    /// Stop failing scripts.
    pub fn clear_failures(&self) {
        let mut faults = self.faults.lock();
        faults.script_pattern = None;
        faults.fail_commits = false;
    }

    /// Fail every commit.
    pub fn fail_commits(&self, fail: bool) {
        self.faults.lock().fail_commits = fail;
    }

    /// Make every operation fail with `StorageUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.lock().unavailable = unavailable;
    }

    /// IDs currently in the ledger.
    pub fn applied_ids(&self) -> Vec<MigrationId> {
        self.state.lock().ledger.keys().copied().collect()
    }

    /// Scripts committed so far, in order.
    pub fn executed_scripts(&self) -> Vec<String> {
        self.state.lock().scripts.clone()
    }

    /// Audit rows committed so far.
    pub fn history(&self) -> Vec<AuditEntry> {
        self.state.lock().audit.clone()
    }

    fn check_available(&self) -> MigrateResult<()> {
        if self.faults.lock().unavailable {
            return Err(MigrationError::storage_unavailable("in-memory database is offline"));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl LedgerStore for MemoryDatabase {
    async fn initialize(&mut self) -> MigrateResult<()> {
        self.check_available()?;
        self.state.lock().initialized = true;
        Ok(())
    }

    async fn is_initialized(&mut self) -> MigrateResult<bool> {
        self.check_available()?;
        Ok(self.state.lock().initialized)
    }

    async fn list_applied(&mut self) -> MigrateResult<Vec<LedgerEntry>> {
        self.check_available()?;
        Ok(self.state.lock().ledger.values().cloned().collect())
    }

    async fn list_history(&mut self) -> MigrateResult<Vec<AuditEntry>> {
        self.check_available()?;
        Ok(self.history())
    }
}

#[async_trait::async_trait]
impl TargetDatabase for MemoryDatabase {
    fn backend(&self) -> Backend {
        Backend::Sqlite
    }

    async fn begin<'a>(&'a mut self) -> MigrateResult<Box<dyn Transaction + 'a>> {
        self.check_available()?;
        let staged = self.state.lock().clone();
        Ok(Box::new(MemoryTransaction {
            db: self,
            staged: Some(staged),
        }))
    }
}

struct MemoryTransaction<'a> {
    db: &'a MemoryDatabase,
    staged: Option<State>,
}

impl MemoryTransaction<'_> {
    fn staged(&mut self) -> MigrateResult<&mut State> {
        self.staged
            .as_mut()
            .ok_or_else(|| MigrationError::database("transaction is already finished"))
    }
}

#[async_trait::async_trait]
impl Transaction for MemoryTransaction<'_> {
    async fn execute_script(&mut self, script: &str) -> MigrateResult<()> {
        let pattern = self.db.faults.lock().script_pattern.clone();
        if let Some(pattern) = pattern {
            if script.contains(&pattern) {
                return Err(MigrationError::database(format!(
                    "script failed near '{}'",
                    pattern
                )));
            }
        }
        debug!(sql = %script, "Executing script");
        self.staged()?.scripts.push(script.to_string());
        Ok(())
    }

    async fn record_applied(
        &mut self,
        migration_id: MigrationId,
        name: &str,
        checksum: &Checksum,
    ) -> MigrateResult<()> {
        let staged = self.staged()?;
        if staged.ledger.contains_key(&migration_id) {
            return Err(MigrationError::DuplicateApplication(migration_id));
        }
        staged.ledger.insert(
            migration_id,
            LedgerEntry {
                migration_id,
                name: name.to_string(),
                checksum: checksum.clone(),
                applied_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn remove_applied(&mut self, migration_id: MigrationId) -> MigrateResult<()> {
        self.staged()?
            .ledger
            .remove(&migration_id)
            .map(|_| ())
            .ok_or(MigrationError::NotApplied(migration_id))
    }

    async fn append_audit(&mut self, entry: &AuditEntry) -> MigrateResult<()> {
        self.staged()?.audit.push(entry.clone());
        Ok(())
    }

    async fn commit(&mut self) -> MigrateResult<()> {
        if self.db.faults.lock().fail_commits {
            return Err(MigrationError::database("commit failed"));
        }
        let staged = self
            .staged
            .take()
            .ok_or_else(|| MigrationError::database("transaction is already finished"))?;
        *self.db.state.lock() = staged;
        Ok(())
    }

    async fn rollback(&mut self) -> MigrateResult<()> {
        self.staged = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rollback_discards_changes() {
        let mut db = MemoryDatabase::new();
        let id = MigrationId::from(1u32);

        let mut tx = db.begin().await.unwrap();
        tx.execute_script("CREATE TABLE t;").await.unwrap();
        tx.record_applied(id, "t", &Checksum::of("CREATE TABLE t;")).await.unwrap();
        tx.rollback().await.unwrap();
        drop(tx);

        assert!(db.applied_ids().is_empty());
        assert!(db.executed_scripts().is_empty());
    }

    #[tokio::test]
    async fn test_ledger_consistency_errors() {
        let mut db = MemoryDatabase::new();
        let id = MigrationId::from(1u32);
        let checksum = Checksum::of("SELECT 1;");

        let mut tx = db.begin().await.unwrap();
        tx.record_applied(id, "a", &checksum).await.unwrap();
        let err = tx.record_applied(id, "a", &checksum).await.unwrap_err();
        assert!(matches!(err, MigrationError::DuplicateApplication(_)));
        tx.commit().await.unwrap();
        drop(tx);

        let mut tx = db.begin().await.unwrap();
        tx.remove_applied(id).await.unwrap();
        let err = tx.remove_applied(id).await.unwrap_err();
        assert!(matches!(err, MigrationError::NotApplied(_)));
        tx.rollback().await.unwrap();
        drop(tx);

        assert_eq!(db.applied_ids(), vec![id]);
    }

    #[tokio::test]
    async fn test_unavailable() {
        let mut db = MemoryDatabase::new();
        db.set_unavailable(true);
        assert!(matches!(
            db.initialize().await,
            Err(MigrationError::StorageUnavailable(_))
        ));
        assert!(db.begin().await.is_err());
    }
}
