//! Advisory lock emulated with a row in the lock table.
//!
//! SQLite has no named locks, so a run claims the lock by inserting a row
//! keyed by the lock name with `INSERT OR IGNORE` and reading back the owner.
//! Every database handle gets its own owner ID, prefixed with the host and
//! process so an abandoned row can be traced back to the run that left it.
//!
//! The claim needs SQLite's write lock. While the holder is inside a step
//! transaction that write lock is taken, so the claim runs without a busy
//! timeout and a busy database counts as a held lock.

use std::time::Duration;

use chrono::Utc;
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;
use tracing::debug;
use uuid::Uuid;

use tidemark_migrate::{AdvisoryLock, LedgerSql, MigrateResult, Operator};

use crate::error::{is_busy, SqliteError};

/// A lock row in the lock table.
pub struct SqliteLock {
    conn: Connection,
    sql: LedgerSql,
    name: String,
    owner: String,
}

impl SqliteLock {
    pub(crate) fn new(conn: Connection, sql: LedgerSql, name: impl Into<String>) -> Self {
        let owner = format!(
            "{}:{}:{}",
            Operator::current().hostname,
            std::process::id(),
            Uuid::new_v4()
        );
        Self {
            conn,
            sql,
            name: name.into(),
            owner,
        }
    }

    /// Owner ID written into the lock row: `host:pid:uuid`.
    pub fn owner(&self) -> &str {
        &self.owner
    }
}

#[async_trait::async_trait]
impl AdvisoryLock for SqliteLock {
    fn name(&self) -> &str {
        &self.name
    }

    async fn try_acquire(&mut self) -> MigrateResult<bool> {
        let create = self.sql.create_lock_table();
        let acquire = self.sql.acquire_lock();
        let select = self.sql.select_lock_owner();
        let name = self.name.clone();
        let owner = self.owner.clone();

        let holder = self
            .conn
            .call(move |conn| {
                let previous: i64 = conn.query_row("PRAGMA busy_timeout", [], |row| row.get(0))?;
                conn.busy_timeout(Duration::ZERO)?;

                let claimed = conn
                    .execute_batch(&create)
                    .and_then(|()| {
                        conn.execute(&acquire, rusqlite::params![name, owner, Utc::now().to_rfc3339()])
                    })
                    .and_then(|_| conn.query_row(&select, [&name], |row| row.get::<_, String>(0)));

                conn.busy_timeout(Duration::from_millis(u64::try_from(previous).unwrap_or(0)))?;
                match claimed {
                    Ok(holder) => Ok(Some(holder)),
                    Err(e) if is_busy(&e) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(SqliteError::from)?;

        match holder {
            Some(holder) => {
                debug!(lock = %self.name, holder = %holder, "Checked lock row");
                Ok(holder == self.owner)
            }
            None => {
                debug!(lock = %self.name, "Database is busy, treating the lock as held");
                Ok(false)
            }
        }
    }

    async fn release(&mut self) -> MigrateResult<()> {
        let release = self.sql.release_lock();
        let name = self.name.clone();
        let owner = self.owner.clone();

        self.conn
            .call(move |conn| {
                conn.execute(&release, rusqlite::params![name, owner])?;
                Ok(())
            })
            .await
            .map_err(SqliteError::from)?;
        Ok(())
    }

    async fn force_release(&mut self) -> MigrateResult<Option<String>> {
        let create = self.sql.create_lock_table();
        let select = self.sql.select_lock_owner();
        let clear = self.sql.clear_lock();
        let name = self.name.clone();

        let holder = self
            .conn
            .call(move |conn| {
                conn.execute_batch(&create)?;
                let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
                let holder: Option<String> = tx
                    .query_row(&select, [&name], |row| row.get(0))
                    .optional()?;
                tx.execute(&clear, [&name])?;
                tx.commit()?;
                Ok(holder)
            })
            .await
            .map_err(SqliteError::from)?;

        debug!(lock = %self.name, holder = ?holder, "Cleared lock row");
        Ok(holder)
    }
}
