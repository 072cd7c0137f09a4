//! Session-level advisory lock.

use sha2::{Digest, Sha256};
use tokio_postgres::Client;
use tracing::{debug, warn};

use tidemark_migrate::{AdvisoryLock, MigrateResult};

use crate::error::PgError;

/// Map a lock name onto the 64-bit key space of `pg_advisory_lock`.
pub fn lock_key(name: &str) -> i64 {
    let digest = Sha256::digest(name.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}

/// A `pg_try_advisory_lock` held on a dedicated session.
///
/// If the process dies, the server drops the session and the lock with it.
pub struct PgLock {
    client: Client,
    name: String,
    key: i64,
}

impl PgLock {
    pub(crate) fn new(client: Client, name: impl Into<String>) -> Self {
        let name = name.into();
        let key = lock_key(&name);
        Self { client, name, key }
    }

    /// The advisory lock key.
    pub fn key(&self) -> i64 {
        self.key
    }
}

#[async_trait::async_trait]
impl AdvisoryLock for PgLock {
    fn name(&self) -> &str {
        &self.name
    }

    async fn try_acquire(&mut self) -> MigrateResult<bool> {
        let row = self
            .client
            .query_one("SELECT pg_try_advisory_lock($1)", &[&self.key])
            .await
            .map_err(PgError::from)?;
        let acquired: bool = row.try_get(0).map_err(PgError::from)?;
        debug!(lock = %self.name, key = self.key, acquired, "Tried advisory lock");
        Ok(acquired)
    }

    async fn release(&mut self) -> MigrateResult<()> {
        let row = self
            .client
            .query_one("SELECT pg_advisory_unlock($1)", &[&self.key])
            .await
            .map_err(PgError::from)?;
        let released: bool = row.try_get(0).map_err(PgError::from)?;
        if !released {
            warn!(lock = %self.name, key = self.key, "Advisory lock was not held by this session");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_key_is_stable() {
        assert_eq!(lock_key("tidemark_migrations"), lock_key("tidemark_migrations"));
        assert_ne!(lock_key("tidemark_migrations"), lock_key("other_app"));
    }
}
