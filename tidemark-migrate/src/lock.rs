//! Cross-process serialization of migration runs.
//!
//! A run takes one named [`AdvisoryLock`] before its first step and gives it
//! back explicitly after its last one. [`LockCoordinator`] layers the
//! fail-fast / wait policy and cancellation on top of the backend primitive.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{MigrateResult, MigrationError};

/// Lock name used when none is configured.
pub const DEFAULT_LOCK_NAME: &str = "tidemark_migrations";

/// Cooperative signal to stop a run between steps.
///
/// Cancelling never interrupts a step: its transaction still commits or rolls
/// back before the run stops.
pub type CancelSignal = CancellationToken;

/// A named lock shared by every process migrating the same database.
#[async_trait::async_trait]
pub trait AdvisoryLock: Send {
    /// Name of the lock.
    fn name(&self) -> &str;

    /// Try to take the lock without blocking.
    ///
    /// Returns `false` if someone else holds it. Taking a lock this handle
    /// already holds succeeds.
    async fn try_acquire(&mut self) -> MigrateResult<bool>;

    /// Give the lock back. Releasing a lock this handle does not hold is a no-op.
    async fn release(&mut self) -> MigrateResult<()>;

    /// Clear the lock whoever holds it, returning the previous holder.
    ///
    /// Recovers from a run that died while holding a lock that outlives its
    /// session. Locks tied to a session, such as PostgreSQL's, go away with
    /// the session and keep this default.
    async fn force_release(&mut self) -> MigrateResult<Option<String>> {
        Ok(None)
    }
}

#[async_trait::async_trait]
impl<T: AdvisoryLock + ?Sized> AdvisoryLock for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn try_acquire(&mut self) -> MigrateResult<bool> {
        (**self).try_acquire().await
    }

    async fn release(&mut self) -> MigrateResult<()> {
        (**self).release().await
    }

    async fn force_release(&mut self) -> MigrateResult<Option<String>> {
        (**self).force_release().await
    }
}

/// What to do when the lock is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockPolicy {
    /// Fail immediately with `MigrationInProgress`.
    FailFast,
    /// Poll until the lock frees up.
    Wait {
        /// Give up with `MigrationInProgress` after this long. `None` waits forever.
        timeout: Option<Duration>,
        /// Delay between attempts.
        poll_interval: Duration,
    },
}

impl LockPolicy {
    /// Wait with the default poll interval.
    pub fn wait(timeout: Option<Duration>) -> Self {
        Self::Wait {
            timeout,
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self::wait(Some(Duration::from_secs(60)))
    }
}

/// Applies a [`LockPolicy`] to an [`AdvisoryLock`].
#[derive(Debug)]
pub struct LockCoordinator<L> {
    lock: L,
    policy: LockPolicy,
    held: bool,
}

impl<L: AdvisoryLock> LockCoordinator<L> {
    /// Wrap a lock.
    pub fn new(lock: L, policy: LockPolicy) -> Self {
        Self {
            lock,
            policy,
            held: false,
        }
    }

    /// The active policy.
    pub fn policy(&self) -> LockPolicy {
        self.policy
    }

    /// Change the policy for later runs.
    pub fn set_policy(&mut self, policy: LockPolicy) {
        self.policy = policy;
    }

    /// Whether this coordinator currently holds the lock.
    pub fn is_held(&self) -> bool {
        self.held
    }

    /// The wrapped lock.
    pub fn lock(&self) -> &L {
        &self.lock
    }

    /// Take the lock according to the policy.
    ///
    /// Fails with `MigrationInProgress` on contention (immediately, or once
    /// the wait times out) and with `Cancelled` if `cancel` fires while waiting.
    pub async fn acquire(&mut self, cancel: &CancelSignal) -> MigrateResult<()> {
        let started = Instant::now();

        loop {
            if self.lock.try_acquire().await? {
                info!(lock = %self.lock.name(), "Acquired migration lock");
                self.held = true;
                return Ok(());
            }

            let poll_interval = match self.policy {
                LockPolicy::FailFast => {
                    return Err(MigrationError::in_progress(self.lock.name()));
                }
                LockPolicy::Wait {
                    timeout,
                    poll_interval,
                } => {
                    if timeout.is_some_and(|limit| started.elapsed() >= limit) {
                        return Err(MigrationError::in_progress(self.lock.name()));
                    }
                    poll_interval
                }
            };

            debug!(lock = %self.lock.name(), "Migration lock is busy, waiting");
            tokio::select! {
                _ = cancel.cancelled() => return Err(MigrationError::Cancelled),
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }

    /// Release the lock if held.
    pub async fn release(&mut self) -> MigrateResult<()> {
        if !self.held {
            return Ok(());
        }
        self.held = false;
        self.lock.release().await?;
        info!(lock = %self.lock.name(), "Released migration lock");
        Ok(())
    }

    /// Clear the lock even if another run holds it.
    pub async fn force_release(&mut self) -> MigrateResult<Option<String>> {
        self.held = false;
        let holder = self.lock.force_release().await?;
        match &holder {
            Some(holder) => warn!(lock = %self.lock.name(), holder = %holder, "Forcibly released migration lock"),
            None => info!(lock = %self.lock.name(), "Migration lock was not held"),
        }
        Ok(holder)
    }
}

/// Process-local advisory lock.
///
/// Handles created with [`handle`](InMemoryLock::handle) share the lock slot
/// but have their own identity, so they contend like separate processes.
#[derive(Debug)]
pub struct InMemoryLock {
    name: String,
    owner: Uuid,
    slot: Arc<Mutex<Option<Uuid>>>,
}

impl InMemoryLock {
    /// Create a free lock.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner: Uuid::new_v4(),
            slot: Arc::new(Mutex::new(None)),
        }
    }

    /// Another contender for the same lock.
    pub fn handle(&self) -> Self {
        Self {
            name: self.name.clone(),
            owner: Uuid::new_v4(),
            slot: Arc::clone(&self.slot),
        }
    }

    /// Whether any handle holds the lock.
    pub fn is_locked(&self) -> bool {
        self.slot.lock().is_some()
    }
}

impl Default for InMemoryLock {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_NAME)
    }
}

#[async_trait::async_trait]
impl AdvisoryLock for InMemoryLock {
    fn name(&self) -> &str {
        &self.name
    }

    async fn try_acquire(&mut self) -> MigrateResult<bool> {
        let mut slot = self.slot.lock();
        match *slot {
            Some(owner) => Ok(owner == self.owner),
            None => {
                *slot = Some(self.owner);
                Ok(true)
            }
        }
    }

    async fn release(&mut self) -> MigrateResult<()> {
        let mut slot = self.slot.lock();
        if *slot == Some(self.owner) {
            *slot = None;
        }
        Ok(())
    }

    async fn force_release(&mut self) -> MigrateResult<Option<String>> {
        Ok(self.slot.lock().take().map(|owner| owner.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_lock_contention() {
        let mut first = InMemoryLock::new("app");
        let mut second = first.handle();

        assert!(first.try_acquire().await.unwrap());
        assert!(first.try_acquire().await.unwrap());
        assert!(!second.try_acquire().await.unwrap());

        // Releasing someone else's lock does nothing.
        second.release().await.unwrap();
        assert!(first.is_locked());

        first.release().await.unwrap();
        assert!(!first.is_locked());
        assert!(second.try_acquire().await.unwrap());
    }

    #[tokio::test]
    async fn test_fail_fast_policy() {
        let mut holder = LockCoordinator::new(InMemoryLock::new("app"), LockPolicy::FailFast);
        let mut contender = LockCoordinator::new(holder.lock().handle(), LockPolicy::FailFast);
        let cancel = CancelSignal::new();

        holder.acquire(&cancel).await.unwrap();
        let err = contender.acquire(&cancel).await.unwrap_err();
        assert!(matches!(err, MigrationError::MigrationInProgress(ref name) if name == "app"));
        assert!(!contender.is_held());

        holder.release().await.unwrap();
        contender.acquire(&cancel).await.unwrap();
        assert!(contender.is_held());
    }

    #[tokio::test]
    async fn test_wait_policy_times_out() {
        let mut holder = LockCoordinator::new(InMemoryLock::new("app"), LockPolicy::FailFast);
        let policy = LockPolicy::Wait {
            timeout: Some(Duration::from_millis(50)),
            poll_interval: Duration::from_millis(10),
        };
        let mut contender = LockCoordinator::new(holder.lock().handle(), policy);
        let cancel = CancelSignal::new();

        holder.acquire(&cancel).await.unwrap();
        let err = contender.acquire(&cancel).await.unwrap_err();
        assert!(matches!(err, MigrationError::MigrationInProgress(_)));
    }

    #[tokio::test]
    async fn test_wait_policy_acquires_after_release() {
        let mut holder = LockCoordinator::new(InMemoryLock::new("app"), LockPolicy::FailFast);
        let mut contender =
            LockCoordinator::new(holder.lock().handle(), LockPolicy::Wait {
                timeout: Some(Duration::from_secs(5)),
                poll_interval: Duration::from_millis(5),
            });
        let cancel = CancelSignal::new();

        holder.acquire(&cancel).await.unwrap();
        let (acquired, released) = tokio::join!(contender.acquire(&cancel), async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            holder.release().await
        });
        acquired.unwrap();
        released.unwrap();
        assert!(contender.is_held());
    }

    #[tokio::test]
    async fn test_cancel_while_waiting() {
        let mut holder = LockCoordinator::new(InMemoryLock::new("app"), LockPolicy::FailFast);
        let mut contender = LockCoordinator::new(holder.lock().handle(), LockPolicy::wait(None));
        let cancel = CancelSignal::new();

        holder.acquire(&cancel).await.unwrap();
        cancel.cancel();
        let err = contender.acquire(&cancel).await.unwrap_err();
        assert!(matches!(err, MigrationError::Cancelled));
    }

    #[tokio::test]
    async fn test_force_release_clears_abandoned_lock() {
        let abandoned = InMemoryLock::new("app");
        let mut stale = abandoned.handle();
        assert!(stale.try_acquire().await.unwrap());
        drop(stale);

        let mut contender = LockCoordinator::new(abandoned.handle(), LockPolicy::FailFast);
        let cancel = CancelSignal::new();
        assert!(contender.acquire(&cancel).await.is_err());

        let holder = contender.force_release().await.unwrap();
        assert!(holder.is_some());
        assert!(!abandoned.is_locked());
        assert_eq!(contender.force_release().await.unwrap(), None);

        contender.acquire(&cancel).await.unwrap();
        assert!(contender.is_held());
    }

    #[tokio::test]
    async fn test_release_without_acquire_is_noop() {
        let mut coordinator = LockCoordinator::new(InMemoryLock::default(), LockPolicy::FailFast);
        coordinator.release().await.unwrap();
        assert_eq!(coordinator.lock().name(), DEFAULT_LOCK_NAME);
    }
}
