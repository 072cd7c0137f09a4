//! Migration engine implementation.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::database::TargetDatabase;
use crate::error::MigrateResult;
use crate::executor::{ExecutionReport, Executor};
use crate::file::{IdScheme, MigrationFileManager};
use crate::ledger::{AuditEntry, LedgerEntry, LedgerNames, Operator};
use crate::lock::{AdvisoryLock, CancelSignal, LockCoordinator, LockPolicy, DEFAULT_LOCK_NAME};
use crate::migration::{Checksum, Direction, Migration, MigrationId, MigrationSet};
use crate::planner::{compute_plan, Plan, Target};

/// Configuration for the migration engine.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Path to the migrations directory.
    pub migrations_dir: PathBuf,
    /// Ledger, audit and lock table names.
    pub ledger: LedgerNames,
    /// Name of the advisory lock.
    pub lock_name: String,
    /// What to do when another run holds the lock.
    pub lock_policy: LockPolicy,
    /// How new migrations are numbered.
    pub id_scheme: IdScheme,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            migrations_dir: PathBuf::from("./migrations"),
            ledger: LedgerNames::default(),
            lock_name: DEFAULT_LOCK_NAME.to_string(),
            lock_policy: LockPolicy::default(),
            id_scheme: IdScheme::default(),
        }
    }
}

impl MigrationConfig {
    /// Create a new configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the migrations directory.
    pub fn migrations_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.migrations_dir = dir.into();
        self
    }

    /// Set the ledger table names.
    pub fn ledger(mut self, names: LedgerNames) -> Self {
        self.ledger = names;
        self
    }

    /// Set the advisory lock name.
    pub fn lock_name(mut self, name: impl Into<String>) -> Self {
        self.lock_name = name.into();
        self
    }

    /// Set the lock policy.
    pub fn lock_policy(mut self, policy: LockPolicy) -> Self {
        self.lock_policy = policy;
        self
    }

    /// Set the ID scheme for new migrations.
    pub fn id_scheme(mut self, scheme: IdScheme) -> Self {
        self.id_scheme = scheme;
        self
    }
}

/// A ledger entry whose script changed after it was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumDrift {
    /// Migration ID.
    pub id: MigrationId,
    /// Migration name.
    pub name: String,
    /// Checksum in the ledger.
    pub recorded: Checksum,
    /// Checksum of the script on disk.
    pub current: Checksum,
}

/// Migration status information.
///
/// Unlike planning, building a status never fails on drift or orphaned
/// entries; it reports them.
#[derive(Debug, Clone, Default)]
pub struct MigrationStatus {
    /// Ledger entries, by ID.
    pub applied: Vec<LedgerEntry>,
    /// Known migrations not in the ledger, by ID.
    pub pending: Vec<Migration>,
    /// Applied migrations whose script changed.
    pub drifted: Vec<ChecksumDrift>,
    /// Ledger entries with no script on disk.
    pub orphaned: Vec<LedgerEntry>,
}

impl MigrationStatus {
    /// Build a status from the repository and the ledger.
    pub fn new(known: &MigrationSet, applied: Vec<LedgerEntry>) -> Self {
        let mut status = Self::default();

        for entry in &applied {
            match known.get(entry.migration_id) {
                None => status.orphaned.push(entry.clone()),
                Some(m) if m.checksum != entry.checksum => status.drifted.push(ChecksumDrift {
                    id: m.id,
                    name: m.name.clone(),
                    recorded: entry.checksum.clone(),
                    current: m.checksum.clone(),
                }),
                Some(_) => {}
            }
        }

        status.pending = known
            .iter()
            .filter(|m| !applied.iter().any(|e| e.migration_id == m.id))
            .cloned()
            .collect();
        status.applied = applied;
        status
    }

    /// Check if nothing is pending and the ledger is intact.
    pub fn is_up_to_date(&self) -> bool {
        self.pending.is_empty() && !self.has_issues()
    }

    /// Check for drift or orphaned entries.
    pub fn has_issues(&self) -> bool {
        !self.drifted.is_empty() || !self.orphaned.is_empty()
    }

    /// Get a summary of the status.
    pub fn summary(&self) -> String {
        let mut parts = vec![
            format!("{} applied", self.applied.len()),
            format!("{} pending", self.pending.len()),
        ];
        if !self.drifted.is_empty() {
            parts.push(format!("{} drifted", self.drifted.len()));
        }
        if !self.orphaned.is_empty() {
            parts.push(format!("{} missing", self.orphaned.len()));
        }
        parts.join(", ")
    }
}

/// The main migration engine.
///
/// Wires the migration directory, the target database and the advisory lock
/// together. Runs create the ledger tables if they are missing; the read-only
/// entry points never do.
pub struct MigrationEngine<D, L> {
    config: MigrationConfig,
    files: MigrationFileManager,
    db: D,
    lock: LockCoordinator<L>,
    operator: Operator,
    cancel: CancelSignal,
}

impl<D: TargetDatabase, L: AdvisoryLock> MigrationEngine<D, L> {
    /// Create a new migration engine.
    pub fn new(config: MigrationConfig, db: D, lock: L) -> Self {
        let files = MigrationFileManager::new(&config.migrations_dir);
        let lock = LockCoordinator::new(lock, config.lock_policy);
        Self {
            config,
            files,
            db,
            lock,
            operator: Operator::current(),
            cancel: CancelSignal::new(),
        }
    }

    /// Set the identity written to the audit log.
    pub fn with_operator(mut self, operator: Operator) -> Self {
        self.operator = operator;
        self
    }

    /// Use an existing cancel signal.
    pub fn with_cancel_signal(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    /// Signal that stops a run between steps.
    pub fn cancel_signal(&self) -> CancelSignal {
        self.cancel.clone()
    }

    /// Get the configuration.
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Get the migrations directory.
    pub fn migrations_dir(&self) -> &Path {
        self.files.migrations_dir()
    }

    /// Get the target database.
    pub fn database(&self) -> &D {
        &self.db
    }

    /// Get the target database mutably.
    pub fn database_mut(&mut self) -> &mut D {
        &mut self.db
    }

    /// Initialize the migration system.
    ///
    /// Creates the migrations directory and the ledger tables. Safe to repeat.
    pub async fn initialize(&mut self) -> MigrateResult<()> {
        self.files.ensure_dir().await?;
        self.db.initialize().await?;
        info!(backend = %self.db.backend(), dir = %self.files.migrations_dir().display(), "Initialized migrations");
        Ok(())
    }

    /// Load the migrations from disk.
    pub async fn migrations(&self) -> MigrateResult<MigrationSet> {
        self.files.load().await
    }

    /// Create a new migration directory.
    pub async fn create_migration(&self, name: &str) -> MigrateResult<PathBuf> {
        self.files.create_migration(name, self.config.id_scheme).await
    }

    /// Applied, pending, drifted and orphaned migrations.
    ///
    /// Read-only: a database without a ledger reports everything as pending.
    pub async fn status(&mut self) -> MigrateResult<MigrationStatus> {
        let known = self.files.load().await?;
        let applied = self.read_applied().await?;
        Ok(MigrationStatus::new(&known, applied))
    }

    /// Compute a plan without running it. Never creates the ledger.
    pub async fn plan(&mut self, direction: Direction, target: Target) -> MigrateResult<Plan> {
        let known = self.files.load().await?;
        let applied = self.read_applied().await?;
        compute_plan(&known, &applied, direction, target)
    }

    /// Apply pending migrations up to `target`.
    pub async fn up(&mut self, target: Target) -> MigrateResult<ExecutionReport> {
        self.run(Direction::Up, target).await
    }

    /// Revert applied migrations down to `target`.
    pub async fn down(&mut self, target: Target) -> MigrateResult<ExecutionReport> {
        self.run(Direction::Down, target).await
    }

    /// Initialize and apply every pending migration.
    ///
    /// Meant for application startup; a failed step is returned as an error.
    pub async fn boot(&mut self) -> MigrateResult<ExecutionReport> {
        self.initialize().await?;
        self.up(Target::Latest).await?.into_result()
    }

    /// The audit log, oldest first. Empty when the ledger does not exist yet.
    pub async fn history(&mut self) -> MigrateResult<Vec<AuditEntry>> {
        if !self.db.is_initialized().await? {
            return Ok(Vec::new());
        }
        self.db.list_history().await
    }

    /// Clear the advisory lock left behind by a run that died holding it.
    ///
    /// Returns the previous holder. Only use this once that run is known to be gone.
    pub async fn unlock(&mut self) -> MigrateResult<Option<String>> {
        self.lock.force_release().await
    }

    async fn read_applied(&mut self) -> MigrateResult<Vec<LedgerEntry>> {
        if !self.db.is_initialized().await? {
            debug!("Ledger not created yet; treating it as empty");
            return Ok(Vec::new());
        }
        self.db.list_applied().await
    }

    async fn run(&mut self, direction: Direction, target: Target) -> MigrateResult<ExecutionReport> {
        let known = self.files.load().await?;
        self.db.initialize().await?;

        let report = Executor::new(&mut self.db, &mut self.lock)
            .operator(self.operator.clone())
            .cancel_signal(self.cancel.clone())
            .execute_with(|applied| compute_plan(&known, applied, direction, target))
            .await?;

        info!(summary = %report.summary(), "Migration run finished");
        Ok(report)
    }
}
