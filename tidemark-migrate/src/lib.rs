//! # tidemark-migrate
//!
//! Migration engine for Tidemark.
//!
//! This crate provides functionality for:
//! - Loading hand-written SQL migrations from a directory
//! - Tracking applied migrations in a ledger inside the target database
//! - Planning which migrations to apply or revert, with checksum drift detection
//! - Transactional, one-migration-at-a-time apply and rollback
//! - Serializing concurrent runs with an advisory lock
//! - An audit log of who applied or reverted what, and when
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌────────────────┐
//! │ Migrations   │────▶│                │     ┌─────────────┐
//! │ directory    │     │    Planner     │────▶│    Plan     │
//! └──────────────┘  ┌─▶│                │     └─────────────┘
//!                   │  └────────────────┘            │
//! ┌──────────────┐  │                                ▼
//! │ Ledger table │──┘  ┌────────────────┐     ┌─────────────┐
//! └──────────────┘     │ Advisory lock  │────▶│  Executor   │
//!        ▲             └────────────────┘     └─────────────┘
//!        │                                           │
//!        └───────── one transaction per step ◀───────┘
//! ```
//!
//! The planner is a pure function of the migration set and the ledger. The
//! executor takes the lock, re-reads the ledger, plans, and runs each step in
//! its own transaction: the script and the ledger update commit together, and
//! the first failure stops the run after rolling back its own step.
//!
//! ## Example
//!
//! ```rust,ignore
//! use tidemark_migrate::{MigrationConfig, MigrationEngine, Target};
//!
//! async fn run_migrations(db: impl TargetDatabase, lock: impl AdvisoryLock)
//!     -> Result<(), Box<dyn std::error::Error>>
//! {
//!     let config = MigrationConfig::new().migrations_dir("./migrations");
//!     let mut engine = MigrationEngine::new(config, db, lock);
//!
//!     // Creates the ledger tables
//!     engine.initialize().await?;
//!
//!     // Dry run
//!     let plan = engine.plan(Direction::Up, Target::Latest).await?;
//!     println!("Plan: {}", plan.summary());
//!
//!     // Apply
//!     let report = engine.up(Target::Latest).await?.into_result()?;
//!     println!("{}", report.summary());
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Migration Files
//!
//! ```text
//! migrations/
//! ├── 0001_create_users/
//! │   ├── up.sql
//! │   └── down.sql
//! └── 0002_add_posts/
//!     └── up.sql          # no down.sql: cannot be reverted
//! ```

pub mod database;
pub mod engine;
pub mod error;
pub mod executor;
pub mod file;
pub mod ledger;
pub mod lock;
pub mod memory;
pub mod migration;
pub mod planner;

// Re-exports
pub use database::{Backend, TargetDatabase, Transaction};
pub use engine::{ChecksumDrift, MigrationConfig, MigrationEngine, MigrationStatus};
pub use error::{MigrateResult, MigrationError};
pub use executor::{ExecutionReport, Executor, StepFailure, StepReport, StepStatus};
pub use file::{IdScheme, MigrationFileManager};
pub use ledger::{AuditEntry, LedgerEntry, LedgerNames, LedgerSql, LedgerStore, Operator};
pub use lock::{
    AdvisoryLock, CancelSignal, InMemoryLock, LockCoordinator, LockPolicy, DEFAULT_LOCK_NAME,
};
pub use memory::MemoryDatabase;
pub use migration::{Checksum, Direction, Migration, MigrationId, MigrationSet};
pub use planner::{compute_plan, verify_ledger, Plan, PlanStep, Target};
