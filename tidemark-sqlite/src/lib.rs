//! SQLite backend for Tidemark.
//!
//! This crate lets the Tidemark migration engine drive a SQLite database,
//! using `tokio-rusqlite` for asynchronous access.
//!
//! # Features
//!
//! - Ledger, audit log and lock tables inside the migrated database
//! - One `BEGIN IMMEDIATE` transaction per migration step
//! - Advisory locking emulated with a lock-table row
//! - In-memory and file-based databases
//!
//! # Example
//!
//! ```rust,ignore
//! use tidemark_migrate::{MigrationConfig, MigrationEngine, Target};
//! use tidemark_sqlite::{SqliteConfig, SqliteDatabase};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SqliteConfig::from_url("sqlite://./app.db?mode=rwc")?;
//!     let db = SqliteDatabase::open(config).await?;
//!     let lock = db.advisory_lock("app");
//!
//!     let mut engine = MigrationEngine::new(MigrationConfig::new(), db, lock);
//!     engine.up(Target::Latest).await?.into_result()?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod database;
pub mod error;
pub mod lock;

pub use config::{DatabasePath, JournalMode, SqliteConfig, SynchronousMode};
pub use database::SqliteDatabase;
pub use error::{SqliteError, SqliteResult};
pub use lock::SqliteLock;
