//! # Tidemark
//!
//! Versioned SQL schema migrations for Rust applications.
//!
//! Tidemark provides:
//! - Hand-written `up.sql`/`down.sql` migrations, ordered by numeric ID
//! - A ledger table inside the target database recording what was applied
//! - Checksum drift detection for scripts edited after they ran
//! - One transaction per migration, stopping at the first failure
//! - An advisory lock so concurrent deploys cannot race
//! - An audit log of who applied or reverted what, and when
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tidemark::prelude::*;
//! use tidemark::sqlite::{SqliteConfig, SqliteDatabase};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = SqliteDatabase::open(SqliteConfig::from_url("sqlite://app.db?mode=rwc")?).await?;
//!     let lock = db.advisory_lock(DEFAULT_LOCK_NAME);
//!
//!     let config = MigrationConfig::new().migrations_dir("./migrations");
//!     let mut engine = MigrationEngine::new(config, db, lock);
//!
//!     let report = engine.up(Target::Latest).await?.into_result()?;
//!     println!("{}", report.summary());
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

/// The migration engine: planning, execution, ledger and locking.
pub mod migrate {
    pub use tidemark_migrate::*;
}

/// SQLite backend.
#[cfg(feature = "sqlite")]
#[cfg_attr(docsrs, doc(cfg(feature = "sqlite")))]
pub mod sqlite {
    pub use tidemark_sqlite::*;
}

/// PostgreSQL backend.
#[cfg(feature = "postgres")]
#[cfg_attr(docsrs, doc(cfg(feature = "postgres")))]
pub mod postgres {
    pub use tidemark_postgres::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::migrate::{
        AdvisoryLock, DEFAULT_LOCK_NAME, Direction, LockPolicy, MigrationConfig, MigrationEngine,
        MigrationError, MigrationId, Target, TargetDatabase,
    };
}

// Re-export key types at the crate root
pub use migrate::{MigrateResult, MigrationEngine, MigrationError};
