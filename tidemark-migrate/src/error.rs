//! Error types for the migration engine.

use thiserror::Error;

use crate::migration::{Checksum, MigrationId};

/// Result type alias for migration operations.
pub type MigrateResult<T> = Result<T, MigrationError>;

/// Errors that can occur during migration operations.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The target database cannot be reached, or its backend is unsupported.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A ledger entry already exists for this migration.
    #[error("Migration {0} is already recorded in the ledger")]
    DuplicateApplication(MigrationId),

    /// No ledger entry exists for this migration.
    #[error("Migration {0} is not recorded in the ledger")]
    NotApplied(MigrationId),

    /// The ledger references a migration the repository no longer has.
    #[error(
        "Ledger references migration {id} ({name}) which no longer exists in the migrations directory"
    )]
    MissingMigration {
        /// Migration ID from the ledger.
        id: MigrationId,
        /// Name recorded in the ledger.
        name: String,
    },

    /// A migration's script changed after it was applied.
    #[error("Checksum drift for migration {id}: ledger recorded {recorded}, script now hashes to {current}")]
    ChecksumDrift {
        /// Migration ID.
        id: MigrationId,
        /// Checksum captured when the migration was applied.
        recorded: Checksum,
        /// Checksum of the script as it is now.
        current: Checksum,
    },

    /// A reverse plan needs a migration that has no down script.
    #[error("Migration {id}_{name} has no down script and cannot be reverted")]
    Irreversible {
        /// Migration ID.
        id: MigrationId,
        /// Migration name.
        name: String,
    },

    /// Another run holds the migration lock.
    #[error("Another migration run holds the lock '{0}'")]
    MigrationInProgress(String),

    /// Two migrations in the repository share an ID.
    #[error("Duplicate migration ID {0} in the migrations directory")]
    DuplicateMigrationId(MigrationId),

    /// A plan target that is neither known nor applied.
    #[error("Target migration {0} does not exist")]
    UnknownTarget(MigrationId),

    /// Invalid migration file or format.
    #[error("Invalid migration: {0}")]
    InvalidMigration(String),

    /// A step failed; the step's transaction was rolled back.
    #[error("Migration {id}_{name} failed: {source}")]
    StepFailed {
        /// Migration ID of the failing step.
        id: MigrationId,
        /// Migration name of the failing step.
        name: String,
        /// Underlying failure.
        #[source]
        source: Box<MigrationError>,
    },

    /// A run failed and the lock could not be given back afterwards.
    #[error("{source} (the migration lock was not released: {release_error})")]
    LockNotReleased {
        /// Why the run failed.
        #[source]
        source: Box<MigrationError>,
        /// Why the release failed.
        release_error: Box<MigrationError>,
    },

    /// The run was interrupted before it could finish.
    #[error("Migration run cancelled")]
    Cancelled,

    /// Database statement error.
    #[error("Database error: {0}")]
    Database(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// File system error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MigrationError {
    /// Create a storage unavailable error.
    pub fn storage_unavailable(msg: impl Into<String>) -> Self {
        Self::StorageUnavailable(msg.into())
    }

    /// Create a database error.
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a migration file error.
    pub fn migration_file(msg: impl Into<String>) -> Self {
        Self::InvalidMigration(msg.into())
    }

    /// Create a lock contention error.
    pub fn in_progress(lock: impl Into<String>) -> Self {
        Self::MigrationInProgress(lock.into())
    }

    /// Wrap an error as the failure of one plan step.
    pub fn step_failed(id: MigrationId, name: impl Into<String>, source: MigrationError) -> Self {
        Self::StepFailed {
            id,
            name: name.into(),
            source: Box::new(source),
        }
    }

    /// Attach a failed lock release to the error that ended the run.
    pub fn with_release_error(self, release_error: MigrationError) -> Self {
        Self::LockNotReleased {
            source: Box::new(self),
            release_error: Box::new(release_error),
        }
    }

    /// Check if this is a recoverable error.
    ///
    /// Only lock contention and cancellation are worth retrying later; every
    /// other kind needs an operator to look at the database or the scripts.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::MigrationInProgress(_) | Self::Cancelled)
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::StorageUnavailable(_) => 3,
            Self::DuplicateApplication(_) | Self::NotApplied(_) => 4,
            Self::MissingMigration { .. } => 5,
            Self::ChecksumDrift { .. } => 6,
            Self::Irreversible { .. } => 7,
            Self::StepFailed { source, .. } => match source.exit_code() {
                1 => 8,
                code => code,
            },
            Self::LockNotReleased { source, .. } => source.exit_code(),
            Self::MigrationInProgress(_) => 75,
            Self::Cancelled => 130,
            Self::DuplicateMigrationId(_)
            | Self::UnknownTarget(_)
            | Self::InvalidMigration(_)
            | Self::Database(_)
            | Self::Config(_)
            | Self::Io(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MigrationError::NotApplied(MigrationId::from(12u32));
        assert!(err.to_string().contains("0012"));
    }

    #[test]
    fn test_checksum_drift_display() {
        let err = MigrationError::ChecksumDrift {
            id: MigrationId::from(3u32),
            recorded: Checksum::of("CREATE TABLE a (id INT);"),
            current: Checksum::of("CREATE TABLE a (id BIGINT);"),
        };
        let msg = err.to_string();
        assert!(msg.contains(Checksum::of("CREATE TABLE a (id INT);").as_str()));
        assert!(msg.contains(Checksum::of("CREATE TABLE a (id BIGINT);").as_str()));
    }

    #[test]
    fn test_is_recoverable() {
        assert!(MigrationError::in_progress("_tidemark_lock").is_recoverable());
        assert!(MigrationError::Cancelled.is_recoverable());
        assert!(!MigrationError::storage_unavailable("refused").is_recoverable());
        assert!(!MigrationError::NotApplied(MigrationId::from(1u32)).is_recoverable());
    }

    #[test]
    fn test_exit_codes() {
        let id = MigrationId::from(1u32);
        assert_eq!(MigrationError::storage_unavailable("x").exit_code(), 3);
        assert_eq!(MigrationError::DuplicateApplication(id).exit_code(), 4);
        assert_eq!(
            MigrationError::Irreversible {
                id,
                name: "x".into()
            }
            .exit_code(),
            7
        );
        assert_eq!(MigrationError::in_progress("lock").exit_code(), 75);
    }

    #[test]
    fn test_step_failed_exit_code_follows_cause() {
        let id = MigrationId::from(2u32);
        let script = MigrationError::step_failed(id, "add_index", MigrationError::database("syntax"));
        assert_eq!(script.exit_code(), 8);

        let ledger = MigrationError::step_failed(id, "add_index", MigrationError::DuplicateApplication(id));
        assert_eq!(ledger.exit_code(), 4);
    }

    #[test]
    fn test_release_error_keeps_cause_exit_code() {
        let err = MigrationError::ChecksumDrift {
            id: MigrationId::from(1u32),
            recorded: Checksum::of("a"),
            current: Checksum::of("b"),
        }
        .with_release_error(MigrationError::database("disk I/O error"));

        assert_eq!(err.exit_code(), 6);
        assert!(!err.is_recoverable());
        let msg = err.to_string();
        assert!(msg.contains("Checksum drift"));
        assert!(msg.contains("disk I/O error"));
    }
}
