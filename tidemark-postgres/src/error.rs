//! Error types for PostgreSQL operations.

use std::error::Error as _;

use thiserror::Error;
use tidemark_migrate::MigrationError;

/// Result type for PostgreSQL operations.
pub type PgResult<T> = Result<T, PgError>;

/// Errors that can occur during PostgreSQL operations.
#[derive(Error, Debug)]
pub enum PgError {
    /// PostgreSQL error.
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection error.
    #[error("connection error: {0}")]
    Connection(String),

    /// A ledger row could not be decoded.
    #[error("deserialization error: {0}")]
    Deserialization(String),
}

/// SQLSTATEs that mean the server cannot be used at all.
const UNAVAILABLE_STATES: &[&str] = &["3D000", "28000", "28P01", "57P01", "57P02", "57P03"];

impl PgError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Create a deserialization error.
    pub fn deserialization(message: impl Into<String>) -> Self {
        Self::Deserialization(message.into())
    }

    /// SQLSTATE of a server error, if any.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Postgres(e) => e.code().map(|c| c.code()),
            _ => None,
        }
    }

    /// Check if this is a unique violation.
    pub fn is_unique_violation(&self) -> bool {
        self.code() == Some("23505")
    }

    /// Check if the server is unreachable, as opposed to a failed statement.
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::Connection(_) => true,
            Self::Postgres(e) => {
                if e.is_closed() {
                    return true;
                }
                match e.code() {
                    Some(code) => {
                        let code = code.code();
                        code.starts_with("08") || UNAVAILABLE_STATES.contains(&code)
                    }
                    None => e.source().is_some_and(|s| s.is::<std::io::Error>()),
                }
            }
            _ => false,
        }
    }
}

impl From<PgError> for MigrationError {
    fn from(err: PgError) -> Self {
        if err.is_unavailable() {
            return MigrationError::storage_unavailable(err.to_string());
        }
        match err {
            PgError::Config(msg) => MigrationError::config(msg),
            other => MigrationError::database(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = PgError::config("invalid URL");
        assert!(matches!(err, PgError::Config(_)));
        assert!(!err.is_unavailable());

        let err = PgError::connection("connection refused");
        assert!(err.is_unavailable());
        assert_eq!(err.code(), None);
    }

    #[test]
    fn test_into_migration_error() {
        let err: MigrationError = PgError::connection("connection refused").into();
        assert!(matches!(err, MigrationError::StorageUnavailable(_)));
        assert_eq!(err.exit_code(), 3);

        let err: MigrationError = PgError::config("missing host").into();
        assert!(matches!(err, MigrationError::Config(_)));

        let err: MigrationError = PgError::deserialization("bad row").into();
        assert!(matches!(err, MigrationError::Database(_)));
    }
}
