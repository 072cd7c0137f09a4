//! CLI error types and result alias.

use miette::Diagnostic;
use thiserror::Error;

use tidemark_migrate::MigrationError;

/// Result type alias for CLI operations
pub type CliResult<T> = Result<T, CliError>;

/// CLI error types
#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// IO error
    #[error("IO error: {0}")]
    #[diagnostic(code(tidemark::io))]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    #[diagnostic(code(tidemark::config))]
    Config(String),

    /// Migration engine error
    #[error(transparent)]
    #[diagnostic(code(tidemark::migration))]
    Migration(#[from] MigrationError),
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Migration(e) => e.exit_code(),
            Self::Io(_) | Self::Config(_) => 1,
        }
    }
}

impl From<toml::de::Error> for CliError {
    fn from(err: toml::de::Error) -> Self {
        CliError::Config(format!("Failed to parse TOML: {}", err))
    }
}

impl From<toml::ser::Error> for CliError {
    fn from(err: toml::ser::Error) -> Self {
        CliError::Config(format!("Failed to serialize TOML: {}", err))
    }
}
