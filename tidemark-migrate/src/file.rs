//! Migration file management.
//!
//! Migrations live in one directory per migration:
//!
//! ```text
//! migrations/
//!   0001_create_users/
//!     up.sql
//!     down.sql      (optional)
//!   0002_add_email/
//!     up.sql
//! ```

use std::path::{Path, PathBuf};

use chrono::Utc;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{MigrateResult, MigrationError};
use crate::migration::{Migration, MigrationId, MigrationSet};

const MIGRATION_DIR_PATTERN: &str = r"^([0-9]+)_([A-Za-z0-9_]+)$";

const UP_TEMPLATE: &str = "-- Write the SQL that applies this migration.\n";
const DOWN_TEMPLATE: &str =
    "-- Write the SQL that reverts this migration.\n-- Leave this file without statements if it cannot be reverted.\n";

/// How new migrations are numbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdScheme {
    /// One more than the highest existing ID, zero-padded (`0001`).
    #[default]
    Sequence,
    /// UTC `YYYYMMDDHHMMSS`.
    Timestamp,
}

/// Reads migrations from, and creates migrations in, a directory.
#[derive(Debug, Clone)]
pub struct MigrationFileManager {
    migrations_dir: PathBuf,
}

impl MigrationFileManager {
    /// Create a new file manager.
    pub fn new(migrations_dir: impl Into<PathBuf>) -> Self {
        Self {
            migrations_dir: migrations_dir.into(),
        }
    }

    /// Get the migrations directory.
    pub fn migrations_dir(&self) -> &Path {
        &self.migrations_dir
    }

    /// Ensure the migrations directory exists.
    pub async fn ensure_dir(&self) -> MigrateResult<()> {
        tokio::fs::create_dir_all(&self.migrations_dir).await?;
        Ok(())
    }

    /// Load every migration, ordered by ID.
    ///
    /// A missing directory yields an empty set. Directories whose names do
    /// not look like `<ID>_<name>`, or that have no `up.sql`, are skipped with
    /// a warning. Two migrations with the same ID are an error.
    pub async fn load(&self) -> MigrateResult<MigrationSet> {
        if !tokio::fs::try_exists(&self.migrations_dir).await? {
            debug!(dir = %self.migrations_dir.display(), "Migrations directory does not exist");
            return Ok(MigrationSet::empty());
        }

        let pattern = dir_pattern()?;
        let mut migrations = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.migrations_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }

            let path = entry.path();
            let Some(dir_name) = path.file_name().and_then(|n| n.to_str()) else {
                warn!(path = %path.display(), "Skipping migration directory with a non UTF-8 name");
                continue;
            };

            let Some((id, name)) = parse_migration_name(&pattern, dir_name)? else {
                warn!(dir = %dir_name, "Skipping directory that is not named <ID>_<name>");
                continue;
            };

            if let Some(migration) = read_migration(&path, id, name).await? {
                migrations.push(migration);
            }
        }

        let set = MigrationSet::new(migrations)?;
        debug!(count = set.len(), dir = %self.migrations_dir.display(), "Loaded migrations");
        Ok(set)
    }

    /// Create a new migration directory with template scripts.
    ///
    /// The name is lowercased and every character outside `[a-z0-9_]` becomes
    /// `_`. Returns the path of the new directory.
    pub async fn create_migration(&self, name: &str, scheme: IdScheme) -> MigrateResult<PathBuf> {
        let name = normalize_name(name)?;
        let existing = self.load().await?;
        let id = next_id(existing.last_id(), scheme)?;

        self.ensure_dir().await?;
        let migration_dir = self.migrations_dir.join(format!("{}_{}", id, name));
        if tokio::fs::try_exists(&migration_dir).await? {
            return Err(MigrationError::migration_file(format!(
                "migration directory {} already exists",
                migration_dir.display()
            )));
        }

        tokio::fs::create_dir_all(&migration_dir).await?;
        tokio::fs::write(migration_dir.join("up.sql"), UP_TEMPLATE).await?;
        tokio::fs::write(migration_dir.join("down.sql"), DOWN_TEMPLATE).await?;

        info!(path = %migration_dir.display(), "Created migration");
        Ok(migration_dir)
    }
}

async fn read_migration(path: &Path, id: MigrationId, name: &str) -> MigrateResult<Option<Migration>> {
    let up_path = path.join("up.sql");
    if !tokio::fs::try_exists(&up_path).await? {
        warn!(dir = %path.display(), "Skipping migration directory without up.sql");
        return Ok(None);
    }

    let up_sql = tokio::fs::read_to_string(&up_path).await?;
    let mut migration = Migration::new(id, name, up_sql);

    let down_path = path.join("down.sql");
    if tokio::fs::try_exists(&down_path).await? {
        migration = migration.with_down_script(tokio::fs::read_to_string(&down_path).await?);
    }

    Ok(Some(migration))
}

fn dir_pattern() -> MigrateResult<Regex> {
    Regex::new(MIGRATION_DIR_PATTERN).map_err(|e| MigrationError::config(e.to_string()))
}

/// Split a directory name into ID and name.
///
/// Returns `None` for names that are not migration directories, and an error
/// for an ID too large to store.
fn parse_migration_name<'n>(pattern: &Regex, dir_name: &'n str) -> MigrateResult<Option<(MigrationId, &'n str)>> {
    let Some(caps) = pattern.captures(dir_name) else {
        return Ok(None);
    };
    let (Some(id), Some(name)) = (caps.get(1), caps.get(2)) else {
        return Ok(None);
    };
    Ok(Some((id.as_str().parse()?, name.as_str())))
}

fn normalize_name(name: &str) -> MigrateResult<String> {
    let normalized: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();

    if normalized.is_empty() {
        return Err(MigrationError::migration_file("migration name cannot be empty"));
    }
    Ok(normalized)
}

fn next_id(last: Option<MigrationId>, scheme: IdScheme) -> MigrateResult<MigrationId> {
    let following = last.map_or(1, |id| id.value() + 1);
    match scheme {
        IdScheme::Sequence => MigrationId::new(following),
        IdScheme::Timestamp => {
            let now: MigrationId = Utc::now().format("%Y%m%d%H%M%S").to_string().parse()?;
            // Never go backwards, even if the clock does.
            MigrationId::new(now.value().max(following))
        }
    }
}
