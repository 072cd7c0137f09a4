//! Migration records and the validated migration set.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{MigrateResult, MigrationError};

/// Ordering key of a migration.
///
/// Either a zero-padded sequence number (`0001`) or a timestamp
/// (`20240101120000`). Values never exceed `i64::MAX` so they fit a BIGINT
/// ledger column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct MigrationId(u64);

impl MigrationId {
    /// Largest representable ID.
    pub const MAX: u64 = i64::MAX as u64;

    /// Create an ID, rejecting values that do not fit a signed 64-bit column.
    pub fn new(value: u64) -> MigrateResult<Self> {
        if value > Self::MAX {
            return Err(MigrationError::migration_file(format!(
                "migration ID {} is out of range",
                value
            )));
        }
        Ok(Self(value))
    }

    /// Numeric value of the ID.
    pub fn value(self) -> u64 {
        self.0
    }

    /// The ID as stored in the ledger.
    pub fn as_i64(self) -> i64 {
        // In range by construction.
        self.0 as i64
    }

    /// Rebuild an ID read back from the ledger.
    pub fn from_i64(value: i64) -> MigrateResult<Self> {
        u64::try_from(value)
            .map_err(|_| MigrationError::database(format!("negative migration ID {} in ledger", value)))
            .and_then(Self::new)
    }
}

impl From<u32> for MigrationId {
    fn from(value: u32) -> Self {
        Self(u64::from(value))
    }
}

impl TryFrom<u64> for MigrationId {
    type Error = MigrationError;

    fn try_from(value: u64) -> MigrateResult<Self> {
        Self::new(value)
    }
}

impl From<MigrationId> for u64 {
    fn from(id: MigrationId) -> Self {
        id.0
    }
}

impl FromStr for MigrationId {
    type Err = MigrationError;

    fn from_str(s: &str) -> MigrateResult<Self> {
        if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
            return Err(MigrationError::migration_file(format!(
                "invalid migration ID '{}': expected digits",
                s
            )));
        }
        let value: u64 = s
            .parse()
            .map_err(|_| MigrationError::migration_file(format!("migration ID '{}' is out of range", s)))?;
        Self::new(value)
    }
}

impl fmt::Display for MigrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}", self.0)
    }
}

/// SHA-256 content hash of a migration's up script, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checksum(String);

impl Checksum {
    /// Hash a script.
    pub fn of(script: &str) -> Self {
        let digest = Sha256::digest(script.as_bytes());
        Self(hex::encode(digest))
    }

    /// Wrap a checksum read back from storage.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// The full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for terminal output.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(12);
        &self.0[..end]
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Direction of migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Apply the migration (up).
    Up,
    /// Reverse the migration (down).
    Down,
}

impl Direction {
    /// Name stored in the audit log.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = MigrationError;

    fn from_str(s: &str) -> MigrateResult<Self> {
        match s {
            "up" => Ok(Self::Up),
            "down" => Ok(Self::Down),
            other => Err(MigrationError::database(format!("unknown operation '{}'", other))),
        }
    }
}

/// A database migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Migration {
    /// Ordering key.
    pub id: MigrationId,
    /// Human readable name.
    pub name: String,
    /// SQL to apply the migration (up).
    pub up_script: String,
    /// SQL to reverse the migration (down).
    pub down_script: Option<String>,
    /// Checksum of the up script.
    pub checksum: Checksum,
}

impl Migration {
    /// Create a new migration.
    pub fn new(id: impl Into<MigrationId>, name: impl Into<String>, up_script: impl Into<String>) -> Self {
        let up_script = up_script.into();
        let checksum = Checksum::of(&up_script);

        Self {
            id: id.into(),
            name: name.into(),
            up_script,
            down_script: None,
            checksum,
        }
    }

    /// Set the down script.
    ///
    /// Scripts with nothing but whitespace and `--` comments leave the
    /// migration irreversible.
    pub fn with_down_script(mut self, script: impl Into<String>) -> Self {
        let script = script.into();
        self.down_script = if is_blank_sql(&script) { None } else { Some(script) };
        self
    }

    /// Check if this migration is reversible.
    pub fn is_reversible(&self) -> bool {
        self.down_script.is_some()
    }

    /// Verify the checksum matches the content.
    pub fn verify_checksum(&self) -> bool {
        Checksum::of(&self.up_script) == self.checksum
    }

    /// Get the full migration name (id_name).
    pub fn full_name(&self) -> String {
        format!("{}_{}", self.id, self.name)
    }
}

fn is_blank_sql(script: &str) -> bool {
    script
        .lines()
        .map(str::trim)
        .all(|line| line.is_empty() || line.starts_with("--"))
}

/// The ordered, duplicate-free set of known migrations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationSet {
    migrations: Vec<Migration>,
}

impl MigrationSet {
    /// Validate and sort a list of migrations.
    pub fn new(mut migrations: Vec<Migration>) -> MigrateResult<Self> {
        migrations.sort_by_key(|m| m.id);

        if let Some(pair) = migrations.windows(2).find(|pair| pair[0].id == pair[1].id) {
            return Err(MigrationError::DuplicateMigrationId(pair[0].id));
        }

        Ok(Self { migrations })
    }

    /// Create an empty set.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Look up a migration by ID.
    pub fn get(&self, id: MigrationId) -> Option<&Migration> {
        self.migrations
            .binary_search_by_key(&id, |m| m.id)
            .ok()
            .map(|idx| &self.migrations[idx])
    }

    /// Check whether a migration ID is known.
    pub fn contains(&self, id: MigrationId) -> bool {
        self.get(id).is_some()
    }

    /// Iterate in ascending ID order.
    pub fn iter(&self) -> std::slice::Iter<'_, Migration> {
        self.migrations.iter()
    }

    /// The highest known ID.
    pub fn last_id(&self) -> Option<MigrationId> {
        self.migrations.last().map(|m| m.id)
    }

    /// Number of migrations.
    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}

impl<'a> IntoIterator for &'a MigrationSet {
    type Item = &'a Migration;
    type IntoIter = std::slice::Iter<'a, Migration>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_new() {
        let migration = Migration::new(1u32, "create_users", "CREATE TABLE users (id INTEGER);");

        assert_eq!(migration.full_name(), "0001_create_users");
        assert!(!migration.is_reversible());
        assert!(migration.verify_checksum());
    }

    #[test]
    fn test_blank_down_script_is_irreversible() {
        let migration = Migration::new(1u32, "a", "SELECT 1;").with_down_script("  \n ");
        assert!(!migration.is_reversible());

        let migration = Migration::new(1u32, "a", "SELECT 1;").with_down_script("-- nothing to undo\n\n");
        assert!(!migration.is_reversible());

        let migration = Migration::new(1u32, "a", "SELECT 1;").with_down_script("SELECT 2;");
        assert!(migration.is_reversible());
    }

    #[test]
    fn test_checksum_covers_up_script_only() {
        let a = Migration::new(1u32, "a", "CREATE TABLE t (id INT);").with_down_script("DROP TABLE t;");
        let b = Migration::new(1u32, "a", "CREATE TABLE t (id INT);");
        let c = Migration::new(1u32, "a", "CREATE TABLE t (id BIGINT);");

        assert_eq!(a.checksum, b.checksum);
        assert_ne!(a.checksum, c.checksum);
        assert_eq!(a.checksum.as_str().len(), 64);
        assert_eq!(a.checksum.short().len(), 12);
    }

    #[test]
    fn test_migration_id_parse() {
        assert_eq!("0007".parse::<MigrationId>().unwrap().value(), 7);
        assert_eq!(
            "20240101120000".parse::<MigrationId>().unwrap().to_string(),
            "20240101120000"
        );
        assert!("".parse::<MigrationId>().is_err());
        assert!("12a".parse::<MigrationId>().is_err());
        assert!("99999999999999999999".parse::<MigrationId>().is_err());
        assert!(MigrationId::new(u64::MAX).is_err());
    }

    #[test]
    fn test_migration_id_ledger_round_trip() {
        let id = MigrationId::from(42u32);
        assert_eq!(MigrationId::from_i64(id.as_i64()).unwrap(), id);
        assert!(MigrationId::from_i64(-1).is_err());
    }

    #[test]
    fn test_set_sorts_by_id() {
        let set = MigrationSet::new(vec![
            Migration::new(3u32, "c", "SELECT 3;"),
            Migration::new(1u32, "a", "SELECT 1;"),
            Migration::new(2u32, "b", "SELECT 2;"),
        ])
        .unwrap();

        let ids: Vec<u64> = set.iter().map(|m| m.id.value()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(set.last_id(), Some(MigrationId::from(3u32)));
        assert_eq!(set.get(MigrationId::from(2u32)).unwrap().name, "b");
        assert!(!set.contains(MigrationId::from(4u32)));
    }

    #[test]
    fn test_set_rejects_duplicate_ids() {
        let err = MigrationSet::new(vec![
            Migration::new(1u32, "a", "SELECT 1;"),
            Migration::new(1u32, "b", "SELECT 2;"),
        ])
        .unwrap_err();

        assert!(matches!(err, MigrationError::DuplicateMigrationId(id) if id.value() == 1));
    }
}
