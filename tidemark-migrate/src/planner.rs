//! Migration planning.
//!
//! [`compute_plan`] reconciles the known migrations with the ledger and
//! decides which migrations a run should apply or revert, in which order. It
//! is a pure function: it reads nothing and writes nothing, so it can be used
//! for dry runs as well as real ones.

use std::collections::HashSet;

use tracing::warn;

use crate::error::{MigrateResult, MigrationError};
use crate::ledger::LedgerEntry;
use crate::migration::{Checksum, Direction, Migration, MigrationId, MigrationSet};

/// How far a plan should go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Target {
    /// Up: every pending migration. Down: every applied migration.
    #[default]
    Latest,
    /// Up: pending migrations up to and including the ID.
    /// Down: applied migrations above the ID; the ID itself stays applied.
    Version(MigrationId),
    /// Up: same as [`Target::Version`].
    /// Down: applied migrations at or above the ID, the ID included.
    Including(MigrationId),
    /// Up: the next `n` pending migrations. Down: the last `n` applied ones.
    Steps(usize),
}

impl Target {
    fn id(self) -> Option<MigrationId> {
        match self {
            Self::Version(id) | Self::Including(id) => Some(id),
            Self::Latest | Self::Steps(_) => None,
        }
    }
}

/// One migration chosen for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanStep {
    /// The migration to run.
    pub migration: Migration,
    /// Checksum the step expects: the script's for up, the ledger's for down.
    pub expected_checksum: Checksum,
}

impl PlanStep {
    /// Migration ID of this step.
    pub fn id(&self) -> MigrationId {
        self.migration.id
    }
}

/// Ordered migrations to apply or revert in one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    /// Whether the steps are applied or reverted.
    pub direction: Direction,
    /// Steps in execution order.
    pub steps: Vec<PlanStep>,
}

impl Plan {
    /// Create an empty plan.
    pub fn empty(direction: Direction) -> Self {
        Self {
            direction,
            steps: Vec::new(),
        }
    }

    /// Check if there's anything to do.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Step IDs in execution order.
    pub fn ids(&self) -> Vec<MigrationId> {
        self.steps.iter().map(PlanStep::id).collect()
    }

    /// Get a summary of the plan.
    pub fn summary(&self) -> String {
        if self.steps.is_empty() {
            return "No changes to apply".to_string();
        }

        let verb = match self.direction {
            Direction::Up => "apply",
            Direction::Down => "revert",
        };
        let noun = if self.steps.len() == 1 {
            "migration"
        } else {
            "migrations"
        };
        format!("{} {} {}", verb, self.steps.len(), noun)
    }
}

/// Compute the plan for one run.
///
/// Fails closed: ledger entries without a script (`MissingMigration`) and
/// scripts edited after they were applied (`ChecksumDrift`) abort planning in
/// either direction. A reverse plan containing a migration without a down
/// script fails with `Irreversible` as a whole.
pub fn compute_plan(
    known: &MigrationSet,
    applied: &[LedgerEntry],
    direction: Direction,
    target: Target,
) -> MigrateResult<Plan> {
    verify_ledger(known, applied)?;

    if let Some(id) = target.id() {
        if !known.contains(id) {
            return Err(MigrationError::UnknownTarget(id));
        }
    }

    match direction {
        Direction::Up => plan_forward(known, applied, target),
        Direction::Down => plan_reverse(known, applied, target),
    }
}

/// Check every ledger entry still has a matching, unchanged script.
pub fn verify_ledger(known: &MigrationSet, applied: &[LedgerEntry]) -> MigrateResult<()> {
    for entry in applied {
        let migration = known
            .get(entry.migration_id)
            .ok_or_else(|| MigrationError::MissingMigration {
                id: entry.migration_id,
                name: entry.name.clone(),
            })?;

        if migration.checksum != entry.checksum {
            return Err(MigrationError::ChecksumDrift {
                id: entry.migration_id,
                recorded: entry.checksum.clone(),
                current: migration.checksum.clone(),
            });
        }
    }
    Ok(())
}

fn plan_forward(known: &MigrationSet, applied: &[LedgerEntry], target: Target) -> MigrateResult<Plan> {
    let applied_ids: HashSet<MigrationId> = applied.iter().map(|e| e.migration_id).collect();
    let latest_applied = applied_ids.iter().max().copied();

    let pending = known.iter().filter(|m| !applied_ids.contains(&m.id));
    let chosen: Vec<&Migration> = match target {
        Target::Latest => pending.collect(),
        Target::Version(id) | Target::Including(id) => pending.filter(|m| m.id <= id).collect(),
        Target::Steps(n) => pending.take(n).collect(),
    };

    if let Some(latest) = latest_applied {
        for migration in chosen.iter().filter(|m| m.id < latest) {
            warn!(
                migration = %migration.full_name(),
                latest_applied = %latest,
                "Pending migration is older than the latest applied one"
            );
        }
    }

    let steps = chosen
        .into_iter()
        .map(|m| PlanStep {
            migration: m.clone(),
            expected_checksum: m.checksum.clone(),
        })
        .collect();

    Ok(Plan {
        direction: Direction::Up,
        steps,
    })
}

fn plan_reverse(known: &MigrationSet, applied: &[LedgerEntry], target: Target) -> MigrateResult<Plan> {
    let mut entries: Vec<&LedgerEntry> = applied.iter().collect();
    entries.sort_by(|a, b| b.migration_id.cmp(&a.migration_id));

    let chosen: Vec<&LedgerEntry> = match target {
        Target::Latest => entries,
        Target::Version(id) => entries.into_iter().filter(|e| e.migration_id > id).collect(),
        Target::Including(id) => entries.into_iter().filter(|e| e.migration_id >= id).collect(),
        Target::Steps(n) => entries.into_iter().take(n).collect(),
    };

    let mut steps = Vec::with_capacity(chosen.len());
    for entry in chosen {
        // verify_ledger guarantees every entry has a script
        let migration = known
            .get(entry.migration_id)
            .ok_or_else(|| MigrationError::MissingMigration {
                id: entry.migration_id,
                name: entry.name.clone(),
            })?;

        if !migration.is_reversible() {
            return Err(MigrationError::Irreversible {
                id: migration.id,
                name: migration.name.clone(),
            });
        }

        steps.push(PlanStep {
            migration: migration.clone(),
            expected_checksum: entry.checksum.clone(),
        });
    }

    Ok(Plan {
        direction: Direction::Down,
        steps,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    use super::*;

    fn known() -> MigrationSet {
        MigrationSet::new(vec![
            Migration::new(1u32, "create_users", "CREATE TABLE users (id INTEGER);")
                .with_down_script("DROP TABLE users;"),
            Migration::new(2u32, "add_index", "CREATE INDEX users_id ON users (id);")
                .with_down_script("DROP INDEX users_id;"),
            Migration::new(3u32, "add_column", "ALTER TABLE users ADD COLUMN email TEXT;")
                .with_down_script("ALTER TABLE users DROP COLUMN email;"),
        ])
        .unwrap()
    }

    fn applied(known: &MigrationSet, ids: &[u32]) -> Vec<LedgerEntry> {
        ids.iter()
            .map(|&id| {
                let m = known.get(MigrationId::from(id)).unwrap();
                LedgerEntry {
                    migration_id: m.id,
                    name: m.name.clone(),
                    checksum: m.checksum.clone(),
                    applied_at: Utc::now(),
                }
            })
            .collect()
    }

    fn ids(values: &[u32]) -> Vec<MigrationId> {
        values.iter().map(|&v| MigrationId::from(v)).collect()
    }

    #[test]
    fn test_forward_plan_skips_applied() {
        let known = known();
        let plan = compute_plan(&known, &applied(&known, &[1]), Direction::Up, Target::Latest).unwrap();

        assert_eq!(plan.direction, Direction::Up);
        assert_eq!(plan.ids(), ids(&[2, 3]));
        assert_eq!(plan.steps[0].expected_checksum, known.get(MigrationId::from(2u32)).unwrap().checksum);
    }

    #[test]
    fn test_forward_plan_fills_gaps_in_order() {
        let known = known();
        let plan = compute_plan(&known, &applied(&known, &[1, 3]), Direction::Up, Target::Latest).unwrap();
        assert_eq!(plan.ids(), ids(&[2]));
    }

    #[test]
    fn test_forward_plan_to_target_is_inclusive() {
        let known = known();
        let plan = compute_plan(&known, &[], Direction::Up, Target::Version(MigrationId::from(2u32))).unwrap();
        assert_eq!(plan.ids(), ids(&[1, 2]));

        let plan = compute_plan(&known, &[], Direction::Up, Target::Steps(1)).unwrap();
        assert_eq!(plan.ids(), ids(&[1]));
    }

    #[test]
    fn test_up_to_date_plan_is_empty() {
        let known = known();
        let plan = compute_plan(&known, &applied(&known, &[1, 2, 3]), Direction::Up, Target::Latest).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.summary(), "No changes to apply");
    }

    #[test]
    fn test_reverse_plan_to_target_is_exclusive() {
        let known = known();
        let plan = compute_plan(
            &known,
            &applied(&known, &[1, 2, 3]),
            Direction::Down,
            Target::Version(MigrationId::from(1u32)),
        )
        .unwrap();

        assert_eq!(plan.direction, Direction::Down);
        assert_eq!(plan.ids(), ids(&[3, 2]));
        assert_eq!(plan.summary(), "revert 2 migrations");
    }

    #[test]
    fn test_reverse_plan_including_target() {
        let known = known();
        let plan = compute_plan(
            &known,
            &applied(&known, &[1, 2, 3]),
            Direction::Down,
            Target::Including(MigrationId::from(2u32)),
        )
        .unwrap();
        assert_eq!(plan.ids(), ids(&[3, 2]));
    }

    #[test]
    fn test_reverse_plan_steps_and_latest() {
        let known = known();
        let all = applied(&known, &[1, 2, 3]);

        let plan = compute_plan(&known, &all, Direction::Down, Target::Steps(1)).unwrap();
        assert_eq!(plan.ids(), ids(&[3]));

        let plan = compute_plan(&known, &all, Direction::Down, Target::Latest).unwrap();
        assert_eq!(plan.ids(), ids(&[3, 2, 1]));
    }

    #[test]
    fn test_reverse_plan_uses_ledger_checksum() {
        let known = known();
        let all = applied(&known, &[1]);
        let plan = compute_plan(&known, &all, Direction::Down, Target::Latest).unwrap();
        assert_eq!(plan.steps[0].expected_checksum, all[0].checksum);
    }

    #[test]
    fn test_missing_migration_fails() {
        let known = known();
        let mut ledger = applied(&known, &[1]);
        ledger.push(LedgerEntry {
            migration_id: MigrationId::from(9u32),
            name: "deleted".to_string(),
            checksum: Checksum::of("SELECT 9;"),
            applied_at: Utc::now(),
        });

        for direction in [Direction::Up, Direction::Down] {
            let err = compute_plan(&known, &ledger, direction, Target::Latest).unwrap_err();
            assert!(matches!(err, MigrationError::MissingMigration { id, .. } if id.value() == 9));
        }
    }

    #[test]
    fn test_checksum_drift_fails() {
        let known = known();
        let mut ledger = applied(&known, &[1, 2]);
        ledger[1].checksum = Checksum::of("CREATE INDEX something_else;");

        let err = compute_plan(&known, &ledger, Direction::Up, Target::Latest).unwrap_err();
        match err {
            MigrationError::ChecksumDrift { id, recorded, current } => {
                assert_eq!(id, MigrationId::from(2u32));
                assert_eq!(recorded, Checksum::of("CREATE INDEX something_else;"));
                assert_eq!(current, known.get(id).unwrap().checksum);
            }
            other => panic!("expected drift, got {other:?}"),
        }
    }

    #[test]
    fn test_irreversible_fails_whole_plan() {
        let known = MigrationSet::new(vec![
            Migration::new(1u32, "a", "SELECT 1;").with_down_script("SELECT -1;"),
            Migration::new(2u32, "b", "SELECT 2;"),
            Migration::new(3u32, "c", "SELECT 3;").with_down_script("SELECT -3;"),
        ])
        .unwrap();

        let err = compute_plan(&known, &applied(&known, &[1, 2, 3]), Direction::Down, Target::Latest)
            .unwrap_err();
        assert!(matches!(err, MigrationError::Irreversible { id, .. } if id.value() == 2));

        // Stopping above the irreversible migration is fine.
        let plan = compute_plan(
            &known,
            &applied(&known, &[1, 2, 3]),
            Direction::Down,
            Target::Version(MigrationId::from(2u32)),
        )
        .unwrap();
        assert_eq!(plan.ids(), ids(&[3]));
    }

    #[test]
    fn test_unknown_target_fails() {
        let known = known();
        let err = compute_plan(&known, &[], Direction::Up, Target::Version(MigrationId::from(7u32))).unwrap_err();
        assert!(matches!(err, MigrationError::UnknownTarget(_)));
    }

    #[test]
    fn test_forward_plan_is_set_difference() {
        // Every subset of {1, 2, 3} as the applied set.
        let known = known();
        for mask in 0u32..8 {
            let applied_ids: Vec<u32> = (1..=3).filter(|i| mask & (1 << (i - 1)) != 0).collect();
            let expected: Vec<u32> = (1..=3).filter(|i| !applied_ids.contains(i)).collect();

            let plan = compute_plan(&known, &applied(&known, &applied_ids), Direction::Up, Target::Latest)
                .unwrap();
            assert_eq!(plan.ids(), ids(&expected), "applied = {applied_ids:?}");
        }
    }
}
