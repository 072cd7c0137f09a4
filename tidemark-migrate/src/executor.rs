//! Plan execution.
//!
//! Each step runs in its own transaction: script, ledger update and audit row
//! commit together or not at all. The first failing step is rolled back and
//! stops the run; steps committed before it stay committed.

use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::database::{TargetDatabase, Transaction};
use crate::error::{MigrateResult, MigrationError};
use crate::ledger::{LedgerEntry, Operator};
use crate::lock::{AdvisoryLock, CancelSignal, LockCoordinator};
use crate::migration::{Direction, MigrationId};
use crate::planner::{Plan, PlanStep};

/// Why a step failed.
#[derive(Debug)]
pub struct StepFailure {
    /// The error that stopped the step.
    pub error: MigrationError,
    /// Set if rolling the step back failed as well.
    pub rollback_error: Option<MigrationError>,
}

/// Outcome of one step.
#[derive(Debug)]
pub enum StepStatus {
    /// Committed.
    Applied,
    /// Rolled back.
    Failed(StepFailure),
}

/// Report entry for one step.
#[derive(Debug)]
pub struct StepReport {
    /// Migration ID.
    pub id: MigrationId,
    /// Migration name.
    pub name: String,
    /// Whether the migration was applied or reverted.
    pub direction: Direction,
    /// Wall time of the step.
    pub duration: Duration,
    /// Outcome.
    pub status: StepStatus,
}

impl StepReport {
    /// Check if the step committed.
    pub fn is_applied(&self) -> bool {
        matches!(self.status, StepStatus::Applied)
    }
}

/// What a run did.
#[derive(Debug)]
pub struct ExecutionReport {
    /// Direction of the run.
    pub direction: Direction,
    /// Steps attempted, in order. Only the last one can have failed.
    pub steps: Vec<StepReport>,
    /// Whether the run stopped early on a cancel signal.
    pub cancelled: bool,
    /// Wall time of the run, lock wait excluded.
    pub duration: Duration,
    /// Set if the lock could not be released after the run.
    pub lock_release_error: Option<MigrationError>,
}

impl ExecutionReport {
    fn new(direction: Direction) -> Self {
        Self {
            direction,
            steps: Vec::new(),
            cancelled: false,
            duration: Duration::ZERO,
            lock_release_error: None,
        }
    }

    /// IDs of the committed steps.
    pub fn applied_ids(&self) -> Vec<MigrationId> {
        self.steps
            .iter()
            .filter(|s| s.is_applied())
            .map(|s| s.id)
            .collect()
    }

    /// Number of committed steps.
    pub fn applied_count(&self) -> usize {
        self.steps.iter().filter(|s| s.is_applied()).count()
    }

    /// The step that stopped the run, if any.
    pub fn failed_step(&self) -> Option<&StepReport> {
        self.steps.iter().find(|s| !s.is_applied())
    }

    /// Check if every planned step committed.
    pub fn is_success(&self) -> bool {
        !self.cancelled && self.failed_step().is_none()
    }

    /// Get a summary of the run.
    pub fn summary(&self) -> String {
        let verb = match self.direction {
            Direction::Up => "applied",
            Direction::Down => "reverted",
        };
        let mut summary = format!(
            "{} {} in {}ms",
            self.applied_count(),
            verb,
            self.duration.as_millis()
        );
        if let Some(step) = self.failed_step() {
            summary.push_str(&format!(", {}_{} failed", step.id, step.name));
        }
        if self.cancelled {
            summary.push_str(", cancelled");
        }
        summary
    }

    /// Turn a failed or cancelled run into an error.
    ///
    /// A failed step becomes `StepFailed` wrapping its cause; a cancelled run
    /// becomes `Cancelled`.
    pub fn into_result(mut self) -> MigrateResult<Self> {
        if let Some(idx) = self.steps.iter().position(|s| !s.is_applied()) {
            let step = self.steps.swap_remove(idx);
            if let StepStatus::Failed(failure) = step.status {
                return Err(MigrationError::step_failed(step.id, step.name, failure.error));
            }
        }
        if self.cancelled {
            return Err(MigrationError::Cancelled);
        }
        Ok(self)
    }
}

/// Runs plans against a target database under the migration lock.
pub struct Executor<'r, D: ?Sized, L> {
    db: &'r mut D,
    lock: &'r mut LockCoordinator<L>,
    operator: Operator,
    cancel: CancelSignal,
}

impl<'r, D, L> Executor<'r, D, L>
where
    D: TargetDatabase + ?Sized,
    L: AdvisoryLock,
{
    /// Create an executor.
    pub fn new(db: &'r mut D, lock: &'r mut LockCoordinator<L>) -> Self {
        Self {
            db,
            lock,
            operator: Operator::current(),
            cancel: CancelSignal::new(),
        }
    }

    /// Set the identity written to the audit log.
    pub fn operator(mut self, operator: Operator) -> Self {
        self.operator = operator;
        self
    }

    /// Set the signal checked between steps.
    pub fn cancel_signal(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run a precomputed plan.
    pub async fn execute(&mut self, plan: Plan) -> MigrateResult<ExecutionReport> {
        self.execute_with(move |_| Ok(plan)).await
    }

    /// Take the lock, read the ledger, plan, and run.
    ///
    /// `plan_fn` sees the ledger as read under the lock, so no other run can
    /// change it between planning and execution. Errors before the first step
    /// (lock, ledger read, planning) are returned as `Err`, wrapped in
    /// `LockNotReleased` if the lock could not be given back; step failures
    /// are reported in the [`ExecutionReport`].
    pub async fn execute_with<F>(&mut self, plan_fn: F) -> MigrateResult<ExecutionReport>
    where
        F: FnOnce(&[LedgerEntry]) -> MigrateResult<Plan> + Send,
    {
        self.lock.acquire(&self.cancel).await?;

        let outcome = self.run_locked(plan_fn).await;
        let released = self.lock.release().await;

        match outcome {
            Ok(mut report) => {
                if let Err(e) = released {
                    warn!(error = %e, "Failed to release migration lock");
                    report.lock_release_error = Some(e);
                }
                Ok(report)
            }
            Err(e) => match released {
                Ok(()) => Err(e),
                Err(release_error) => {
                    error!(error = %release_error, "Failed to release migration lock");
                    Err(e.with_release_error(release_error))
                }
            },
        }
    }

    async fn run_locked<F>(&mut self, plan_fn: F) -> MigrateResult<ExecutionReport>
    where
        F: FnOnce(&[LedgerEntry]) -> MigrateResult<Plan> + Send,
    {
        let applied = self.db.list_applied().await?;
        let plan = plan_fn(&applied)?;

        let start = Instant::now();
        let mut report = ExecutionReport::new(plan.direction);

        for step in &plan.steps {
            if self.cancel.is_cancelled() {
                warn!(
                    remaining = plan.len() - report.steps.len(),
                    "Migration run cancelled"
                );
                report.cancelled = true;
                break;
            }

            let step_start = Instant::now();
            let result = self.run_step(step, plan.direction).await;
            let duration = step_start.elapsed();

            let status = match result {
                Ok(()) => {
                    info!(
                        migration = %step.migration.full_name(),
                        direction = %plan.direction,
                        duration_ms = duration.as_millis() as u64,
                        "Migration step committed"
                    );
                    StepStatus::Applied
                }
                Err(failure) => {
                    error!(
                        migration = %step.migration.full_name(),
                        direction = %plan.direction,
                        error = %failure.error,
                        "Migration step failed and was rolled back"
                    );
                    StepStatus::Failed(failure)
                }
            };

            let failed = matches!(status, StepStatus::Failed(_));
            report.steps.push(StepReport {
                id: step.id(),
                name: step.migration.name.clone(),
                direction: plan.direction,
                duration,
                status,
            });
            if failed {
                break;
            }
        }

        report.duration = start.elapsed();
        Ok(report)
    }

    async fn run_step(&mut self, step: &PlanStep, direction: Direction) -> Result<(), StepFailure> {
        let mut tx = self.db.begin().await.map_err(|error| StepFailure {
            error,
            rollback_error: None,
        })?;

        let mut result = apply_step(tx.as_mut(), step, direction, &self.operator).await;
        if result.is_ok() {
            result = tx.commit().await;
        }

        match result {
            Ok(()) => Ok(()),
            Err(error) => {
                let rollback_error = tx.rollback().await.err();
                if let Some(e) = &rollback_error {
                    error!(migration = %step.migration.full_name(), error = %e, "Rollback failed");
                }
                Err(StepFailure {
                    error,
                    rollback_error,
                })
            }
        }
    }
}

async fn apply_step(
    tx: &mut (dyn Transaction + '_),
    step: &PlanStep,
    direction: Direction,
    operator: &Operator,
) -> MigrateResult<()> {
    let migration = &step.migration;

    match direction {
        Direction::Up => {
            tx.execute_script(&migration.up_script).await?;
            tx.record_applied(migration.id, &migration.name, &step.expected_checksum)
                .await?;
        }
        Direction::Down => {
            let script = migration
                .down_script
                .as_deref()
                .ok_or_else(|| MigrationError::Irreversible {
                    id: migration.id,
                    name: migration.name.clone(),
                })?;
            tx.execute_script(script).await?;
            tx.remove_applied(migration.id).await?;
        }
    }

    tx.append_audit(&operator.audit(migration.id, direction)).await
}
