//! `tidemark up` and `tidemark down` - Apply or revert migrations.

use std::time::Duration;

use tidemark_migrate::{Direction, ExecutionReport, Plan, StepStatus, Target};

use crate::cli::{DownArgs, UpArgs};
use crate::commands::Context;
use crate::error::CliResult;
use crate::output::{self, success};

/// Run `tidemark up`
pub async fn run_up(ctx: &Context, args: UpArgs) -> CliResult<()> {
    output::header("Migrate Up");
    run(ctx, Direction::Up, args.target(), args.dry_run).await
}

/// Run `tidemark down`
pub async fn run_down(ctx: &Context, args: DownArgs) -> CliResult<()> {
    output::header("Migrate Down");
    run(ctx, Direction::Down, args.target(), args.dry_run).await
}

async fn run(ctx: &Context, direction: Direction, target: Target, dry_run: bool) -> CliResult<()> {
    let mut engine = ctx.engine().await?;

    if dry_run {
        let plan = engine.plan(direction, target).await?;
        print_plan(&plan);
        return Ok(());
    }

    let report = match direction {
        Direction::Up => engine.up(target).await?,
        Direction::Down => engine.down(target).await?,
    };
    print_report(&report);

    let report = report.into_result()?;
    if report.steps.is_empty() {
        success(match direction {
            Direction::Up => "Nothing to apply, database is up to date",
            Direction::Down => "Nothing to revert",
        });
    } else {
        success(&report.summary());
    }
    Ok(())
}

fn print_plan(plan: &Plan) {
    if plan.is_empty() {
        output::info(&plan.summary());
        return;
    }

    output::section(&format!("Plan: {}", plan.summary()));
    for (i, step) in plan.steps.iter().enumerate() {
        output::step(i + 1, plan.len(), &step.migration.full_name());
    }
    output::newline();
    output::dim("Dry run: nothing was changed.");
}

fn print_report(report: &ExecutionReport) {
    let total = report.steps.len();
    for (i, step) in report.steps.iter().enumerate() {
        let label = format!("{}_{} ({})", step.id, step.name, format_duration(step.duration));
        match &step.status {
            StepStatus::Applied => output::step(i + 1, total, &output::style_success(&label)),
            StepStatus::Failed(failure) => {
                output::step(i + 1, total, &output::style_error(&label));
                output::list_item(&format!("rolled back: {}", failure.error));
                if let Some(rollback) = &failure.rollback_error {
                    output::list_item(&output::style_error(&format!("rollback failed: {}", rollback)));
                }
            }
        }
    }

    if report.cancelled {
        output::warn("Run cancelled before the remaining steps");
    }
    if let Some(e) = &report.lock_release_error {
        output::warn(&format!("Could not release the migration lock: {}", e));
    }
    if total > 0 {
        output::newline();
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_millis() == 0 {
        format!("{}µs", duration.as_micros())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_micros(250)), "250µs");
        assert_eq!(format_duration(Duration::from_millis(42)), "42ms");
    }
}
