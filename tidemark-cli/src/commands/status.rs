//! `tidemark status` command - Show the state of every migration.

use crate::commands::Context;
use crate::error::CliResult;
use crate::output::{self, success, warn};

/// Run the status command
pub async fn run(ctx: &Context) -> CliResult<()> {
    output::header("Migration Status");

    let mut engine = ctx.engine().await?;
    let status = engine.status().await?;

    output::kv("Migrations", &ctx.migrations_dir.display().to_string());
    output::newline();

    if status.applied.is_empty() && status.pending.is_empty() {
        output::info("No migrations found.");
        output::newline();
        output::section("Getting started");
        output::list_item("Run `tidemark new <name>` to create your first migration");
        return Ok(());
    }

    output::section("Migrations");
    for entry in &status.applied {
        let label = format!("{}_{}", entry.migration_id, entry.name);
        let mark = if status.orphaned.iter().any(|e| e.migration_id == entry.migration_id) {
            output::style_error("✖ Missing")
        } else if status.drifted.iter().any(|d| d.id == entry.migration_id) {
            output::style_error("≠ Drifted")
        } else {
            output::style_success("✓ Applied")
        };
        output::list_item(&format!(
            "{} - {} ({})",
            label,
            mark,
            entry.applied_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
    }
    for migration in &status.pending {
        output::list_item(&format!(
            "{} - {}",
            migration.full_name(),
            output::style_pending("○ Pending")
        ));
    }

    output::newline();
    output::kv("Applied", &status.applied.len().to_string());
    output::kv("Pending", &status.pending.len().to_string());
    output::newline();

    for drift in &status.drifted {
        warn(&format!(
            "{}_{} changed after it was applied (ledger {}, script {})",
            drift.id,
            drift.name,
            drift.recorded.short(),
            drift.current.short()
        ));
    }
    for orphan in &status.orphaned {
        warn(&format!(
            "{}_{} is in the ledger but not in the migrations directory",
            orphan.migration_id, orphan.name
        ));
    }

    if status.is_up_to_date() {
        success("Database is up to date");
    } else if !status.has_issues() {
        output::info(&status.summary());
    }

    Ok(())
}
