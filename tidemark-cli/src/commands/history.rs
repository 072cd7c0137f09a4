//! `tidemark history` command - Show the audit log.

use tidemark_migrate::Direction;

use crate::cli::HistoryArgs;
use crate::commands::Context;
use crate::error::CliResult;
use crate::output;

/// Run the history command
pub async fn run(ctx: &Context, args: HistoryArgs) -> CliResult<()> {
    output::header("Migration History");

    let mut engine = ctx.engine().await?;
    let history = engine.history().await?;

    if history.is_empty() {
        output::info("No migrations have been applied yet.");
        return Ok(());
    }

    let skip = args
        .limit
        .map(|n| history.len().saturating_sub(n))
        .unwrap_or(0);

    for entry in &history[skip..] {
        let operation = match entry.operation {
            Direction::Up => output::style_success("up  "),
            Direction::Down => output::style_pending("down"),
        };
        println!(
            "  {}  {}  {}  {}@{}",
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            operation,
            entry.migration_id,
            entry.username,
            entry.hostname
        );
    }

    output::newline();
    output::kv("Entries", &history.len().to_string());

    Ok(())
}
