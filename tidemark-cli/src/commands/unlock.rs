//! `tidemark unlock` command - Clear a migration lock left by a dead run.

use crate::commands::Context;
use crate::error::CliResult;
use crate::output;

/// Run the unlock command
pub async fn run(ctx: &Context) -> CliResult<()> {
    output::header("Migration Lock");

    let mut engine = ctx.engine().await?;
    output::kv("Lock", &engine.config().lock_name);

    match engine.unlock().await? {
        Some(holder) => {
            output::kv("Held by", &holder);
            output::newline();
            output::success("Lock released");
        }
        None => {
            output::newline();
            output::info("The lock was not held.");
        }
    }

    Ok(())
}
