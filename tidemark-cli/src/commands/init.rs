//! `tidemark init` command - Set up a project for migrations.

use crate::cli::InitArgs;
use crate::commands::Context;
use crate::config::Config;
use crate::error::CliResult;
use crate::output::{self, success};

/// Run the init command
pub async fn run(ctx: &Context, args: InitArgs) -> CliResult<()> {
    output::header("Initialize Tidemark");

    output::step(1, 3, "Writing configuration...");
    if ctx.config_path.exists() && !args.force {
        output::list_item(&format!(
            "{} already exists, keeping it (use --force to overwrite)",
            ctx.config_path.display()
        ));
    } else {
        let mut config = Config::default();
        config.database.url = ctx.database_url.clone();
        config.save(&ctx.config_path)?;
        output::list_item(&format!("Created {}", ctx.config_path.display()));
    }

    output::step(2, 3, "Creating migrations directory...");
    tokio::fs::create_dir_all(&ctx.migrations_dir).await?;
    output::list_item(&ctx.migrations_dir.display().to_string());

    output::step(3, 3, "Creating ledger tables...");
    if ctx.database_url.is_some() {
        let mut engine = ctx.engine().await?;
        engine.initialize().await?;
        output::list_item(&format!(
            "{}, {}",
            ctx.config.ledger.table, ctx.config.ledger.log_table
        ));
    } else {
        output::list_item("No database URL configured, skipping");
    }

    output::newline();
    success("Tidemark initialized successfully!");

    output::newline();
    output::section("Next steps");
    output::list_item("Run `tidemark new <name>` to create a migration");
    output::list_item("Run `tidemark up` to apply it");

    Ok(())
}
