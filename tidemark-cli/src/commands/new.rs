//! `tidemark new` command - Create a migration from the templates.

use tidemark_migrate::{IdScheme, MigrationFileManager};

use crate::cli::NewArgs;
use crate::commands::Context;
use crate::error::CliResult;
use crate::output::{self, success};

/// Run the new command
pub async fn run(ctx: &Context, args: NewArgs) -> CliResult<()> {
    let scheme = if args.timestamp {
        IdScheme::Timestamp
    } else {
        ctx.config.migrations.id_scheme
    };

    let files = MigrationFileManager::new(&ctx.migrations_dir);
    let path = files.create_migration(&args.name, scheme).await?;

    success(&format!("Created migration {}", path.display()));
    output::list_item(&path.join("up.sql").display().to_string());
    output::list_item(&path.join("down.sql").display().to_string());
    output::dim("  The down script is a comment until you fill it in; until then the migration cannot be reverted.");

    Ok(())
}
