//! CLI argument definitions using clap.

use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

use tidemark_migrate::{MigrationId, Target};

use crate::config::CONFIG_FILE_NAME;

/// Tidemark - Versioned SQL migrations
#[derive(Parser, Debug)]
#[command(name = "tidemark")]
#[command(version)]
#[command(about = "Tidemark - Versioned SQL migrations", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every command
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Path to the config file
    #[arg(short, long, global = true, default_value = CONFIG_FILE_NAME)]
    pub config: PathBuf,

    /// Database connection URL (overrides the config file)
    #[arg(long, env = "DATABASE_URL", global = true)]
    pub database_url: Option<String>,

    /// Migrations directory (overrides the config file)
    #[arg(long, global = true)]
    pub migrations_dir: Option<PathBuf>,

    /// Fail immediately if another run holds the migration lock
    #[arg(long, global = true)]
    pub no_wait: bool,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the config file, the migrations directory and the ledger tables
    Init(InitArgs),

    /// Create a new migration
    New(NewArgs),

    /// Show applied, pending and drifted migrations
    Status,

    /// Apply pending migrations
    Up(UpArgs),

    /// Revert applied migrations
    Down(DownArgs),

    /// Show who applied or reverted what, and when
    History(HistoryArgs),

    /// Clear a migration lock left behind by a run that died
    Unlock,

    /// Display version information
    Version,
}

// =============================================================================
// Init Command
// =============================================================================

/// Arguments for the `init` command
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing config file
    #[arg(short, long)]
    pub force: bool,
}

// =============================================================================
// New Command
// =============================================================================

/// Arguments for the `new` command
#[derive(Args, Debug)]
pub struct NewArgs {
    /// Name of the migration (e.g. create_users)
    pub name: String,

    /// Use a UTC timestamp ID instead of the next sequence number
    #[arg(long)]
    pub timestamp: bool,
}

// =============================================================================
// Up / Down Commands
// =============================================================================

/// Arguments for the `up` command
#[derive(Args, Debug)]
pub struct UpArgs {
    /// Apply pending migrations up to and including this ID
    #[arg(conflicts_with = "steps")]
    pub target: Option<MigrationId>,

    /// Apply at most this many migrations
    #[arg(long)]
    pub steps: Option<usize>,

    /// Print the plan without running it
    #[arg(long)]
    pub dry_run: bool,
}

impl UpArgs {
    /// How far the run should go.
    pub fn target(&self) -> Target {
        match (self.target, self.steps) {
            (Some(id), _) => Target::Version(id),
            (None, Some(n)) => Target::Steps(n),
            (None, None) => Target::Latest,
        }
    }
}

/// Arguments for the `down` command
#[derive(Args, Debug)]
pub struct DownArgs {
    /// Revert applied migrations above this ID
    #[arg(conflicts_with_all = ["steps", "all"])]
    pub target: Option<MigrationId>,

    /// Revert this many migrations
    #[arg(long, conflicts_with = "all")]
    pub steps: Option<usize>,

    /// Revert every applied migration
    #[arg(long)]
    pub all: bool,

    /// Revert the target migration too
    #[arg(long, requires = "target")]
    pub inclusive: bool,

    /// Print the plan without running it
    #[arg(long)]
    pub dry_run: bool,
}

impl DownArgs {
    /// How far the run should go. Without arguments, one step.
    pub fn target(&self) -> Target {
        if self.all {
            return Target::Latest;
        }
        match (self.target, self.steps) {
            (Some(id), _) if self.inclusive => Target::Including(id),
            (Some(id), _) => Target::Version(id),
            (None, Some(n)) => Target::Steps(n),
            (None, None) => Target::Steps(1),
        }
    }
}

// =============================================================================
// History Command
// =============================================================================

/// Arguments for the `history` command
#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Show only the most recent entries
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
}
