//! Tidemark CLI - Command-line interface for the Tidemark migration engine.

use clap::Parser;

use tidemark_cli::cli::{Cli, Command};
use tidemark_cli::commands::{self, Context};
use tidemark_cli::error::CliResult;
use tidemark_cli::{logging, output};
use tidemark_migrate::CancelSignal;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.global.verbose);

    // Ctrl-C stops the run between steps; the current step still finishes.
    let cancel = CancelSignal::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            output::warn("Interrupted, stopping after the current step...");
            on_interrupt.cancel();
        }
    });

    if let Err(e) = run(cli, cancel).await {
        output::newline();
        output::error(&e.to_string());
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli, cancel: CancelSignal) -> CliResult<()> {
    let ctx = Context::load(&cli.global, cancel)?;

    match cli.command {
        Command::Init(args) => commands::init::run(&ctx, args).await,
        Command::New(args) => commands::new::run(&ctx, args).await,
        Command::Status => commands::status::run(&ctx).await,
        Command::Up(args) => commands::migrate::run_up(&ctx, args).await,
        Command::Down(args) => commands::migrate::run_down(&ctx, args).await,
        Command::History(args) => commands::history::run(&ctx, args).await,
        Command::Unlock => commands::unlock::run(&ctx).await,
        Command::Version => commands::version::run().await,
    }
}
