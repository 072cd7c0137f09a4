//! `tidemark version` command - Display version information.

use crate::error::CliResult;
use crate::output::{self, kv};

/// Package version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name
const NAME: &str = env!("CARGO_PKG_NAME");

/// Run the version command
pub async fn run() -> CliResult<()> {
    output::header("Tidemark");

    kv("Version", VERSION);
    kv("Package", NAME);

    #[cfg(debug_assertions)]
    let build_mode = "debug";
    #[cfg(not(debug_assertions))]
    let build_mode = "release";

    kv("Build", build_mode);

    let mut backends = Vec::new();

    #[cfg(feature = "sqlite")]
    backends.push("sqlite");

    #[cfg(feature = "postgres")]
    backends.push("postgres");

    if backends.is_empty() {
        backends.push("none");
    }

    kv("Backends", &backends.join(", "));

    Ok(())
}
