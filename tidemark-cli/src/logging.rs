//! Log output for the CLI.

use tracing_subscriber::EnvFilter;

/// Default filter for a verbosity level.
pub fn default_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

/// Install the global subscriber. Logs go to stderr.
///
/// `-v` flags win over `RUST_LOG`; without them `RUST_LOG` is honored.
pub fn init(verbose: u8) {
    let filter = if verbose > 0 {
        EnvFilter::new(default_filter(verbose))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(0)))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter() {
        assert_eq!(default_filter(0), "warn");
        assert_eq!(default_filter(1), "info");
        assert_eq!(default_filter(4), "debug");
    }
}
