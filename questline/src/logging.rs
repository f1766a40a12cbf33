//! Development-time tracing for the engine.
//!
//! Library code emits `tracing` events only; installing a subscriber is the
//! binary's job. Command output (`demo` summaries) goes to stdout and is not
//! affected by the log filter.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Project-specific filter variable; takes precedence over `RUST_LOG`.
pub const LOG_ENV: &str = "QUESTLINE_LOG";

const DEFAULT_FILTER: &str = "warn";
const VERBOSE_FILTER: &str = "warn,questline=debug";

/// Pick the filter directive: `QUESTLINE_LOG`, then `RUST_LOG`, then the
/// `--verbose` or quiet default. Empty variables count as unset.
pub fn filter_directive(
    questline_log: Option<String>,
    rust_log: Option<String>,
    verbose: bool,
) -> String {
    questline_log
        .into_iter()
        .chain(rust_log)
        .find(|value| !value.trim().is_empty())
        .unwrap_or_else(|| {
            if verbose {
                VERBOSE_FILTER.to_string()
            } else {
                DEFAULT_FILTER.to_string()
            }
        })
}

/// Install the stderr subscriber.
///
/// # Example
/// ```bash
/// QUESTLINE_LOG=questline::orchestrator=trace cargo run -- demo
/// cargo run -- --verbose demo
/// ```
pub fn init(verbose: bool) {
    let directive = filter_directive(
        std::env::var(LOG_ENV).ok(),
        std::env::var("RUST_LOG").ok(),
        verbose,
    );
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|err| {
        eprintln!("ignoring invalid log filter {directive:?}: {err}");
        EnvFilter::new(DEFAULT_FILTER)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_variable_wins_over_rust_log() {
        let directive = filter_directive(
            Some("questline=trace".to_string()),
            Some("info".to_string()),
            false,
        );
        assert_eq!(directive, "questline=trace");
    }

    #[test]
    fn falls_back_to_rust_log_then_default() {
        assert_eq!(
            filter_directive(Some(" ".to_string()), Some("info".to_string()), true),
            "info"
        );
        assert_eq!(filter_directive(None, None, false), "warn");
        assert_eq!(filter_directive(None, None, true), "warn,questline=debug");
    }
}
