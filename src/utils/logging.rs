use std::env;
use std::io;

use tracing_subscriber::EnvFilter;

/// Setting this variable (to anything) turns on debug output.
pub const DEBUG_ENV: &str = "BMTLAB_DEBUG";

/// Filter used when neither `--debug`, `BMTLAB_DEBUG` nor `RUST_LOG` say otherwise.
const DEFAULT_DIRECTIVE: &str = "warn";
const DEBUG_DIRECTIVE: &str = "debug";

/// `rust_log` is the value of `RUST_LOG`; a directive it cannot parse falls
/// back to the default.
pub fn filter_for(debug: bool, env_debug: bool, rust_log: Option<&str>) -> EnvFilter {
    if debug || env_debug {
        return EnvFilter::new(DEBUG_DIRECTIVE);
    }
    rust_log
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_DIRECTIVE))
}

/// Install the stderr subscriber. Warnings and errors are always shown; debug
/// detail only with `--debug` or `BMTLAB_DEBUG`.
pub fn init(debug: bool) {
    let rust_log = env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = filter_for(debug, env::var_os(DEBUG_ENV).is_some(), rust_log.as_deref());
    // Only fails if a subscriber is already installed.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .without_time()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_flags_select_debug_filter() {
        assert_eq!(filter_for(true, false, None).to_string(), "debug");
        assert_eq!(filter_for(false, true, Some("error")).to_string(), "debug");
    }

    #[test]
    fn test_rust_log_and_default() {
        assert_eq!(filter_for(false, false, None).to_string(), "warn");
        assert_eq!(filter_for(false, false, Some("info")).to_string(), "info");
    }
}
