//! Tracing setup for the command-line binary.
//!
//! Logs go to stderr so command output on stdout stays clean. Filtering
//! respects `RUST_LOG` and defaults to `info`.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber. Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    init_with_default("info");
}

/// Like [`init_tracing`] with a caller-chosen default filter, used by `--verbose`.
pub fn init_with_default(default_filter: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .try_init();
}
