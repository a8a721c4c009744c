//! Diagnostic tracing for the runner.
//!
//! Tracing output goes to stderr and is controlled by `RUST_LOG`. It is not
//! part of the product output: the rendered response goes to stdout and the
//! per-run transcript (`io::transcript`) is written regardless of `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `warn` if unset, so supervisor warnings are
/// visible without configuration.
///
/// # Example
/// ```bash
/// RUST_LOG=bounded_runner=debug bounded-runner run --task "document this repo"
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
