//! Diagnostic tracing for the engine binaries.
//!
//! Tracing output is for operators and developers. Run and story results are
//! persisted through the run store and are unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`, defaulting to `warn`. Output goes to stderr in compact
/// format.
///
/// # Example
/// ```bash
/// RUST_LOG=engine=debug storycheck run r1 --sha HEAD
/// ```
pub fn init() {
    init_with_default("warn");
}

/// Like [`init`] with a caller-chosen default filter.
pub fn init_with_default(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
