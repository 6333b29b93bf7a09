//! Process-wide tracing setup.
//!
//! Diagnostics go to stderr through `tracing`. Errors that were swallowed on
//! purpose are additionally forwarded to the error tracker
//! (`io::tracker`), which is configured separately.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Directives used when `RUST_LOG` is unset.
pub const DEFAULT_DIRECTIVES: &str = "tipjar=info,tipjar_web=info,warn";

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`; falls back to [`DEFAULT_DIRECTIVES`].
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=tipjar=debug tipjar-web serve
/// ```
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
