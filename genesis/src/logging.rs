//! Development-time tracing.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: Dev diagnostics for both binaries via `RUST_LOG`.
//!   Not persisted, not part of pipeline product output.
//!
//! - **Progress log (`io/progress`)**: Per-session events shown to observers.
//!   Always recorded, unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing subscriber for development logging.
///
/// Reads `RUST_LOG` env var. Defaults to `default_directive` if unset, so
/// each binary picks its own quiet level.
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=genesis=debug genesis generate "bouncing ball"
/// RUST_LOG=genesis_server=debug genesis-server --port 3001
/// ```
pub fn init_with_default(default_directive: &str) {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = filter_from(env.as_deref(), default_directive);

    // A second initialisation (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}

/// [`init_with_default`] with the CLI default of `warn`.
pub fn init() {
    init_with_default("warn");
}

/// `RUST_LOG` directives when present and valid, else `default_directive`.
fn filter_from(env: Option<&str>, default_directive: &str) -> EnvFilter {
    env.and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(default_directive))
}
