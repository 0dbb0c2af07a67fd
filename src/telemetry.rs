use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Installs a `tracing-subscriber` registry writing to stderr, gated by
/// `RUST_LOG` (defaulting to `aivory_agent=info,warn`).
///
/// Safe to call more than once; only the first call takes effect, matching
/// the idempotent-install contract the rest of the crate relies on.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("aivory_agent=info,warn"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
