//! Tracing setup.

use tracing_subscriber::{fmt, EnvFilter};

/// Installs a global tracing subscriber with env-filter support.
///
/// `RUST_LOG` overrides `default_directive`. Safe to call more than once;
/// later calls are no-ops.
pub fn init_tracing(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
