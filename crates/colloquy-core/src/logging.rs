//! Tracing bootstrap.
//!
//! Call [`init_logging`] once at process startup. `RUST_LOG` overrides
//! the default directive.

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber.
///
/// Uses `RUST_LOG` when set, `default_directive` otherwise. Safe to call
/// more than once; later calls are no-ops.
pub fn init_logging(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
