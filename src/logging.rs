//! Diagnostic logging setup for applications embedding the client.
//!
//! The library itself only emits `tracing` events; call [`init`] once from the
//! application to print them.

use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset.
pub fn default_directive(debug: bool) -> &'static str {
    if debug {
        "info,faultline=debug"
    } else {
        "info"
    }
}

/// Install a formatting subscriber. `RUST_LOG` overrides the default filter.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init(debug: bool) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug)));

    tracing_subscriber::fmt().with_env_filter(filter).try_init().is_ok()
}
