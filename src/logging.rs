//! Logging setup.

use std::sync::Once;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static INIT: Once = Once::new();

/// Default filter, `info` for this crate or `debug` with `verbose`.
pub fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "flightcheck=debug"
    } else {
        "flightcheck=info"
    }
}

/// Install the global subscriber. `RUST_LOG`, when set and valid, overrides the
/// default filter. Later calls do nothing.
pub fn init_logging(verbose: bool) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));

        tracing_subscriber::registry()
            .with(fmt::layer().with_target(false))
            .with(filter)
            .init();
    });
}
