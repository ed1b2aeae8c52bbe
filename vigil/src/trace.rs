//! Optional tracing support.
//!
//! Built with `--features tracing` the crate emits `tracing` events at its
//! interesting moments (lock steals, identity-cache refreshes); without the
//! feature every macro below is a no-op and nothing of the subscriber stack
//! is linked in.

/// Installs a subscriber that prints events with uptime timestamps.
///
/// Handy at the top of tests and example binaries; honors `RUST_LOG` and
/// defaults to `vigil=debug`. Does nothing when the `tracing` feature is
/// off.
#[cfg(feature = "tracing")]
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vigil=debug"));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_timer(fmt::time::uptime()),
        )
        .with(filter)
        .init();
}

#[cfg(not(feature = "tracing"))]
pub const fn init_tracing() {}

#[cfg(feature = "tracing")]
pub(crate) use tracing::{debug, trace};

#[cfg(not(feature = "tracing"))]
macro_rules! debug_noop {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
macro_rules! trace_noop {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
pub(crate) use debug_noop as debug;
#[cfg(not(feature = "tracing"))]
pub(crate) use trace_noop as trace;
