//! Tracing subscriber setup for binaries and bench scripts.
//!
//! The library itself only emits `tracing` events. Whoever owns `main`
//! decides where they go; [`init`] is the stock choice: human readable
//! output on stderr, filtered by `RUST_LOG` when it is set.

use tracing_subscriber::EnvFilter;

/// Install a global `fmt` subscriber.
///
/// `default_level` (e.g. `"info"` or `"instrumentrs=debug"`) applies when
/// `RUST_LOG` is unset or unparsable. Calling this twice is harmless; the
/// second call leaves the first subscriber in place and returns `false`.
pub fn init(default_level: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}
