//! Logic for setting up a `tracing` subscriber according to our preferences.
//!
//! The pipeline logs warnings for non-fatal input quirks (dropped stalling
//! events, `aac` aliasing, non-contiguous segments, ...) via `tracing::warn!`
//! rather than collecting them into a side channel; this installs the
//! subscriber that prints them.

use tracing_subscriber::{EnvFilter, fmt};

/// Installs a process-wide `tracing` subscriber.
///
/// Honors `RUST_LOG` if set (e.g. `RUST_LOG=debug`); otherwise defaults to
/// `info`, which is enough to see every warning the pipeline emits.
pub fn install() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(filter).with_target(false).finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        // Already installed (e.g. by a test harness); not a problem.
    }
}
