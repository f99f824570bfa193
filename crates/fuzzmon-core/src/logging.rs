//! Console sink for monitor and probe announcements.
//!
//! Everything in the subsystem reports through `tracing`; this installs the
//! subscriber that prints it. Worker threads are named `probe.<name>`, so
//! thread names are included in the output.

use tracing_subscriber::EnvFilter;

/// Install a global fmt subscriber. `RUST_LOG` overrides `default_directive`.
///
/// Returns `false` if a subscriber was already installed, which is harmless.
pub fn init(default_directive: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .try_init()
        .is_ok()
}
