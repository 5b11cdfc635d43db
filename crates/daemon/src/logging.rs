//! Tracing subscriber setup.
//!
//! `RUST_LOG` takes precedence over the configured level so operators can
//! raise verbosity of a single module without editing the config file.

use tracing_subscriber::EnvFilter;

/// Build the filter for `level`, letting `RUST_LOG` override it.
pub fn filter_for(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.to_lowercase()))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global fmt subscriber.
///
/// Safe to call more than once: later calls leave the first subscriber
/// in place.
pub fn init(level: &str) {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter_for(level))
        .with_target(true)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(level, "logging initialized");
    }
}
