//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

/// Environment variable consulted before `RUST_LOG`.
pub const LOG_ENV: &str = "DFPS_LOG";

/// Initializes a `tracing_subscriber` using `DFPS_LOG` first, then `RUST_LOG`,
/// then a default of `info`.
///
/// Log field contract: include `job_id` and `node_id` whenever an event is
/// about a specific job or node, and `tier` for registry movements.
pub fn init_tracing() {
    let filter = env_filter();
    // A host process may already own the global subscriber.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
