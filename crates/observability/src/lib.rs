//! Tracing and logging setup shared by marketsync processes.

/// Subscriber configuration and installation.
pub mod tracing;

pub use crate::tracing::{LogFormat, ObservabilityConfig, ParseLogFormatError};

/// Initialize process-wide tracing with JSON output and `RUST_LOG` filtering.
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init_with(&ObservabilityConfig::from_env());
}

/// Initialize with an explicit configuration. Returns `false` when a subscriber was already set.
pub fn init_with(config: &ObservabilityConfig) -> bool {
    tracing::init_with(config)
}
