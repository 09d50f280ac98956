//! Tracing and logging setup shared by the binaries.

pub mod tracing;

pub use crate::tracing::{LogFormat, TracingConfig};

/// Initialize process-wide tracing from the environment.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    crate::tracing::init(TracingConfig::from_env());
}
