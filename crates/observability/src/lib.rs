//! Process-wide logging setup.

/// Initialize logging using `LOG_FORMAT` (default JSON) and `RUST_LOG`.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init();
}

/// Tracing subscriber configuration (format, filters).
pub mod tracing;

pub use crate::tracing::{LogFormat, ParseLogFormatError, init_with};
