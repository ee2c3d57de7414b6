//! Operator-visible progress reporting.
//!
//! Long-running operations (builder polling, per-target copies) emit status
//! lines through a narrow append-only sink so callers can route them to
//! whatever surface hosts the build.

/// Append-only sink for operator status lines.
pub trait Progress: Send + Sync {
    /// Reports a status line.
    fn say(&self, line: &str);

    /// Reports a non-fatal problem.
    fn error(&self, line: &str);
}

/// Progress sink backed by `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingProgress;

impl Progress for TracingProgress {
    fn say(&self, line: &str) {
        tracing::info!("{line}");
    }

    fn error(&self, line: &str) {
        tracing::warn!("{line}");
    }
}

/// Progress sink that discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullProgress;

impl Progress for NullProgress {
    fn say(&self, _line: &str) {}

    fn error(&self, _line: &str) {}
}
