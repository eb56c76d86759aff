//! Co-processor clock control.
//!
//! When the main core finds frames in flight but no decoded output ready,
//! it asks the platform to raise the co-processor clock before polling.
//! The hook is a seam: real sinks wire it to their power-management
//! service, tests record the calls, and hosted builds run the no-op.

use tracing::trace;

/// Platform hook for co-processor frequency boosts.
pub trait PowerHook: Send + Sync {
    /// Request a temporary clock boost. Must be cheap and non-blocking.
    fn request_boost(&self);

    /// Drop the boost once output is flowing again.
    fn release_boost(&self);
}

/// Hosted default: no platform clock to adjust.
#[derive(Debug, Default)]
pub struct NoopPower;

impl PowerHook for NoopPower {
    fn request_boost(&self) {
        trace!("co-processor boost requested (no-op)");
    }

    fn release_boost(&self) {
        trace!("co-processor boost released (no-op)");
    }
}
