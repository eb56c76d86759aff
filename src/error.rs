//! Error types for the decode pipeline.
//!
//! All failures that can cross the public decoder boundary are encoded in
//! [`PipelineError`]. The pipeline never panics across that boundary:
//! capacity and configuration invariant violations, which the original
//! embedded implementation treated as hard assertions, surface here as
//! typed `Config`/`Memory` errors instead. The detection is kept, the
//! process abort is not.
//!
//! ## Error Categories
//!
//! - **Transient**: [`PipelineError::CacheUnderflow`] (no packet queued) and
//!   [`PipelineError::SysBusy`] (data queued but the co-processor has not
//!   caught up within the retry budget); callers typically insert one
//!   period of silence and try again.
//! - **Recoverable-by-retry**: [`PipelineError::Codec`]; the orchestrator
//!   already reinitialized the codec inline, at most one frame of output
//!   was lost.
//! - **Boundary rejection**: [`PipelineError::MtuLimit`], an oversize
//!   payload or full queue; the packet is dropped, nothing retried.
//! - **Misconfiguration**: [`PipelineError::Config`] and
//!   [`PipelineError::Timeout`], sizing or co-processor boot problems
//!   rather than runtime conditions.
//!
//! ```rust
//! use airsink::PipelineError;
//!
//! let err = PipelineError::CacheUnderflow;
//! if err.is_retryable() {
//!     // fill the period with silence and pull again next callback
//! }
//! ```

use std::time::Duration;
use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

/// Main error type for decode pipeline operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PipelineError {
    /// The raw packet queue holds nothing to decode.
    #[error("cache underflow: no packet queued for decode")]
    CacheUnderflow,

    /// Packets are queued but the co-processor has not produced a decoded
    /// frame within the bounded retry window.
    #[error("cache underflow: co-processor busy after {retries} polls")]
    SysBusy { retries: u32 },

    /// Insertion rejected at the queue boundary: the queue already holds
    /// the MTU-limiter number of packets, or the payload exceeds the
    /// codec read buffer.
    #[error("MTU limit exceeded: {context}")]
    MtuLimit { context: String },

    /// Codec fill/decode failure or stream-info mismatch for this cycle.
    #[error("decode error: {context}")]
    Codec {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Synchronization scan drained the queue without finding the target.
    #[error("sync error: {context}")]
    Sync { context: String },

    /// Pool exhaustion or an out-of-range discard/length request.
    #[error("memory error: {context}")]
    Memory { context: String },

    /// Capacity/length invariant violation (ring buffer sizing, malformed
    /// slot lengths). Indicates a sizing bug, not a runtime condition.
    #[error("configuration error: {context}")]
    Config { context: String },

    /// Bounded wait expired (co-processor boot handshake, worker join).
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: Duration },
}

impl PipelineError {
    /// Returns whether this error is expected to clear on a later decode
    /// cycle without caller intervention.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::CacheUnderflow => true,
            PipelineError::SysBusy { .. } => true,
            PipelineError::Codec { .. } => true,
            PipelineError::MtuLimit { .. } => false,
            PipelineError::Sync { .. } => false,
            PipelineError::Memory { .. } => false,
            PipelineError::Config { .. } => false,
            PipelineError::Timeout { .. } => false,
        }
    }

    /// Helper constructor for codec errors without an underlying source.
    pub fn codec(context: impl Into<String>) -> Self {
        PipelineError::Codec { context: context.into(), source: None }
    }

    /// Helper constructor for codec errors wrapping a library error.
    pub fn codec_with_source(
        context: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        PipelineError::Codec { context: context.into(), source: Some(source) }
    }

    /// Helper constructor for queue-boundary rejections.
    pub fn mtu_limit(context: impl Into<String>) -> Self {
        PipelineError::MtuLimit { context: context.into() }
    }

    /// Helper constructor for sync-scan failures.
    pub fn sync(context: impl Into<String>) -> Self {
        PipelineError::Sync { context: context.into() }
    }

    /// Helper constructor for pool/length errors.
    pub fn memory(context: impl Into<String>) -> Self {
        PipelineError::Memory { context: context.into() }
    }

    /// Helper constructor for capacity misconfiguration.
    pub fn config(context: impl Into<String>) -> Self {
        PipelineError::Config { context: context.into() }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Codec { context: "i/o failure".to_string(), source: Some(Box::new(err)) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(test)]
    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn error_messages_contain_their_context(
                context in ".+",
                retries in 0u32..100u32,
            ) {
                let mtu = PipelineError::mtu_limit(context.clone());
                prop_assert!(mtu.to_string().contains(&context));

                let sync = PipelineError::sync(context.clone());
                prop_assert!(sync.to_string().contains(&context));

                let mem = PipelineError::memory(context.clone());
                prop_assert!(mem.to_string().contains(&context));

                let busy = PipelineError::SysBusy { retries };
                prop_assert!(busy.to_string().contains(&retries.to_string()));
            }

            #[test]
            fn retryable_classification_is_stable(
                context in ".*",
            ) {
                // Transient classes stay retryable regardless of context.
                prop_assert!(PipelineError::CacheUnderflow.is_retryable());
                prop_assert!(PipelineError::codec(context.clone()).is_retryable());
                prop_assert!(!PipelineError::mtu_limit(context.clone()).is_retryable());
                prop_assert!(!PipelineError::config(context.clone()).is_retryable());
                prop_assert!(!PipelineError::memory(context).is_retryable());
            }

            #[test]
            fn codec_source_chain_is_traversable(base in "[a-z]+") {
                let io = std::io::Error::other(base.clone());
                let err = PipelineError::codec_with_source("fill failed", Box::new(io));

                let source = std::error::Error::source(&err);
                prop_assert!(source.is_some());
                prop_assert!(source.unwrap().to_string().contains(&base));
            }
        }
    }

    #[test]
    fn error_traits_validation() {
        // Compile-time check: PipelineError must be Send + Sync + 'static
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<PipelineError>();

        let error = PipelineError::CacheUnderflow;
        let _: &dyn std::error::Error = &error;
    }

    #[test]
    fn underflow_variants_are_distinguishable() {
        let empty = PipelineError::CacheUnderflow;
        let busy = PipelineError::SysBusy { retries: 8 };
        assert!(matches!(empty, PipelineError::CacheUnderflow));
        assert!(matches!(busy, PipelineError::SysBusy { retries: 8 }));
        assert_ne!(empty.to_string(), busy.to_string());
    }

    #[test]
    fn from_io_error_maps_to_codec() {
        let io_err = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short read");
        let err: PipelineError = io_err.into();
        match err {
            PipelineError::Codec { source, .. } => {
                assert_eq!(source.unwrap().to_string(), "short read");
            }
            other => panic!("expected Codec variant, got {other:?}"),
        }
    }
}
