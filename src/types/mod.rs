//! Core types for the decode pipeline.
//!
//! - [`PacketHeader`] / [`EncodedFrame`] are the units flowing from the
//!   transport through the queue into the orchestrator
//! - [`LastFrameInfo`] / [`SharedLastFrame`] expose decode bookkeeping to
//!   the session-sync collaborator
//! - [`SyncTarget`] / [`SyncMask`] describe queue alignment requests
//! - [`StreamInfo`] carries the codec's post-decode stream report
//!
//! Sequence numbers are 16-bit and timestamps 32-bit, both wrapping; all
//! distance computations go through [`seq_distance`]/[`ts_distance`] so
//! wraparound is handled in exactly one place.

mod frame;
mod last_frame;
mod stream_info;
mod sync;

pub use frame::{
    EncodedFrame, FrameInfo, PLC_SEQUENCE, PLC_TIMESTAMP, PacketHeader, seq_distance, ts_distance,
};
pub use last_frame::{LastFrameInfo, SharedLastFrame};
pub use stream_info::StreamInfo;
pub use sync::{SyncMask, SyncTarget};
