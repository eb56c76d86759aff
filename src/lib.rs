//! A2DP audio sink decode pipeline.
//!
//! Airsink turns a stream of Bluetooth media packets into render-ready
//! PCM: packets are queued behind an MTU limiter, transport loss is
//! bridged with concealment frames, AAC fragments are coalesced, and a
//! decode orchestrator (inline or co-processor offload) pulls one frame
//! per render cycle.
//!
//! # Features
//!
//! - **Bounded queueing**: per-codec MTU limiter, rejection at the edge
//! - **Loss concealment**: gap detection with bounded filler synthesis
//! - **Two decode paths**: inline codec or co-processor ring hand-off
//! - **Session sync**: head-frame queries, discard and target alignment
//! - **Speed adaptation**: debounced SBM requests applied at an agreed
//!   packet boundary
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use airsink::{CodecProfile, Decoder, PcmFormat};
//! # use airsink::codec::Codec;
//! # fn open_codec() -> Box<dyn Codec> { unimplemented!() }
//!
//! fn main() -> airsink::Result<()> {
//!     let mut decoder =
//!         Decoder::direct(CodecProfile::aac_lc(), PcmFormat::stereo_48k(), open_codec())?;
//!
//!     // transport side
//!     // decoder.store_packet(header, &payload)?;
//!
//!     // render side
//!     let mut out = vec![0u8; decoder.output_frame_bytes()];
//!     match decoder.decode_frame(&mut out) {
//!         Ok(written) => { /* hand out[..written] to the DMA buffer */ }
//!         Err(err) if err.is_retryable() => { /* play one period of silence */ }
//!         Err(err) => return Err(err),
//!     }
//!     Ok(())
//! }
//! ```

// Core types and error handling
mod error;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

pub mod codec;
pub mod config;
pub mod plc;
pub mod pool;
pub mod queue;
pub mod reorder;
pub mod sbm;

// Decode orchestration
pub mod backend;
pub mod decoder;
pub mod offload;

// Stream-based driver architecture
pub mod driver;
pub mod stream;

// Core exports
pub use error::*;
pub use types::*;

// Main API exports
pub use config::{ChannelMode, CodecKind, CodecProfile, PcmFormat};
pub use decoder::Decoder;
pub use driver::{DecodeDriver, DriverChannels, PacketSource, PcmBlock};
