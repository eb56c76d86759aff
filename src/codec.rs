//! Seam to the external codec library.
//!
//! Entropy decoding itself is out of scope: the pipeline drives an opaque
//! [`Codec`] through fill/decode primitives and reacts to its errors. The
//! one convention the external API imposes on callers is the fill chunk
//! ladder: bitstream reads must be sized to a power-of-two step, see
//! [`fill_chunk_size`].

use crate::config::ChannelMode;
use crate::sbm::SbmOperation;
use crate::{PipelineError, Result, StreamInfo};

/// Fixed ladder of accepted bitstream read sizes, in bytes.
pub const FILL_CHUNK_LADDER: [usize; 5] = [64, 128, 256, 512, 1024];

/// Smallest ladder entry that fits `payload_len` bytes.
pub fn fill_chunk_size(payload_len: usize) -> Result<usize> {
    FILL_CHUNK_LADDER.iter().copied().find(|&step| step >= payload_len).ok_or_else(|| {
        PipelineError::config(format!(
            "payload of {payload_len} bytes exceeds the largest fill chunk"
        ))
    })
}

/// Contract with the external codec library.
///
/// Implementations decode one frame per `decode` call into interleaved
/// PCM. `Send` is required because the offload backend moves the codec
/// onto the co-processor worker thread.
pub trait Codec: Send {
    /// Set up (or re-set-up) the codec handle.
    fn open(&mut self) -> Result<()>;

    /// Tear down the codec handle. Idempotent.
    fn close(&mut self);

    /// Whether the handle is currently usable. Fill failures on a closed
    /// handle trigger a reopen instead of a decode this cycle.
    fn is_open(&self) -> bool;

    /// Hand `payload` to the bitstream buffer. `chunk_bytes` comes from
    /// [`fill_chunk_size`].
    fn fill(&mut self, payload: &[u8], chunk_bytes: usize) -> Result<()>;

    /// Decode one frame into `out`, returning the bytes written.
    fn decode(&mut self, out: &mut [u8]) -> Result<usize>;

    /// Stream parameters after the most recent decode.
    fn stream_info(&self) -> StreamInfo;

    /// Codec-generated mute frame used as the preferred concealment
    /// payload. `None` selects the duplicate-payload fallback.
    fn mute_frame(&self) -> Option<Vec<u8>> {
        None
    }

    /// Apply a playback-speed micro adjustment to the internal resampler.
    /// Codecs without one accept and ignore the request.
    fn set_speed(&mut self, _operation: SbmOperation) -> Result<()> {
        Ok(())
    }

    /// Select output channel routing.
    fn select_channel(&mut self, _mode: ChannelMode) -> Result<()> {
        Ok(())
    }
}

/// Close-then-open recovery used by both orchestrator variants.
pub fn reopen(codec: &mut dyn Codec) -> Result<()> {
    codec.close();
    codec.open()
}
