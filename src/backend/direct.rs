//! Inline decode orchestrator.
//!
//! The codec runs on the calling thread, one frame per cycle. The queue
//! lock is dropped before any codec call so packet arrival (a higher
//! priority context on the original target) is never blocked by a decode
//! in progress.

use tracing::{debug, warn};

use crate::codec::{Codec, fill_chunk_size, reopen};
use crate::config::ChannelMode;
use crate::{EncodedFrame, PipelineError, Result};

use super::{DecodeBackend, PipelineShared};

pub struct DirectBackend {
    shared: PipelineShared,
    codec: Box<dyn Codec>,
    frame_bytes: usize,
}

impl DirectBackend {
    pub fn new(shared: PipelineShared, mut codec: Box<dyn Codec>) -> Result<Self> {
        codec.open()?;
        let frame_bytes = shared.format.frame_bytes(&shared.profile);
        debug!(frame_bytes, "direct decode backend ready");
        Ok(Self { shared, codec, frame_bytes })
    }

    /// Dequeue the head frame, also reporting the queue length left
    /// behind it. `None` is a cache underflow.
    fn take_frame(&self) -> Option<(EncodedFrame, u32)> {
        let mut queue = self.shared.lock_queue();
        let frame = queue.pop_front()?;
        Some((frame, queue.len() as u32))
    }

    /// Fill, decode and validate one frame. Any error here is final for
    /// this cycle; recovery already happened (codec reopened).
    fn decode_cycle(&mut self, payload: &[u8], out: &mut [u8]) -> Result<usize> {
        let fill_result =
            fill_chunk_size(payload.len()).and_then(|chunk| self.codec.fill(payload, chunk));
        if let Err(err) = fill_result {
            warn!(%err, "bitstream fill failed, skipping decode this cycle");
            if !self.codec.is_open() {
                reopen(self.codec.as_mut())?;
            }
            return Err(err);
        }

        let written = match self.codec.decode(out) {
            Ok(written) => written,
            Err(err) => {
                warn!(%err, "decode failed, reopening codec");
                reopen(self.codec.as_mut())?;
                return Err(err);
            }
        };

        let stream_info = self.codec.stream_info();
        if !stream_info.is_valid_for(&self.shared.profile) {
            warn!(?stream_info, "stream parameters disagree with profile, reopening codec");
            reopen(self.codec.as_mut())?;
            return Err(PipelineError::codec(format!(
                "stream info mismatch: rate {} frame {}",
                stream_info.sample_rate, stream_info.frame_samples
            )));
        }
        Ok(written)
    }
}

impl DecodeBackend for DirectBackend {
    fn decode_frame(&mut self, out: &mut [u8]) -> Result<usize> {
        if out.len() < self.frame_bytes || !self.codec.is_open() {
            return Ok(0);
        }

        let Some((frame, undecoded)) = self.take_frame() else {
            self.shared.last_frame.update(|l| l.mark_underflow());
            return Err(PipelineError::CacheUnderflow);
        };

        let checksum = frame.checksum();
        let outcome = self.decode_cycle(&frame.payload, out);

        // Bookkeeping runs on success and failure alike: the sync layer
        // must see this frame as consumed either way.
        let stream_info = self.codec.stream_info();
        self.shared.last_frame.update(|l| {
            l.record_cycle(
                frame.header.sequence_number,
                frame.header.timestamp,
                self.shared.profile.frame_samples,
                undecoded,
                checksum,
                stream_info,
            )
        });
        self.shared.pool.release(frame);
        outcome
    }

    fn select_channel(&mut self, mode: ChannelMode) -> Result<()> {
        self.codec.select_channel(mode)
    }

    fn shutdown(&mut self) -> Result<()> {
        self.codec.close();
        Ok(())
    }
}
