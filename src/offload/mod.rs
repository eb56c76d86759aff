//! Co-processor offload: ring hand-off, worker thread, power control.
//!
//! The offload backend splits decode across two execution contexts. The
//! main core drains the packet queue into the in-ring and fetches PCM from
//! the out-ring; a dedicated worker thread (standing in for the DSP core)
//! owns the codec handle and runs fill/decode. [`OffloadShared`] is the
//! state both sides see.

mod power;
mod ring;
mod worker;

pub use power::{NoopPower, PowerHook};
pub use ring::{FrameRings, InFrameInfo, InSlot, MAX_RING_SLOTS, OutFrameInfo, OutSlot};
pub use worker::CpWorker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::{ChannelMode, CodecKind, CodecProfile, PcmFormat};
use crate::sbm::SbmSlot;
use crate::{PipelineError, Result};

/// Ring slots needed to cover half the render DMA buffer, rounded up to a
/// whole double-buffer pair.
pub fn ring_slots(dma_buffer_samples: u32, frame_samples: u32) -> usize {
    let half = dma_buffer_samples.div_ceil(2);
    let per_half = half.div_ceil(frame_samples.max(1)).max(1);
    (per_half as usize) * 2
}

/// State shared between the main-core backend and the worker thread.
#[derive(Debug)]
pub struct OffloadShared {
    pub rings: FrameRings,
    /// Set by the main core when the worker must reopen the codec before
    /// touching the next frame.
    reset_codec: AtomicBool,
    /// Set once by the worker after its codec handle opened.
    ready: AtomicBool,
    /// Pending channel-routing change, applied by the worker.
    channel: Mutex<Option<ChannelMode>>,
    pub sbm: SbmSlot,
    pub profile: CodecProfile,
    /// Bytes of one decoded PCM frame, fixed at init.
    pub pcm_frame_bytes: usize,
}

impl OffloadShared {
    pub fn new(profile: CodecProfile, format: PcmFormat, sbm: SbmSlot) -> Result<Self> {
        let slots = ring_slots(format.dma_buffer_samples, profile.frame_samples);
        let rings = FrameRings::new(slots, profile.readbuf_size)?;
        let pcm_frame_bytes = format.frame_bytes(&profile);
        Ok(Self {
            rings,
            reset_codec: AtomicBool::new(false),
            ready: AtomicBool::new(false),
            channel: Mutex::new(None),
            sbm,
            profile,
            pcm_frame_bytes,
        })
    }

    /// Whether the per-frame speed hook runs on this stream.
    pub fn sbm_enabled(&self) -> bool {
        self.profile.kind == CodecKind::Scalable
    }

    /// Flag the worker to reopen the codec before its next frame.
    pub fn request_codec_reset(&self) {
        self.reset_codec.store(true, Ordering::Release);
    }

    pub(crate) fn take_codec_reset(&self) -> bool {
        self.reset_codec.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Queue a channel-routing change for the worker.
    pub fn select_channel(&self, mode: ChannelMode) {
        *self.channel.lock().expect("channel lock poisoned") = Some(mode);
    }

    pub(crate) fn take_channel(&self) -> Option<ChannelMode> {
        self.channel.lock().expect("channel lock poisoned").take()
    }

    /// Boot handshake: block until the worker reports its codec open.
    pub fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        while !self.is_ready() {
            if Instant::now() >= deadline {
                return Err(PipelineError::Timeout { duration: timeout });
            }
            thread::sleep(Duration::from_millis(1));
        }
        Ok(())
    }
}
