//! Decode orchestrator backends.
//!
//! Both variants pull encoded frames from the shared packet queue and
//! produce interleaved PCM: [`DirectBackend`] runs the codec inline on the
//! calling thread, [`OffloadBackend`] hands frames to the co-processor
//! worker over the ring pair. The session layer talks to either through
//! [`DecodeBackend`].

mod direct;
mod offload;

pub use direct::DirectBackend;
pub use offload::OffloadBackend;

use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::{ChannelMode, CodecProfile, PcmFormat};
use crate::pool::FramePool;
use crate::queue::PacketQueue;
use crate::sbm::SbmSlot;
use crate::types::SharedLastFrame;
use crate::Result;

/// One decode cycle's contract. `Ok(0)` means "not started yet": the
/// output buffer is under one PCM frame or the codec is not up.
pub trait DecodeBackend: Send {
    fn decode_frame(&mut self, out: &mut [u8]) -> Result<usize>;

    fn select_channel(&mut self, mode: ChannelMode) -> Result<()>;

    /// Tear down codec/worker state. Idempotent.
    fn shutdown(&mut self) -> Result<()>;
}

/// State every pipeline stage sees: the raw packet queue, the frame pool
/// backing it, last-frame bookkeeping and the speed-request mailbox.
#[derive(Debug, Clone)]
pub struct PipelineShared {
    queue: Arc<Mutex<PacketQueue>>,
    pub pool: FramePool,
    pub last_frame: SharedLastFrame,
    pub profile: CodecProfile,
    pub format: PcmFormat,
    pub sbm: SbmSlot,
}

impl PipelineShared {
    pub fn new(profile: CodecProfile, format: PcmFormat) -> Result<Self> {
        profile.validate()?;
        format.validate()?;
        let pool = FramePool::new(profile.pool_frames);
        let queue = PacketQueue::new(profile.mtu_limit, profile.readbuf_size, pool.clone());
        Ok(Self {
            queue: Arc::new(Mutex::new(queue)),
            pool,
            last_frame: SharedLastFrame::new(),
            profile,
            format,
            sbm: SbmSlot::new(),
        })
    }

    /// Short-lived exclusive access to the packet queue. Callers must not
    /// hold the guard across a codec call.
    pub fn lock_queue(&self) -> MutexGuard<'_, PacketQueue> {
        self.queue.lock().expect("queue lock poisoned")
    }
}
