//! Public decoder facade.
//!
//! [`Decoder`] wires the store path (fragment coalescing, loss detection,
//! concealment synthesis, the bounded queue) to a decode backend and
//! exposes the session-sync surface: head-frame queries, packet/sample
//! discards, target synchronization and queue truncation.
//!
//! The two halves target different contexts: packets arrive from the
//! transport, PCM is pulled from the render callback. Both take
//! `&mut self`, so one owner (typically the driver task) serializes the
//! calls; within that owner, `store_packet` touches only the short queue
//! lock and never runs the codec, while the offload backend keeps even
//! `decode_frame` off the codec's thread.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::backend::{DecodeBackend, DirectBackend, OffloadBackend, PipelineShared};
use crate::codec::Codec;
use crate::config::{ChannelMode, CodecProfile, PcmFormat};
use crate::offload::PowerHook;
use crate::plc::LossDetector;
use crate::reorder::Coalescer;
use crate::sbm::SbmSlot;
use crate::types::{FrameInfo, LastFrameInfo, PacketHeader, SyncMask, SyncTarget};
use crate::{PipelineError, Result};

/// A2DP decode pipeline: store on one side, pull PCM on the other.
pub struct Decoder {
    shared: PipelineShared,
    backend: Box<dyn DecodeBackend>,
    detector: LossDetector,
    /// Present on profiles whose transport may split logical frames.
    coalescer: Option<Coalescer>,
}

impl Decoder {
    /// Build a decoder running the codec inline on the decode caller.
    pub fn direct(profile: CodecProfile, format: PcmFormat, codec: Box<dyn Codec>) -> Result<Self> {
        let shared = PipelineShared::new(profile, format)?;
        let mute = codec.mute_frame();
        let backend = Box::new(DirectBackend::new(shared.clone(), codec)?);
        Ok(Self::assemble(shared, backend, mute))
    }

    /// Build a decoder handing frames to the co-processor worker.
    pub fn offload(
        profile: CodecProfile,
        format: PcmFormat,
        codec: Box<dyn Codec>,
        power: Arc<dyn PowerHook>,
    ) -> Result<Self> {
        let shared = PipelineShared::new(profile, format)?;
        let mute = codec.mute_frame();
        let backend = Box::new(OffloadBackend::new(shared.clone(), codec, power)?);
        Ok(Self::assemble(shared, backend, mute))
    }

    fn assemble(
        shared: PipelineShared,
        backend: Box<dyn DecodeBackend>,
        mute: Option<Vec<u8>>,
    ) -> Self {
        let detector = LossDetector::new(shared.profile.ts_units_per_packet(), mute);
        let coalescer = shared
            .profile
            .needs_coalescing()
            .then(|| Coalescer::new(shared.profile.readbuf_size));
        info!(kind = ?shared.profile.kind, "decoder initialized");
        Self { shared, backend, detector, coalescer }
    }

    /// Accept one transport packet.
    ///
    /// AAC packets pass through the fragment coalescer first, so a given
    /// call may enqueue the previously held frame rather than this one, or
    /// nothing at all. Detected gaps are bridged with concealment frames
    /// ahead of the triggering packet.
    pub fn store_packet(&mut self, header: PacketHeader, payload: &[u8]) -> Result<()> {
        if self.coalescer.is_none() {
            return self.enqueue(header, payload);
        }

        // Gap detection runs per transport packet, before the reorder
        // stage absorbs it: a fragment coalesced into the previous frame
        // must not read as a lost packet, and fillers appended here land
        // ahead of the frame they precede.
        self.synthesize_fillers(&header, payload)?;
        let flushed = match self.coalescer.as_mut() {
            Some(coalescer) => coalescer.push(header, payload),
            None => None,
        };
        if let Some((frame_header, frame_payload)) = flushed {
            self.append_frame(frame_header, &frame_payload)?;
        }
        // the marker tracks the last seen transport packet, not the
        // (possibly older) header of the frame that just flushed
        self.shared.lock_queue().note_arrival(header);
        Ok(())
    }

    fn enqueue(&mut self, header: PacketHeader, payload: &[u8]) -> Result<()> {
        self.synthesize_fillers(&header, payload)?;
        self.append_frame(header, payload)
    }

    fn synthesize_fillers(&mut self, header: &PacketHeader, payload: &[u8]) -> Result<()> {
        let fillers = {
            let queue = self.shared.lock_queue();
            self.detector.plan(queue.marker(), header, queue.len(), queue.mtu_limit())
        };
        for _ in 0..fillers {
            let filler = self
                .shared
                .pool
                .alloc(PacketHeader::plc(), self.detector.filler_payload(payload))?;
            self.shared.lock_queue().append(filler)?;
        }
        Ok(())
    }

    fn append_frame(&mut self, header: PacketHeader, payload: &[u8]) -> Result<()> {
        let frame = self.shared.pool.alloc(header, payload.to_vec())?;
        self.shared.lock_queue().append(frame)
    }

    /// Decode (or fetch) one frame of PCM into `out`.
    pub fn decode_frame(&mut self, out: &mut [u8]) -> Result<usize> {
        self.backend.decode_frame(out)
    }

    /// Bytes of one decoded PCM frame; the minimum `decode_frame` buffer.
    pub fn output_frame_bytes(&self) -> usize {
        self.shared.format.frame_bytes(&self.shared.profile)
    }

    /// Reset last-frame bookkeeping at the start of a new logical unit
    /// (seek, track change), before its first packet is stored.
    pub fn preparse_frame(&self) {
        debug!("preparse: last-frame bookkeeping reset");
        self.shared.last_frame.reset();
    }

    /// Position of the frame a decode would consume next; zeroed when the
    /// queue is empty.
    pub fn head_frame_info(&self) -> FrameInfo {
        self.shared.lock_queue().head_info()
    }

    /// Queued audio expressed in output samples.
    pub fn queued_samples(&self) -> u32 {
        self.shared.lock_queue().len_in_samples(self.shared.profile.frame_samples)
    }

    /// Snapshot of the most recent decode cycle.
    pub fn last_frame_info(&self) -> LastFrameInfo {
        self.shared.last_frame.snapshot()
    }

    /// Drop queued audio by sample count. The count must land on a frame
    /// boundary and must not exceed what is queued.
    pub fn discard_samples(&mut self, samples: u32) -> Result<()> {
        let frame_samples = self.shared.profile.frame_samples;
        if samples % frame_samples != 0 {
            return Err(PipelineError::memory(format!(
                "discard of {samples} samples is not a multiple of the {frame_samples}-sample frame"
            )));
        }
        self.shared.lock_queue().discard((samples / frame_samples) as usize)
    }

    /// Drop exactly `count` queued packets from the head.
    pub fn discard_packets(&mut self, count: usize) -> Result<()> {
        self.shared.lock_queue().discard(count)
    }

    /// Discard from the head until the packet matching `target` under
    /// `mask` is at the front. The coalescer's in-progress frame counts as
    /// a match once the queue drains.
    pub fn synchronize_packet(&mut self, target: SyncTarget, mask: SyncMask) -> Result<()> {
        let pending = self.coalescer.as_ref().and_then(Coalescer::pending_header);
        self.shared.lock_queue().synchronize_to(target, mask, pending)
    }

    /// Trim the queue from the head down to at most `max_packets`.
    /// Truncating to zero also drops the coalescer's in-progress frame.
    pub fn synchronize_dest_packet_count(&mut self, max_packets: usize) {
        self.shared.lock_queue().truncate_to(max_packets);
        if max_packets == 0 {
            if let Some(coalescer) = self.coalescer.as_mut() {
                coalescer.clear();
            }
        }
    }

    /// Forward a channel-routing change to the codec.
    pub fn select_channel(&mut self, mode: ChannelMode) -> Result<()> {
        self.backend.select_channel(mode)
    }

    /// Mailbox for playback-speed requests; hand this to a
    /// [`SpeedTuner`](crate::sbm::SpeedTuner).
    pub fn sbm_slot(&self) -> SbmSlot {
        self.shared.sbm.clone()
    }

    /// Tear the pipeline down, reporting peak frame usage.
    pub fn deinit(mut self) -> Result<()> {
        let result = self.backend.shutdown();
        self.shared.lock_queue().clear();
        if let Some(coalescer) = self.coalescer.as_mut() {
            coalescer.clear();
        }
        info!(
            high_water = self.shared.pool.high_water(),
            capacity = self.shared.pool.capacity(),
            "decoder deinitialized"
        );
        if let Err(err) = &result {
            warn!(%err, "backend shutdown reported an error");
        }
        result
    }
}
