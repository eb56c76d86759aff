//! Bounded raw packet queue and the last-valid-frame marker.
//!
//! Arrival order is preserved; the bound is enforced at insertion by
//! rejecting the packet, never by evicting queued ones. Evicting would
//! silently drop audio the decoder already committed to.

use std::collections::VecDeque;

use tracing::{debug, trace};

use crate::pool::FramePool;
use crate::{
    EncodedFrame, FrameInfo, PacketHeader, PipelineError, Result, SyncMask, SyncTarget,
};

/// Reference point for gap computation in the loss detector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LastValidMarker {
    pub sequence_number: u16,
    pub timestamp: u32,
    /// False until the first real frame is accepted after (re)init.
    pub ready: bool,
}

/// FIFO of encoded frames bounded by the codec's MTU limiter.
#[derive(Debug)]
pub struct PacketQueue {
    frames: VecDeque<EncodedFrame>,
    mtu_limit: usize,
    readbuf_size: usize,
    marker: LastValidMarker,
    pool: FramePool,
}

impl PacketQueue {
    pub fn new(mtu_limit: usize, readbuf_size: usize, pool: FramePool) -> Self {
        Self {
            frames: VecDeque::with_capacity(mtu_limit),
            mtu_limit,
            readbuf_size,
            marker: LastValidMarker::default(),
            pool,
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn mtu_limit(&self) -> usize {
        self.mtu_limit
    }

    pub fn marker(&self) -> LastValidMarker {
        self.marker
    }

    /// Queue length expressed in output samples.
    pub fn len_in_samples(&self, frame_samples: u32) -> u32 {
        self.frames.len() as u32 * frame_samples
    }

    /// Head frame position, zeroed when empty.
    pub fn head_info(&self) -> FrameInfo {
        self.frames
            .front()
            .map(|f| FrameInfo {
                sequence_number: f.header.sequence_number,
                timestamp: f.header.timestamp,
            })
            .unwrap_or_default()
    }

    /// Borrow the head frame without consuming it.
    pub fn front(&self) -> Option<&EncodedFrame> {
        self.frames.front()
    }

    /// Enqueue at the tail.
    ///
    /// Rejects with `MtuLimit` when the queue already holds the limiter
    /// count or the payload exceeds the codec read buffer; the rejected
    /// frame is released back to the pool.
    pub fn append(&mut self, frame: EncodedFrame) -> Result<()> {
        if self.frames.len() >= self.mtu_limit {
            trace!(len = self.frames.len(), "queue full, packet rejected");
            self.pool.release(frame);
            return Err(PipelineError::mtu_limit(format!(
                "queue holds {} packets (limit {})",
                self.frames.len(),
                self.mtu_limit
            )));
        }
        if frame.payload.len() > self.readbuf_size {
            let len = frame.payload.len();
            self.pool.release(frame);
            return Err(PipelineError::mtu_limit(format!(
                "payload {len} bytes exceeds read buffer {}",
                self.readbuf_size
            )));
        }

        if !frame.is_plc() {
            self.marker = LastValidMarker {
                sequence_number: frame.header.sequence_number,
                timestamp: frame.header.timestamp,
                ready: true,
            };
        }
        self.frames.push_back(frame);
        Ok(())
    }

    /// Advance the marker to a transport packet that was seen but not
    /// queued under its own header, such as a fragment absorbed by the
    /// reorder stage. Without this, coalesced fragments read as lost
    /// packets and trigger spurious concealment.
    pub fn note_arrival(&mut self, header: PacketHeader) {
        if !header.is_plc() {
            self.marker = LastValidMarker {
                sequence_number: header.sequence_number,
                timestamp: header.timestamp,
                ready: true,
            };
        }
    }

    /// Remove and return the head frame. `None` signals cache underflow.
    ///
    /// Ownership (and the pool charge) transfers to the caller, which must
    /// release the frame once decode completes.
    pub fn pop_front(&mut self) -> Option<EncodedFrame> {
        self.frames.pop_front()
    }

    /// Remove exactly the first `n` frames without decoding.
    pub fn discard(&mut self, n: usize) -> Result<()> {
        if n > self.frames.len() {
            return Err(PipelineError::memory(format!(
                "cannot discard {n} of {} queued frames",
                self.frames.len()
            )));
        }
        for _ in 0..n {
            if let Some(frame) = self.frames.pop_front() {
                self.pool.release(frame);
            }
        }
        debug!(discarded = n, remaining = self.frames.len(), "discarded queued packets");
        Ok(())
    }

    /// Discard from the head until a frame matches `target` under `mask`.
    ///
    /// On success the matching frame stays at the head. When the queue
    /// drains without a match, `pending` (the reorder stage's in-progress
    /// frame header, AAC path) is consulted before reporting `Sync`.
    pub fn synchronize_to(
        &mut self,
        target: SyncTarget,
        mask: SyncMask,
        pending: Option<PacketHeader>,
    ) -> Result<()> {
        while let Some(front) = self.frames.front() {
            if target.matches(&front.header, mask) {
                debug!(
                    seq = front.header.sequence_number,
                    ts = front.header.timestamp,
                    "synchronized to queued frame"
                );
                return Ok(());
            }
            if let Some(dropped) = self.frames.pop_front() {
                trace!(seq = dropped.header.sequence_number, "dropped while synchronizing");
                self.pool.release(dropped);
            }
        }

        if let Some(header) = pending {
            if target.matches(&header, mask) {
                debug!(seq = header.sequence_number, "synchronized to in-progress frame");
                return Ok(());
            }
        }

        Err(PipelineError::sync(format!(
            "target seq {} / ts {} not found, queue drained",
            target.sequence_number, target.timestamp
        )))
    }

    /// Discard from the head until the queue holds at most `max_len`.
    /// Discarding the in-progress reorder frame for `max_len == 0` is the
    /// caller's responsibility, since that frame lives in the coalescer.
    pub fn truncate_to(&mut self, max_len: usize) {
        while self.frames.len() > max_len {
            if let Some(frame) = self.frames.pop_front() {
                self.pool.release(frame);
            }
        }
    }

    /// Drop everything and clear the marker (deinit path).
    pub fn clear(&mut self) {
        while let Some(frame) = self.frames.pop_front() {
            self.pool.release(frame);
        }
        self.marker = LastValidMarker::default();
    }
}
