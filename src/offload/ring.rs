//! Double-buffered frame exchange between the main core and the
//! co-processor worker.
//!
//! Two bounded rings: in-frames (main → CP) carry encoded payloads behind
//! an [`InFrameInfo`] header, out-frames (CP → main) carry decoded PCM
//! behind an [`OutFrameInfo`] header. One producer and one consumer per
//! direction; the short mutex sections here stand in for the original
//! shared-memory ring convention, with the same observable contract:
//! a put fails when the ring is full, a fetch fails when nothing is
//! ready, and the in-flight count classifies why a fetch came up empty.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::{PipelineError, Result, StreamInfo};

/// Ceiling on ring slots; a request above this is a sizing bug.
pub const MAX_RING_SLOTS: usize = 64;

/// Header prepended to each encoded payload handed to the co-processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InFrameInfo {
    pub sequence_number: u16,
    pub timestamp: u32,
    pub is_plc: bool,
    /// Payload checksum recorded at hand-off for diagnostics.
    pub checksum: u32,
}

/// Header prepended to each decoded PCM block returned by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutFrameInfo {
    pub in_info: InFrameInfo,
    pub stream_info: StreamInfo,
    pub frame_samples: u32,
    pub decoded_frames: u32,
    pub frame_idx: u32,
    pub pcm_len: usize,
    /// Bytes of this slot already copied out by the main core.
    pub fetch_offset: usize,
}

#[derive(Debug)]
pub struct InSlot {
    pub info: InFrameInfo,
    pub payload: Vec<u8>,
}

#[derive(Debug)]
pub struct OutSlot {
    pub info: OutFrameInfo,
    pub pcm: Vec<u8>,
}

#[derive(Debug)]
struct RingState<T> {
    slots: VecDeque<T>,
}

impl<T> Default for RingState<T> {
    fn default() -> Self {
        Self { slots: VecDeque::new() }
    }
}

/// The in/out ring pair shared by the main core and the worker thread.
#[derive(Debug)]
pub struct FrameRings {
    capacity: AtomicUsize,
    max_payload: usize,
    in_ring: Mutex<RingState<InSlot>>,
    in_ready: Condvar,
    out_ring: Mutex<RingState<OutSlot>>,
    out_space: Condvar,
    in_flight: AtomicUsize,
}

impl FrameRings {
    pub fn new(slots: usize, max_payload: usize) -> Result<Self> {
        if slots == 0 || slots > MAX_RING_SLOTS {
            return Err(PipelineError::config(format!(
                "ring capacity {slots} outside 1..={MAX_RING_SLOTS}"
            )));
        }
        Ok(Self {
            capacity: AtomicUsize::new(slots),
            max_payload,
            in_ring: Mutex::new(RingState::default()),
            in_ready: Condvar::new(),
            out_ring: Mutex::new(RingState::default()),
            out_space: Condvar::new(),
            in_flight: AtomicUsize::new(0),
        })
    }

    /// Grow the rings to hold at least `slots`. Never shrinks, so queued
    /// slots survive a period-size change.
    pub fn ensure_capacity(&self, slots: usize) -> Result<()> {
        if slots == 0 || slots > MAX_RING_SLOTS {
            return Err(PipelineError::config(format!(
                "ring capacity {slots} outside 1..={MAX_RING_SLOTS}"
            )));
        }
        self.capacity.fetch_max(slots, Ordering::AcqRel);
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Acquire)
    }

    /// Hand one encoded frame to the worker. `Ok(false)` means the ring is
    /// full, retry after the worker drains. Malformed payload lengths are
    /// configuration errors, detected here rather than asserted.
    pub fn try_put_in(&self, info: InFrameInfo, payload: Vec<u8>) -> Result<bool> {
        if payload.len() > self.max_payload {
            return Err(PipelineError::config(format!(
                "in-frame payload {} exceeds slot size {}",
                payload.len(),
                self.max_payload
            )));
        }
        let mut ring = self.in_ring.lock().expect("in-ring lock poisoned");
        if ring.slots.len() >= self.capacity() {
            return Ok(false);
        }
        ring.slots.push_back(InSlot { info, payload });
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        self.in_ready.notify_one();
        Ok(true)
    }

    /// Worker side: wait up to `timeout` for an in-frame.
    pub fn take_in(&self, timeout: Duration) -> Option<InSlot> {
        let mut ring = self.in_ring.lock().expect("in-ring lock poisoned");
        if ring.slots.is_empty() {
            let (guard, result) = self
                .in_ready
                .wait_timeout_while(ring, timeout, |r| r.slots.is_empty())
                .expect("in-ring lock poisoned");
            ring = guard;
            if result.timed_out() && ring.slots.is_empty() {
                return None;
            }
        }
        ring.slots.pop_front()
    }

    /// Worker side: return a frame to the head of the in-ring (retrigger).
    /// The frame stays charged as in flight.
    pub fn put_back_front(&self, slot: InSlot) {
        let mut ring = self.in_ring.lock().expect("in-ring lock poisoned");
        ring.slots.push_front(slot);
    }

    /// Worker side: discharge one in-flight frame once its servicing ends,
    /// whether a decoded slot was published or the frame was dropped.
    pub fn mark_serviced(&self) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Frames handed off whose servicing has not finished. A taken frame
    /// stays charged until [`mark_serviced`](Self::mark_serviced), so zero
    /// distinguishes a genuine underflow from a busy co-processor even
    /// while the single queued frame sits inside a decode call.
    pub fn in_len(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Worker side: publish one decoded slot, waiting up to `timeout` for
    /// ring space. Returns false when the main core never drained.
    pub fn push_out(&self, slot: OutSlot, timeout: Duration) -> bool {
        let ring = self.out_ring.lock().expect("out-ring lock poisoned");
        let (mut ring, result) = self
            .out_space
            .wait_timeout_while(ring, timeout, |r| r.slots.len() >= self.capacity())
            .expect("out-ring lock poisoned");
        if result.timed_out() && ring.slots.len() >= self.capacity() {
            return false;
        }
        ring.slots.push_back(slot);
        true
    }

    /// Main side: copy PCM from the front out-slot into `dst`, consuming
    /// the slot progressively. Returns the slot header and the bytes
    /// copied, or `None` when no slot is ready.
    pub fn fetch_pcm(&self, dst: &mut [u8]) -> Option<(OutFrameInfo, usize)> {
        let mut ring = self.out_ring.lock().expect("out-ring lock poisoned");
        let front = ring.slots.front_mut()?;

        let remaining = front.info.pcm_len - front.info.fetch_offset;
        let take = remaining.min(dst.len());
        let start = front.info.fetch_offset;
        dst[..take].copy_from_slice(&front.pcm[start..start + take]);
        front.info.fetch_offset += take;
        let header = front.info;

        if front.info.fetch_offset >= front.info.pcm_len {
            ring.slots.pop_front();
            self.out_space.notify_one();
        }
        Some((header, take))
    }

    /// Whether a completed out-frame is ready.
    pub fn out_ready(&self) -> bool {
        !self.out_ring.lock().expect("out-ring lock poisoned").slots.is_empty()
    }

    /// Drop all queued slots (reset/deinit).
    pub fn clear(&self) {
        self.in_ring.lock().expect("in-ring lock poisoned").slots.clear();
        self.in_flight.store(0, Ordering::Release);
        self.out_ring.lock().expect("out-ring lock poisoned").slots.clear();
        self.out_space.notify_one();
    }
}
