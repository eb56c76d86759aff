//! Fixed-capacity ownership arena for encoded payloads.
//!
//! Every [`EncodedFrame`](crate::EncodedFrame) that enters the queue is
//! charged against this pool and credited back once decode (or discard)
//! releases it. The pool is an accounting arena: it bounds how many frames
//! can be in flight and tracks the high-water mark reported at deinit, it
//! does not recycle the heap buffers themselves.

use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::{EncodedFrame, PacketHeader, PipelineError, Result};

#[derive(Debug, Default)]
struct PoolState {
    in_use: usize,
    high_water: usize,
}

/// Cloneable handle to the frame pool.
#[derive(Debug, Clone)]
pub struct FramePool {
    capacity: usize,
    state: Arc<Mutex<PoolState>>,
}

impl FramePool {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, state: Arc::new(Mutex::new(PoolState::default())) }
    }

    /// Charge one frame against the pool and build it.
    ///
    /// Returns `Memory` when the pool is exhausted; the payload is dropped,
    /// matching the boundary-rejection policy of the queue.
    pub fn alloc(&self, header: PacketHeader, payload: Vec<u8>) -> Result<EncodedFrame> {
        let mut state = self.state.lock().expect("pool lock poisoned");
        if state.in_use >= self.capacity {
            warn!(in_use = state.in_use, capacity = self.capacity, "frame pool exhausted");
            return Err(PipelineError::memory(format!(
                "frame pool exhausted ({} of {} in use)",
                state.in_use, self.capacity
            )));
        }
        state.in_use += 1;
        state.high_water = state.high_water.max(state.in_use);
        Ok(EncodedFrame::new(header, payload))
    }

    /// Credit one frame back to the pool.
    pub fn release(&self, frame: EncodedFrame) {
        drop(frame);
        let mut state = self.state.lock().expect("pool lock poisoned");
        state.in_use = state.in_use.saturating_sub(1);
    }

    /// Frames currently charged.
    pub fn in_use(&self) -> usize {
        self.state.lock().expect("pool lock poisoned").in_use
    }

    /// Peak simultaneous usage since construction, for deinit diagnostics.
    pub fn high_water(&self) -> usize {
        self.state.lock().expect("pool lock poisoned").high_water
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
