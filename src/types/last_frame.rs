//! Last-decoded-frame bookkeeping shared with the session-sync layer.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use super::StreamInfo;

/// State of the most recent decode attempt.
///
/// Written by the decode orchestrator after every cycle, read by an
/// external sync-query collaborator. The original implementation relied on
/// single-writer visibility with no lock; here the struct always lives
/// behind [`SharedLastFrame`] so readers get a consistent snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LastFrameInfo {
    pub sequence_number: u16,
    pub timestamp: u32,
    pub cur_sub_sequence: u16,
    pub total_sub_sequence: u16,
    pub frame_samples: u32,
    pub list_samples: u32,
    pub decoded_frames: u32,
    pub undecoded_frames: u32,
    pub checksum: u32,
    pub stream_info: StreamInfo,
}

impl LastFrameInfo {
    /// Record one completed decode cycle. `undecoded` is the queue length
    /// remaining after this frame is consumed.
    pub fn record_cycle(
        &mut self,
        sequence_number: u16,
        timestamp: u32,
        frame_samples: u32,
        undecoded: u32,
        checksum: u32,
        stream_info: StreamInfo,
    ) {
        self.sequence_number = sequence_number;
        self.timestamp = timestamp;
        self.frame_samples = frame_samples;
        self.decoded_frames = self.decoded_frames.wrapping_add(1);
        self.undecoded_frames = undecoded;
        self.checksum = checksum;
        self.stream_info = stream_info;
    }

    /// Cache underflow: only the undecoded count and checksum are zeroed;
    /// sequence/timestamp keep their last decoded values.
    pub fn mark_underflow(&mut self) {
        self.undecoded_frames = 0;
        self.checksum = 0;
    }
}

/// Mutex-guarded handle to [`LastFrameInfo`], cloneable across the
/// orchestrator, the co-processor worker and sync queries.
#[derive(Debug, Clone, Default)]
pub struct SharedLastFrame {
    inner: Arc<Mutex<LastFrameInfo>>,
}

impl SharedLastFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consistent copy of the current state.
    pub fn snapshot(&self) -> LastFrameInfo {
        *self.inner.lock().expect("last-frame lock poisoned")
    }

    /// Run `f` against the state under the lock.
    pub fn update<R>(&self, f: impl FnOnce(&mut LastFrameInfo) -> R) -> R {
        f(&mut self.inner.lock().expect("last-frame lock poisoned"))
    }

    /// Reset to defaults at the start of a new logical unit.
    pub fn reset(&self) {
        *self.inner.lock().expect("last-frame lock poisoned") = LastFrameInfo::default();
    }
}
