//! Synchronization targets for queue alignment across a stereo link.

use serde::{Deserialize, Serialize};

use super::PacketHeader;

/// Which header fields a sync scan compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMask {
    Sequence,
    Timestamp,
    Both,
}

/// Position the session-sync collaborator wants the queue aligned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncTarget {
    pub sequence_number: u16,
    pub timestamp: u32,
}

impl SyncTarget {
    pub fn new(sequence_number: u16, timestamp: u32) -> Self {
        Self { sequence_number, timestamp }
    }

    /// Whether `header` matches this target under `mask`.
    pub fn matches(&self, header: &PacketHeader, mask: SyncMask) -> bool {
        let seq_ok = header.sequence_number == self.sequence_number;
        let ts_ok = header.timestamp == self.timestamp;
        match mask {
            SyncMask::Sequence => seq_ok,
            SyncMask::Timestamp => ts_ok,
            SyncMask::Both => seq_ok && ts_ok,
        }
    }
}
