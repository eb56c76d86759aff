//! Encoded frame types flowing through the pipeline.

use serde::{Deserialize, Serialize};

/// Sentinel sequence number tagging a synthesized concealment frame.
pub const PLC_SEQUENCE: u16 = 0xFFFF;

/// Sentinel timestamp tagging a synthesized concealment frame.
pub const PLC_TIMESTAMP: u32 = 0xFFFF_FFFF;

/// Demultiplexed A2DP media-packet header.
///
/// The transport layer hands this in alongside the codec payload; the
/// pipeline never parses RTP itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PacketHeader {
    pub sequence_number: u16,
    pub timestamp: u32,
}

impl PacketHeader {
    pub fn new(sequence_number: u16, timestamp: u32) -> Self {
        Self { sequence_number, timestamp }
    }

    /// Header used for synthesized concealment frames.
    pub fn plc() -> Self {
        Self { sequence_number: PLC_SEQUENCE, timestamp: PLC_TIMESTAMP }
    }

    /// Whether this header carries the concealment sentinel.
    pub fn is_plc(&self) -> bool {
        self.sequence_number == PLC_SEQUENCE && self.timestamp == PLC_TIMESTAMP
    }
}

/// One encoded audio frame, owned by exactly one stage at a time:
/// the queue until dequeue, then the orchestrator until decode completes,
/// then released back to the frame pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    pub header: PacketHeader,
    pub payload: Vec<u8>,
}

impl EncodedFrame {
    pub fn new(header: PacketHeader, payload: Vec<u8>) -> Self {
        Self { header, payload }
    }

    /// Wrapping byte-sum checksum recorded for hand-off diagnostics.
    pub fn checksum(&self) -> u32 {
        self.payload.iter().fold(0u32, |acc, &b| acc.wrapping_add(u32::from(b)))
    }

    pub fn is_plc(&self) -> bool {
        self.header.is_plc()
    }
}

/// Snapshot of a queued frame's position, returned to the session-sync
/// collaborator. Zeroed when the queue is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FrameInfo {
    pub sequence_number: u16,
    pub timestamp: u32,
}

/// Forward wrap-around distance between two sequence numbers (mod 2^16).
///
/// `seq_distance(65534, 1) == 3`: the stream wrapped through 65535 and 0.
pub fn seq_distance(from: u16, to: u16) -> u16 {
    to.wrapping_sub(from)
}

/// Forward wrap-around distance between two timestamps (mod 2^32).
pub fn ts_distance(from: u32, to: u32) -> u32 {
    to.wrapping_sub(from)
}
