//! Stream parameters reported by the codec after a decode.

use serde::{Deserialize, Serialize};

use crate::config::CodecProfile;

/// Decoded-stream parameters as the codec library reports them.
///
/// Validated after every decode: a zero sample rate or a frame size that
/// disagrees with the profile's fixed output-frame sample count is treated
/// as a fatal-this-cycle decode error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StreamInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_samples: u32,
}

impl StreamInfo {
    /// Whether the reported parameters are coherent for this profile.
    pub fn is_valid_for(&self, profile: &CodecProfile) -> bool {
        self.sample_rate > 0 && self.frame_samples == profile.frame_samples
    }
}
