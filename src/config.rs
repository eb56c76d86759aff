//! Runtime codec profiles and PCM output configuration.
//!
//! The original implementation baked the per-codec sizing constants (MTU
//! limiter, read-buffer size, frame sample count, decode delay, pool size)
//! into the build. Here they are plain runtime data: construct one of the
//! built-in profiles, deserialize one from YAML, or build a custom one and
//! run it through [`CodecProfile::validate`].

use serde::{Deserialize, Serialize};

use crate::{PipelineError, Result};

/// Codec family handled by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodecKind {
    /// AAC-LC over A2DP, two-fragment transport coalescing enabled.
    AacLc,
    /// Proprietary "Scalable" codec with SBM speed adaptation.
    Scalable,
}

/// Output channel routing, forwarded to the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChannelMode {
    #[default]
    Stereo,
    LeftOnly,
    RightOnly,
    Mixed,
}

/// Per-codec sizing profile.
///
/// Invariants checked by [`validate`](Self::validate): every count is
/// non-zero and `pool_frames >= mtu_limit` (the queue alone must never be
/// able to exhaust the pool).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecProfile {
    pub kind: CodecKind,
    /// Maximum number of undecoded packets retained in the raw queue.
    pub mtu_limit: usize,
    /// Upper bound on one encoded payload in bytes.
    pub readbuf_size: usize,
    /// Fixed output-frame sample count per channel.
    pub frame_samples: u32,
    /// Co-processor decode delay class, in frames of lookahead.
    pub decode_delay: u32,
    /// Frame pool capacity, in frames.
    pub pool_frames: usize,
}

impl CodecProfile {
    /// Profile for AAC-LC sinks.
    pub fn aac_lc() -> Self {
        Self {
            kind: CodecKind::AacLc,
            mtu_limit: 25,
            readbuf_size: 900,
            frame_samples: 1024,
            decode_delay: 1,
            pool_frames: 32,
        }
    }

    /// Profile for the Scalable codec.
    pub fn scalable() -> Self {
        Self {
            kind: CodecKind::Scalable,
            mtu_limit: 20,
            readbuf_size: 640,
            frame_samples: 960,
            decode_delay: 2,
            pool_frames: 28,
        }
    }

    /// Timestamp units advanced by one packet. A2DP media timestamps run
    /// in sample ticks, so one packet spans one frame of samples.
    pub fn ts_units_per_packet(&self) -> u32 {
        self.frame_samples
    }

    /// Whether the transport may split one logical frame across packets.
    pub fn needs_coalescing(&self) -> bool {
        self.kind == CodecKind::AacLc
    }

    /// Check profile invariants.
    pub fn validate(&self) -> Result<()> {
        if self.mtu_limit == 0 || self.readbuf_size == 0 || self.frame_samples == 0 {
            return Err(PipelineError::config("codec profile contains a zero sizing field"));
        }
        if self.pool_frames < self.mtu_limit {
            return Err(PipelineError::config(format!(
                "pool_frames {} below mtu_limit {}",
                self.pool_frames, self.mtu_limit
            )));
        }
        Ok(())
    }

    /// Load a profile from YAML, then validate it.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let profile: CodecProfile = serde_yaml_ng::from_str(yaml)
            .map_err(|e| PipelineError::config(format!("profile parse failed: {e}")))?;
        profile.validate()?;
        Ok(profile)
    }
}

/// PCM output format negotiated at `init` time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    /// Render-side DMA buffer length in samples per channel; drives the
    /// offload ring sizing.
    pub dma_buffer_samples: u32,
}

impl PcmFormat {
    /// 48kHz stereo s16, one typical A2DP sink configuration.
    pub fn stereo_48k() -> Self {
        Self { sample_rate: 48_000, channels: 2, bits_per_sample: 16, dma_buffer_samples: 4096 }
    }

    /// Bytes occupied by one interleaved sample across all channels.
    pub fn bytes_per_sample(&self) -> usize {
        usize::from(self.channels) * usize::from(self.bits_per_sample / 8)
    }

    /// Bytes of one decoded PCM frame for the given profile.
    pub fn frame_bytes(&self, profile: &CodecProfile) -> usize {
        profile.frame_samples as usize * self.bytes_per_sample()
    }

    /// Check format invariants.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 || self.channels == 0 || self.dma_buffer_samples == 0 {
            return Err(PipelineError::config("pcm format contains a zero field"));
        }
        if self.bits_per_sample % 8 != 0 || self.bits_per_sample == 0 {
            return Err(PipelineError::config(format!(
                "unsupported bit depth {}",
                self.bits_per_sample
            )));
        }
        Ok(())
    }
}
