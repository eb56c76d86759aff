//! Shared test fixtures.
//!
//! [`StubCodec`] is a scriptable [`Codec`](crate::codec::Codec): tests
//! arrange a number of upcoming open/fill/decode failures and inspect the
//! calls afterwards through a cloneable [`StubHandle`]. Decoded output is
//! a deterministic pattern derived from the filled payload so PCM copies
//! can be asserted byte-for-byte.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::codec::Codec;
use crate::config::{ChannelMode, CodecProfile, PcmFormat};
use crate::sbm::SbmOperation;
use crate::{PacketHeader, PipelineError, Result, StreamInfo};

#[derive(Debug, Default)]
struct StubState {
    open: AtomicBool,
    opens: AtomicU32,
    closes: AtomicU32,
    fills: AtomicU32,
    decodes: AtomicU32,
    fail_opens: AtomicU32,
    fail_fills: AtomicU32,
    fail_decodes: AtomicU32,
    speed_changes: Mutex<Vec<SbmOperation>>,
    channel_changes: Mutex<Vec<ChannelMode>>,
}

impl StubState {
    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Scriptable codec for orchestrator tests.
#[derive(Debug)]
pub struct StubCodec {
    state: Arc<StubState>,
    stream_info: StreamInfo,
    frame_bytes: usize,
    mute: Option<Vec<u8>>,
    decode_delay: Option<std::time::Duration>,
    /// Last successfully filled payload, pending decode.
    filled: Option<Vec<u8>>,
}

impl StubCodec {
    pub fn new(profile: &CodecProfile, format: &PcmFormat) -> Self {
        Self {
            state: Arc::new(StubState::default()),
            stream_info: StreamInfo {
                sample_rate: format.sample_rate,
                channels: format.channels,
                frame_samples: profile.frame_samples,
            },
            frame_bytes: format.frame_bytes(profile),
            mute: None,
            decode_delay: None,
            filled: None,
        }
    }

    /// Fail the next `n` open calls.
    pub fn fail_opens(self, n: u32) -> Self {
        self.state.fail_opens.store(n, Ordering::Release);
        self
    }

    /// Fail the next `n` fill calls.
    pub fn fail_fills(self, n: u32) -> Self {
        self.state.fail_fills.store(n, Ordering::Release);
        self
    }

    /// Fail the next `n` decode calls.
    pub fn fail_decodes(self, n: u32) -> Self {
        self.state.fail_decodes.store(n, Ordering::Release);
        self
    }

    /// Advertise a codec-generated mute frame for concealment.
    pub fn with_mute_frame(mut self, mute: Vec<u8>) -> Self {
        self.mute = Some(mute);
        self
    }

    /// Sleep this long inside every decode call, simulating a co-processor
    /// that cannot keep up.
    pub fn decode_delay(mut self, delay: std::time::Duration) -> Self {
        self.decode_delay = Some(delay);
        self
    }

    /// Inspection handle that survives the codec moving into a backend.
    pub fn handle(&self) -> StubHandle {
        StubHandle { state: Arc::clone(&self.state) }
    }

    /// The deterministic PCM a decode of `payload` produces.
    pub fn expected_pcm(&self, payload: &[u8]) -> Vec<u8> {
        pattern(payload, self.frame_bytes)
    }
}

fn pattern(payload: &[u8], frame_bytes: usize) -> Vec<u8> {
    let seed = payload.first().copied().unwrap_or(0);
    (0..frame_bytes).map(|i| seed.wrapping_add(i as u8)).collect()
}

impl Codec for StubCodec {
    fn open(&mut self) -> Result<()> {
        if StubState::take_failure(&self.state.fail_opens) {
            return Err(PipelineError::codec("stub open failure"));
        }
        self.state.open.store(true, Ordering::Release);
        self.state.opens.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn close(&mut self) {
        self.state.open.store(false, Ordering::Release);
        self.state.closes.fetch_add(1, Ordering::AcqRel);
        self.filled = None;
    }

    fn is_open(&self) -> bool {
        self.state.open.load(Ordering::Acquire)
    }

    fn fill(&mut self, payload: &[u8], chunk_bytes: usize) -> Result<()> {
        self.state.fills.fetch_add(1, Ordering::AcqRel);
        if StubState::take_failure(&self.state.fail_fills) {
            return Err(PipelineError::codec("stub fill failure"));
        }
        if chunk_bytes < payload.len() {
            return Err(PipelineError::codec("fill chunk smaller than payload"));
        }
        self.filled = Some(payload.to_vec());
        Ok(())
    }

    fn decode(&mut self, out: &mut [u8]) -> Result<usize> {
        if let Some(delay) = self.decode_delay {
            std::thread::sleep(delay);
        }
        self.state.decodes.fetch_add(1, Ordering::AcqRel);
        if StubState::take_failure(&self.state.fail_decodes) {
            return Err(PipelineError::codec("stub decode failure"));
        }
        let payload = self
            .filled
            .take()
            .ok_or_else(|| PipelineError::codec("decode with empty bitstream"))?;
        if out.len() < self.frame_bytes {
            return Err(PipelineError::codec("output smaller than one frame"));
        }
        out[..self.frame_bytes].copy_from_slice(&pattern(&payload, self.frame_bytes));
        Ok(self.frame_bytes)
    }

    fn stream_info(&self) -> StreamInfo {
        self.stream_info
    }

    fn mute_frame(&self) -> Option<Vec<u8>> {
        self.mute.clone()
    }

    fn set_speed(&mut self, operation: SbmOperation) -> Result<()> {
        self.state
            .speed_changes
            .lock()
            .expect("stub lock poisoned")
            .push(operation);
        Ok(())
    }

    fn select_channel(&mut self, mode: ChannelMode) -> Result<()> {
        self.state
            .channel_changes
            .lock()
            .expect("stub lock poisoned")
            .push(mode);
        Ok(())
    }
}

/// Cloneable view into a [`StubCodec`]'s recorded calls.
#[derive(Debug, Clone)]
pub struct StubHandle {
    state: Arc<StubState>,
}

impl StubHandle {
    pub fn open_count(&self) -> u32 {
        self.state.opens.load(Ordering::Acquire)
    }

    /// Opens beyond the initial one, i.e. recovery reopens.
    pub fn reopen_count(&self) -> u32 {
        self.open_count().saturating_sub(1)
    }

    pub fn fill_count(&self) -> u32 {
        self.state.fills.load(Ordering::Acquire)
    }

    pub fn decode_count(&self) -> u32 {
        self.state.decodes.load(Ordering::Acquire)
    }

    pub fn speed_changes(&self) -> Vec<SbmOperation> {
        self.state.speed_changes.lock().expect("stub lock poisoned").clone()
    }

    pub fn channel_changes(&self) -> Vec<ChannelMode> {
        self.state.channel_changes.lock().expect("stub lock poisoned").clone()
    }
}

/// Header for test packets: sequence `seq`, timestamp in whole frames.
pub fn header_at(seq: u16, frame_samples: u32) -> PacketHeader {
    PacketHeader::new(seq, u32::from(seq).wrapping_mul(frame_samples))
}

/// Payload whose bytes identify the packet it came from.
pub fn payload_for(seq: u16, len: usize) -> Vec<u8> {
    vec![seq as u8; len]
}
