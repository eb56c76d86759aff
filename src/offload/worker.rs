//! Co-processor worker thread.
//!
//! Owns the codec handle for the offload backend. Each loop iteration
//! services one in-frame: apply any queued codec reset or channel change,
//! run the pre-decode speed hook, fill, decode, publish the PCM out-slot.
//! Decode failure reopens the codec; a decode failure on the heels of a
//! fill failure additionally retries the frame once under a forced-resync
//! sequence tag so the codec re-locks onto the bitstream.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::codec::{Codec, fill_chunk_size, reopen};
use crate::sbm::{SbmCheck, SbmOperation};
use crate::{PipelineError, Result};

use super::ring::{InSlot, OutFrameInfo, OutSlot};
use super::OffloadShared;

/// How long the worker parks waiting for an in-frame before rechecking
/// its cancellation token.
const TAKE_TIMEOUT: Duration = Duration::from_millis(5);

/// How long a finished out-slot may wait for ring space before the frame
/// is dropped.
const PUSH_TIMEOUT: Duration = Duration::from_millis(100);

/// Handle to the spawned worker thread.
#[derive(Debug)]
pub struct CpWorker {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl CpWorker {
    /// Spawn the worker. It opens the codec, marks the shared state ready,
    /// then services in-frames until cancelled.
    pub fn spawn(codec: Box<dyn Codec>, shared: Arc<OffloadShared>) -> Result<Self> {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = thread::Builder::new()
            .name("airsink-cp".into())
            .spawn(move || run(codec, shared, token))?;
        Ok(Self { cancel, handle: Some(handle) })
    }

    /// Stop the worker and wait for it to exit.
    pub fn shutdown(&mut self) -> Result<()> {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| PipelineError::codec("co-processor worker panicked"))?;
        }
        Ok(())
    }
}

impl Drop for CpWorker {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run(mut codec: Box<dyn Codec>, shared: Arc<OffloadShared>, cancel: CancellationToken) {
    if let Err(err) = codec.open() {
        // never marked ready; the main core's boot handshake times out
        warn!(%err, "worker codec open failed");
        return;
    }
    shared.mark_ready();
    debug!("co-processor worker ready");

    let mut state = WorkerState::default();
    while !cancel.is_cancelled() {
        if shared.take_codec_reset() {
            if let Err(err) = reopen(codec.as_mut()) {
                warn!(%err, "codec reset failed, will retry next frame");
                shared.request_codec_reset();
                thread::sleep(TAKE_TIMEOUT);
                continue;
            }
        }
        if let Some(mode) = shared.take_channel() {
            if let Err(err) = codec.select_channel(mode) {
                warn!(%err, ?mode, "channel selection rejected by codec");
            }
        }

        let Some(slot) = shared.rings.take_in(TAKE_TIMEOUT) else {
            continue;
        };

        // Pre-decode speed hook. Concealment frames are tagged and must
        // not consume a boundary request.
        if shared.sbm_enabled() && !slot.info.is_plc {
            match shared.sbm.check(slot.info.sequence_number) {
                SbmCheck::Apply(op) => {
                    if let Err(err) = codec.set_speed(op) {
                        warn!(%err, ?op, "speed change rejected by codec");
                    }
                    state.speed = op;
                }
                SbmCheck::Missed => {
                    // retrigger: decode this frame on the next iteration
                    // with the stale request already consumed
                    shared.rings.put_back_front(slot);
                    continue;
                }
                SbmCheck::NotYet => {
                    // a boundary adjustment is one-shot; frames outside
                    // the boundary run at normal speed
                    if state.speed != SbmOperation::Normal {
                        if let Err(err) = codec.set_speed(SbmOperation::Normal) {
                            warn!(%err, "speed restore rejected by codec");
                        }
                        state.speed = SbmOperation::Normal;
                    }
                }
            }
        }

        service_frame(codec.as_mut(), &shared, slot, &mut state);
        shared.rings.mark_serviced();
    }
    codec.close();
    debug!("co-processor worker stopped");
}

#[derive(Debug, Default)]
struct WorkerState {
    /// Set after a fill failure; armed state allows one forced-resync
    /// retry and is cleared by the next successful decode.
    need_refill: bool,
    /// Speed currently applied to the codec resampler.
    speed: SbmOperation,
    decoded_frames: u32,
    frame_idx: u32,
}

fn service_frame(
    codec: &mut dyn Codec,
    shared: &OffloadShared,
    slot: InSlot,
    state: &mut WorkerState,
) {
    let fill_result = fill_frame(codec, &slot.payload);
    let mut pcm = vec![0u8; shared.pcm_frame_bytes];
    let decode_result = codec.decode(&mut pcm);

    match decode_result {
        Ok(written) => {
            let stream_info = codec.stream_info();
            if !stream_info.is_valid_for(&shared.profile) {
                warn!(?stream_info, "stream parameters disagree with profile, reopening codec");
                if reopen(codec).is_err() {
                    shared.request_codec_reset();
                }
                return;
            }
            state.need_refill = false;
            publish(shared, slot.info, stream_info, pcm, written, state);
        }
        Err(err) => {
            warn!(%err, seq = slot.info.sequence_number, "decode failed, reopening codec");
            if let Err(reopen_err) = reopen(codec) {
                warn!(%reopen_err, "codec reopen failed");
                shared.request_codec_reset();
                return;
            }

            if fill_result.is_err() && !state.need_refill {
                state.need_refill = true;
                // forced resync: replay the payload once under the
                // sentinel sequence so the codec re-locks the bitstream
                let mut resync_info = slot.info;
                resync_info.sequence_number = u16::MAX;
                trace!(orig_seq = slot.info.sequence_number, "forced resync retry");

                if fill_frame(codec, &slot.payload).is_ok() {
                    let mut retry_pcm = vec![0u8; shared.pcm_frame_bytes];
                    if let Ok(written) = codec.decode(&mut retry_pcm) {
                        publish(shared, resync_info, codec.stream_info(), retry_pcm, written, state);
                        return;
                    }
                }
                warn!("forced resync retry failed, frame dropped");
            }
        }
    }
}

fn fill_frame(codec: &mut dyn Codec, payload: &[u8]) -> Result<()> {
    let chunk = fill_chunk_size(payload.len())?;
    codec.fill(payload, chunk)
}

fn publish(
    shared: &OffloadShared,
    info: super::ring::InFrameInfo,
    stream_info: crate::StreamInfo,
    pcm: Vec<u8>,
    written: usize,
    state: &mut WorkerState,
) {
    if let Err(err) = codec_stream_guard(shared, written) {
        warn!(%err, "decoded frame rejected");
        return;
    }
    state.decoded_frames = state.decoded_frames.wrapping_add(1);
    state.frame_idx = state.frame_idx.wrapping_add(1);

    let out = OutSlot {
        info: OutFrameInfo {
            in_info: info,
            stream_info,
            frame_samples: shared.profile.frame_samples,
            decoded_frames: state.decoded_frames,
            frame_idx: state.frame_idx,
            pcm_len: written,
            fetch_offset: 0,
        },
        pcm,
    };
    if !shared.rings.push_out(out, PUSH_TIMEOUT) {
        warn!(seq = info.sequence_number, "out ring stalled, decoded frame dropped");
    }
}

/// A decode that produced no bytes, or more than one frame, means the
/// codec lost sync with the negotiated stream parameters.
fn codec_stream_guard(shared: &OffloadShared, written: usize) -> Result<()> {
    if written == 0 || written > shared.pcm_frame_bytes {
        return Err(PipelineError::codec(format!(
            "decode produced {written} bytes for a {}-byte frame",
            shared.pcm_frame_bytes
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CodecProfile, PcmFormat};
    use crate::sbm::{SbmOperation, SbmRequest, SbmSlot};
    use crate::offload::InFrameInfo;
    use crate::test_utils::StubCodec;

    fn shared(profile: CodecProfile) -> Arc<OffloadShared> {
        Arc::new(OffloadShared::new(profile, PcmFormat::stereo_48k(), SbmSlot::new()).unwrap())
    }

    fn stub(shared: &OffloadShared) -> StubCodec {
        StubCodec::new(&shared.profile, &PcmFormat::stereo_48k())
    }

    fn in_info(seq: u16) -> InFrameInfo {
        InFrameInfo { sequence_number: seq, timestamp: u32::from(seq) * 1024, ..Default::default() }
    }

    fn fetch_blocking(shared: &OffloadShared, dst: &mut [u8]) -> Option<(OutFrameInfo, usize)> {
        for _ in 0..200 {
            if let Some(got) = shared.rings.fetch_pcm(dst) {
                return Some(got);
            }
            thread::sleep(Duration::from_millis(2));
        }
        None
    }

    #[test]
    fn worker_decodes_queued_frames_in_order() {
        let shared = shared(CodecProfile::aac_lc());
        let codec = stub(&shared);
        let mut worker = CpWorker::spawn(Box::new(codec), Arc::clone(&shared)).unwrap();
        shared.wait_ready(Duration::from_secs(1)).unwrap();

        shared.rings.try_put_in(in_info(7), vec![1; 64]).unwrap();
        shared.rings.try_put_in(in_info(8), vec![2; 64]).unwrap();

        let mut dst = vec![0u8; shared.pcm_frame_bytes];
        let (first, n) = fetch_blocking(&shared, &mut dst).unwrap();
        assert_eq!(first.in_info.sequence_number, 7);
        assert_eq!(n, shared.pcm_frame_bytes);
        assert_eq!(first.decoded_frames, 1);

        let (second, _) = fetch_blocking(&shared, &mut dst).unwrap();
        assert_eq!(second.in_info.sequence_number, 8);
        assert_eq!(second.decoded_frames, 2);

        worker.shutdown().unwrap();
    }

    #[test]
    fn decode_failure_reopens_and_later_frames_still_flow() {
        let shared = shared(CodecProfile::aac_lc());
        let codec = stub(&shared).fail_decodes(1);
        let handle = codec.handle();
        let mut worker = CpWorker::spawn(Box::new(codec), Arc::clone(&shared)).unwrap();
        shared.wait_ready(Duration::from_secs(1)).unwrap();

        shared.rings.try_put_in(in_info(1), vec![1; 64]).unwrap();
        shared.rings.try_put_in(in_info(2), vec![2; 64]).unwrap();

        let mut dst = vec![0u8; shared.pcm_frame_bytes];
        let (out, _) = fetch_blocking(&shared, &mut dst).unwrap();
        // frame 1 was dropped after the failed decode; frame 2 made it
        assert_eq!(out.in_info.sequence_number, 2);
        assert!(handle.reopen_count() >= 1);

        worker.shutdown().unwrap();
    }

    #[test]
    fn fill_then_decode_failure_retries_under_resync_sequence() {
        let shared = shared(CodecProfile::aac_lc());
        let codec = stub(&shared).fail_fills(1).fail_decodes(1);
        let mut worker = CpWorker::spawn(Box::new(codec), Arc::clone(&shared)).unwrap();
        shared.wait_ready(Duration::from_secs(1)).unwrap();

        shared.rings.try_put_in(in_info(42), vec![3; 64]).unwrap();

        let mut dst = vec![0u8; shared.pcm_frame_bytes];
        let (out, _) = fetch_blocking(&shared, &mut dst).unwrap();
        assert_eq!(out.in_info.sequence_number, u16::MAX, "retry carries the resync tag");
        assert_eq!(out.in_info.timestamp, 42 * 1024, "timestamp survives the retag");

        worker.shutdown().unwrap();
    }

    #[test]
    fn speed_request_applies_exactly_at_its_boundary() {
        let shared = shared(CodecProfile::scalable());
        let codec = stub(&shared);
        let handle = codec.handle();
        let mut worker = CpWorker::spawn(Box::new(codec), Arc::clone(&shared)).unwrap();
        shared.wait_ready(Duration::from_secs(1)).unwrap();

        shared.sbm.push(SbmRequest {
            is_to_process: true,
            operation: SbmOperation::Faster,
            chunk_offset: 0,
            sequence_to_apply: 11,
            is_sequence_rollback: false,
        });

        shared.rings.try_put_in(in_info(10), vec![1; 64]).unwrap();
        shared.rings.try_put_in(in_info(11), vec![2; 64]).unwrap();

        let mut dst = vec![0u8; shared.pcm_frame_bytes];
        fetch_blocking(&shared, &mut dst).unwrap();
        fetch_blocking(&shared, &mut dst).unwrap();
        // frame 10 is ahead of the boundary, frame 11 is the boundary
        assert_eq!(handle.speed_changes(), vec![SbmOperation::Faster]);

        worker.shutdown().unwrap();
    }

    #[test]
    fn normal_speed_returns_on_the_frame_after_the_boundary() {
        let shared = shared(CodecProfile::scalable());
        let codec = stub(&shared);
        let handle = codec.handle();
        let mut worker = CpWorker::spawn(Box::new(codec), Arc::clone(&shared)).unwrap();
        shared.wait_ready(Duration::from_secs(1)).unwrap();

        shared.sbm.push(SbmRequest {
            is_to_process: true,
            operation: SbmOperation::Faster,
            chunk_offset: 0,
            sequence_to_apply: 10,
            is_sequence_rollback: false,
        });

        for seq in 10u16..=12 {
            shared.rings.try_put_in(in_info(seq), vec![seq as u8; 64]).unwrap();
        }

        let mut dst = vec![0u8; shared.pcm_frame_bytes];
        for _ in 0..3 {
            fetch_blocking(&shared, &mut dst).unwrap();
        }
        // the adjustment is one-shot: frame 11 undoes it, frame 12 sees
        // normal speed already in effect
        assert_eq!(
            handle.speed_changes(),
            vec![SbmOperation::Faster, SbmOperation::Normal]
        );

        worker.shutdown().unwrap();
    }

    #[test]
    fn boot_handshake_fails_when_codec_cannot_open() {
        let shared = shared(CodecProfile::aac_lc());
        let codec = stub(&shared).fail_opens(u32::MAX);
        let mut worker = CpWorker::spawn(Box::new(codec), Arc::clone(&shared)).unwrap();

        let err = shared.wait_ready(Duration::from_millis(30)).unwrap_err();
        assert!(matches!(err, PipelineError::Timeout { .. }));
        worker.shutdown().unwrap();
    }
}
