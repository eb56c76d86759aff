//! Driver spawns and manages the decode task.
//!
//! The driver owns a [`Decoder`] and a [`PacketSource`] inside one tokio
//! task: stored packets arrive whenever the source yields them, and a
//! pacing interval derived from the source's packet rate pulls one PCM
//! frame per tick. Decoded blocks fan out through a watch channel with
//! latest-wins semantics; render sinks that must not drop blocks should
//! wrap the receiver in [`PcmStream`](crate::stream::PcmStream).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::decoder::Decoder;
use crate::types::{LastFrameInfo, PacketHeader};
use crate::{PipelineError, Result};

/// Trait for encoded-packet sources.
///
/// Sources abstract over different transports (live A2DP link, file
/// replay, loopback tests) and handle their own timing internally.
///
/// `next_packet` must be cancel-safe: the driver races it against its
/// pacing tick and shutdown token, and may drop and re-create the future
/// between packets.
#[async_trait::async_trait]
pub trait PacketSource: Send + 'static {
    /// Get the next media packet.
    ///
    /// Returns:
    /// - `Ok(Some((header, payload)))` - new packet available
    /// - `Ok(None)` - stream ended (normal termination)
    /// - `Err(e)` - transport error
    async fn next_packet(&mut self) -> Result<Option<(PacketHeader, Vec<u8>)>>;

    /// Native packet rate in packets per second; drives the decode cadence.
    fn packet_rate(&self) -> f64;
}

/// One decoded PCM frame plus the bookkeeping snapshot taken right after
/// its decode cycle.
#[derive(Debug, Clone)]
pub struct PcmBlock {
    pub pcm: Vec<u8>,
    pub frame: LastFrameInfo,
}

/// Result of spawning the decode driver.
pub struct DriverChannels {
    /// Receiver for decoded PCM blocks.
    pub pcm: watch::Receiver<Option<Arc<PcmBlock>>>,
    /// Cancellation token for graceful shutdown.
    pub cancel: CancellationToken,
}

/// Spawns and manages the decode task.
pub struct DecodeDriver;

impl DecodeDriver {
    /// Spawn the decode task for the given source and decoder.
    ///
    /// Returns a watch receiver for PCM blocks plus a cancellation token
    /// for graceful shutdown.
    pub fn spawn<S>(source: S, decoder: Decoder) -> DriverChannels
    where
        S: PacketSource,
    {
        let (pcm_tx, pcm_rx) = watch::channel(None);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            Self::decode_task(source, decoder, pcm_tx, task_cancel).await;
        });

        DriverChannels { pcm: pcm_rx, cancel }
    }

    async fn decode_task<S>(
        mut source: S,
        mut decoder: Decoder,
        pcm_tx: watch::Sender<Option<Arc<PcmBlock>>>,
        cancel: CancellationToken,
    ) where
        S: PacketSource,
    {
        const MAX_ERRORS: u32 = 10;

        let period = Duration::from_secs_f64(1.0 / source.packet_rate().max(1.0));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut out = vec![0u8; decoder.output_frame_bytes()];
        let mut decoded = 0u64;
        let mut error_count = 0u32;
        let mut source_done = false;

        info!(?period, "decode task started");
        loop {
            if source_done {
                // queue drain: keep the decode cadence until underflow
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("decode task cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        match Self::decode_once(&mut decoder, &mut out, &pcm_tx, &mut decoded) {
                            DecodeStep::Continue => {}
                            DecodeStep::Underflow => {
                                info!(decoded, "queue drained after source end");
                                let _ = pcm_tx.send(None);
                                break;
                            }
                            DecodeStep::Stop => break,
                        }
                    }
                }
                continue;
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("decode task cancelled");
                    break;
                }
                packet = source.next_packet() => match packet {
                    Ok(Some((header, payload))) => {
                        error_count = 0;
                        trace!(seq = header.sequence_number, len = payload.len(), "packet stored");
                        if let Err(err) = decoder.store_packet(header, &payload) {
                            // boundary rejection drops this packet only
                            warn!(%err, seq = header.sequence_number, "packet rejected");
                        }
                    }
                    Ok(None) => {
                        info!("source stream ended, draining queue");
                        source_done = true;
                    }
                    Err(err) => {
                        error_count += 1;
                        error!("source error ({error_count}/{MAX_ERRORS}): {err}");
                        if error_count >= MAX_ERRORS {
                            error!("too many source errors, shutting down");
                            let _ = pcm_tx.send(None);
                            break;
                        }
                        // Exponential backoff: 50ms, 100ms, 200ms, ...
                        let backoff = Duration::from_millis(50 * (1 << error_count.min(5)));
                        tokio::time::sleep(backoff).await;
                    }
                },
                _ = ticker.tick() => {
                    match Self::decode_once(&mut decoder, &mut out, &pcm_tx, &mut decoded) {
                        // underflow while the source is live just means
                        // the next packet has not arrived yet
                        DecodeStep::Continue | DecodeStep::Underflow => {}
                        DecodeStep::Stop => break,
                    }
                }
            }
        }

        if let Err(err) = decoder.deinit() {
            warn!(%err, "decoder teardown reported an error");
        }
        info!(decoded, "decode task ended");
    }

    fn decode_once(
        decoder: &mut Decoder,
        out: &mut [u8],
        pcm_tx: &watch::Sender<Option<Arc<PcmBlock>>>,
        decoded: &mut u64,
    ) -> DecodeStep {
        match decoder.decode_frame(out) {
            Ok(0) => DecodeStep::Continue,
            Ok(written) => {
                *decoded += 1;
                let block =
                    PcmBlock { pcm: out[..written].to_vec(), frame: decoder.last_frame_info() };
                if pcm_tx.send(Some(Arc::new(block))).is_err() {
                    debug!("pcm receiver dropped, shutting down");
                    return DecodeStep::Stop;
                }
                DecodeStep::Continue
            }
            Err(PipelineError::CacheUnderflow) => DecodeStep::Underflow,
            Err(err) if err.is_retryable() => {
                trace!(%err, "decode cycle skipped");
                DecodeStep::Continue
            }
            Err(err) => {
                error!(%err, "unrecoverable decode error, shutting down");
                let _ = pcm_tx.send(None);
                DecodeStep::Stop
            }
        }
    }
}

enum DecodeStep {
    Continue,
    Underflow,
    Stop,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CodecProfile, PcmFormat};
    use crate::test_utils::{StubCodec, header_at, payload_for};

    /// Replays a scripted packet list at a fixed cadence.
    struct ScriptedSource {
        packets: std::vec::IntoIter<(PacketHeader, Vec<u8>)>,
        gap: Duration,
    }

    impl ScriptedSource {
        fn new(count: u16, profile: &CodecProfile) -> Self {
            let packets: Vec<_> = (1..=count)
                .map(|seq| (header_at(seq, profile.frame_samples), payload_for(seq, 64)))
                .collect();
            Self { packets: packets.into_iter(), gap: Duration::from_millis(2) }
        }
    }

    #[async_trait::async_trait]
    impl PacketSource for ScriptedSource {
        async fn next_packet(&mut self) -> Result<Option<(PacketHeader, Vec<u8>)>> {
            tokio::time::sleep(self.gap).await;
            Ok(self.packets.next())
        }

        fn packet_rate(&self) -> f64 {
            200.0
        }
    }

    fn decoder(profile: CodecProfile) -> Decoder {
        let format = PcmFormat::stereo_48k();
        let codec = StubCodec::new(&profile, &format);
        Decoder::direct(profile, format, Box::new(codec)).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn driver_decodes_scripted_packets_to_pcm() {
        let profile = CodecProfile::scalable();
        let source = ScriptedSource::new(6, &profile);
        let mut channels = DecodeDriver::spawn(source, decoder(profile));

        let mut seen = 0u32;
        while channels.pcm.changed().await.is_ok() {
            let Some(block) = channels.pcm.borrow_and_update().clone() else {
                break;
            };
            assert_eq!(block.pcm.len(), 3840);
            assert!(block.frame.decoded_frames > 0);
            seen += 1;
            if seen >= 4 {
                break;
            }
        }
        assert!(seen >= 4, "expected a stream of decoded blocks, saw {seen}");
        channels.cancel.cancel();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn driver_ends_the_channel_when_the_source_ends() {
        let profile = CodecProfile::scalable();
        let source = ScriptedSource::new(2, &profile);
        let mut channels = DecodeDriver::spawn(source, decoder(profile));

        // drain until the terminal None
        loop {
            if channels.pcm.changed().await.is_err() {
                break;
            }
            if channels.pcm.borrow_and_update().is_none() {
                break;
            }
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancellation_stops_the_task() {
        let profile = CodecProfile::scalable();
        let source = ScriptedSource::new(u16::MAX, &profile);
        let channels = DecodeDriver::spawn(source, decoder(profile));

        channels.cancel.cancel();
        // the task winds down without the test hanging
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(channels.cancel.is_cancelled());
    }
}
