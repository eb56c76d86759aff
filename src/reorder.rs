//! Transport-fragment coalescing for the AAC path.
//!
//! Some transports split one logical AAC access unit across two
//! consecutive link-layer packets. At most one in-progress frame is held
//! back until the next packet reveals whether it was complete.

use tracing::trace;

use crate::PacketHeader;

/// Heuristic: a packet whose leading two bytes equal the in-progress
/// frame's leading two bytes starts a new logical frame (ADTS/LATM sync
/// pattern repeats at frame boundaries); differing bytes mark it as the
/// continuation of the held frame.
///
/// This is inherited, unsynchronized behavior: it can misclassify on
/// payloads that happen to repeat their first two bytes. It is kept
/// behind this function as documented behavior, not silently corrected;
/// replacing it means swapping this predicate for a real header parser.
pub fn is_likely_new_frame(held: &[u8], incoming: &[u8]) -> bool {
    held.len() >= 2 && incoming.len() >= 2 && held[..2] == incoming[..2]
}

/// At most one not-yet-complete logical frame.
#[derive(Debug, Default)]
pub struct Coalescer {
    pending: Option<(PacketHeader, Vec<u8>)>,
    readbuf_size: usize,
}

impl Coalescer {
    pub fn new(readbuf_size: usize) -> Self {
        Self { pending: None, readbuf_size }
    }

    /// Feed one transport packet; returns a completed logical frame when
    /// one flushes out.
    pub fn push(&mut self, header: PacketHeader, payload: &[u8]) -> Option<(PacketHeader, Vec<u8>)> {
        match self.pending.take() {
            None => {
                let mut buf = Vec::with_capacity(self.readbuf_size.min(payload.len()));
                buf.extend_from_slice(&payload[..payload.len().min(self.readbuf_size)]);
                self.pending = Some((header, buf));
                None
            }
            Some((held_header, mut held)) => {
                if is_likely_new_frame(&held, payload) {
                    // held frame was complete; current packet opens a new one
                    let mut buf = Vec::with_capacity(self.readbuf_size.min(payload.len()));
                    buf.extend_from_slice(&payload[..payload.len().min(self.readbuf_size)]);
                    self.pending = Some((header, buf));
                    Some((held_header, held))
                } else {
                    // continuation: splice onto the held frame, bounded by
                    // the read buffer, then flush the combined frame
                    let room = self.readbuf_size.saturating_sub(held.len());
                    if payload.len() > room {
                        trace!(
                            held = held.len(),
                            incoming = payload.len(),
                            readbuf = self.readbuf_size,
                            "continuation overflows read buffer, truncating"
                        );
                    }
                    held.extend_from_slice(&payload[..payload.len().min(room)]);
                    Some((held_header, held))
                }
            }
        }
    }

    /// Header of the in-progress frame, for sync-scan fallback.
    pub fn pending_header(&self) -> Option<PacketHeader> {
        self.pending.as_ref().map(|(h, _)| *h)
    }

    /// Drop the in-progress frame (truncate-to-zero and deinit paths).
    pub fn clear(&mut self) {
        if self.pending.take().is_some() {
            trace!("discarded in-progress reorder frame");
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}
