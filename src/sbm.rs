//! Playback-speed micro adjustment (SBM) for the Scalable codec.
//!
//! A latency tuner watches how many chunks arrive per observation window
//! against the expected target and, after a debounced run of observations
//! leaning the same way, queues a one-shot speed change tagged with the
//! future sequence number at which both link endpoints agree to apply it.
//! The change must land exactly at that packet boundary: applying it the
//! moment the tuner decides would produce an audible discontinuity on one
//! earbud before the other.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Consecutive same-direction observations required before a request.
pub const SAME_STATUS_CHANCE: u32 = 3;

/// Speed adjustment direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SbmOperation {
    #[default]
    Normal,
    Faster,
    Slower,
}

/// One-shot speed-change request, armed by the tuner and consumed by the
/// per-frame pre-decode hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SbmRequest {
    pub is_to_process: bool,
    pub operation: SbmOperation,
    pub chunk_offset: u8,
    pub sequence_to_apply: u16,
    /// The tagged sequence sits past the u16 wrap from where it was armed.
    pub is_sequence_rollback: bool,
}

/// Outcome of the pre-decode hook for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SbmCheck {
    /// No request armed, or the boundary is still ahead: normal speed.
    NotYet,
    /// This frame is the agreed boundary: apply the operation now.
    Apply(SbmOperation),
    /// The boundary passed without matching; the caller should retrigger
    /// this cycle rather than decode with stale speed state.
    Missed,
}

/// Lock-protected request mailbox shared between the tuning controller
/// and the hot decode path.
///
/// The original implementation guarded this with an interrupt lock; a
/// short mutex preserves the same exclusivity on a hosted target.
#[derive(Debug, Clone, Default)]
pub struct SbmSlot {
    inner: Arc<Mutex<SbmRequest>>,
}

impl SbmSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or overwrite) the pending request.
    pub fn push(&self, request: SbmRequest) {
        let mut slot = self.inner.lock().expect("sbm lock poisoned");
        debug!(
            op = ?request.operation,
            apply_at = request.sequence_to_apply,
            rollback = request.is_sequence_rollback,
            "speed change armed"
        );
        *slot = request;
    }

    /// Pre-decode hook: classify `current_seq` against the armed request.
    /// Consumes the request on `Apply` and `Missed`.
    pub fn check(&self, current_seq: u16) -> SbmCheck {
        let mut slot = self.inner.lock().expect("sbm lock poisoned");
        if !slot.is_to_process {
            return SbmCheck::NotYet;
        }

        let target = slot.sequence_to_apply;
        if current_seq == target {
            let op = slot.operation;
            *slot = SbmRequest::default();
            return SbmCheck::Apply(op);
        }

        // A rollback request counts the whole pre-wrap region (counter
        // far above the target) as "still ahead"; once the counter wraps,
        // plain ordering applies. Without rollback, plain ordering.
        let still_ahead = if slot.is_sequence_rollback {
            current_seq.wrapping_sub(target) > u16::MAX / 2 || current_seq < target
        } else {
            current_seq < target
        };

        if still_ahead {
            trace!(current_seq, target, "speed boundary still ahead");
            SbmCheck::NotYet
        } else {
            debug!(current_seq, target, "speed boundary missed");
            *slot = SbmRequest::default();
            SbmCheck::Missed
        }
    }

    /// Snapshot for diagnostics/tests.
    pub fn peek(&self) -> SbmRequest {
        *self.inner.lock().expect("sbm lock poisoned")
    }
}

/// Debounced latency controller comparing observed average chunk arrivals
/// against the expected target.
#[derive(Debug)]
pub struct SpeedTuner {
    expected_chunks: f64,
    threshold: f64,
    /// Packets of lead time between arming and the apply boundary.
    apply_lead: u16,
    streak_direction: SbmOperation,
    streak: u32,
    slot: SbmSlot,
}

impl SpeedTuner {
    pub fn new(expected_chunks: f64, threshold: f64, apply_lead: u16, slot: SbmSlot) -> Self {
        Self {
            expected_chunks,
            threshold,
            apply_lead,
            streak_direction: SbmOperation::Normal,
            streak: 0,
            slot,
        }
    }

    /// Feed one observation window. Arms a request once the same
    /// out-of-band direction persists [`SAME_STATUS_CHANCE`] times running.
    pub fn observe(&mut self, observed_chunks: f64, current_seq: u16) {
        let gap = observed_chunks - self.expected_chunks;
        let direction = if gap > self.threshold {
            // buffer running long: play faster to drain it
            SbmOperation::Faster
        } else if gap < -self.threshold {
            SbmOperation::Slower
        } else {
            SbmOperation::Normal
        };

        if direction == SbmOperation::Normal || direction != self.streak_direction {
            self.streak_direction = direction;
            self.streak = u32::from(direction != SbmOperation::Normal);
            return;
        }

        self.streak += 1;
        if self.streak < SAME_STATUS_CHANCE {
            return;
        }
        self.streak = 0;
        self.streak_direction = SbmOperation::Normal;

        let sequence_to_apply = current_seq.wrapping_add(self.apply_lead);
        self.slot.push(SbmRequest {
            is_to_process: true,
            operation: direction,
            chunk_offset: (gap.abs().min(f64::from(u8::MAX))) as u8,
            sequence_to_apply,
            is_sequence_rollback: sequence_to_apply < current_seq,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn armed(target: u16, rollback: bool) -> SbmSlot {
        let slot = SbmSlot::new();
        slot.push(SbmRequest {
            is_to_process: true,
            operation: SbmOperation::Faster,
            chunk_offset: 0,
            sequence_to_apply: target,
            is_sequence_rollback: rollback,
        });
        slot
    }

    #[test]
    fn empty_slot_reports_not_yet() {
        let slot = SbmSlot::new();
        assert_eq!(slot.check(100), SbmCheck::NotYet);
    }

    #[test]
    fn boundary_frame_applies_and_consumes() {
        let slot = armed(200, false);
        assert_eq!(slot.check(199), SbmCheck::NotYet);
        assert_eq!(slot.check(200), SbmCheck::Apply(SbmOperation::Faster));
        // one-shot: consumed
        assert_eq!(slot.check(200), SbmCheck::NotYet);
        assert!(!slot.peek().is_to_process);
    }

    #[test]
    fn passed_boundary_signals_missed_once() {
        let slot = armed(200, false);
        assert_eq!(slot.check(201), SbmCheck::Missed);
        assert_eq!(slot.check(202), SbmCheck::NotYet);
    }

    #[test]
    fn rollback_target_waits_through_the_wrap() {
        // armed at seq 65530 for target 4 past the wrap
        let slot = armed(4, true);
        assert_eq!(slot.check(65531), SbmCheck::NotYet);
        assert_eq!(slot.check(65535), SbmCheck::NotYet);
        assert_eq!(slot.check(2), SbmCheck::NotYet);
        assert_eq!(slot.check(4), SbmCheck::Apply(SbmOperation::Faster));
    }

    #[test]
    fn rollback_target_can_still_be_missed_after_wrap() {
        let slot = armed(4, true);
        assert_eq!(slot.check(5), SbmCheck::Missed);
    }

    #[test]
    fn tuner_debounces_same_direction_observations() {
        let slot = SbmSlot::new();
        let mut tuner = SpeedTuner::new(10.0, 2.0, 16, slot.clone());

        tuner.observe(14.0, 100);
        tuner.observe(14.0, 101);
        assert!(!slot.peek().is_to_process, "two observations are below the debounce");

        tuner.observe(14.0, 102);
        let req = slot.peek();
        assert!(req.is_to_process);
        assert_eq!(req.operation, SbmOperation::Faster);
        assert_eq!(req.sequence_to_apply, 118);
        assert!(!req.is_sequence_rollback);
    }

    #[test]
    fn tuner_streak_resets_on_direction_change() {
        let slot = SbmSlot::new();
        let mut tuner = SpeedTuner::new(10.0, 2.0, 16, slot.clone());

        tuner.observe(14.0, 1);
        tuner.observe(14.0, 2);
        tuner.observe(6.0, 3); // flips to Slower, streak restarts
        tuner.observe(6.0, 4);
        assert!(!slot.peek().is_to_process);

        tuner.observe(6.0, 5);
        assert_eq!(slot.peek().operation, SbmOperation::Slower);
    }

    #[test]
    fn tuner_in_band_observations_never_arm() {
        let slot = SbmSlot::new();
        let mut tuner = SpeedTuner::new(10.0, 2.0, 16, slot.clone());
        for seq in 0..20 {
            tuner.observe(10.5, seq);
        }
        assert!(!slot.peek().is_to_process);
    }

    #[test]
    fn tuner_marks_rollback_when_lead_wraps() {
        let slot = SbmSlot::new();
        let mut tuner = SpeedTuner::new(10.0, 2.0, 16, slot.clone());
        for seq in [65530u16, 65531, 65532] {
            tuner.observe(14.0, seq);
        }
        let req = slot.peek();
        assert!(req.is_to_process);
        assert_eq!(req.sequence_to_apply, 65532u16.wrapping_add(16));
        assert!(req.is_sequence_rollback);
    }
}
