//! Reference-leg selection
//!
//! The leg with the longer duration drives the composite clock. Only its
//! time updates move the composite current time.

use tandem_common::PlayerStatus;
use tracing::debug;

use super::LegSlot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceSelector {
    reference: LegSlot,
}

impl ReferenceSelector {
    /// Pick the longer leg; a tie goes to the row leg
    pub fn new(row_duration: u64, col_duration: u64) -> Self {
        let reference = if row_duration >= col_duration {
            LegSlot::Row
        } else {
            LegSlot::Col
        };
        Self { reference }
    }

    pub fn reference(&self) -> LegSlot {
        self.reference
    }

    /// Re-evaluate after `emitter` reported a new duration
    ///
    /// An emitter at least as long as the other leg becomes (or stays) the
    /// reference; a shorter emitter hands the reference to the other leg.
    /// Returns true when the reference moved.
    pub fn on_duration_changed(
        &mut self,
        emitter: LegSlot,
        emitter_duration: u64,
        receptor_duration: u64,
    ) -> bool {
        let next = if emitter_duration >= receptor_duration {
            emitter
        } else {
            emitter.other()
        };

        if next == self.reference {
            return false;
        }
        debug!(
            from = %self.reference,
            to = %next,
            emitter_duration,
            receptor_duration,
            "Reference leg reassigned"
        );
        self.reference = next;
        true
    }

    /// Whether a time update from `emitter` should move the composite clock
    pub fn accepts_time(&self, emitter: LegSlot, emitter_status: PlayerStatus) -> bool {
        emitter == self.reference && emitter_status != PlayerStatus::Ended
    }
}
