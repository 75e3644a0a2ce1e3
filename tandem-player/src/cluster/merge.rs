//! Status merge policy
//!
//! Maps the status a leg just reported (the emitter) and the other leg's
//! current status (the receptor) to the composite status. `None` means the
//! pair has no rule and the composite keeps its current status.

use tandem_common::PlayerStatus;

/// Composite status after `emitter` reported a change
///
/// | emitter   | receptor          | composite         |
/// |-----------|-------------------|-------------------|
/// | Ready     | Ready or Ended    | Ready             |
/// | Pause     | not Playing       | Pause             |
/// | Buffering | not Pause         | Buffering         |
/// | Playing   | Playing or Ended  | Playing           |
/// | Ended     | any               | receptor's status |
pub fn merge_status(emitter: PlayerStatus, receptor: PlayerStatus) -> Option<PlayerStatus> {
    use PlayerStatus::*;

    match (emitter, receptor) {
        (Ready, Ready | Ended) => Some(Ready),
        (Pause, r) if r != Playing => Some(Pause),
        (Buffering, r) if r != Pause => Some(Buffering),
        (Playing, Playing | Ended) => Some(Playing),
        (Ended, r) => Some(r),
        _ => None,
    }
}
