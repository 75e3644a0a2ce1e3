//! Player status definitions
//!
//! Every leg, and every composite built from legs, reports one of these.

use serde::{Deserialize, Serialize};

/// Player status enumeration
///
/// Transitions are driven by the player itself; observers only read them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "PascalCase")]
pub enum PlayerStatus {
    /// Prepared and able to start without further loading
    Ready,
    /// Actively advancing its clock
    Playing,
    /// Deliberately held at the current position
    Pause,
    /// Stalled waiting for data
    Buffering,
    /// Reached the end of its timeline
    Ended,
}

impl PlayerStatus {
    /// All statuses, in declaration order
    pub const ALL: [PlayerStatus; 5] = [
        PlayerStatus::Ready,
        PlayerStatus::Playing,
        PlayerStatus::Pause,
        PlayerStatus::Buffering,
        PlayerStatus::Ended,
    ];

    pub fn is_playing(self) -> bool {
        self == PlayerStatus::Playing
    }

    pub fn is_ended(self) -> bool {
        self == PlayerStatus::Ended
    }
}

impl std::fmt::Display for PlayerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayerStatus::Ready => write!(f, "Ready"),
            PlayerStatus::Playing => write!(f, "Playing"),
            PlayerStatus::Pause => write!(f, "Pause"),
            PlayerStatus::Buffering => write!(f, "Buffering"),
            PlayerStatus::Ended => write!(f, "Ended"),
        }
    }
}
