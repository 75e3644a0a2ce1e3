//! Rate propagation decision
//!
//! A rate change on either leg becomes the composite rate, which is then
//! pushed to both legs. The tolerance check is what stops the echo from the
//! other leg from starting another round.

use tandem_common::rate::is_rate_equal_within;

/// New composite rate after a leg reported `leg_rate`, if it differs
pub fn propagated_rate(leg_rate: f64, composite_rate: f64, tolerance: f64) -> Option<f64> {
    if is_rate_equal_within(leg_rate, composite_rate, tolerance) {
        None
    } else {
        Some(leg_rate)
    }
}
