//! Playback rate comparison
//!
//! Rates travel through float arithmetic on both legs; comparing them exactly
//! would let rounding noise bounce a rate change back and forth forever.

/// Default tolerance for rate equality
pub const DEFAULT_RATE_TOLERANCE: f64 = 0.001;

/// Rate equality using [`DEFAULT_RATE_TOLERANCE`]
pub fn is_rate_equal(a: f64, b: f64) -> bool {
    is_rate_equal_within(a, b, DEFAULT_RATE_TOLERANCE)
}

/// Rate equality within an explicit tolerance
pub fn is_rate_equal_within(a: f64, b: f64, tolerance: f64) -> bool {
    (a - b).abs() <= tolerance.abs()
}
