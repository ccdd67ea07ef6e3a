//! Numeric helpers shared by the engine crates
//!
//! Everything that feeds the Q-table passes through these guards: a single
//! NaN written into a state's values would poison every later decision for
//! that state.

use tracing::warn;

/// Round to two decimal places
#[inline]
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Replace a non-finite value with 0.0, logging which quantity was coerced
pub fn finite_or_zero(value: f64, what: &str) -> f64 {
    if value.is_finite() {
        value
    } else {
        warn!(quantity = what, value = %value, "Non-finite value coerced to 0");
        0.0
    }
}

/// Sanitize an elapsed time in seconds: non-finite or negative becomes 0
pub fn sanitize_elapsed(seconds: f64) -> f64 {
    let seconds = finite_or_zero(seconds, "elapsed_seconds");
    if seconds < 0.0 {
        warn!(elapsed = seconds, "Negative elapsed time coerced to 0");
        0.0
    } else {
        seconds
    }
}
