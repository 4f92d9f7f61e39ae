//! General utilities shared across the library.

use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is before the Unix epoch (shouldn't happen in practice).
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Rounds a value to two decimal places.
///
/// Used for display values (smoothed volume in dB) so UI surfaces don't
/// flicker through long float tails.
#[must_use]
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_millis_is_nonzero() {
        assert!(now_millis() > 0);
    }

    #[test]
    fn round2_truncates_to_two_decimals() {
        assert_eq!(round2(-29.763_779_5), -29.76);
        assert_eq!(round2(1.236), 1.24);
        assert_eq!(round2(-60.0), -60.0);
    }
}
