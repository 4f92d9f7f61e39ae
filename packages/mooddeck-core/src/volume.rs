//! Volume translation between controller range and decibel range.
//!
//! The mixer works in a fixed [-60, 0] dB window. -60 dB is the silence
//! floor: conversions return exactly -60 instead of negative infinity, and
//! the multiplier at or below the floor is exactly 0. Smoothing keeps a
//! per-target memory so consecutive controller ticks glide instead of jump.

use dashmap::DashMap;

/// Lowest representable volume in dB. Values at the floor mean silence.
pub const DB_FLOOR: f64 = -60.0;

/// Highest representable volume in dB (unity gain).
pub const DB_CEILING: f64 = 0.0;

/// Converts a controller value into decibels within [-60, 0].
///
/// The value is normalized against `[min, max]` and clamped to [0, 1].
/// A normalized position of exactly 0 returns the -60 floor; everything
/// else maps linearly across the 60 dB window, so `max` lands on 0 dB.
///
/// A degenerate range (`max <= min`) yields the floor.
#[must_use]
pub fn to_decibel(midi_value: u8, min: u8, max: u8) -> f64 {
    if max <= min {
        return DB_FLOOR;
    }
    let normalized = (f64::from(midi_value) - f64::from(min)) / (f64::from(max) - f64::from(min));
    let normalized = normalized.clamp(0.0, 1.0);
    if normalized == 0.0 {
        DB_FLOOR
    } else {
        normalized * 60.0 - 60.0
    }
}

/// Converts decibels to a linear amplitude multiplier.
///
/// Anything at or below the -60 floor is treated as silence (multiplier 0).
#[must_use]
pub fn to_multiplier(db: f64) -> f64 {
    if db <= DB_FLOOR {
        0.0
    } else {
        10.0_f64.powf(db / 20.0)
    }
}

/// Converts a linear amplitude multiplier to decibels, floored at -60.
///
/// Non-positive multipliers (silence or malformed meter data) map to the
/// floor rather than producing -inf/NaN.
#[must_use]
pub fn from_multiplier(multiplier: f64) -> f64 {
    if multiplier <= 0.0 {
        DB_FLOOR
    } else {
        (20.0 * multiplier.log10()).max(DB_FLOOR)
    }
}

/// Exponential smoothing for volume changes, keyed by target name.
///
/// `smoothed = last + (new - last) * alpha`. The first sample for a target
/// passes through unchanged. Alpha defaults to 0.1; lower values respond
/// faster per product convention.
///
/// State lives only in memory and is dropped with the smoother.
pub struct VolumeSmoother {
    alpha: f64,
    last: DashMap<String, f64>,
}

impl VolumeSmoother {
    /// Creates a smoother with the given alpha factor.
    #[must_use]
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            last: DashMap::new(),
        }
    }

    /// Applies smoothing for `target` and records the result as the new memory.
    pub fn smooth(&self, target: &str, value: f64) -> f64 {
        let smoothed = match self.last.get(target) {
            Some(last) => *last + (value - *last) * self.alpha,
            None => value,
        };
        self.last.insert(target.to_string(), smoothed);
        smoothed
    }

    /// Forgets the smoothing memory for `target`.
    ///
    /// The next value for the target passes through unchanged.
    pub fn reset(&self, target: &str) {
        self.last.remove(target);
    }
}

impl Default for VolumeSmoother {
    fn default() -> Self {
        Self::new(0.1)
    }
}
