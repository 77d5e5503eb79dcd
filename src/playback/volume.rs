//! User volume to linear gain
//!
//! The 0-200 slider is perceptual: quiet settings follow an exponential
//! curve that reaches exactly zero at 0, the middle of the range is linear,
//! and above 150 gain grows exponentially past unity.

use crate::constants::MAX_VOLUME;

/// Smallest volume a relative change can land on
pub const MIN_RELATIVE_VOLUME: f64 = 0.001;

const QUIET_SCALE: f64 = 0.0104566441123;
const CURVE_BASE: f64 = 1.04;

/// Map a 0-200 volume to output gain
pub fn volume_to_gain(volume: f64) -> f32 {
    let gain = if volume > 150.0 {
        CURVE_BASE.powf(volume - 150.0)
    } else if volume < 60.0 {
        QUIET_SCALE * (CURVE_BASE.powf(volume) - 1.0)
    } else {
        volume / 100.0 - 0.5
    };
    gain as f32
}

/// Clamp an absolute volume into the slider range
pub fn clamp_volume(volume: f64) -> f64 {
    if volume.is_nan() {
        return 0.0;
    }
    volume.clamp(0.0, MAX_VOLUME)
}

/// Apply a relative change; the result never reaches zero
pub fn offset_volume(current: f64, delta: f64) -> f64 {
    let target = current + delta;
    if target.is_nan() {
        return current;
    }
    target.clamp(MIN_RELATIVE_VOLUME, MAX_VOLUME)
}
