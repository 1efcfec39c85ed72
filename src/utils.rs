//! Utility functions for the facesynth-link crate.

use std::ops::RangeInclusive;

/// Linearly remap a value from one range onto another.
///
/// The result is not clamped; values outside `from` land outside `to`.
///
/// # Arguments
///
/// * `value` - The value to remap
/// * `from` - The source range
/// * `to` - The target range
///
/// # Example
///
/// ```
/// use facesynth_link::map_range;
///
/// let mapped = map_range(0.5, 0.0..=1.0, 0.0..=255.0);
/// assert!((mapped - 127.5).abs() < 0.001);
/// ```
#[inline]
pub fn map_range(value: f32, from: RangeInclusive<f32>, to: RangeInclusive<f32>) -> f32 {
    let from_span = from.end() - from.start();
    let to_span = to.end() - to.start();
    (value - from.start()) * to_span / from_span + to.start()
}

/// Truncate a value toward zero and clamp it into `0..=255`.
///
/// NaN maps to 0.
///
/// # Example
///
/// ```
/// use facesynth_link::clamp_to_byte;
///
/// assert_eq!(clamp_to_byte(127.9), 127);
/// assert_eq!(clamp_to_byte(-40.0), 0);
/// assert_eq!(clamp_to_byte(1000.0), 255);
/// ```
#[inline]
pub fn clamp_to_byte(value: f32) -> u8 {
    // `as` saturates and maps NaN to 0.
    (value as i64).clamp(0, 255) as u8
}

/// Remap a value into `0..=255` and clamp it.
#[inline]
pub fn map_to_byte(value: f32, from: RangeInclusive<f32>) -> u8 {
    clamp_to_byte(map_range(value, from, 0.0..=255.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_range() {
        assert!((map_range(0.2, 0.2..=1.0, 0.0..=255.0) - 0.0).abs() < 0.001);
        assert!((map_range(1.0, 0.2..=1.0, 0.0..=255.0) - 255.0).abs() < 0.001);
        assert!((map_range(-0.3, -0.8..=0.2, 0.0..=255.0) - 127.5).abs() < 0.001);
        assert!((map_range(500.0, 400.0..=600.0, 0.0..=255.0) - 127.5).abs() < 0.001);
    }

    #[test]
    fn test_map_range_is_unclamped() {
        assert!(map_range(2.0, 0.0..=1.0, 0.0..=255.0) > 255.0);
        assert!(map_range(-1.0, 0.0..=1.0, 0.0..=255.0) < 0.0);
    }

    #[test]
    fn test_clamp_to_byte() {
        assert_eq!(clamp_to_byte(0.0), 0);
        assert_eq!(clamp_to_byte(254.99), 254);
        assert_eq!(clamp_to_byte(255.0), 255);
        assert_eq!(clamp_to_byte(-0.5), 0);
        assert_eq!(clamp_to_byte(f32::MAX), 255);
        assert_eq!(clamp_to_byte(f32::NEG_INFINITY), 0);
        assert_eq!(clamp_to_byte(f32::NAN), 0);
    }

    #[test]
    fn test_map_to_byte() {
        assert_eq!(map_to_byte(0.6, 0.2..=1.0), 127);
        assert_eq!(map_to_byte(5.0, 0.2..=1.0), 255);
        assert_eq!(map_to_byte(-5.0, 0.2..=1.0), 0);
    }
}
