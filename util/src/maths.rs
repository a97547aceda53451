//! Utility maths functions
//!
//! All heading arithmetic in the navigation software is done in degrees, on
//! the half-open range `(-180, 180]`, matching the convention of the AHRS
//! filter the IMU board runs.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Wrap an angle in degrees into the range `(-180, 180]`.
///
/// Idempotent over the whole finite range, including inputs many revolutions
/// out.
pub fn wrap_180<T>(angle_deg: T) -> T
where
    T: Float,
{
    let full = T::from(360.0).unwrap();
    let half = T::from(180.0).unwrap();

    let mut a = angle_deg % full;

    if a > half {
        a = a - full;
    }
    if a <= -half {
        a = a + full;
    }

    a
}

/// Signed shortest-path error between a target heading and the current
/// heading, in degrees.
///
/// Positive errors mean the vehicle has rotated clockwise past the target
/// (current leads target), negative errors mean it lags.
pub fn heading_error_deg<T>(target_deg: T, current_deg: T) -> T
where
    T: Float,
{
    wrap_180(current_deg - target_deg)
}

/// Map a value from one range into another.
pub fn lin_map<T>(source_range: (T, T), target_range: (T, T), value: T) -> T
where
    T: Float,
{
    target_range.0
        + ((value - source_range.0) * (target_range.1 - target_range.0)
            / (source_range.1 - source_range.0))
}

/// Clamp a value between a minimum and maximum.
pub fn clamp<T>(value: T, min: T, max: T) -> T
where
    T: Float,
{
    let mut ret = value;

    if ret > max {
        ret = max
    }
    if ret < min {
        ret = min
    }

    ret
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_wrap_180_range() {
        // Wrapped values always land in (-180, 180]
        for a in (-1080..=1080).step_by(7) {
            let w = wrap_180(a as f64);
            assert!(w > -180.0 && w <= 180.0, "wrap_180({}) = {}", a, w);
        }
    }

    #[test]
    fn test_wrap_180_idempotent() {
        for a in (-1080..=1080).step_by(13) {
            let w = wrap_180(a as f64);
            assert!((wrap_180(w) - w).abs() < 1e-12);
        }
    }

    #[test]
    fn test_wrap_180_boundaries() {
        assert_eq!(wrap_180(180.0f64), 180.0);
        assert_eq!(wrap_180(-180.0f64), 180.0);
        assert_eq!(wrap_180(360.0f64), 0.0);
        assert_eq!(wrap_180(540.0f64), 180.0);
    }

    #[test]
    fn test_heading_error() {
        // Shortest path across the wrap point
        assert_eq!(heading_error_deg(170.0f64, -170.0), 20.0);
        assert_eq!(heading_error_deg(-170.0f64, 170.0), -20.0);
        assert_eq!(heading_error_deg(0.0f64, 1.5), 1.5);
    }

    #[test]
    fn test_lin_map() {
        assert_eq!(lin_map((0.0f64, 1.0), (0.0, 100.0), 0.5), 50.0);
        assert_eq!(lin_map((10.0f64, 50.0), (0.2, 0.8), 10.0), 0.2);
        assert_eq!(lin_map((10.0f64, 50.0), (0.2, 0.8), 50.0), 0.8);
    }
}
