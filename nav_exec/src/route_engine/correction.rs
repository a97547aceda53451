//! Closed-loop speed demand generation.
//!
//! Runs on the control tick while a step is driving. Straight steps get
//! heading-hold correction on top of the trapezoidal ramp and the implement
//! current throttle; pivots get the approach-shaped speed profile; gentle
//! turns run at their nominal step speeds.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use util::maths;
use vehicle_if::DriveDems;

use super::params::EngineParams;
use super::state::StepCursor;
use crate::route::WheelDir;

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Trapezoidal ramp scale for a straight step at the given progress.
///
/// The flags already account for whether ramping is enabled and whether the
/// neighbouring steps call for an acceleration or deceleration leg.
pub(super) fn ramp_scale(
    params: &EngineParams,
    progress: f64,
    accelerating: bool,
    decelerating: bool,
) -> f64 {
    let low = params.ramp_floor;
    let accel_end = params.ramp_accel_end;
    let decel_start = params.ramp_decel_start;

    if progress < accel_end && accelerating {
        progress * (1.0 / accel_end - low * 2.0) + low
    } else if progress > decel_start && progress < 1.0 && decelerating {
        1.0 - (progress - decel_start) * (1.0 / (1.0 - decel_start) - low * 2.0)
    } else if progress >= 1.0 && decelerating {
        low
    } else {
        1.0
    }
}

/// Update the implement overcurrent throttle scale.
///
/// Below the low current the scale creeps back towards 1 one increment per
/// tick so a cleared jam does not slam the wheels back to full speed. In the
/// proportional band the scale follows the current directly; above the high
/// current it clamps to the floor.
pub(super) fn update_throttle(params: &EngineParams, implement_amps: f64, prev_scale: f64) -> f64 {
    let amps = implement_amps.abs();

    if amps < params.throttle_low_amps {
        if prev_scale < 1.0 {
            (prev_scale + params.throttle_recovery_per_tick).min(1.0)
        } else {
            1.0
        }
    } else if amps <= params.throttle_high_amps {
        let span = params.throttle_high_amps - params.throttle_low_amps;
        params.throttle_start_scale
            - (amps - params.throttle_low_amps)
                * (params.throttle_start_scale - params.throttle_min_scale)
                / span
    } else {
        params.throttle_floor_scale
    }
}

/// Approach-shaped speed scale for a pivot at the given progress.
///
/// Ramps up from the floor towards the midpoint, then back down as the
/// heading closes on the target, so the pivot neither jerks at the start nor
/// overshoots at the end.
pub(super) fn pivot_shape(params: &EngineParams, progress: f64) -> f64 {
    if progress > params.pivot_midpoint {
        1.0 - (progress - params.pivot_midpoint) * params.pivot_decel_slope
    } else {
        progress * params.pivot_accel_slope + params.pivot_accel_offset
    }
}

/// Demands for a straight step: ramped, throttled nominal speeds with
/// heading-hold correction.
///
/// Mutates the cursor's throttle scale so the recovery creep persists
/// between ticks.
pub(super) fn straight_dems(
    params: &EngineParams,
    cursor: &mut StepCursor,
    heading_deg: f64,
    implement_amps: f64,
) -> DriveDems {
    let reverse =
        cursor.left_dir == WheelDir::Reverse && cursor.right_dir == WheelDir::Reverse;

    let mut right = cursor.right_speed;
    let mut left = cursor.left_speed;

    // The throttle only matters while feeding, which only happens driving
    // forward along the feed table.
    if !reverse && params.throttle_enabled {
        cursor.throttle_scale = update_throttle(params, implement_amps, cursor.throttle_scale);
        right *= cursor.throttle_scale;
        left *= cursor.throttle_scale;
    }

    let ramp = ramp_scale(params, cursor.progress, cursor.accelerating, cursor.decelerating);
    right *= ramp;
    left *= ramp;

    let target = cursor.desired_heading_deg + cursor.magnet_correction_deg;
    let err = maths::heading_error_deg(target, heading_deg);
    let factor = 1.0 - (err / params.proportional_band_deg).abs();

    let (left_out, right_out) = if !reverse {
        if err <= -params.correction_threshold_deg {
            if err.abs() < params.proportional_band_deg {
                (left, right * factor)
            } else {
                // Saturated: pull the corrected wheel backwards.
                (left, -right)
            }
        } else if err > params.correction_threshold_deg {
            if err.abs() < params.proportional_band_deg {
                (left * factor, right)
            } else {
                (-left, right)
            }
        } else {
            (
                dir_sign(cursor.left_dir) * left,
                dir_sign(cursor.right_dir) * right,
            )
        }
    } else if err >= params.correction_threshold_deg {
        if err.abs() < params.proportional_band_deg {
            (-left, -right * factor)
        } else {
            (-left, right)
        }
    } else if err < -params.correction_threshold_deg {
        if err.abs() < params.proportional_band_deg {
            (-left * factor, -right)
        } else {
            (left, -right)
        }
    } else {
        (-left, -right)
    };

    DriveDems {
        left_speed: left_out,
        right_speed: right_out,
        implement_speed: implement_dem(params, cursor),
    }
}

/// Demands for a turn step, at the step's nominal speeds scaled by the
/// given shape factor.
pub(super) fn turn_dems(params: &EngineParams, cursor: &StepCursor, scale: f64) -> DriveDems {
    DriveDems {
        left_speed: dir_sign(cursor.left_dir) * cursor.left_speed * scale,
        right_speed: dir_sign(cursor.right_dir) * cursor.right_speed * scale,
        implement_speed: implement_dem(params, cursor),
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn dir_sign(dir: WheelDir) -> f64 {
    match dir {
        WheelDir::Forward => 1.0,
        WheelDir::Reverse => -1.0,
    }
}

fn implement_dem(params: &EngineParams, cursor: &StepCursor) -> f64 {
    if cursor.implement_on {
        params.implement_speed
    } else {
        0.0
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn cursor() -> StepCursor {
        let mut c = StepCursor::new(1, 0.0);
        c.left_speed = 500.0;
        c.right_speed = 500.0;
        c
    }

    #[test]
    fn test_ramp_accelerates_from_floor() {
        let params = EngineParams::default();
        let start = ramp_scale(&params, 0.0, true, false);
        let end = ramp_scale(&params, 0.29, true, false);
        assert!((start - 0.2).abs() < 1e-9);
        assert!(end > 0.9);
        // Cruise after the acceleration leg.
        assert_eq!(ramp_scale(&params, 0.5, true, false), 1.0);
    }

    #[test]
    fn test_ramp_decelerates_to_floor() {
        let params = EngineParams::default();
        assert_eq!(ramp_scale(&params, 0.5, false, true), 1.0);
        let late = ramp_scale(&params, 0.95, false, true);
        assert!(late < 0.4 && late > 0.2);
        assert_eq!(ramp_scale(&params, 1.1, false, true), 0.2);
    }

    #[test]
    fn test_ramp_disabled_flags_mean_unity() {
        let params = EngineParams::default();
        assert_eq!(ramp_scale(&params, 0.05, false, false), 1.0);
        assert_eq!(ramp_scale(&params, 0.95, false, false), 1.0);
    }

    #[test]
    fn test_throttle_proportional_band() {
        let params = EngineParams::default();
        assert!((update_throttle(&params, 20.0, 1.0) - 0.7).abs() < 1e-9);
        assert!((update_throttle(&params, 30.0, 1.0) - 0.4).abs() < 1e-9);
        assert!((update_throttle(&params, 40.0, 1.0) - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_throttle_floor_and_recovery() {
        let params = EngineParams::default();
        let floored = update_throttle(&params, 50.0, 1.0);
        assert!((floored - 0.05).abs() < 1e-9);

        // Current clears: the scale creeps back instead of jumping.
        let recovering = update_throttle(&params, 5.0, floored);
        assert!((recovering - 0.06).abs() < 1e-9);
        assert_eq!(update_throttle(&params, 5.0, 1.0), 1.0);
    }

    #[test]
    fn test_pivot_shape_profile() {
        let params = EngineParams::default();
        assert!((pivot_shape(&params, 0.0) - 0.2).abs() < 1e-9);
        assert!((pivot_shape(&params, 0.5) - 1.0).abs() < 1e-9);
        let near_end = pivot_shape(&params, 0.95);
        assert!((near_end - 0.235).abs() < 1e-6);
    }

    #[test]
    fn test_straight_dems_on_heading_are_nominal() {
        let params = EngineParams::default();
        let mut c = cursor();
        let dems = straight_dems(&params, &mut c, 0.0, 0.0);
        assert_eq!(dems.left_speed, 500.0);
        assert_eq!(dems.right_speed, 500.0);
    }

    #[test]
    fn test_straight_dems_small_error_scales_one_wheel() {
        let params = EngineParams::default();
        let mut c = cursor();

        // Heading lags the target: right wheel is slowed.
        let dems = straight_dems(&params, &mut c, -1.5, 0.0);
        assert_eq!(dems.left_speed, 500.0);
        assert!((dems.right_speed - 250.0).abs() < 1e-9);
    }

    #[test]
    fn test_straight_dems_large_error_reverses_one_wheel() {
        let params = EngineParams::default();
        let mut c = cursor();

        let dems = straight_dems(&params, &mut c, -5.0, 0.0);
        assert_eq!(dems.left_speed, 500.0);
        assert_eq!(dems.right_speed, -500.0);

        let dems = straight_dems(&params, &mut c, 5.0, 0.0);
        assert_eq!(dems.left_speed, -500.0);
        assert_eq!(dems.right_speed, 500.0);
    }

    #[test]
    fn test_straight_dems_reverse_mirrors_correction() {
        let params = EngineParams::default();
        let mut c = cursor();
        c.left_dir = WheelDir::Reverse;
        c.right_dir = WheelDir::Reverse;

        let dems = straight_dems(&params, &mut c, 0.0, 0.0);
        assert_eq!(dems.left_speed, -500.0);
        assert_eq!(dems.right_speed, -500.0);

        let dems = straight_dems(&params, &mut c, 1.5, 0.0);
        assert_eq!(dems.left_speed, -500.0);
        assert!((dems.right_speed - -250.0).abs() < 1e-9);
    }

    #[test]
    fn test_straight_dems_throttle_applies_forward_only() {
        let params = EngineParams::default();
        let mut c = cursor();

        let dems = straight_dems(&params, &mut c, 0.0, 30.0);
        assert!((dems.left_speed - 200.0).abs() < 1e-9);

        let mut c = cursor();
        c.left_dir = WheelDir::Reverse;
        c.right_dir = WheelDir::Reverse;
        let dems = straight_dems(&params, &mut c, 0.0, 30.0);
        assert_eq!(dems.left_speed, -500.0);
    }

    #[test]
    fn test_implement_dem_follows_step() {
        let params = EngineParams::default();
        let mut c = cursor();
        c.implement_on = true;
        let dems = straight_dems(&params, &mut c, 0.0, 0.0);
        assert_eq!(dems.implement_speed, 500.0);
    }

    #[test]
    fn test_turn_dems_counter_rotate() {
        let params = EngineParams::default();
        let mut c = cursor();
        c.left_dir = WheelDir::Reverse;
        c.right_dir = WheelDir::Forward;

        let dems = turn_dems(&params, &c, 0.5);
        assert_eq!(dems.left_speed, -250.0);
        assert_eq!(dems.right_speed, 250.0);
    }
}
