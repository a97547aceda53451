//! Step completion judgements.
//!
//! Each step kind has its own way of deciding that the step is over:
//! straight runs complete on a beacon detection inside an encoder search
//! window, no-magnet runs on encoder distance alone, gentle turns on a
//! blended heading/encoder progress, and pivots on remaining heading error.
//! All judgements are pure functions over the cursor and the latest sensor
//! snapshot so they can be checked in isolation.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use util::maths;

use super::params::EngineParams;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Outcome of one beacon-corrected straight step judgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum NormOutcome {
    /// Keep driving.
    InProgress,

    /// A beacon was found inside the search window. The step is complete at
    /// a known position.
    BeaconFound,

    /// The search window closed without a beacon, or the implement stalled.
    /// The step ends at an unknown position and enters the retry path.
    Overrun,
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Beacon search window for a straight step, as `(lower, upper)` fractions
/// of step length.
///
/// Short steps open the window early because a single encoder tick is a
/// larger fraction of the step; long steps hold it closed longer. While
/// backtracking the lower bound is dropped entirely and the upper bound is
/// widened, since the vehicle's position estimate is already suspect.
pub(super) fn search_window(
    params: &EngineParams,
    step_len_cm: f64,
    retry_active: bool,
) -> (f64, f64) {
    if retry_active {
        return (0.0, params.search_upper + params.search_retry_widen);
    }

    let clamped = maths::clamp(step_len_cm, params.search_short_cm, params.search_long_cm);
    let lower = maths::lin_map(
        (params.search_short_cm, params.search_long_cm),
        (params.search_lower_short, params.search_lower_long),
        clamped,
    );

    (lower, params.search_upper)
}

/// Progress fraction of a straight step: the mean of both wheels' travelled
/// fractions of the step length.
pub(super) fn straight_progress(left_cm: f64, right_cm: f64, step_len_cm: f64) -> f64 {
    if step_len_cm <= 0.0 {
        return 0.0;
    }
    (left_cm / step_len_cm + right_cm / step_len_cm) / 2.0
}

/// Judge a beacon-corrected straight step.
///
/// `beacon_discovered` must be true only for a fresh detection, i.e. one
/// made after the bar cleared any beacon latched from the previous step.
/// Beacons seen before the window opens are ignored: they are stray magnets
/// or re-detections, not the step's end marker.
pub(super) fn judge_norm(
    params: &EngineParams,
    step_len_cm: f64,
    progress: f64,
    beacon_discovered: bool,
    retry_active: bool,
    implement_amps: f64,
) -> NormOutcome {
    // An implement stall means the vehicle has ploughed into the feed pile
    // somewhere it should not be, so the step ends through the same
    // lost-position path as a failed search.
    if implement_amps > params.overcurrent_force_end_amps && !retry_active {
        return NormOutcome::Overrun;
    }

    let (lower, upper) = search_window(params, step_len_cm, retry_active);

    if progress >= upper {
        NormOutcome::Overrun
    } else if progress >= lower && beacon_discovered {
        NormOutcome::BeaconFound
    } else {
        NormOutcome::InProgress
    }
}

/// A no-magnet straight step completes purely on encoder distance.
pub(super) fn judge_no_magnet(progress: f64) -> bool {
    progress >= 1.0
}

/// Blended progress of a gentle turn.
///
/// The heading share rises from 0 to 1 as the heading error closes on the
/// turn angle. The encoder share is the inside wheel's travelled fraction of
/// the step diagonal, or, for steps authored without a dx/dy, of the
/// full-turn travel reference scaled by the turn angle.
pub(super) fn turn_progress(
    params: &EngineParams,
    inside_travel_cm: f64,
    diagonal_cm: f64,
    desired_deg: f64,
    turn_angle_deg: f64,
    heading_deg: f64,
) -> f64 {
    let err = maths::heading_error_deg(desired_deg, heading_deg);
    let imu_share = -((err / turn_angle_deg).abs() - 1.0);

    let reference_cm = if diagonal_cm > 0.0 {
        diagonal_cm
    } else {
        params.turn_full_travel_cm * (turn_angle_deg / 90.0).abs()
    };
    let encoder_share = if reference_cm > 0.0 {
        (inside_travel_cm / reference_cm).abs()
    } else {
        0.0
    };

    imu_share * params.imu_judgement_weight + encoder_share * params.encoder_judgement_weight
}

/// A gentle turn completes when its blended progress crosses the threshold.
pub(super) fn judge_turn(params: &EngineParams, blended_progress: f64) -> bool {
    blended_progress >= params.turn_blend_complete
}

/// Progress of a pivot towards its corrected target heading, 0 at the start
/// of the pivot and 1 at the target.
///
/// Taken as an absolute value since overshoot past the target would
/// otherwise read as negative progress.
pub(super) fn pivot_progress(target_deg: f64, turn_angle_deg: f64, heading_deg: f64) -> f64 {
    let err = maths::heading_error_deg(target_deg, heading_deg);
    (1.0 - (err / turn_angle_deg).abs()).abs()
}

/// A pivot completes when the remaining heading error drops below the
/// completion threshold.
pub(super) fn judge_pivot(params: &EngineParams, target_deg: f64, heading_deg: f64) -> bool {
    maths::heading_error_deg(target_deg, heading_deg).abs() < params.turn_complete_error_deg
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
