//! Route engine tuning parameters.
//!
//! Loaded from `route_engine.toml` in the parameter directory. The defaults
//! here match the shipped parameter file and are used directly by tests.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct EngineParams {
    /// Distance covered by one full encoder wrap, cm.
    pub distance_per_rev_cm: f64,

    /// Inside wheel travel over a complete 90 degree turn, cm. Encoder
    /// reference for turn completion judgement on steps authored without a
    /// dx/dy diagonal.
    pub turn_full_travel_cm: f64,

    /// Weight of the heading judgement in turn completion blending.
    pub imu_judgement_weight: f64,

    /// Weight of the encoder judgement in turn completion blending.
    pub encoder_judgement_weight: f64,

    /// Blended turn progress at which a gentle turn is complete.
    pub turn_blend_complete: f64,

    /// Remaining heading error below which a 90 degree pivot is complete,
    /// degrees.
    pub turn_complete_error_deg: f64,

    /// Search window lower bound as a fraction of step length, for steps at
    /// or below `search_short_cm`.
    pub search_lower_short: f64,

    /// Search window lower bound fraction for steps at or above
    /// `search_long_cm`. Steps in between interpolate linearly.
    pub search_lower_long: f64,

    /// Step length below which the short lower bound applies, cm.
    pub search_short_cm: f64,

    /// Step length above which the long lower bound applies, cm.
    pub search_long_cm: f64,

    /// Search window upper bound as a fraction of step length.
    pub search_upper: f64,

    /// Widening of the upper bound per beacon search retry, fraction of step
    /// length.
    pub search_retry_widen: f64,

    /// Beacon search retries after which the route aborts.
    pub retry_ceiling: u8,

    /// Allow a failed beacon search to reverse over the previous step before
    /// retrying. When false a failed search aborts immediately.
    pub backtrack_enabled: bool,

    /// Implement current above which the current step is force-ended through
    /// the beacon failure path, A.
    pub overcurrent_force_end_amps: f64,

    /// Heading error below which no straight-line correction is applied,
    /// degrees.
    pub correction_threshold_deg: f64,

    /// Heading error at which straight-line correction saturates into a
    /// wheel reversal, degrees.
    pub proportional_band_deg: f64,

    /// Step lengths below this clamp the decoded beacon correction angle,
    /// cm.
    pub short_step_cm: f64,

    /// Correction angle clamp for short steps, degrees.
    pub short_step_clamp_deg: f64,

    /// Blend factor applied to the heading delta when consecutive straight
    /// steps reverse direction.
    pub reversal_blend: f64,

    /// Blend factor applied when consecutive straight steps keep direction.
    pub same_dir_blend: f64,

    /// Enable trapezoidal speed ramping on straight steps.
    pub ramp_enabled: bool,

    /// Fraction of the step over which the ramp accelerates.
    pub ramp_accel_end: f64,

    /// Fraction of the step at which the ramp starts decelerating.
    pub ramp_decel_start: f64,

    /// Ramp scale floor.
    pub ramp_floor: f64,

    /// Enable implement overcurrent speed throttling.
    pub throttle_enabled: bool,

    /// Implement current below which the throttle recovers, A.
    pub throttle_low_amps: f64,

    /// Implement current above which the throttle clamps to its floor, A.
    pub throttle_high_amps: f64,

    /// Throttle scale at `throttle_low_amps`.
    pub throttle_start_scale: f64,

    /// Throttle scale at `throttle_high_amps`.
    pub throttle_min_scale: f64,

    /// Throttle scale above `throttle_high_amps`.
    pub throttle_floor_scale: f64,

    /// Throttle scale recovered per control tick while the current is low.
    pub throttle_recovery_per_tick: f64,

    /// Pivot speed shaping: slope of the ramp-up below the pivot midpoint.
    pub pivot_accel_slope: f64,

    /// Pivot speed shaping: offset of the ramp-up below the midpoint.
    pub pivot_accel_offset: f64,

    /// Pivot speed shaping: slope of the ramp-down past the midpoint.
    pub pivot_decel_slope: f64,

    /// Pivot speed shaping: progress fraction of the midpoint.
    pub pivot_midpoint: f64,

    /// Nominal implement (feed auger) speed while a step runs it.
    pub implement_speed: f64,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            distance_per_rev_cm: 50.0,
            turn_full_travel_cm: 37.0,
            imu_judgement_weight: 1.0,
            encoder_judgement_weight: 0.0,
            turn_blend_complete: 0.97,
            turn_complete_error_deg: 1.0,
            search_lower_short: 0.2,
            search_lower_long: 0.8,
            search_short_cm: 10.0,
            search_long_cm: 50.0,
            search_upper: 1.5,
            search_retry_widen: 0.2,
            retry_ceiling: 10,
            backtrack_enabled: true,
            overcurrent_force_end_amps: 45.0,
            correction_threshold_deg: 0.5,
            proportional_band_deg: 3.0,
            short_step_cm: 50.0,
            short_step_clamp_deg: 2.0,
            reversal_blend: 0.75,
            same_dir_blend: 0.5,
            ramp_enabled: true,
            ramp_accel_end: 0.3,
            ramp_decel_start: 0.7,
            ramp_floor: 0.2,
            throttle_enabled: true,
            throttle_low_amps: 20.0,
            throttle_high_amps: 40.0,
            throttle_start_scale: 0.7,
            throttle_min_scale: 0.1,
            throttle_floor_scale: 0.05,
            throttle_recovery_per_tick: 0.01,
            pivot_accel_slope: 1.6,
            pivot_accel_offset: 0.2,
            pivot_decel_slope: 1.7,
            pivot_midpoint: 0.5,
            implement_speed: 500.0,
        }
    }
}
