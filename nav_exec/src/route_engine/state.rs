//! Route engine state, input and status report types.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::Serialize;

// Internal
use crate::route::WheelDir;
use vehicle_if::Vehicle;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Internal engine mode while a route is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngineMode {
    /// No route loaded or route ended.
    Idle,

    /// Latch the next step's parameters, corrections and ramp flags.
    LoadStep,

    /// Drive the current step until its completion judgement fires.
    Driving,

    /// Current step ended, decide the next cursor position.
    StepDone,
}

/// Terminal outcome of a route drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RouteResult {
    /// All steps of all passes completed.
    Finished,

    /// A beacon search failed with the retry budget exhausted.
    BeaconLost,
}

/// Which control rate a tick input belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickRate {
    /// Fast completion-check tick.
    Ms1,

    /// Control tick issuing speed demands.
    Ms100,
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// All sensor inputs consumed by one engine tick, captured at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NavSnapshot {
    /// Fused yaw heading, degrees in (-180, 180].
    pub heading_deg: f64,

    /// Raw left wheel encoder counter.
    pub left_ticks: u32,

    /// Raw right wheel encoder counter.
    pub right_ticks: u32,

    /// Raw magnet sensor bar bitmask.
    pub magnet_bitmask: u32,

    /// Implement motor current, A.
    pub implement_current_amps: f64,
}

/// One engine tick: a snapshot plus the rate it was captured at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickInput {
    pub snapshot: NavSnapshot,
    pub rate: TickRate,
}

/// Mutable per-route driving state, reset when a route is started.
#[derive(Debug, Clone)]
pub(super) struct StepCursor {
    /// Index of the step currently being driven.
    pub step_index: usize,

    /// Route passes still to drive, including the current one.
    pub passes_remaining: u8,

    /// Heading the vehicle should hold on the current step, degrees.
    pub desired_heading_deg: f64,

    /// Beacon-derived additive correction to the desired heading, degrees.
    pub magnet_correction_deg: f64,

    /// Beacon lateral offset latched when the previous straight step ended,
    /// cm. `None` when the previous step ended without a beacon in view.
    pub prev_magnet_offset_cm: Option<f64>,

    /// Lateral error the previous correction was computed from, cm.
    pub prev_magnet_delta_cm: Option<f64>,

    /// Correction angle applied on the previous straight step, degrees.
    pub prev_correction_deg: f64,

    /// Turn angle of the most recent turn step, degrees. Used to project the
    /// latched beacon offset across the turn.
    pub prev_turn_angle_deg: f64,

    /// Turn angle of the current step, degrees. Zero on straight steps.
    pub turn_angle_deg: f64,

    /// Hypotenuse of the current step's dx/dy, cm. Encoder reference for
    /// gentle turn judgement.
    pub diagonal_cm: f64,

    /// Along-track lengthening of the current step from projecting a latched
    /// beacon offset across a turn, cm. Zero on most steps.
    pub step_distance_offset_cm: f64,

    /// Progress fraction of the current step, by the step kind's own
    /// judgement. Drives the speed ramp.
    pub progress: f64,

    /// Consecutive beacon search retries on this route.
    pub retry_count: u8,

    /// True while reversing over the previous step after a failed search.
    pub retry_active: bool,

    /// Ramp flags for the current step.
    pub accelerating: bool,
    pub decelerating: bool,

    /// True when this straight step reverses travel direction relative to
    /// the previous straight step.
    pub direction_changed: bool,

    /// A beacon was already under the bar when this step loaded. Held until
    /// the bar clears so the same magnet is not re-detected.
    pub magnet_latched: bool,

    /// Current step demand set: speed magnitudes and effective directions
    /// (reversed while backtracking).
    pub left_speed: f64,
    pub right_speed: f64,
    pub left_dir: WheelDir,
    pub right_dir: WheelDir,
    pub implement_on: bool,

    /// Multiplicative speed scale from the implement current throttle.
    pub throttle_scale: f64,
}

/// Engine status, archived each control tick.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StatusReport {
    pub mode: EngineMode,
    pub step_index: usize,
    pub pass: u8,
    pub progress: f64,
    pub desired_heading_deg: f64,
    pub heading_error_deg: f64,
    pub magnet_correction_deg: f64,
    pub retry_count: u8,
    pub retry_active: bool,
    pub throttle_scale: f64,
    pub result: Option<RouteResult>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl NavSnapshot {
    /// Capture a snapshot from the vehicle interface.
    pub fn capture<V: Vehicle>(vehicle: &V) -> Self {
        Self {
            heading_deg: vehicle.heading_deg(),
            left_ticks: vehicle.left_encoder_ticks(),
            right_ticks: vehicle.right_encoder_ticks(),
            magnet_bitmask: vehicle.magnet_bar_bitmask(),
            implement_current_amps: vehicle.implement_current_amps(),
        }
    }
}

impl StepCursor {
    /// Cursor for a fresh route start at the given heading.
    pub fn new(passes: u8, heading_deg: f64) -> Self {
        Self {
            step_index: 0,
            passes_remaining: passes.max(1),
            desired_heading_deg: heading_deg,
            magnet_correction_deg: 0.0,
            prev_magnet_offset_cm: None,
            prev_magnet_delta_cm: None,
            prev_correction_deg: 0.0,
            prev_turn_angle_deg: 0.0,
            turn_angle_deg: 0.0,
            diagonal_cm: 0.0,
            step_distance_offset_cm: 0.0,
            progress: 0.0,
            retry_count: 0,
            retry_active: false,
            accelerating: false,
            decelerating: false,
            direction_changed: false,
            magnet_latched: false,
            left_speed: 0.0,
            right_speed: 0.0,
            left_dir: WheelDir::Forward,
            right_dir: WheelDir::Forward,
            implement_on: false,
            throttle_scale: 1.0,
        }
    }
}

impl Default for StatusReport {
    fn default() -> Self {
        Self {
            mode: EngineMode::Idle,
            step_index: 0,
            pass: 0,
            progress: 0.0,
            desired_heading_deg: 0.0,
            heading_error_deg: 0.0,
            magnet_correction_deg: 0.0,
            retry_count: 0,
            retry_active: false,
            throttle_scale: 1.0,
            result: None,
        }
    }
}
