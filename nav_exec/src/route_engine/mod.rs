//! # Route navigation and path-following engine
//!
//! Drives a loaded [`Route`] step by step: loads each step's demand set and
//! corrections, judges its completion from encoder, heading and beacon data,
//! and steers the vehicle along straight runs with heading-hold correction.
//!
//! The engine runs as a cyclically-processed module at two rates. Every
//! millisecond it consumes a [`NavSnapshot`] and checks step completion;
//! every 100 ms it additionally issues [`DriveDems`] with the ramp, throttle
//! and heading corrections applied. All mode changes happen on tick
//! boundaries.
//!
//! While a step drives the engine is in one of four modes:
//!
//! - `Idle`: no route loaded, or the route ended.
//! - `LoadStep`: latch the next step's speeds, directions, corrections and
//!   ramp flags from the route table and the current snapshot.
//! - `Driving`: run the step until its completion judgement fires.
//! - `StepDone`: advance the cursor, handle pass repeats, or finish.
//!
//! A straight step that exhausts its beacon search window ends with the
//! vehicle's position unknown. The engine then reverses over the previous
//! step looking for the beacon it last saw; finding it re-anchors the
//! position estimate and the failed step is driven again. After
//! `retry_ceiling` such retries, or if the backtrack itself finds nothing,
//! the route aborts as lost.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod completion;
mod correction;
pub mod params;
mod state;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{info, trace, warn};

// Internal
use crate::magnets::{self, MagnetReading};
use crate::odometry::OdometryEstimator;
use crate::route::{Route, RouteError, RouteStep, StepKind};
use util::archive::{Archived, Archiver};
use util::maths;
use util::module::State;
use util::params as param_loader;
use util::session::Session;
use vehicle_if::DriveDems;

// Exports
pub use params::EngineParams;
pub use state::{EngineMode, NavSnapshot, RouteResult, StatusReport, TickInput, TickRate};

use completion::NormOutcome;
use state::StepCursor;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors which can occur in the route engine.
#[derive(Debug, thiserror::Error)]
pub enum RouteEngineError {
    #[error("Cannot start a route while another route is loaded")]
    AlreadyDriving,

    #[error("Route rejected: {0}")]
    InvalidRoute(#[from] RouteError),

    #[error("Could not load route engine parameters: {0}")]
    ParamLoadError(param_loader::LoadError),
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Route engine module state.
pub struct RouteEngine {
    params: EngineParams,

    mode: EngineMode,

    /// The loaded route. `Some` in all modes except `Idle`.
    route: Option<Route>,

    /// The step currently being driven, latched at `LoadStep`.
    current_step: Option<RouteStep>,

    cursor: StepCursor,

    odometry: OdometryEstimator,

    /// True when `StepDone` should move to the next step rather than reload
    /// after a backtrack setup.
    advance_pending: bool,

    /// Terminal outcome of the last route, until collected.
    result: Option<RouteResult>,

    report: StatusReport,

    arch_report: Option<Archiver>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl RouteEngine {
    /// Create an engine with the given parameters and no archiving.
    pub fn new(params: EngineParams) -> Self {
        let distance_per_rev_cm = params.distance_per_rev_cm;
        Self {
            params,
            mode: EngineMode::Idle,
            route: None,
            current_step: None,
            cursor: StepCursor::new(1, 0.0),
            odometry: OdometryEstimator::new(distance_per_rev_cm),
            advance_pending: false,
            result: None,
            report: StatusReport::default(),
            arch_report: None,
        }
    }

    /// Load a route and arm it for driving, from its first step.
    pub fn start(&mut self, route: Route, heading_deg: f64) -> Result<(), RouteEngineError> {
        self.start_from(route, heading_deg, 0)
    }

    /// Load a route and arm it for driving from a requested step index.
    pub fn start_from(
        &mut self,
        route: Route,
        heading_deg: f64,
        step_index: usize,
    ) -> Result<(), RouteEngineError> {
        if self.mode != EngineMode::Idle {
            return Err(RouteEngineError::AlreadyDriving);
        }

        route.validate()?;

        self.cursor = StepCursor::new(route.repeat_count, heading_deg);
        self.cursor.step_index = step_index.min(route.num_steps() - 1);
        self.odometry = OdometryEstimator::new(self.params.distance_per_rev_cm);
        self.result = None;
        self.report = StatusReport::default();
        self.advance_pending = false;

        info!(
            "Route {} armed: {} steps, {} pass(es), starting at step {}",
            route.id,
            route.num_steps(),
            route.repeat_count.max(1),
            self.cursor.step_index
        );

        self.route = Some(route);
        self.mode = EngineMode::LoadStep;

        Ok(())
    }

    /// Drop the loaded route and return the stop demand set.
    ///
    /// The caller decides why; the engine records no terminal result of its
    /// own for an external abort.
    pub fn abort(&mut self) -> DriveDems {
        if self.mode != EngineMode::Idle {
            info!("Route drive aborted at step {}", self.cursor.step_index);
        }
        // Retry state belongs to the dropped route; reports written while
        // idle must not carry its backtrack flags.
        self.cursor.retry_active = false;
        self.cursor.retry_count = 0;
        self.cursor.progress = 0.0;
        self.route = None;
        self.current_step = None;
        self.mode = EngineMode::Idle;
        DriveDems::stop()
    }

    /// True when no route is loaded.
    pub fn is_idle(&self) -> bool {
        self.mode == EngineMode::Idle
    }

    pub fn mode(&self) -> EngineMode {
        self.mode
    }

    /// Index of the step being driven, `None` when idle.
    pub fn current_step_index(&self) -> Option<usize> {
        match self.mode {
            EngineMode::Idle => None,
            _ => Some(self.cursor.step_index),
        }
    }

    /// Whole-route progress over the current pass, 0 to 100.
    pub fn progress_percent(&self) -> u8 {
        let route = match &self.route {
            Some(r) => r,
            None => return 0,
        };

        let step_part = maths::clamp(self.cursor.progress, 0.0, 1.0);
        let frac = (self.cursor.step_index as f64 + step_part) / route.num_steps() as f64;

        (frac * 100.0) as u8
    }

    /// Collect the terminal result of the last route, if one ended.
    pub fn take_result(&mut self) -> Option<RouteResult> {
        self.result.take()
    }

    pub fn status(&self) -> &StatusReport {
        &self.report
    }

    // -----------------------------------------------------------------------
    // TICK PROCESSING
    // -----------------------------------------------------------------------

    /// Process one tick at either rate.
    fn tick(&mut self, input: &TickInput) -> Option<DriveDems> {
        let snap = input.snapshot;

        if self.mode == EngineMode::Idle {
            self.update_report(&snap);
            return None;
        }

        self.odometry.update(snap.left_ticks, snap.right_ticks);

        let dems = match self.mode {
            EngineMode::Idle => None,
            EngineMode::LoadStep => self.load_step(&snap),
            EngineMode::Driving => self.drive_tick(&snap, input.rate),
            EngineMode::StepDone => self.step_done(),
        };

        self.update_report(&snap);

        if input.rate == TickRate::Ms100 {
            if let Err(e) = self.write() {
                warn!("Could not archive route engine report: {}", e);
            }
        }

        dems
    }

    /// Judge the current step and, on the control rate, produce demands.
    fn drive_tick(&mut self, snap: &NavSnapshot, rate: TickRate) -> Option<DriveDems> {
        let step = match self.current_step.clone() {
            Some(s) => s,
            None => {
                self.mode = EngineMode::Idle;
                return Some(DriveDems::stop());
            }
        };

        let reading = magnets::decode(snap.magnet_bitmask);
        let discovered = self.track_beacon(&reading);

        match step.kind {
            StepKind::Norm => {
                let denom = step.dx_cm + self.cursor.step_distance_offset_cm;
                self.cursor.progress = completion::straight_progress(
                    self.odometry.step_left_cm(),
                    self.odometry.step_right_cm(),
                    denom,
                );

                match completion::judge_norm(
                    &self.params,
                    step.dx_cm,
                    self.cursor.progress,
                    discovered,
                    self.cursor.retry_active,
                    snap.implement_current_amps,
                ) {
                    NormOutcome::InProgress => {}
                    NormOutcome::BeaconFound => {
                        if self.cursor.retry_active {
                            info!(
                                "Beacon recovered while backtracking, retrying step {}",
                                self.cursor.step_index + 1
                            );
                            self.cursor.retry_active = false;
                        } else if self.cursor.retry_count != 0 {
                            // Back on track after a successful retry.
                            self.cursor.retry_count = 0;
                        }
                        self.complete_step();
                    }
                    NormOutcome::Overrun => return self.handle_search_failure(),
                }
            }
            StepKind::NormNoMagnet => {
                self.cursor.progress = completion::straight_progress(
                    self.odometry.step_left_cm(),
                    self.odometry.step_right_cm(),
                    step.dx_cm,
                );

                if completion::judge_no_magnet(self.cursor.progress) {
                    self.complete_step();
                }
            }
            StepKind::TurnLeft | StepKind::TurnRight => {
                let inside_cm = match step.kind {
                    StepKind::TurnLeft => self.odometry.step_left_cm(),
                    _ => self.odometry.step_right_cm(),
                };

                self.cursor.progress = completion::turn_progress(
                    &self.params,
                    inside_cm,
                    self.cursor.diagonal_cm,
                    self.cursor.desired_heading_deg,
                    self.cursor.turn_angle_deg,
                    snap.heading_deg,
                );

                if completion::judge_turn(&self.params, self.cursor.progress) {
                    self.complete_step();
                }
            }
            StepKind::Left90 | StepKind::Right90 => {
                let target = self.cursor.desired_heading_deg + self.cursor.magnet_correction_deg;

                self.cursor.progress =
                    completion::pivot_progress(target, self.cursor.turn_angle_deg, snap.heading_deg);

                if completion::judge_pivot(&self.params, target, snap.heading_deg) {
                    self.complete_step();
                }
            }
        }

        if self.mode == EngineMode::Driving && rate == TickRate::Ms100 {
            let dems = self.driving_dems(&step, snap);
            trace!(
                "Step {} dems: L {:.0} R {:.0} impl {:.0}, progress {:.3}",
                self.cursor.step_index,
                dems.left_speed,
                dems.right_speed,
                dems.implement_speed,
                self.cursor.progress
            );
            Some(dems)
        } else {
            None
        }
    }

    /// Demands for the current step on the control rate.
    fn driving_dems(&mut self, step: &RouteStep, snap: &NavSnapshot) -> DriveDems {
        match step.kind {
            StepKind::Norm | StepKind::NormNoMagnet => correction::straight_dems(
                &self.params,
                &mut self.cursor,
                snap.heading_deg,
                snap.implement_current_amps,
            ),
            StepKind::TurnLeft | StepKind::TurnRight => {
                correction::turn_dems(&self.params, &self.cursor, 1.0)
            }
            StepKind::Left90 | StepKind::Right90 => {
                let scale = correction::pivot_shape(&self.params, self.cursor.progress);
                correction::turn_dems(&self.params, &self.cursor, scale)
            }
        }
    }

    fn complete_step(&mut self) {
        self.advance_pending = !self.cursor.retry_active;
        self.mode = EngineMode::StepDone;
    }

    /// The search window closed without a beacon. Either set up a backtrack
    /// over the previous step or declare the vehicle lost.
    fn handle_search_failure(&mut self) -> Option<DriveDems> {
        if self.cursor.retry_count >= self.params.retry_ceiling
            || self.cursor.retry_active
            || !self.params.backtrack_enabled
        {
            warn!(
                "Beacon search failed on step {} with {} retries used, vehicle is lost",
                self.cursor.step_index, self.cursor.retry_count
            );
            return Some(self.finish(RouteResult::BeaconLost));
        }

        self.cursor.retry_count += 1;
        self.cursor.retry_active = true;
        if self.cursor.step_index > 0 {
            self.cursor.step_index -= 1;
        }
        self.advance_pending = false;
        self.mode = EngineMode::StepDone;

        warn!(
            "No beacon inside the search window, reversing over step {} (retry {}/{})",
            self.cursor.step_index, self.cursor.retry_count, self.params.retry_ceiling
        );

        None
    }

    /// Advance the cursor after a completed step, or reload for a backtrack.
    fn step_done(&mut self) -> Option<DriveDems> {
        if !self.advance_pending {
            self.mode = EngineMode::LoadStep;
            return None;
        }

        let num_steps = match &self.route {
            Some(r) => r.num_steps(),
            None => {
                self.mode = EngineMode::Idle;
                return Some(DriveDems::stop());
            }
        };

        self.cursor.step_index += 1;

        if self.cursor.step_index >= num_steps {
            if self.cursor.passes_remaining > 1 {
                self.cursor.passes_remaining -= 1;
                self.cursor.step_index = 0;
                info!(
                    "Route pass complete, {} pass(es) remaining",
                    self.cursor.passes_remaining
                );
                self.mode = EngineMode::LoadStep;
                None
            } else {
                Some(self.finish(RouteResult::Finished))
            }
        } else {
            self.mode = EngineMode::LoadStep;
            None
        }
    }

    /// End the route with the given result and return the stop demand set.
    fn finish(&mut self, result: RouteResult) -> DriveDems {
        match result {
            RouteResult::Finished => info!("Route complete"),
            RouteResult::BeaconLost => warn!("Route aborted: beacon lost"),
        }

        self.result = Some(result);
        self.report.result = Some(result);
        self.route = None;
        self.current_step = None;
        self.mode = EngineMode::Idle;

        DriveDems::stop()
    }

    /// Latch the next step from the route table and the current snapshot.
    ///
    /// Computes the step's demand set, ramp flags, beacon correction angle
    /// and the desired heading, then hands over to `Driving`. Returns the
    /// step's initial demands.
    fn load_step(&mut self, snap: &NavSnapshot) -> Option<DriveDems> {
        let (step, prev, next) = {
            let route = match &self.route {
                Some(r) => r,
                None => {
                    self.mode = EngineMode::Idle;
                    return Some(DriveDems::stop());
                }
            };

            let idx = self.cursor.step_index;
            let step = match route.steps.get(idx) {
                Some(s) => s.clone(),
                None => {
                    self.mode = EngineMode::Idle;
                    return Some(DriveDems::stop());
                }
            };
            let prev = if idx > 0 {
                route.steps.get(idx - 1).cloned()
            } else {
                None
            };
            let next = route.steps.get(idx + 1).cloned();

            (step, prev, next)
        };

        self.odometry.reset_step();

        self.cursor.progress = 0.0;
        self.cursor.accelerating = false;
        self.cursor.decelerating = false;
        self.cursor.direction_changed = false;

        // Ramp flags and straight-run continuity from the neighbouring steps.
        let mut prev_norm_same_dir = false;
        match &prev {
            Some(p) => {
                if p.kind != StepKind::Norm && self.params.ramp_enabled {
                    self.cursor.accelerating = true;
                }
                if p.kind == StepKind::Norm
                    && p.right_dir != step.right_dir
                    && p.left_dir != step.left_dir
                {
                    if self.params.ramp_enabled {
                        self.cursor.accelerating = true;
                    }
                    self.cursor.direction_changed = true;
                } else if p.kind == StepKind::Norm
                    && p.right_dir == step.right_dir
                    && p.left_dir == step.left_dir
                {
                    prev_norm_same_dir = true;
                }
            }
            None => {
                if self.params.ramp_enabled {
                    self.cursor.accelerating = true;
                }
            }
        }

        // A following turn means slowing into the corner; a following
        // corrected straight run is the projection target while turning.
        let mut next_correction: Option<&RouteStep> = None;
        match &next {
            Some(n) => {
                if !n.is_straight() {
                    if self.params.ramp_enabled {
                        self.cursor.decelerating = true;
                    }
                } else if n.magnet_target_cm.is_some() {
                    next_correction = Some(n);
                }
            }
            None => {
                if self.params.ramp_enabled {
                    self.cursor.decelerating = true;
                }
            }
        }

        // Beacon correction angle for this step.
        let reading = magnets::decode(snap.magnet_bitmask);
        let mut magnet_cm = reading.offset_cm;
        self.cursor.step_distance_offset_cm = 0.0;

        if let (Some(target), StepKind::Norm, false) =
            (step.magnet_target_cm, step.kind, self.cursor.retry_active)
        {
            if magnet_cm.is_none() && self.cursor.prev_turn_angle_deg != 0.0 {
                // No beacon under the bar but the last step was a turn:
                // project the beacon latched before the turn into this
                // step's frame.
                if let Some(prev_mag) = self.cursor.prev_magnet_offset_cm {
                    let rad = self.cursor.prev_turn_angle_deg.to_radians();
                    magnet_cm = Some(rad.cos() * prev_mag);
                    self.cursor.step_distance_offset_cm = rad.sin() * prev_mag;
                }
            }

            if magnet_cm.is_none() {
                // Nothing to correct against; treat the beacon as exactly on
                // target so the correction angle comes out zero.
                magnet_cm = Some(target);
            }

            let mut lateral_err = match magnet_cm {
                Some(m) => m - target,
                None => 0.0,
            };
            if step.is_reverse() {
                lateral_err = -lateral_err;
                self.cursor.step_distance_offset_cm = -self.cursor.step_distance_offset_cm;
            }

            let denom = step.dx_cm + self.cursor.step_distance_offset_cm;
            self.cursor.magnet_correction_deg = (lateral_err / denom).atan().to_degrees();
        } else if let (Some(n), true, Some(seen)) = (
            next_correction,
            step.turn_angle_deg != 0.0,
            magnet_cm,
        ) {
            // Turning with a beacon in view and a corrected straight run
            // ahead: project the beacon across the turn and pre-compute the
            // next step's correction now, so the pivot already aims at the
            // corrected heading.
            let rad = step.turn_angle_deg.to_radians();
            let projected = rad.cos() * seen;
            let mut offset = rad.sin() * seen;

            let target = n.magnet_target_cm.unwrap_or(0.0);
            let mut lateral_err = projected - target;
            if n.is_reverse() {
                lateral_err = -lateral_err;
                offset = -offset;
            }

            magnet_cm = Some(projected);
            self.cursor.step_distance_offset_cm = offset;
            self.cursor.magnet_correction_deg =
                (lateral_err / (n.dx_cm + offset)).atan().to_degrees();
        } else if !self.cursor.retry_active {
            self.cursor.magnet_correction_deg = 0.0;
        }

        // A short straight run amplifies lateral error into large angles;
        // clamp so one noisy reading cannot slew the vehicle into the feed
        // table.
        if step.kind == StepKind::Norm && step.dx_cm < self.params.short_step_cm {
            self.cursor.magnet_correction_deg = maths::clamp(
                self.cursor.magnet_correction_deg,
                -self.params.short_step_clamp_deg,
                self.params.short_step_clamp_deg,
            );
        }

        // Demand set: backtracking drives the previous step mirrored.
        if self.cursor.retry_active {
            self.cursor.left_dir = step.left_dir.opposite();
            self.cursor.right_dir = step.right_dir.opposite();
        } else {
            self.cursor.left_dir = step.left_dir;
            self.cursor.right_dir = step.right_dir;
        }
        self.cursor.left_speed = step.left_speed;
        self.cursor.right_speed = step.right_speed;
        self.cursor.implement_on = step.implement_on && !self.cursor.retry_active;

        self.cursor.diagonal_cm = (step.dx_cm * step.dx_cm + step.dy_cm * step.dy_cm).sqrt();

        // Blend the previous step's residual lateral drift into the desired
        // heading, so a systematic offset does not accumulate pass by pass.
        if let (false, Some(target), Some(prev_delta)) = (
            self.cursor.retry_active,
            step.magnet_target_cm,
            self.cursor.prev_magnet_delta_cm,
        ) {
            let delta_now = match magnet_cm {
                Some(m) => m - target,
                None => 0.0,
            };
            let drift_cm = delta_now - prev_delta;
            let delta_angle = -(drift_cm / step.dx_cm).atan().to_degrees();

            let forward = !step.is_reverse();
            if self.cursor.direction_changed {
                if forward {
                    self.cursor.desired_heading_deg += (delta_angle
                        + self.cursor.prev_correction_deg)
                        * self.params.reversal_blend;
                } else {
                    self.cursor.desired_heading_deg -= (delta_angle
                        - self.cursor.prev_correction_deg)
                        * self.params.reversal_blend;
                }
            } else if step.kind == StepKind::Norm && forward && prev_norm_same_dir {
                self.cursor.desired_heading_deg -=
                    (delta_angle - self.cursor.prev_correction_deg) * self.params.same_dir_blend;
            } else if step.kind == StepKind::Norm && !forward && prev_norm_same_dir {
                self.cursor.desired_heading_deg +=
                    (delta_angle + self.cursor.prev_correction_deg) * self.params.same_dir_blend;
            }
        }

        // Turns rotate the desired heading by the step's turn angle.
        self.cursor.desired_heading_deg += step.turn_sign() * step.turn_angle_deg;
        self.cursor.desired_heading_deg = maths::wrap_180(self.cursor.desired_heading_deg);
        self.cursor.turn_angle_deg = step.turn_angle_deg;

        // Remember this step's beacon picture for the next load.
        self.cursor.prev_magnet_delta_cm = match (magnet_cm, step.magnet_target_cm) {
            (Some(m), Some(t)) => Some(m - t),
            _ => None,
        };
        if let Some(m) = magnet_cm {
            self.cursor.prev_magnet_offset_cm = Some(m);
        }
        self.cursor.prev_correction_deg = self.cursor.magnet_correction_deg;
        self.cursor.prev_turn_angle_deg = step.turn_angle_deg;

        // A beacon already under the bar must clear before it can count as
        // this step's end marker.
        self.cursor.magnet_latched = reading.visible();

        info!(
            "Step {} loaded: {:?}, dx {} cm, desired heading {:.1} deg, correction {:.2} deg{}",
            self.cursor.step_index,
            step.kind,
            step.dx_cm,
            self.cursor.desired_heading_deg,
            self.cursor.magnet_correction_deg,
            if self.cursor.retry_active {
                " (backtracking)"
            } else {
                ""
            }
        );

        let initial_scale = if self.cursor.accelerating { 0.5 } else { 1.0 };
        let dems = correction::turn_dems(&self.params, &self.cursor, initial_scale);

        self.current_step = Some(step);
        self.mode = EngineMode::Driving;

        Some(dems)
    }

    /// Track the beacon latch and report fresh detections.
    fn track_beacon(&mut self, reading: &MagnetReading) -> bool {
        if self.cursor.magnet_latched {
            if !reading.visible() {
                self.cursor.magnet_latched = false;
            }
            false
        } else {
            reading.visible()
        }
    }

    fn update_report(&mut self, snap: &NavSnapshot) {
        let target = self.cursor.desired_heading_deg + self.cursor.magnet_correction_deg;

        self.report = StatusReport {
            mode: self.mode,
            step_index: self.cursor.step_index,
            pass: self.cursor.passes_remaining,
            progress: self.cursor.progress,
            desired_heading_deg: self.cursor.desired_heading_deg,
            heading_error_deg: maths::heading_error_deg(target, snap.heading_deg),
            magnet_correction_deg: self.cursor.magnet_correction_deg,
            retry_count: self.cursor.retry_count,
            retry_active: self.cursor.retry_active,
            throttle_scale: self.cursor.throttle_scale,
            result: self.report.result,
        };
    }
}

impl State for RouteEngine {
    type InitData = &'static str;
    type InitError = RouteEngineError;

    type InputData = TickInput;
    type OutputData = Option<DriveDems>;
    type StatusReport = StatusReport;
    type ProcError = RouteEngineError;

    /// Initialise the engine from a parameter file and set up archiving.
    fn init(&mut self, init_data: Self::InitData, session: &Session) -> Result<(), Self::InitError> {
        self.params =
            param_loader::load(init_data).map_err(RouteEngineError::ParamLoadError)?;
        self.odometry = OdometryEstimator::new(self.params.distance_per_rev_cm);

        match Archiver::from_path(session, "route_engine.csv") {
            Ok(a) => self.arch_report = Some(a),
            Err(e) => warn!("Could not create route engine archive: {}", e),
        }

        Ok(())
    }

    fn proc(
        &mut self,
        input_data: &Self::InputData,
    ) -> Result<(Self::OutputData, Self::StatusReport), Self::ProcError> {
        let dems = self.tick(input_data);
        Ok((dems, self.report))
    }
}

impl Archived for RouteEngine {
    fn write(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(a) = self.arch_report.as_mut() {
            a.serialise(self.report)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::route::WheelDir;

    /// 50 cm per 10 000 tick wrap gives 200 ticks per cm.
    const TICKS_PER_CM: f64 = 200.0;

    /// Sensor 18 sits 5 cm from the bar centre.
    const BEACON_5CM: u32 = 1 << 18;
    const BEACON_CENTRE: u32 = 1 << 16;

    fn snap(heading_deg: f64, pos_cm: f64, magnet_bitmask: u32) -> NavSnapshot {
        let ticks = ((pos_cm * TICKS_PER_CM) as i64).rem_euclid(10_000) as u32;
        NavSnapshot {
            heading_deg,
            left_ticks: ticks,
            right_ticks: ticks,
            magnet_bitmask,
            implement_current_amps: 0.0,
        }
    }

    fn tick(engine: &mut RouteEngine, s: NavSnapshot) -> Option<DriveDems> {
        engine
            .proc(&TickInput {
                snapshot: s,
                rate: TickRate::Ms1,
            })
            .unwrap()
            .0
    }

    fn tick_ctrl(engine: &mut RouteEngine, s: NavSnapshot) -> Option<DriveDems> {
        engine
            .proc(&TickInput {
                snapshot: s,
                rate: TickRate::Ms100,
            })
            .unwrap()
            .0
    }

    fn norm_step(dx_cm: f64, magnet_target_cm: Option<f64>) -> RouteStep {
        RouteStep {
            kind: StepKind::Norm,
            dx_cm,
            dy_cm: 0.0,
            right_speed: 500.0,
            left_speed: 500.0,
            right_dir: WheelDir::Forward,
            left_dir: WheelDir::Forward,
            implement_on: false,
            turn_angle_deg: 0.0,
            magnet_target_cm,
        }
    }

    fn pivot_step(kind: StepKind, turn_angle_deg: f64) -> RouteStep {
        let (left_dir, right_dir) = match kind {
            StepKind::Left90 | StepKind::TurnLeft => (WheelDir::Reverse, WheelDir::Forward),
            _ => (WheelDir::Forward, WheelDir::Reverse),
        };
        RouteStep {
            kind,
            dx_cm: 0.0,
            dy_cm: 0.0,
            right_speed: 500.0,
            left_speed: 500.0,
            right_dir,
            left_dir,
            implement_on: false,
            turn_angle_deg,
            magnet_target_cm: None,
        }
    }

    fn route(steps: Vec<RouteStep>) -> Route {
        Route {
            id: 1,
            repeat_count: 1,
            steps,
        }
    }

    /// Drive `n_cm` forward in 1 cm per-tick increments, no beacon in view.
    fn drive(engine: &mut RouteEngine, pos_cm: &mut f64, n_cm: u32, heading_deg: f64) {
        for _ in 0..n_cm {
            *pos_cm += 1.0;
            tick(engine, snap(heading_deg, *pos_cm, 0));
        }
    }

    #[test]
    fn test_straight_step_completes_on_beacon() {
        let mut engine = RouteEngine::new(EngineParams::default());
        engine
            .start(route(vec![norm_step(100.0, Some(0.0))]), 0.0)
            .unwrap();

        // First tick loads the step; first step accelerates from half speed.
        let mut pos = 0.0;
        let dems = tick(&mut engine, snap(0.0, pos, 0)).unwrap();
        assert_eq!(engine.mode(), EngineMode::Driving);
        assert_eq!(dems.left_speed, 250.0);

        // Second tick seeds the odometry baseline.
        tick(&mut engine, snap(0.0, pos, 0));

        // A beacon before the window opens (lower bound 0.8 for a 100 cm
        // step) is ignored.
        drive(&mut engine, &mut pos, 30, 0.0);
        tick(&mut engine, snap(0.0, pos, BEACON_CENTRE));
        assert_eq!(engine.mode(), EngineMode::Driving);
        tick(&mut engine, snap(0.0, pos, 0));

        // Inside the window the beacon ends the step.
        drive(&mut engine, &mut pos, 55, 0.0);
        assert_eq!(engine.mode(), EngineMode::Driving);
        tick(&mut engine, snap(0.0, pos, BEACON_CENTRE));
        assert_eq!(engine.mode(), EngineMode::StepDone);

        // Single-step route: the advance finishes it with a stop demand.
        let dems = tick(&mut engine, snap(0.0, pos, BEACON_CENTRE)).unwrap();
        assert!(dems.is_stop());
        assert!(engine.is_idle());
        assert_eq!(engine.take_result(), Some(RouteResult::Finished));
    }

    #[test]
    fn test_no_magnet_step_completes_on_distance() {
        let mut engine = RouteEngine::new(EngineParams::default());
        let mut step = norm_step(60.0, None);
        step.kind = StepKind::NormNoMagnet;
        engine.start(route(vec![step]), 0.0).unwrap();

        let mut pos = 0.0;
        tick(&mut engine, snap(0.0, pos, 0));
        tick(&mut engine, snap(0.0, pos, 0));

        drive(&mut engine, &mut pos, 59, 0.0);
        assert_eq!(engine.mode(), EngineMode::Driving);

        drive(&mut engine, &mut pos, 1, 0.0);
        assert_eq!(engine.mode(), EngineMode::StepDone);
    }

    #[test]
    fn test_search_overrun_sets_up_backtrack() {
        let mut engine = RouteEngine::new(EngineParams::default());
        engine
            .start(
                route(vec![norm_step(100.0, Some(0.0)), norm_step(100.0, Some(0.0))]),
                0.0,
            )
            .unwrap();

        let mut pos = 0.0;
        tick(&mut engine, snap(0.0, pos, 0));
        tick(&mut engine, snap(0.0, pos, 0));

        // Step 0 completes on its beacon.
        drive(&mut engine, &mut pos, 85, 0.0);
        tick(&mut engine, snap(0.0, pos, BEACON_CENTRE));
        assert_eq!(engine.mode(), EngineMode::StepDone);

        // Advance, load step 1, seed.
        tick(&mut engine, snap(0.0, pos, 0));
        tick(&mut engine, snap(0.0, pos, 0));
        tick(&mut engine, snap(0.0, pos, 0));
        assert_eq!(engine.current_step_index(), Some(1));
        assert_eq!(engine.mode(), EngineMode::Driving);

        // Step 1 never sees a beacon; the window closes at 150 % of the
        // step length and the engine backs up over step 0.
        drive(&mut engine, &mut pos, 150, 0.0);
        assert_eq!(engine.mode(), EngineMode::StepDone);
        assert_eq!(engine.current_step_index(), Some(0));
        assert!(engine.cursor.retry_active);
        assert_eq!(engine.cursor.retry_count, 1);

        // Reload: step 0 drives mirrored while backtracking.
        tick(&mut engine, snap(0.0, pos, 0));
        tick(&mut engine, snap(0.0, pos, 0));
        assert_eq!(engine.mode(), EngineMode::Driving);
        assert_eq!(engine.cursor.left_dir, WheelDir::Reverse);
        assert_eq!(engine.cursor.right_dir, WheelDir::Reverse);

        // Finding the beacon while backtracking re-anchors the position and
        // the failed step is driven again, forwards.
        tick(&mut engine, snap(0.0, pos, 0));
        pos -= 20.0;
        tick(&mut engine, snap(0.0, pos, 0));
        tick(&mut engine, snap(0.0, pos, BEACON_CENTRE));
        assert_eq!(engine.mode(), EngineMode::StepDone);
        assert!(!engine.cursor.retry_active);

        tick(&mut engine, snap(0.0, pos, 0));
        tick(&mut engine, snap(0.0, pos, 0));
        assert_eq!(engine.current_step_index(), Some(1));
        assert_eq!(engine.cursor.left_dir, WheelDir::Forward);
        assert_eq!(engine.cursor.retry_count, 1);

        // This time the beacon is there; the retry budget clears.
        tick(&mut engine, snap(0.0, pos, 0));
        drive(&mut engine, &mut pos, 85, 0.0);
        tick(&mut engine, snap(0.0, pos, BEACON_CENTRE));
        assert_eq!(engine.cursor.retry_count, 0);

        let dems = tick(&mut engine, snap(0.0, pos, 0)).unwrap();
        assert!(dems.is_stop());
        assert_eq!(engine.take_result(), Some(RouteResult::Finished));
    }

    #[test]
    fn test_backtrack_failure_aborts() {
        let mut engine = RouteEngine::new(EngineParams::default());
        engine
            .start(route(vec![norm_step(100.0, Some(0.0))]), 0.0)
            .unwrap();

        let mut pos = 0.0;
        tick(&mut engine, snap(0.0, pos, 0));
        tick(&mut engine, snap(0.0, pos, 0));

        // Forward attempt overruns.
        drive(&mut engine, &mut pos, 151, 0.0);
        assert!(engine.cursor.retry_active);

        // Backtrack: load, seed, then overrun the widened window too.
        tick(&mut engine, snap(0.0, pos, 0));
        tick(&mut engine, snap(0.0, pos, 0));
        drive(&mut engine, &mut pos, 171, 0.0);

        assert!(engine.is_idle());
        assert_eq!(engine.take_result(), Some(RouteResult::BeaconLost));
    }

    #[test]
    fn test_retry_ceiling_aborts_route() {
        let mut engine = RouteEngine::new(EngineParams::default());
        engine
            .start(
                route(vec![norm_step(100.0, Some(0.0)), norm_step(100.0, Some(0.0))]),
                0.0,
            )
            .unwrap();

        let mut pos = 0.0;
        tick(&mut engine, snap(0.0, pos, 0));
        tick(&mut engine, snap(0.0, pos, 0));

        // Step 0 completes normally.
        drive(&mut engine, &mut pos, 85, 0.0);
        tick(&mut engine, snap(0.0, pos, BEACON_CENTRE));
        tick(&mut engine, snap(0.0, pos, 0));

        // Step 1 fails every forward attempt; every backtrack succeeds. The
        // retry budget is spent one failure at a time, and the eleventh
        // failure finds it empty.
        for attempt in 1..=11u8 {
            // Load step 1 and seed.
            tick(&mut engine, snap(0.0, pos, 0));
            tick(&mut engine, snap(0.0, pos, 0));
            assert_eq!(engine.current_step_index(), Some(1));

            drive(&mut engine, &mut pos, 151, 0.0);

            if attempt == 11 {
                break;
            }
            assert_eq!(engine.cursor.retry_count, attempt);
            assert_eq!(engine.current_step_index(), Some(0));

            // Backtrack finds the step 0 beacon again.
            tick(&mut engine, snap(0.0, pos, 0));
            tick(&mut engine, snap(0.0, pos, 0));
            pos -= 10.0;
            tick(&mut engine, snap(0.0, pos, 0));
            tick(&mut engine, snap(0.0, pos, BEACON_CENTRE));
            tick(&mut engine, snap(0.0, pos, 0));
        }

        assert!(engine.is_idle());
        assert_eq!(engine.take_result(), Some(RouteResult::BeaconLost));
    }

    #[test]
    fn test_implement_overcurrent_forces_step_end() {
        let mut engine = RouteEngine::new(EngineParams::default());
        engine
            .start(
                route(vec![norm_step(100.0, Some(0.0)), norm_step(100.0, Some(0.0))]),
                0.0,
            )
            .unwrap();

        let mut pos = 0.0;
        tick(&mut engine, snap(0.0, pos, 0));
        tick(&mut engine, snap(0.0, pos, 0));
        drive(&mut engine, &mut pos, 85, 0.0);
        tick(&mut engine, snap(0.0, pos, BEACON_CENTRE));
        tick(&mut engine, snap(0.0, pos, 0));
        tick(&mut engine, snap(0.0, pos, 0));
        assert_eq!(engine.current_step_index(), Some(1));

        // A stalled implement ends the step through the lost-position path
        // even at low progress.
        let mut s = snap(0.0, pos, 0);
        s.implement_current_amps = 50.0;
        tick(&mut engine, s);

        assert_eq!(engine.current_step_index(), Some(0));
        assert!(engine.cursor.retry_active);
    }

    #[test]
    fn test_pivot_rotates_desired_heading_and_completes() {
        let mut engine = RouteEngine::new(EngineParams::default());
        engine
            .start(route(vec![pivot_step(StepKind::Right90, 90.0)]), 10.0)
            .unwrap();

        tick(&mut engine, snap(10.0, 0.0, 0));
        assert_eq!(engine.mode(), EngineMode::Driving);
        assert!((engine.cursor.desired_heading_deg - 100.0).abs() < 1e-9);

        // Early in the pivot the shaped speed is near the floor, with the
        // wheels counter-rotating.
        let dems = tick_ctrl(&mut engine, snap(10.0, 0.0, 0)).unwrap();
        assert!(dems.left_speed > 0.0 && dems.right_speed < 0.0);
        assert!(dems.left_speed < 150.0);

        tick(&mut engine, snap(60.0, 0.0, 0));
        assert_eq!(engine.mode(), EngineMode::Driving);

        // Within a degree of the target the pivot is complete.
        tick(&mut engine, snap(99.5, 0.0, 0));
        assert_eq!(engine.mode(), EngineMode::StepDone);

        tick(&mut engine, snap(99.5, 0.0, 0));
        assert_eq!(engine.take_result(), Some(RouteResult::Finished));
    }

    #[test]
    fn test_pivot_desired_heading_wraps() {
        let mut engine = RouteEngine::new(EngineParams::default());
        engine
            .start(route(vec![pivot_step(StepKind::Right90, 90.0)]), 150.0)
            .unwrap();

        tick(&mut engine, snap(150.0, 0.0, 0));
        assert!((engine.cursor.desired_heading_deg - -120.0).abs() < 1e-9);
    }

    #[test]
    fn test_gentle_turn_completes_on_heading_blend() {
        let mut engine = RouteEngine::new(EngineParams::default());
        engine
            .start(route(vec![pivot_step(StepKind::TurnLeft, 30.0)]), 0.0)
            .unwrap();

        tick(&mut engine, snap(0.0, 0.0, 0));
        assert!((engine.cursor.desired_heading_deg - -30.0).abs() < 1e-9);

        tick(&mut engine, snap(-29.0, 0.0, 0));
        assert_eq!(engine.mode(), EngineMode::Driving);

        tick(&mut engine, snap(-29.2, 0.0, 0));
        assert_eq!(engine.mode(), EngineMode::StepDone);
    }

    #[test]
    fn test_beacon_projection_across_turn() {
        let mut engine = RouteEngine::new(EngineParams::default());
        engine
            .start(
                route(vec![
                    norm_step(100.0, Some(0.0)),
                    pivot_step(StepKind::Right90, 45.0),
                    norm_step(100.0, Some(0.0)),
                ]),
                0.0,
            )
            .unwrap();

        let mut pos = 0.0;
        tick(&mut engine, snap(0.0, pos, 0));
        tick(&mut engine, snap(0.0, pos, 0));

        // Step 0 ends on a beacon 5 cm off centre.
        drive(&mut engine, &mut pos, 85, 0.0);
        tick(&mut engine, snap(0.0, pos, BEACON_5CM));
        assert_eq!(engine.mode(), EngineMode::StepDone);

        // The turn loads with the beacon still in view: its offset is
        // projected across the 45 degree turn into the next step's frame
        // and the pivot already aims at the corrected heading.
        tick(&mut engine, snap(0.0, pos, BEACON_5CM));
        tick(&mut engine, snap(0.0, pos, BEACON_5CM));
        assert_eq!(engine.current_step_index(), Some(1));
        assert!((engine.cursor.desired_heading_deg - 45.0).abs() < 1e-9);
        assert!((engine.cursor.magnet_correction_deg - 1.956).abs() < 1e-2);

        // Complete the pivot near the corrected target.
        tick(&mut engine, snap(46.9, pos, 0));
        assert_eq!(engine.mode(), EngineMode::StepDone);

        // Step 2 loads with the bar clear: the projection carries the
        // latched beacon into its correction instead of dropping it.
        tick(&mut engine, snap(46.9, pos, 0));
        tick(&mut engine, snap(46.9, pos, 0));
        assert_eq!(engine.current_step_index(), Some(2));
        assert!((engine.cursor.magnet_correction_deg - 1.397).abs() < 1e-2);
        assert!((engine.cursor.step_distance_offset_cm - 2.5).abs() < 1e-2);
    }

    #[test]
    fn test_consecutive_straight_steps_blend_desired_heading() {
        let mut engine = RouteEngine::new(EngineParams::default());
        engine
            .start(
                route(vec![norm_step(100.0, Some(0.0)), norm_step(100.0, Some(0.0))]),
                0.0,
            )
            .unwrap();

        let mut pos = 0.0;
        tick(&mut engine, snap(0.0, pos, 0));
        tick(&mut engine, snap(0.0, pos, 0));

        drive(&mut engine, &mut pos, 85, 0.0);
        tick(&mut engine, snap(0.0, pos, BEACON_5CM));
        tick(&mut engine, snap(0.0, pos, BEACON_5CM));

        // Step 1 loads over the same beacon, 5 cm off target: half the
        // measured drift angle is blended into the desired heading and the
        // full offset becomes the beacon correction.
        tick(&mut engine, snap(0.0, pos, BEACON_5CM));
        assert_eq!(engine.current_step_index(), Some(1));
        assert!((engine.cursor.magnet_correction_deg - 2.862).abs() < 1e-2);
        assert!((engine.cursor.desired_heading_deg - 1.431).abs() < 1e-2);
    }

    #[test]
    fn test_start_rejects_when_driving() {
        let mut engine = RouteEngine::new(EngineParams::default());
        engine
            .start(route(vec![norm_step(100.0, Some(0.0))]), 0.0)
            .unwrap();

        let result = engine.start(route(vec![norm_step(50.0, None)]), 0.0);
        assert!(matches!(result, Err(RouteEngineError::AlreadyDriving)));
    }

    #[test]
    fn test_abort_stops_and_clears_route() {
        let mut engine = RouteEngine::new(EngineParams::default());
        engine
            .start(route(vec![norm_step(100.0, Some(0.0))]), 0.0)
            .unwrap();
        tick(&mut engine, snap(0.0, 0.0, 0));

        let dems = engine.abort();
        assert!(dems.is_stop());
        assert!(engine.is_idle());
        assert_eq!(engine.take_result(), None);
    }

    #[test]
    fn test_abort_mid_backtrack_clears_retry_state() {
        let mut engine = RouteEngine::new(EngineParams::default());
        engine
            .start(route(vec![norm_step(100.0, Some(0.0))]), 0.0)
            .unwrap();

        let mut pos = 0.0;
        tick(&mut engine, snap(0.0, pos, 0));
        tick(&mut engine, snap(0.0, pos, 0));

        // Overrun into a backtrack, then abort while it is pending.
        drive(&mut engine, &mut pos, 151, 0.0);
        assert!(engine.cursor.retry_active);
        assert_eq!(engine.cursor.retry_count, 1);

        let dems = engine.abort();
        assert!(dems.is_stop());

        // Reports written while idle carry no backtrack flags.
        tick(&mut engine, snap(0.0, pos, 0));
        assert!(!engine.status().retry_active);
        assert_eq!(engine.status().retry_count, 0);
    }

    #[test]
    fn test_repeat_count_drives_multiple_passes() {
        let mut engine = RouteEngine::new(EngineParams::default());
        let mut r = route(vec![norm_step(60.0, None)]);
        r.steps[0].kind = StepKind::NormNoMagnet;
        r.repeat_count = 2;
        engine.start(r, 0.0).unwrap();

        let mut pos = 0.0;
        tick(&mut engine, snap(0.0, pos, 0));
        tick(&mut engine, snap(0.0, pos, 0));
        drive(&mut engine, &mut pos, 60, 0.0);
        assert_eq!(engine.mode(), EngineMode::StepDone);

        // End of pass one: back to step 0, still driving.
        tick(&mut engine, snap(0.0, pos, 0));
        assert_eq!(engine.mode(), EngineMode::LoadStep);
        tick(&mut engine, snap(0.0, pos, 0));
        tick(&mut engine, snap(0.0, pos, 0));
        assert_eq!(engine.current_step_index(), Some(0));
        assert_eq!(engine.mode(), EngineMode::Driving);

        drive(&mut engine, &mut pos, 60, 0.0);
        assert_eq!(engine.mode(), EngineMode::StepDone);
        tick(&mut engine, snap(0.0, pos, 0));
        assert!(engine.is_idle());
        assert_eq!(engine.take_result(), Some(RouteResult::Finished));
    }

    #[test]
    fn test_progress_percent_tracks_cursor() {
        let mut engine = RouteEngine::new(EngineParams::default());
        let mut s0 = norm_step(100.0, None);
        s0.kind = StepKind::NormNoMagnet;
        let mut s1 = s0.clone();
        s1.dx_cm = 100.0;
        engine.start(route(vec![s0, s1]), 0.0).unwrap();

        assert_eq!(engine.progress_percent(), 0);

        let mut pos = 0.0;
        tick(&mut engine, snap(0.0, pos, 0));
        tick(&mut engine, snap(0.0, pos, 0));
        drive(&mut engine, &mut pos, 50, 0.0);
        assert_eq!(engine.progress_percent(), 25);

        drive(&mut engine, &mut pos, 51, 0.0);
        tick(&mut engine, snap(0.0, pos, 0));
        tick(&mut engine, snap(0.0, pos, 0));
        tick(&mut engine, snap(0.0, pos, 0));
        drive(&mut engine, &mut pos, 50, 0.0);
        assert_eq!(engine.progress_percent(), 75);
    }
}
