//! # Drive manager
//!
//! Top-level state machine around the route engine. Owns the lifecycle of a
//! route drive: route selection, the pre-drive indication period, pause and
//! resume, and the battery and safety interlocks. The manager is the only
//! component that posts demands to the vehicle; the engine just computes
//! them.
//!
//! Mode structure:
//!
//! ```text
//! Init -> Idle -> WaitForStart -> Indicate -> Driving <-> Pause
//!           ^____________________________________|
//! ```
//!
//! Every terminal transition back to `Idle` records a [`DriveStatus`] saying
//! why the drive ended.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod params;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{info, warn};
use serde::Serialize;

// Internal
use crate::route::{Route, RouteError, RouteProvider};
use crate::route_engine::{
    NavSnapshot, RouteEngine, RouteEngineError, RouteResult, TickInput, TickRate,
};
use util::module::State;
use util::params as param_loader;
use util::session::Session;
use vehicle_if::{BatteryLevel, DriveCmd, Vehicle};

pub use params::DriveMgrParams;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Drive manager mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DriveMode {
    /// Power-on state, before the first tick.
    Init,

    /// No route armed.
    Idle,

    /// A route is armed, waiting for a play command (or starting
    /// automatically for scheduler-armed routes).
    WaitForStart,

    /// Indicator running before the vehicle starts to move.
    Indicate,

    /// The route engine is driving.
    Driving,

    /// Drive suspended with the route cursor preserved.
    Pause,
}

/// Why the last route drive ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DriveStatus {
    /// All steps completed.
    Finished,

    /// The engine lost the beacon track.
    AbortedBeaconLost,

    /// A stop command ended the drive.
    AbortedStop,

    /// The battery fell to critical mid-drive.
    AbortedBattery,
}

/// Errors which can occur in the drive manager.
#[derive(Debug, thiserror::Error)]
pub enum DriveMgrError {
    #[error("Could not load drive manager parameters: {0}")]
    ParamLoadError(param_loader::LoadError),

    #[error("Route engine error: {0}")]
    EngineError(#[from] RouteEngineError),

    #[error("Could not load the selected route: {0}")]
    RouteError(#[from] RouteError),
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Drive manager state.
pub struct DriveMgr {
    params: DriveMgrParams,

    mode: DriveMode,

    engine: RouteEngine,

    routes: Box<dyn RouteProvider>,

    /// The armed route, between selection and engine start.
    armed_route: Option<Route>,

    /// True when the armed route came from the scheduler and starts without
    /// a play command.
    auto_play: bool,

    indicate_remaining_ms: u64,

    /// Outcome of the most recent drive.
    status: Option<DriveStatus>,

    /// Set after a critical-battery abort; blocks new starts until the
    /// battery reads good again.
    battery_blocked: bool,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl DriveMgr {
    /// Create a manager around an already-configured engine.
    pub fn new(params: DriveMgrParams, engine: RouteEngine, routes: Box<dyn RouteProvider>) -> Self {
        Self {
            params,
            mode: DriveMode::Init,
            engine,
            routes,
            armed_route: None,
            auto_play: false,
            indicate_remaining_ms: 0,
            status: None,
            battery_blocked: false,
        }
    }

    /// Initialise from parameter files and set up engine archiving.
    pub fn init(&mut self, params_path: &'static str, session: &Session) -> Result<(), DriveMgrError> {
        self.params = param_loader::load(params_path).map_err(DriveMgrError::ParamLoadError)?;

        // The engine's InitData is a path borrowed for its lifetime; leak the
        // configured name once at startup.
        let engine_params_file: &'static str =
            Box::leak(self.params.engine_params_file.clone().into_boxed_str());
        self.engine.init(engine_params_file, session)?;

        Ok(())
    }

    pub fn mode(&self) -> DriveMode {
        self.mode
    }

    /// Outcome of the most recent drive, if any ended since the last idle
    /// selection.
    pub fn status(&self) -> Option<DriveStatus> {
        self.status
    }

    pub fn is_route_finished(&self) -> bool {
        self.status == Some(DriveStatus::Finished)
    }

    /// Step index being driven, 255 when no route is active.
    pub fn current_step_index(&self) -> u8 {
        self.engine
            .current_step_index()
            .map(|i| i as u8)
            .unwrap_or(255)
    }

    /// Whole-route progress, 0 to 100.
    pub fn progress_percent(&self) -> u8 {
        self.engine.progress_percent()
    }

    /// Select and arm a route, as the remote or display would.
    ///
    /// In `Idle` or `WaitForStart` this arms the route; while driving it
    /// aborts the current route first.
    pub fn start_route<V: Vehicle>(
        &mut self,
        route_id: u8,
        vehicle: &mut V,
    ) -> Result<(), DriveMgrError> {
        if self.mode == DriveMode::Driving {
            let dems = self.engine.abort();
            vehicle.post_dems(&dems);
        }
        self.arm_route(route_id, false, vehicle.battery_level())
    }

    /// Suspend an executing drive, preserving its progress.
    pub fn pause<V: Vehicle>(&mut self, vehicle: &mut V) {
        if self.mode == DriveMode::Driving {
            self.enter_pause(vehicle);
        }
    }

    /// Resume a paused drive. Ignored while the safety switch is held.
    pub fn resume<V: Vehicle>(&mut self, vehicle: &mut V) {
        if self.mode == DriveMode::Pause && !vehicle.safety_switch_active() {
            info!("Drive resumed at step {}", self.current_step_index());
            self.mode = DriveMode::Driving;
        }
    }

    /// Hard abort from any state: stop all motors and return to `Idle`.
    pub fn abort<V: Vehicle>(&mut self, vehicle: &mut V) {
        if !matches!(self.mode, DriveMode::Init | DriveMode::Idle) {
            self.abort_with(DriveStatus::AbortedStop, vehicle);
        }
    }

    /// Fast tick: step completion checks while driving.
    pub fn tick_1ms<V: Vehicle>(&mut self, vehicle: &mut V) -> Result<(), DriveMgrError> {
        if self.mode != DriveMode::Driving {
            return Ok(());
        }

        let input = TickInput {
            snapshot: NavSnapshot::capture(vehicle),
            rate: TickRate::Ms1,
        };
        let (dems, _) = self.engine.proc(&input)?;
        if let Some(d) = dems {
            vehicle.post_dems(&d);
        }

        self.collect_engine_result(vehicle);
        Ok(())
    }

    /// Control tick: command handling, interlocks and drive demands.
    pub fn tick_100ms<V: Vehicle>(
        &mut self,
        vehicle: &mut V,
        cmd: Option<DriveCmd>,
        scheduled_route: Option<u8>,
    ) -> Result<(), DriveMgrError> {
        let battery = vehicle.battery_level();

        // A critical battery ends any active drive on the next boundary and
        // locks out new starts until it recovers.
        if battery == BatteryLevel::Critical
            && !matches!(self.mode, DriveMode::Init | DriveMode::Idle)
        {
            warn!("Battery critical, aborting drive");
            self.abort_with(DriveStatus::AbortedBattery, vehicle);
            self.battery_blocked = true;
            return Ok(());
        }
        if self.battery_blocked && battery == BatteryLevel::Good {
            self.battery_blocked = false;
        }

        match self.mode {
            DriveMode::Init => {
                vehicle.set_indicator(false);
                self.mode = DriveMode::Idle;
            }
            DriveMode::Idle => {
                if let Some(DriveCmd::Stop) = cmd {
                    self.status = None;
                }
                self.handle_selection(cmd, scheduled_route, battery)?;
            }
            DriveMode::WaitForStart => match cmd {
                Some(DriveCmd::Stop) => {
                    info!("Armed route dropped");
                    self.armed_route = None;
                    self.auto_play = false;
                    self.mode = DriveMode::Idle;
                }
                Some(DriveCmd::SelectRoute { route_id }) => {
                    self.arm_route(route_id, false, battery)?;
                }
                Some(DriveCmd::Play) => self.begin_indication(vehicle),
                _ => {
                    if self.auto_play {
                        self.begin_indication(vehicle);
                    }
                }
            },
            DriveMode::Indicate => {
                if let Some(DriveCmd::Stop) = cmd {
                    vehicle.set_indicator(false);
                    self.armed_route = None;
                    self.auto_play = false;
                    self.mode = DriveMode::Idle;
                    return Ok(());
                }

                self.indicate_remaining_ms = self.indicate_remaining_ms.saturating_sub(100);
                if self.indicate_remaining_ms == 0 {
                    vehicle.set_indicator(false);
                    self.start_engine(vehicle)?;
                }
            }
            DriveMode::Driving => {
                match cmd {
                    Some(DriveCmd::Stop) => {
                        self.abort(vehicle);
                        return Ok(());
                    }
                    Some(DriveCmd::Pause) => {
                        self.pause(vehicle);
                        return Ok(());
                    }
                    Some(DriveCmd::SelectRoute { route_id }) => {
                        // Re-selection mid-drive aborts the current route and
                        // arms the new one from scratch.
                        self.start_route(route_id, vehicle)?;
                        return Ok(());
                    }
                    _ => {}
                }

                if vehicle.safety_switch_active() {
                    self.enter_pause(vehicle);
                    return Ok(());
                }

                let input = TickInput {
                    snapshot: NavSnapshot::capture(vehicle),
                    rate: TickRate::Ms100,
                };
                let (dems, _) = self.engine.proc(&input)?;
                if let Some(d) = dems {
                    vehicle.post_dems(&d);
                }

                self.collect_engine_result(vehicle);
            }
            DriveMode::Pause => match cmd {
                Some(DriveCmd::Stop) => self.abort(vehicle),
                Some(DriveCmd::Play) => self.resume(vehicle),
                _ => {}
            },
        }

        Ok(())
    }

    // -----------------------------------------------------------------------
    // INTERNALS
    // -----------------------------------------------------------------------

    /// Handle route selection commands while idle.
    fn handle_selection(
        &mut self,
        cmd: Option<DriveCmd>,
        scheduled_route: Option<u8>,
        battery: BatteryLevel,
    ) -> Result<(), DriveMgrError> {
        if let Some(DriveCmd::SelectRoute { route_id }) = cmd {
            self.arm_route(route_id, false, battery)?;
        } else if let Some(route_id) = scheduled_route {
            self.arm_route(route_id, true, battery)?;
        }
        Ok(())
    }

    /// Load and arm a route, if the battery allows a new start.
    ///
    /// A degraded battery still supports manual driving, but arming a new
    /// automatic route needs a good one.
    fn arm_route(
        &mut self,
        route_id: u8,
        auto_play: bool,
        battery: BatteryLevel,
    ) -> Result<(), DriveMgrError> {
        if battery != BatteryLevel::Good || self.battery_blocked {
            warn!("Route {} selection ignored: battery not good", route_id);
            self.mode = DriveMode::Idle;
            return Ok(());
        }

        let route = self.routes.load_route(route_id)?;
        info!(
            "Route {} armed ({} steps){}",
            route_id,
            route.num_steps(),
            if auto_play { " by scheduler" } else { "" }
        );

        self.armed_route = Some(route);
        self.auto_play = auto_play;
        self.status = None;
        self.mode = DriveMode::WaitForStart;
        Ok(())
    }

    fn begin_indication<V: Vehicle>(&mut self, vehicle: &mut V) {
        vehicle.set_indicator(true);
        self.indicate_remaining_ms = self.params.indicate_duration_ms;
        self.mode = DriveMode::Indicate;
    }

    fn start_engine<V: Vehicle>(&mut self, vehicle: &mut V) -> Result<(), DriveMgrError> {
        let route = match self.armed_route.take() {
            Some(r) => r,
            None => {
                self.mode = DriveMode::Idle;
                return Ok(());
            }
        };

        self.engine.start(route, vehicle.heading_deg())?;
        self.auto_play = false;
        self.mode = DriveMode::Driving;
        Ok(())
    }

    fn enter_pause<V: Vehicle>(&mut self, vehicle: &mut V) {
        info!("Drive paused at step {}", self.current_step_index());
        vehicle.post_dems(&vehicle_if::DriveDems::stop());
        self.mode = DriveMode::Pause;
    }

    fn abort_with<V: Vehicle>(&mut self, status: DriveStatus, vehicle: &mut V) {
        let dems = self.engine.abort();
        vehicle.post_dems(&dems);
        vehicle.set_indicator(false);
        self.armed_route = None;
        self.auto_play = false;
        self.status = Some(status);
        self.mode = DriveMode::Idle;
    }

    /// Fold a terminal engine result into the manager state.
    fn collect_engine_result<V: Vehicle>(&mut self, vehicle: &mut V) {
        if let Some(result) = self.engine.take_result() {
            vehicle.post_dems(&vehicle_if::DriveDems::stop());
            self.status = Some(match result {
                RouteResult::Finished => DriveStatus::Finished,
                RouteResult::BeaconLost => DriveStatus::AbortedBeaconLost,
            });
            self.mode = DriveMode::Idle;
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
