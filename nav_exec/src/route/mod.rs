//! # Route table module
//!
//! A route is an immutable, ordered list of steps describing one feeding run
//! through the barn: straight runs along the feed tables and turns between
//! them. Routes are authored as TOML parameter files and validated when
//! loaded; a route that passes validation can be driven without any further
//! mid-drive checks.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::{Deserialize, Serialize};

// Internal
use util::params;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// The kind of manoeuvre a single route step performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Straight run with magnet beacon correction.
    Norm,

    /// Straight run judged purely on encoders, beacons ignored.
    NormNoMagnet,

    /// Gentle left turn judged on the heading/encoder blend.
    TurnLeft,

    /// Gentle right turn judged on the heading/encoder blend.
    TurnRight,

    /// Pivot left through the step's turn angle with closed-loop shaping.
    Left90,

    /// Pivot right through the step's turn angle with closed-loop shaping.
    Right90,
}

/// Commanded spin direction of one wheel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WheelDir {
    Forward,
    Reverse,
}

/// Errors produced when loading or validating a route.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("Could not load route file: {0}")]
    LoadError(params::LoadError),

    #[error("No route with id {0} is known")]
    UnknownRoute(u8),

    #[error("Route {0} has no steps")]
    EmptyRoute(u8),

    #[error("Route {route}: step {step} is a straight run of zero length")]
    ZeroLengthStep { route: u8, step: usize },

    #[error("Route {route}: step {step} is a turn with zero turn angle")]
    ZeroTurnAngle { route: u8, step: usize },
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// One leg of a route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteStep {
    /// Manoeuvre kind.
    pub kind: StepKind,

    /// Distance delta along the step's axis, cm.
    #[serde(default)]
    pub dx_cm: f64,

    /// Distance delta across the step's axis, cm.
    #[serde(default)]
    pub dy_cm: f64,

    /// Nominal right wheel speed magnitude.
    pub right_speed: f64,

    /// Nominal left wheel speed magnitude.
    pub left_speed: f64,

    /// Right wheel spin direction.
    pub right_dir: WheelDir,

    /// Left wheel spin direction.
    pub left_dir: WheelDir,

    /// Run the implement (feed auger) during this step.
    #[serde(default)]
    pub implement_on: bool,

    /// Turn angle for turn steps, degrees. Zero for straight runs.
    #[serde(default)]
    pub turn_angle_deg: f64,

    /// Expected lateral beacon offset for this step, cm from the bar centre.
    /// `None` disables beacon correction on this step.
    #[serde(default)]
    pub magnet_target_cm: Option<f64>,
}

/// A complete, immutable route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    /// Route id, as selected from the remote/display/scheduler.
    pub id: u8,

    /// Number of complete passes of the step list to drive.
    pub repeat_count: u8,

    /// The ordered step list.
    pub steps: Vec<RouteStep>,
}

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// Source of routes, by id.
///
/// The production implementation ([`ParamRoutes`]) reads route parameter
/// files; tests use [`InMemoryRoutes`].
pub trait RouteProvider {
    fn load_route(&self, route_id: u8) -> Result<Route, RouteError>;
}

/// Routes loaded from the `routes` parameter directory on demand.
pub struct ParamRoutes;

/// A fixed set of routes held in memory.
pub struct InMemoryRoutes(pub Vec<Route>);

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl WheelDir {
    pub fn opposite(self) -> Self {
        match self {
            WheelDir::Forward => WheelDir::Reverse,
            WheelDir::Reverse => WheelDir::Forward,
        }
    }
}

impl RouteStep {
    /// True for the straight-run kinds.
    pub fn is_straight(&self) -> bool {
        matches!(self.kind, StepKind::Norm | StepKind::NormNoMagnet)
    }

    /// True for any of the turn kinds.
    pub fn is_turn(&self) -> bool {
        !self.is_straight()
    }

    /// True when both wheels are commanded in reverse.
    pub fn is_reverse(&self) -> bool {
        self.left_dir == WheelDir::Reverse && self.right_dir == WheelDir::Reverse
    }

    /// Signed turn direction: -1 for left turns, +1 for right turns, 0 for
    /// straight runs.
    pub fn turn_sign(&self) -> f64 {
        match self.kind {
            StepKind::TurnLeft | StepKind::Left90 => -1.0,
            StepKind::TurnRight | StepKind::Right90 => 1.0,
            _ => 0.0,
        }
    }
}

impl Route {
    /// Load a route from the `routes` parameter directory.
    ///
    /// Route ids map to files named `routes/route_<id>.toml`.
    pub fn load(route_id: u8) -> Result<Self, RouteError> {
        let route: Route = params::load(&format!("routes/route_{}.toml", route_id))
            .map_err(RouteError::LoadError)?;

        route.validate()?;

        Ok(route)
    }

    /// Validate the route.
    ///
    /// An invalid route is a programming (authoring) error and must be
    /// rejected here, at load time, so the engine can index steps freely
    /// while driving.
    pub fn validate(&self) -> Result<(), RouteError> {
        if self.steps.is_empty() {
            return Err(RouteError::EmptyRoute(self.id));
        }

        for (i, step) in self.steps.iter().enumerate() {
            if step.is_straight() && step.dx_cm <= 0.0 {
                return Err(RouteError::ZeroLengthStep {
                    route: self.id,
                    step: i,
                });
            }
            if step.is_turn() && step.turn_angle_deg == 0.0 {
                return Err(RouteError::ZeroTurnAngle {
                    route: self.id,
                    step: i,
                });
            }
        }

        Ok(())
    }

    /// Number of steps in one pass of the route.
    pub fn num_steps(&self) -> usize {
        self.steps.len()
    }
}

impl RouteProvider for ParamRoutes {
    fn load_route(&self, route_id: u8) -> Result<Route, RouteError> {
        Route::load(route_id)
    }
}

impl RouteProvider for InMemoryRoutes {
    fn load_route(&self, route_id: u8) -> Result<Route, RouteError> {
        let route = self
            .0
            .iter()
            .find(|r| r.id == route_id)
            .cloned()
            .ok_or(RouteError::UnknownRoute(route_id))?;

        route.validate()?;

        Ok(route)
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
