//! # Software-simulated vehicle
//!
//! Pure-software implementation of the [`Vehicle`] trait, used by unit tests
//! and by the `nav_exec` executable. The kinematics are deliberately
//! crude: wheel demands integrate straight into encoder counts, and heading
//! follows the differential wheel speed over the track width. Good enough to
//! exercise the route engine end to end without any hardware attached.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use crate::cmd::BatteryLevel;
use crate::vehicle::Vehicle;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Encoder counts per wheel revolution, as for the real inverters.
pub const ENCODER_MODULUS: u32 = 10_000;

/// Distance one wheel revolution covers, cm.
pub const DISTANCE_PER_REV_CM: f64 = 50.0;

/// Track width between the drive wheels, cm.
pub const TRACK_WIDTH_CM: f64 = 80.0;

/// Encoder counts accumulated per millisecond at one unit of speed demand.
///
/// Chosen so a nominal demand of 500 covers roughly 1 cm per millisecond,
/// which keeps simulated routes short.
pub const TICKS_PER_MS_PER_SPEED_UNIT: f64 = 0.3;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Simulated vehicle state.
///
/// Sensor values may also be poked directly by tests that want to script an
/// exact trace instead of running the kinematics.
pub struct SimVehicle {
    pub heading_deg: f64,
    pub left_ticks: f64,
    pub right_ticks: f64,
    pub magnet_bitmask: u32,
    pub implement_current_amps: f64,
    pub battery: BatteryLevel,
    pub safety_switch: bool,
    pub indicator_on: bool,

    left_speed_dem: f64,
    right_speed_dem: f64,
    implement_speed_dem: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SimVehicle {
    pub fn new() -> Self {
        Self {
            heading_deg: 0.0,
            left_ticks: 0.0,
            right_ticks: 0.0,
            magnet_bitmask: 0,
            implement_current_amps: 0.0,
            battery: BatteryLevel::Good,
            safety_switch: false,
            indicator_on: false,
            left_speed_dem: 0.0,
            right_speed_dem: 0.0,
            implement_speed_dem: 0.0,
        }
    }

    /// Advance the simulation by one millisecond.
    pub fn step_1ms(&mut self) {
        let left_delta = self.left_speed_dem * TICKS_PER_MS_PER_SPEED_UNIT;
        let right_delta = self.right_speed_dem * TICKS_PER_MS_PER_SPEED_UNIT;

        self.left_ticks += left_delta;
        self.right_ticks += right_delta;

        // Differential drive heading update. Heading is compass-style,
        // clockwise positive, so driving the left wheel faster turns right.
        let left_cm = left_delta * DISTANCE_PER_REV_CM / ENCODER_MODULUS as f64;
        let right_cm = right_delta * DISTANCE_PER_REV_CM / ENCODER_MODULUS as f64;
        let dtheta_rad = (left_cm - right_cm) / TRACK_WIDTH_CM;
        self.heading_deg += dtheta_rad.to_degrees();

        if self.heading_deg > 180.0 {
            self.heading_deg -= 360.0;
        } else if self.heading_deg <= -180.0 {
            self.heading_deg += 360.0;
        }
    }

    /// The latest posted demands, as a (left, right, implement) triple.
    pub fn current_dems(&self) -> (f64, f64, f64) {
        (
            self.left_speed_dem,
            self.right_speed_dem,
            self.implement_speed_dem,
        )
    }
}

impl Default for SimVehicle {
    fn default() -> Self {
        Self::new()
    }
}

impl Vehicle for SimVehicle {
    fn heading_deg(&self) -> f64 {
        self.heading_deg
    }

    fn left_encoder_ticks(&self) -> u32 {
        (self.left_ticks.rem_euclid(ENCODER_MODULUS as f64)) as u32
    }

    fn right_encoder_ticks(&self) -> u32 {
        (self.right_ticks.rem_euclid(ENCODER_MODULUS as f64)) as u32
    }

    fn magnet_bar_bitmask(&self) -> u32 {
        self.magnet_bitmask
    }

    fn implement_current_amps(&self) -> f64 {
        self.implement_current_amps
    }

    fn battery_level(&self) -> BatteryLevel {
        self.battery
    }

    fn safety_switch_active(&self) -> bool {
        self.safety_switch
    }

    fn set_left_wheel_speed(&mut self, speed: f64) {
        self.left_speed_dem = speed;
    }

    fn set_right_wheel_speed(&mut self, speed: f64) {
        self.right_speed_dem = speed;
    }

    fn set_implement_speed(&mut self, speed: f64) {
        self.implement_speed_dem = speed;
    }

    fn set_indicator(&mut self, on: bool) {
        self.indicator_on = on;
    }
}
