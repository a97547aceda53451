//! # Actuator demand structures

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Demands posted to the drive and implement motors.
///
/// Wheel speeds are signed inverter demands (the same 0..1000 magnitude range
/// the route tables use): positive drives the wheel forwards, negative
/// reverse. The implement (auger) speed is unsigned. Demands are idempotent
/// and last-write-wins; posting the same demand twice is harmless.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct DriveDems {
    /// Signed left wheel speed demand.
    pub left_speed: f64,

    /// Signed right wheel speed demand.
    pub right_speed: f64,

    /// Unsigned implement (auger) speed demand.
    pub implement_speed: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl DriveDems {
    /// An all-stop demand. Issued unconditionally on any abort path.
    pub fn stop() -> Self {
        Self {
            left_speed: 0.0,
            right_speed: 0.0,
            implement_speed: 0.0,
        }
    }

    /// True if every demand in this set is zero.
    pub fn is_stop(&self) -> bool {
        self.left_speed == 0.0 && self.right_speed == 0.0 && self.implement_speed == 0.0
    }
}

impl Default for DriveDems {
    fn default() -> Self {
        Self::stop()
    }
}
