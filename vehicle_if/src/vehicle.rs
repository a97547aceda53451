//! # The `Vehicle` trait
//!
//! Everything the navigation software knows about the physical vehicle goes
//! through this trait. Reads return the latest value the transport layer has
//! seen and never block; writes post a demand and return immediately.
//! Staleness detection of the underlying links is the transport layer's
//! responsibility, not the caller's.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use crate::cmd::BatteryLevel;
use crate::dems::DriveDems;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Primitive sensor queries and actuator demands of the vehicle.
pub trait Vehicle {
    /// Current AHRS heading in degrees, wrapped to `(-180, 180]`.
    fn heading_deg(&self) -> f64;

    /// Raw left wheel encoder counter. Wraps at the encoder modulus.
    fn left_encoder_ticks(&self) -> u32;

    /// Raw right wheel encoder counter. Wraps at the encoder modulus.
    fn right_encoder_ticks(&self) -> u32;

    /// Raw 32-bit hall sensor bitmask from the magnet bar.
    fn magnet_bar_bitmask(&self) -> u32;

    /// Implement (auger) motor current in amps.
    fn implement_current_amps(&self) -> f64;

    /// Battery state from the power board.
    fn battery_level(&self) -> BatteryLevel;

    /// True while the safety (bump) switch is pressed.
    fn safety_switch_active(&self) -> bool;

    /// Post a signed left wheel speed demand.
    fn set_left_wheel_speed(&mut self, speed: f64);

    /// Post a signed right wheel speed demand.
    fn set_right_wheel_speed(&mut self, speed: f64);

    /// Post an unsigned implement speed demand.
    fn set_implement_speed(&mut self, speed: f64);

    /// Switch the buzzer/lamp drive indication on or off.
    fn set_indicator(&mut self, on: bool);

    /// Post a full demand set. Last write wins.
    fn post_dems(&mut self, dems: &DriveDems) {
        self.set_left_wheel_speed(dems.left_speed);
        self.set_right_wheel_speed(dems.right_speed);
        self.set_implement_speed(dems.implement_speed);
    }
}
