//! # Vehicle interface crate.
//!
//! Provides the boundary between the navigation software and the rest of the
//! vehicle: the motor inverters on the CAN bus, the magnet bar on its serial
//! link, the AHRS heading from the IMU board, and the operator surfaces
//! (remote, display, scheduler). The navigation side only ever sees the
//! primitive queries and demands defined here; framing, CRC, object
//! dictionaries and the like live on the other side of this crate.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Operator and scheduler command definitions
pub mod cmd;

/// Demand structures posted to the actuators
pub mod dems;

/// Software-simulated vehicle used by tests and the `nav_exec` executable
pub mod sim;

/// The `Vehicle` trait itself
pub mod vehicle;

// ------------------------------------------------------------------------------------------------
// EXPORTS
// ------------------------------------------------------------------------------------------------

pub use cmd::{BatteryLevel, DriveCmd};
pub use dems::DriveDems;
pub use vehicle::Vehicle;
