//! # Operator command definitions
//!
//! Commands arrive from three surfaces: the handheld remote, the touch
//! display, and the weekly scheduler. By the time they reach the navigation
//! software they have been decoded into the single [`DriveCmd`] enum; which
//! surface produced them no longer matters.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use structopt::StructOpt;

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// A command that can be performed by the drive system.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, StructOpt)]
pub enum DriveCmd {
    /// Select the route with the given id. In Idle this arms the route, while
    /// driving it aborts the current route.
    #[structopt(name = "select")]
    SelectRoute {
        /// Id of the route to select.
        route_id: u8,
    },

    /// Start the armed route, or resume a paused one.
    #[structopt(name = "play")]
    Play,

    /// Pause the executing route, preserving its progress.
    #[structopt(name = "pause")]
    Pause,

    /// Emergency stop: abort everything and return to Idle.
    #[structopt(name = "stop")]
    Stop,
}

/// Battery state as reported by the power board.
///
/// `Low` still allows manual driving but blocks new automatic route starts.
/// `Critical` forces an immediate stop anywhere outside Idle and blocks
/// restart until the battery recovers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatteryLevel {
    Good,
    Low,
    Critical,
}
