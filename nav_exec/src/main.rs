//! Main navigation executable entry point.
//!
//! # Architecture
//!
//! The executable runs a single-threaded two-rate loop:
//!
//!     - Every millisecond:
//!         - Vehicle input acquisition (encoders, magnet bar, AHRS)
//!         - Drive manager fast tick (step completion judging)
//!     - Every 100 milliseconds:
//!         - Operator/scheduler command handling
//!         - Drive manager control tick (interlocks, demand generation)
//!
//! The vehicle is the built-in simulation and the loop runs as fast as the
//! host allows. A real deployment replaces the simulation with the
//! serial/CAN vehicle stack and paces the loop against the wall clock.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Report};
use log::{info, warn};
use structopt::StructOpt;

// Internal
use nav_lib::drive_mgr::{DriveMgr, DriveMgrParams, DriveMode};
use nav_lib::route::ParamRoutes;
use nav_lib::route_engine::{EngineParams, RouteEngine};
use util::logger::{logger_init, LevelFilter};
use util::session::Session;
use vehicle_if::sim::SimVehicle;
use vehicle_if::DriveCmd;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Control tick period in fast ticks.
const CTRL_PERIOD_MS: u64 = 100;

/// Give up if a simulated drive has not finished after this long.
const SIM_TIMEOUT_MS: u64 = 60 * 60 * 1000;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Command line options.
#[derive(Debug, StructOpt)]
#[structopt(name = "nav_exec", about = "Moover navigation executable")]
struct Opts {
    /// Id of the route to drive.
    #[structopt(short, long, default_value = "0")]
    route: u8,
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    color_eyre::install()?;

    let opts = Opts::from_args();

    // ---- EARLY INITIALISATION ----

    let session =
        Session::new("nav_exec", "sessions").wrap_err("Failed to create the session")?;

    logger_init(LevelFilter::Debug, &session).wrap_err("Failed to initialise logging")?;

    info!("Moover Navigation Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    // ---- MODULE INITIALISATION ----

    let mut drive_mgr = DriveMgr::new(
        DriveMgrParams::default(),
        RouteEngine::new(EngineParams::default()),
        Box::new(ParamRoutes),
    );
    drive_mgr
        .init("drive_mgr.toml", &session)
        .wrap_err("Failed to initialise the drive manager")?;

    info!("Drive manager initialised");

    let mut vehicle = SimVehicle::new();

    // ---- MAIN LOOP ----

    // Select the requested route on the first control boundary, then play it
    // on the second, as the display would.
    let mut pending_cmds = vec![
        DriveCmd::Play,
        DriveCmd::SelectRoute {
            route_id: opts.route,
        },
    ];

    info!("Driving route {}", opts.route);

    let mut sim_time_ms: u64 = 0;

    loop {
        vehicle.step_1ms();
        drive_mgr
            .tick_1ms(&mut vehicle)
            .wrap_err("Drive manager fast tick failed")?;

        if sim_time_ms % CTRL_PERIOD_MS == 0 {
            // The first boundary only brings the manager out of Init, so
            // hold commands back until it is ready for them.
            let cmd = if drive_mgr.mode() == DriveMode::Init {
                None
            } else {
                pending_cmds.pop()
            };
            drive_mgr
                .tick_100ms(&mut vehicle, cmd, None)
                .wrap_err("Drive manager control tick failed")?;
        }

        // Once-a-second progress report while driving
        if sim_time_ms % 1000 == 0 && drive_mgr.mode() == DriveMode::Driving {
            info!(
                "t={}s step={} progress={}%",
                sim_time_ms / 1000,
                drive_mgr.current_step_index(),
                drive_mgr.progress_percent()
            );
        }

        if pending_cmds.is_empty() && drive_mgr.mode() == DriveMode::Idle {
            break;
        }

        sim_time_ms += 1;
        if sim_time_ms > SIM_TIMEOUT_MS {
            warn!("Simulated drive timed out");
            break;
        }
    }

    match drive_mgr.status() {
        Some(status) => info!("Drive ended after {} ms: {:?}", sim_time_ms, status),
        None => warn!("Drive ended without a status"),
    }

    Ok(())
}
