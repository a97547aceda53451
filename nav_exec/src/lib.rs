//! # Navigation library.
//!
//! This library allows other crates in the workspace (and the benchmark
//! harness) to access items defined inside the navigation crate.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

/// Drive manager - top level state machine over the route engine
pub mod drive_mgr;

/// Magnet bar decoding - hall sensor bitmask to lateral offset
pub mod magnets;

/// Odometry estimator - wheel encoder counters to travelled distance
pub mod odometry;

/// Route tables - route and step definitions, loading and validation
pub mod route;

/// Route engine - step loading, completion judging and demand generation
pub mod route_engine;
