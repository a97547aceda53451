//! Drive manager parameters.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct DriveMgrParams {
    /// Parameter file for the route engine, relative to the parameter
    /// directory.
    pub engine_params_file: String,

    /// How long the indicator runs before an armed route starts moving, ms.
    pub indicate_duration_ms: u64,
}

impl Default for DriveMgrParams {
    fn default() -> Self {
        Self {
            engine_params_file: String::from("route_engine.toml"),
            indicate_duration_ms: 3000,
        }
    }
}
