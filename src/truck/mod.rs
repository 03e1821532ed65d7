pub mod agent;
pub mod nav;

pub use agent::{TickOutputs, TruckAgent};
pub use nav::NavigationController;

use serde::{Deserialize, Serialize};

pub const MAP_WIDTH: f64 = 1000.0;
pub const MAP_HEIGHT: f64 = 700.0;

pub const TRUCK_MAX_SPEED: f64 = 5.0;
pub const TRUCK_ACCEL_RATE: f64 = 0.3;
pub const MAX_TURN_RATE_DEG: f64 = 5.0;

pub const TEMPERATURE_MIN_C: f64 = 20.0;
pub const TEMPERATURE_MAX_C: f64 = 150.0;
pub const TEMPERATURE_BASE_C: f64 = 75.0;
pub const TEMPERATURE_HEAT_RATE: f64 = 0.1;
pub const TEMPERATURE_COOL_RATE: f64 = 0.05;
pub const TEMPERATURE_CRITICAL_C: f64 = 120.0;
pub const VELOCITY_HEATING_THRESHOLD: f64 = 2.0;

/// Test hook: one press of the bench temperature button.
pub const TEMPERATURE_TEST_INCREMENT_C: f64 = 20.0;

/// Tuning constants for one truck's physical model.
#[derive(Debug, Clone)]
pub struct TruckParams {
    pub max_speed: f64,
    pub accel_rate: f64,
    pub max_turn_rate: f64,
    pub heating_threshold: f64,
    pub heat_rate: f64,
    pub cool_rate: f64,
    pub map_width: f64,
    pub map_height: f64,
}

impl Default for TruckParams {
    fn default() -> Self {
        Self {
            max_speed: TRUCK_MAX_SPEED,
            accel_rate: TRUCK_ACCEL_RATE,
            max_turn_rate: MAX_TURN_RATE_DEG,
            heating_threshold: VELOCITY_HEATING_THRESHOLD,
            heat_rate: TEMPERATURE_HEAT_RATE,
            cool_rate: TEMPERATURE_COOL_RATE,
            map_width: MAP_WIDTH,
            map_height: MAP_HEIGHT,
        }
    }
}

/// Physical state owned by the simulator.
///
/// Mutated only by the per-tick integration and the inbound command merge.
/// The supervisory side keeps its own independent record type and never
/// shares references with this one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TruckState {
    pub id: u32,
    pub x: f64,
    pub y: f64,
    /// Heading in degrees, kept in [0, 360).
    pub heading: f64,
    /// Velocity in map units per tick, kept in [-max_speed, max_speed].
    pub velocity: f64,
    /// Commanded acceleration, percent in [-100, 100].
    pub acceleration: i32,
    /// Target heading in degrees; arbitrary values tolerated, the model
    /// normalizes when steering toward it.
    pub steering: i32,
    /// Degrees Celsius, kept in [20, 150].
    pub temperature: f64,
    pub fault_electrical: bool,
    pub fault_hydraulic: bool,
}

impl TruckState {
    pub fn new(id: u32, x: f64, y: f64) -> Self {
        Self {
            id,
            x,
            y,
            heading: 0.0,
            velocity: 0.0,
            acceleration: 0,
            steering: 0,
            temperature: TEMPERATURE_BASE_C,
            fault_electrical: false,
            fault_hydraulic: false,
        }
    }

    /// Aggregate fault as reported on the state topic: either hardware
    /// fault, or temperature beyond the critical threshold.
    pub fn has_fault(&self) -> bool {
        self.fault_electrical || self.fault_hydraulic || self.temperature > TEMPERATURE_CRITICAL_C
    }
}
