use crate::kinematics::shortest_angle_diff;
use crate::protocol::SetpointFrame;
use crate::truck::TruckState;

pub const ARRIVAL_RADIUS: f64 = 5.0;
pub const ALIGNMENT_THRESHOLD_DEG: f64 = 5.0;
pub const DECELERATION_DISTANCE: f64 = 50.0;
const CLOSE_ZONE: f64 = 12.0;
const STOP_ZONE: f64 = 2.0;
const MAX_AUTO_ACCELERATION: f64 = 60.0;

/// Actuator demand produced by one navigation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavOutput {
    pub acceleration: i32,
    pub steering: i32,
    pub arrived: bool,
}

/// Drives a truck toward the last received waypoint while in automatic
/// mode: steering target is the bearing to the waypoint, acceleration is
/// staged down with distance, and arrival latches until a new target.
#[derive(Debug, Clone)]
pub struct NavigationController {
    previous_distance: f64,
    arrived: bool,
}

impl NavigationController {
    pub fn new() -> Self {
        Self {
            previous_distance: f64::MAX,
            arrived: false,
        }
    }

    /// Called when a fresh waypoint lands; clears the arrival latch and the
    /// overshoot memory.
    pub fn retarget(&mut self) {
        self.previous_distance = f64::MAX;
        self.arrived = false;
    }

    pub fn update(&mut self, state: &TruckState, target: &SetpointFrame) -> NavOutput {
        if self.arrived {
            return NavOutput {
                acceleration: 0,
                steering: state.steering,
                arrived: true,
            };
        }

        let dx = f64::from(target.target_x) - state.x;
        let dy = f64::from(target.target_y) - state.y;
        let distance = dx.hypot(dy);
        let bearing = dy.atan2(dx).to_degrees().rem_euclid(360.0);
        let angle_error = shortest_angle_diff(bearing, state.heading).abs();

        // Passing the waypoint flips the distance trend; treat a near-miss
        // as arrival instead of circling back forever.
        let overshooting =
            distance > self.previous_distance && self.previous_distance < ARRIVAL_RADIUS * 2.0;
        self.previous_distance = distance;

        let on_target = distance <= ARRIVAL_RADIUS && angle_error <= ALIGNMENT_THRESHOLD_DEG;
        if on_target || (overshooting && distance < ARRIVAL_RADIUS * 1.5) {
            self.arrived = true;
            return NavOutput {
                acceleration: 0,
                steering: state.steering,
                arrived: true,
            };
        }

        NavOutput {
            acceleration: speed_demand(distance, target.target_speed),
            steering: bearing.round() as i32,
            arrived: false,
        }
    }
}

impl Default for NavigationController {
    fn default() -> Self {
        Self::new()
    }
}

/// Distance-staged acceleration demand, capped by the waypoint's speed.
fn speed_demand(distance: f64, target_speed: i32) -> i32 {
    let demand = if distance < STOP_ZONE {
        0.0
    } else if distance < CLOSE_ZONE {
        10.0 * (distance / CLOSE_ZONE)
    } else if distance < DECELERATION_DISTANCE {
        MAX_AUTO_ACCELERATION * (distance / DECELERATION_DISTANCE).powf(1.5) * 0.4
    } else {
        MAX_AUTO_ACCELERATION
    };

    (demand as i32).clamp(0, 100).min(target_speed.clamp(0, 100))
}
