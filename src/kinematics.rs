use crate::truck::{TruckParams, TruckState};

/// Per-tick kinematic and thermal integration.
///
/// `advance` is a total function over truck state: out-of-range inputs are
/// saturated, never rejected. Update order within a tick is fixed:
/// velocity, heading, position, temperature.
#[derive(Debug, Clone)]
pub struct KinematicModel {
    params: TruckParams,
}

impl KinematicModel {
    pub fn new(params: TruckParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &TruckParams {
        &self.params
    }

    pub fn advance(&self, state: &mut TruckState) {
        self.update_velocity(state);
        self.update_heading(state);
        self.update_position(state);
        self.update_temperature(state);
    }

    fn update_velocity(&self, state: &mut TruckState) {
        if state.acceleration != 0 {
            state.velocity += self.params.accel_rate * (f64::from(state.acceleration) / 100.0);
        } else {
            // No coasting: releasing the pedal stops the truck.
            state.velocity = 0.0;
        }
        state.velocity = state.velocity.clamp(-self.params.max_speed, self.params.max_speed);
    }

    fn update_heading(&self, state: &mut TruckState) {
        let diff = shortest_angle_diff(f64::from(state.steering), state.heading);
        if diff.abs() > self.params.max_turn_rate {
            state.heading += self.params.max_turn_rate.copysign(diff);
        } else {
            state.heading = f64::from(state.steering);
        }
        state.heading = wrap_degrees(state.heading);
    }

    fn update_position(&self, state: &mut TruckState) {
        let rad = state.heading.to_radians();
        state.x += state.velocity * rad.cos();
        state.y += state.velocity * rad.sin();

        // Edge clamp, not bounce: the map boundary is a hard stop.
        state.x = state.x.clamp(0.0, self.params.map_width);
        state.y = state.y.clamp(0.0, self.params.map_height);
    }

    fn update_temperature(&self, state: &mut TruckState) {
        if state.velocity.abs() > self.params.heating_threshold {
            state.temperature += self.params.heat_rate;
        } else {
            state.temperature -= self.params.cool_rate;
        }
        state.temperature = state
            .temperature
            .clamp(crate::truck::TEMPERATURE_MIN_C, crate::truck::TEMPERATURE_MAX_C);
    }
}

impl Default for KinematicModel {
    fn default() -> Self {
        Self::new(TruckParams::default())
    }
}

/// Shortest signed difference from `current` to `target`, in (-180, 180].
pub fn shortest_angle_diff(target: f64, current: f64) -> f64 {
    let diff = (target - current).rem_euclid(360.0);
    if diff > 180.0 {
        diff - 360.0
    } else {
        diff
    }
}

/// Wraps an angle into [0, 360).
pub fn wrap_degrees(angle: f64) -> f64 {
    angle.rem_euclid(360.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state() -> TruckState {
        TruckState::new(1, 100.0, 200.0)
    }

    #[test]
    fn velocity_integrates_and_saturates() {
        let model = KinematicModel::default();
        let mut state = test_state();
        state.acceleration = 100;

        for _ in 0..100 {
            model.advance(&mut state);
            assert!(state.velocity <= TRUCK_MAX_SPEED_FOR_TEST);
        }
        assert!((state.velocity - TRUCK_MAX_SPEED_FOR_TEST).abs() < f64::EPSILON);
    }

    const TRUCK_MAX_SPEED_FOR_TEST: f64 = 5.0;

    #[test]
    fn zero_acceleration_snaps_velocity_to_zero() {
        let model = KinematicModel::default();
        let mut state = test_state();
        state.acceleration = 100;
        model.advance(&mut state);
        assert!(state.velocity > 0.0);

        state.acceleration = 0;
        model.advance(&mut state);
        assert!((state.velocity).abs() < f64::EPSILON);
    }

    #[test]
    fn heading_slews_at_bounded_rate_then_snaps() {
        let model = KinematicModel::default();
        let mut state = test_state();
        state.steering = 90;

        model.advance(&mut state);
        assert!((state.heading - 5.0).abs() < 1e-9);

        state.heading = 87.0;
        model.advance(&mut state);
        assert!((state.heading - 90.0).abs() < 1e-9);
    }

    #[test]
    fn heading_takes_shortest_path_across_north() {
        let model = KinematicModel::default();
        let mut state = test_state();
        state.heading = 10.0;
        state.steering = 350;

        model.advance(&mut state);
        assert!((state.heading - 5.0).abs() < 1e-9);

        model.advance(&mut state);
        assert!((state.heading - 0.0).abs() < 1e-9);

        model.advance(&mut state);
        assert!((state.heading - 355.0).abs() < 1e-9);
    }

    #[test]
    fn heading_stays_in_range_for_out_of_range_steering() {
        let model = KinematicModel::default();
        for steering in [-720, -361, -1, 360, 361, 7200, 99999] {
            let mut state = test_state();
            state.steering = steering;
            for _ in 0..200 {
                model.advance(&mut state);
                assert!(
                    (0.0..360.0).contains(&state.heading),
                    "heading {} out of range for steering {}",
                    state.heading,
                    steering
                );
            }
        }
    }

    #[test]
    fn position_clamps_to_map_edges() {
        let model = KinematicModel::default();
        let mut state = test_state();
        state.x = 2.0;
        state.heading = 180.0;
        state.steering = 180;
        state.acceleration = 100;

        for _ in 0..50 {
            model.advance(&mut state);
        }
        assert!((state.x).abs() < f64::EPSILON);
        assert!(state.y >= 0.0);
    }

    #[test]
    fn temperature_heats_when_fast_cools_when_slow_and_stays_bounded() {
        let model = KinematicModel::default();
        let mut state = test_state();
        state.acceleration = 100;

        // Warm up past the heating threshold.
        for _ in 0..20 {
            model.advance(&mut state);
        }
        assert!(state.temperature > crate::truck::TEMPERATURE_BASE_C);

        state.acceleration = 0;
        let hot = state.temperature;
        model.advance(&mut state);
        assert!(state.temperature < hot);

        // Long idle never drops below the floor.
        for _ in 0..5000 {
            model.advance(&mut state);
        }
        assert!((state.temperature - crate::truck::TEMPERATURE_MIN_C).abs() < f64::EPSILON);
    }

    #[test]
    fn reference_run_matches_expected_trajectory() {
        let model = KinematicModel::default();
        let mut state = test_state();
        state.acceleration = 50;

        let mut last_x = state.x;
        for _ in 0..10 {
            model.advance(&mut state);
            assert!(state.velocity <= 5.0);
            assert!(state.x > last_x, "x must strictly increase along heading 0");
            last_x = state.x;
        }
        assert!((state.velocity - 1.5).abs() < 1e-9);
    }
}
