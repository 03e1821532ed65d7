use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

use crate::bus::Transport;
use crate::clock::Clock;
use crate::protocol::{commands_topic, setpoint_topic, CommandFrame, SetpointFrame};
use crate::registry::{TruckMode, TruckRegistry};

pub const DEFAULT_CRUISE_SPEED: i32 = 50;
pub const ACCELERATE_STEP: i32 = 5;
pub const STEER_STEP: i32 = 5;

/// Operator idle time before the keep-alive kicks in.
pub const HEARTBEAT_IDLE_MS: u64 = 300;
/// Keep-alive cadence while idle.
pub const HEARTBEAT_PERIOD_MS: u64 = 200;

/// Operator-facing command issuance for one selected truck.
///
/// Tracks the operator's intended speed locally; the confirmed value lives
/// in the registry record and the two are reconciled only through the bus.
/// All methods produce `(topic, frame)` pairs so the controller stays
/// transport- and clock-free.
#[derive(Debug, Default)]
pub struct SupervisoryController {
    selected: Option<u32>,
    target_speed: i32,
    last_activity_ms: u64,
}

impl SupervisoryController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds the controller to a truck, adopting its last confirmed
    /// acceleration as the local speed intention.
    pub fn select_truck(&mut self, truck_id: u32, registry: &TruckRegistry) {
        self.selected = Some(truck_id);
        self.target_speed = registry.get(truck_id).map_or(0, |r| r.acceleration);
        info!(truck_id, target_speed = self.target_speed, "truck selected");
    }

    pub fn selected(&self) -> Option<u32> {
        self.selected
    }

    pub fn target_speed(&self) -> i32 {
        self.target_speed
    }

    /// Parses operator-entered coordinates and builds a one-shot waypoint
    /// with the default cruise speed. Non-numeric input fails locally and
    /// nothing is published.
    pub fn waypoint(
        &self,
        x: &str,
        y: &str,
    ) -> Result<(String, SetpointFrame), SupervisorError> {
        let truck_id = self.selected.ok_or(SupervisorError::NoTruckSelected)?;
        let target_x: i32 = x
            .trim()
            .parse()
            .map_err(|_| SupervisorError::InvalidCoordinate {
                axis: "x",
                value: x.to_string(),
            })?;
        let target_y: i32 = y
            .trim()
            .parse()
            .map_err(|_| SupervisorError::InvalidCoordinate {
                axis: "y",
                value: y.to_string(),
            })?;

        Ok((
            setpoint_topic(truck_id),
            SetpointFrame {
                target_x,
                target_y,
                target_speed: DEFAULT_CRUISE_SPEED,
            },
        ))
    }

    /// Mode command with mutually exclusive flags.
    pub fn mode(&self, automatic: bool) -> Result<(String, CommandFrame), SupervisorError> {
        let truck_id = self.selected.ok_or(SupervisorError::NoTruckSelected)?;
        Ok((
            commands_topic(truck_id),
            CommandFrame {
                auto_mode: Some(automatic),
                manual_mode: Some(!automatic),
                ..CommandFrame::default()
            },
        ))
    }

    pub fn rearm(&self) -> Result<(String, CommandFrame), SupervisorError> {
        let truck_id = self.selected.ok_or(SupervisorError::NoTruckSelected)?;
        Ok((
            commands_topic(truck_id),
            CommandFrame {
                rearm: Some(true),
                ..CommandFrame::default()
            },
        ))
    }

    /// Speed up by one step; the result is the new local intention.
    pub fn accelerate(&mut self, now_ms: u64) -> Result<(String, CommandFrame), SupervisorError> {
        self.step_speed(ACCELERATE_STEP, now_ms)
    }

    /// Slow down (or reverse) by one step.
    pub fn decelerate(&mut self, now_ms: u64) -> Result<(String, CommandFrame), SupervisorError> {
        self.step_speed(-ACCELERATE_STEP, now_ms)
    }

    /// Full stop: intention drops straight to zero.
    pub fn halt(&mut self, now_ms: u64) -> Result<(String, CommandFrame), SupervisorError> {
        let truck_id = self.selected.ok_or(SupervisorError::NoTruckSelected)?;
        self.target_speed = 0;
        self.last_activity_ms = now_ms;
        Ok((
            commands_topic(truck_id),
            CommandFrame {
                accelerate: Some(0),
                ..CommandFrame::default()
            },
        ))
    }

    /// Steer left by the fixed step, restating the current speed intention
    /// so the frame never carries a stale acceleration.
    pub fn steer_left(&mut self, now_ms: u64) -> Result<(String, CommandFrame), SupervisorError> {
        let truck_id = self.selected.ok_or(SupervisorError::NoTruckSelected)?;
        self.last_activity_ms = now_ms;
        Ok((
            commands_topic(truck_id),
            CommandFrame {
                steer_left: Some(STEER_STEP),
                accelerate: Some(self.target_speed),
                ..CommandFrame::default()
            },
        ))
    }

    pub fn steer_right(&mut self, now_ms: u64) -> Result<(String, CommandFrame), SupervisorError> {
        let truck_id = self.selected.ok_or(SupervisorError::NoTruckSelected)?;
        self.last_activity_ms = now_ms;
        Ok((
            commands_topic(truck_id),
            CommandFrame {
                steer_right: Some(STEER_STEP),
                accelerate: Some(self.target_speed),
                ..CommandFrame::default()
            },
        ))
    }

    fn step_speed(
        &mut self,
        delta: i32,
        now_ms: u64,
    ) -> Result<(String, CommandFrame), SupervisorError> {
        let truck_id = self.selected.ok_or(SupervisorError::NoTruckSelected)?;
        self.target_speed = (self.target_speed + delta).clamp(-100, 100);
        self.last_activity_ms = now_ms;
        Ok((
            commands_topic(truck_id),
            CommandFrame {
                accelerate: Some(self.target_speed),
                ..CommandFrame::default()
            },
        ))
    }

    /// Keep-alive decision, evaluated on the heartbeat cadence.
    ///
    /// Fires only while a MANUAL-mode truck is selected and the operator
    /// has been idle past the threshold. The payload restates only the
    /// speed intention; steering is deliberately absent, so an idle
    /// truck's steering target simply holds.
    pub fn heartbeat_frame(
        &self,
        registry: &TruckRegistry,
        now_ms: u64,
    ) -> Option<(String, CommandFrame)> {
        let truck_id = self.selected?;
        let record = registry.get(truck_id)?;
        if record.mode != TruckMode::Manual {
            return None;
        }
        if now_ms.saturating_sub(self.last_activity_ms) <= HEARTBEAT_IDLE_MS {
            return None;
        }
        Some((
            commands_topic(truck_id),
            CommandFrame {
                accelerate: Some(self.target_speed),
                ..CommandFrame::default()
            },
        ))
    }
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("no truck selected")]
    NoTruckSelected,
    #[error("invalid {axis} coordinate `{value}`")]
    InvalidCoordinate { axis: &'static str, value: String },
}

/// Periodic keep-alive pump: evaluates the heartbeat decision on its
/// cadence and publishes whatever it yields. Publish failures are logged
/// and retried on the next cycle.
pub async fn run_heartbeat(
    controller: Arc<Mutex<SupervisoryController>>,
    registry: Arc<Mutex<TruckRegistry>>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(std::time::Duration::from_millis(HEARTBEAT_PERIOD_MS));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let now_ms = clock.now_ms();
                let frame = {
                    let controller = controller.lock().await;
                    let registry = registry.lock().await;
                    controller.heartbeat_frame(&registry, now_ms)
                };
                if let Some((topic, frame)) = frame {
                    match serde_json::to_value(frame) {
                        Ok(payload) => {
                            if let Err(e) = transport.publish(&topic, payload, now_ms) {
                                warn!(error = %e, %topic, "heartbeat publish failed");
                            }
                        }
                        Err(e) => warn!(error = %e, "heartbeat encode failed"),
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry_with_manual_truck(id: u32) -> TruckRegistry {
        let mut registry = TruckRegistry::new();
        registry
            .on_message(
                &format!("truck/{id}/state"),
                &json!({ "automatic": false, "fault": false }),
                0,
            )
            .unwrap();
        registry
    }

    #[test]
    fn waypoint_requires_numeric_coordinates() {
        let mut controller = SupervisoryController::new();
        let registry = registry_with_manual_truck(2);
        controller.select_truck(2, &registry);

        let (topic, frame) = controller.waypoint("400", " 300 ").unwrap();
        assert_eq!(topic, "truck/2/setpoint");
        assert_eq!(frame.target_x, 400);
        assert_eq!(frame.target_y, 300);
        assert_eq!(frame.target_speed, DEFAULT_CRUISE_SPEED);

        assert!(matches!(
            controller.waypoint("north", "300"),
            Err(SupervisorError::InvalidCoordinate { axis: "x", .. })
        ));
    }

    #[test]
    fn mode_flags_are_mutually_exclusive() {
        let mut controller = SupervisoryController::new();
        let registry = registry_with_manual_truck(1);
        controller.select_truck(1, &registry);

        let (_, auto) = controller.mode(true).unwrap();
        assert_eq!(auto.auto_mode, Some(true));
        assert_eq!(auto.manual_mode, Some(false));

        let (_, manual) = controller.mode(false).unwrap();
        assert_eq!(manual.auto_mode, Some(false));
        assert_eq!(manual.manual_mode, Some(true));
    }

    #[test]
    fn accelerate_steps_and_clamps() {
        let mut controller = SupervisoryController::new();
        let registry = registry_with_manual_truck(1);
        controller.select_truck(1, &registry);

        for _ in 0..30 {
            controller.accelerate(0).unwrap();
        }
        assert_eq!(controller.target_speed(), 100);

        for _ in 0..60 {
            controller.decelerate(0).unwrap();
        }
        assert_eq!(controller.target_speed(), -100);

        let (_, frame) = controller.halt(0).unwrap();
        assert_eq!(frame.accelerate, Some(0));
        assert_eq!(controller.target_speed(), 0);
    }

    #[test]
    fn steering_restates_current_speed_not_a_stale_one() {
        let mut controller = SupervisoryController::new();
        let registry = registry_with_manual_truck(1);
        controller.select_truck(1, &registry);

        controller.accelerate(0).unwrap();
        controller.accelerate(0).unwrap();
        let (_, frame) = controller.steer_left(0).unwrap();
        assert_eq!(frame.steer_left, Some(STEER_STEP));
        assert_eq!(frame.accelerate, Some(10));
        assert_eq!(frame.steering, None);
    }

    #[test]
    fn heartbeat_fires_only_when_idle_and_manual() {
        let mut controller = SupervisoryController::new();
        let registry = registry_with_manual_truck(1);
        controller.select_truck(1, &registry);
        controller.accelerate(1_000).unwrap();

        // Not idle long enough.
        assert!(controller.heartbeat_frame(&registry, 1_200).is_none());
        // Idle past the threshold.
        let (topic, frame) = controller.heartbeat_frame(&registry, 1_400).unwrap();
        assert_eq!(topic, "truck/1/commands");
        assert_eq!(frame.accelerate, Some(5));

        // Switching the observed mode to AUTO suppresses it.
        let mut registry = registry;
        registry
            .on_message(
                "truck/1/state",
                &json!({ "automatic": true, "fault": false }),
                1_500,
            )
            .unwrap();
        assert!(controller.heartbeat_frame(&registry, 2_000).is_none());
    }

    #[test]
    fn heartbeat_payload_carries_only_target_speed() {
        let mut controller = SupervisoryController::new();
        let registry = registry_with_manual_truck(1);
        controller.select_truck(1, &registry);
        controller.accelerate(0).unwrap();

        let (_, frame) = controller.heartbeat_frame(&registry, 10_000).unwrap();
        let json = serde_json::to_value(frame).unwrap();
        assert_eq!(json, json!({ "accelerate": 5 }));
    }

    #[test]
    fn heartbeat_silent_for_unknown_mode() {
        let mut controller = SupervisoryController::new();
        let mut registry = TruckRegistry::new();
        registry
            .on_message(
                "truck/1/sensors",
                &json!({
                    "truck_id": 1, "position_x": 0, "position_y": 0, "angle_x": 0,
                    "temperature": 75, "fault_electrical": false,
                    "fault_hydraulic": false, "timestamp": 0u64
                }),
                0,
            )
            .unwrap();
        controller.select_truck(1, &registry);
        assert!(controller.heartbeat_frame(&registry, 10_000).is_none());
    }
}
