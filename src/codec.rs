use rand::Rng;
use serde_json::Value;

use crate::protocol::{CommandFrame, ProtocolError, SensorFrame, SetpointFrame, StateFrame};
use crate::truck::TruckState;

pub const SENSOR_NOISE_POSITION: f64 = 2.0;
pub const SENSOR_NOISE_ANGLE: f64 = 1.0;
pub const SENSOR_NOISE_TEMPERATURE: f64 = 2.0;

/// Uniform noise bounds applied per sensor field.
#[derive(Debug, Clone, Copy)]
pub struct NoiseBounds {
    pub position: f64,
    pub angle: f64,
    pub temperature: f64,
}

impl Default for NoiseBounds {
    fn default() -> Self {
        Self {
            position: SENSOR_NOISE_POSITION,
            angle: SENSOR_NOISE_ANGLE,
            temperature: SENSOR_NOISE_TEMPERATURE,
        }
    }
}

/// Encodes outbound telemetry and decodes inbound commands/setpoints.
///
/// Sensor fields carry independent uniform noise and are truncated to
/// integers before hitting the wire. Command decoding is lenient: a
/// malformed field loses only that field, unknown keys are ignored.
#[derive(Debug, Clone, Default)]
pub struct TelemetryCodec {
    noise: NoiseBounds,
}

impl TelemetryCodec {
    pub fn new(noise: NoiseBounds) -> Self {
        Self { noise }
    }

    pub fn noise(&self) -> NoiseBounds {
        self.noise
    }

    pub fn encode_sensors<R: Rng + ?Sized>(
        &self,
        state: &TruckState,
        now_ms: u64,
        rng: &mut R,
    ) -> SensorFrame {
        let jitter = |rng: &mut R, bound: f64| {
            if bound > 0.0 {
                rng.random_range(-bound..=bound)
            } else {
                0.0
            }
        };

        let angle = (state.heading + jitter(rng, self.noise.angle)).trunc() as i64;

        SensorFrame {
            truck_id: state.id,
            position_x: (state.x + jitter(rng, self.noise.position)).trunc() as i32,
            position_y: (state.y + jitter(rng, self.noise.position)).trunc() as i32,
            angle_x: angle.rem_euclid(360) as i32,
            temperature: (state.temperature + jitter(rng, self.noise.temperature)).trunc() as i32,
            fault_electrical: state.fault_electrical,
            fault_hydraulic: state.fault_hydraulic,
            timestamp: now_ms,
        }
    }

    pub fn encode_state(&self, automatic: bool, fault: bool) -> StateFrame {
        StateFrame { automatic, fault }
    }

    /// Lenient partial decode: each recognized field is taken only when it
    /// carries the expected JSON type. Never fails; a garbage payload just
    /// decodes to an empty frame.
    pub fn decode_command(&self, payload: &Value) -> CommandFrame {
        CommandFrame {
            acceleration: int_field(payload, "acceleration"),
            steering: int_field(payload, "steering"),
            accelerate: int_field(payload, "accelerate"),
            steer_left: int_field(payload, "steer_left"),
            steer_right: int_field(payload, "steer_right"),
            auto_mode: bool_field(payload, "auto_mode"),
            manual_mode: bool_field(payload, "manual_mode"),
            rearm: bool_field(payload, "rearm"),
            arrived: bool_field(payload, "arrived"),
        }
    }

    /// Setpoints are all-or-nothing: a waypoint with a missing coordinate
    /// is useless, so the whole message is rejected.
    pub fn decode_setpoint(&self, payload: &Value) -> Result<SetpointFrame, ProtocolError> {
        if !payload.is_object() {
            return Err(ProtocolError::NotAnObject);
        }
        Ok(SetpointFrame {
            target_x: int_field(payload, "target_x").ok_or(ProtocolError::MissingField("target_x"))?,
            target_y: int_field(payload, "target_y").ok_or(ProtocolError::MissingField("target_y"))?,
            target_speed: int_field(payload, "target_speed")
                .ok_or(ProtocolError::MissingField("target_speed"))?,
        })
    }
}

fn int_field(payload: &Value, key: &str) -> Option<i32> {
    payload
        .get(key)
        .and_then(Value::as_i64)
        .and_then(|v| i32::try_from(v).ok())
}

fn bool_field(payload: &Value, key: &str) -> Option<bool> {
    payload.get(key).and_then(Value::as_bool)
}
