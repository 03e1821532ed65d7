use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Topic filters the supervisory side subscribes to.
pub const FILTER_SENSORS: &str = "truck/+/sensors";
pub const FILTER_STATE: &str = "truck/+/state";
pub const FILTER_COMMANDS: &str = "truck/+/commands";
pub const FILTER_SETPOINT: &str = "truck/+/setpoint";

pub fn sensors_topic(truck_id: u32) -> String {
    format!("truck/{truck_id}/sensors")
}

pub fn state_topic(truck_id: u32) -> String {
    format!("truck/{truck_id}/state")
}

pub fn commands_topic(truck_id: u32) -> String {
    format!("truck/{truck_id}/commands")
}

pub fn setpoint_topic(truck_id: u32) -> String {
    format!("truck/{truck_id}/setpoint")
}

/// Message classes carried by the four per-truck topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageClass {
    Sensors,
    State,
    Commands,
    Setpoint,
}

/// Splits `truck/<id>/<class>` into its id and message class.
pub fn parse_topic(topic: &str) -> Result<(u32, MessageClass), ProtocolError> {
    let mut parts = topic.split('/');
    let root = parts.next();
    let id = parts.next();
    let class = parts.next();
    let rest = parts.next();

    let (Some("truck"), Some(id), Some(class), None) = (root, id, class, rest) else {
        return Err(ProtocolError::MalformedTopic(topic.to_string()));
    };

    let truck_id: u32 = id
        .parse()
        .map_err(|_| ProtocolError::MalformedTopic(topic.to_string()))?;

    let class = match class {
        "sensors" => MessageClass::Sensors,
        "state" => MessageClass::State,
        "commands" => MessageClass::Commands,
        "setpoint" => MessageClass::Setpoint,
        _ => return Err(ProtocolError::MalformedTopic(topic.to_string())),
    };

    Ok((truck_id, class))
}

/// Single-level `+` wildcard match, one segment per level.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_parts = filter.split('/');
    let mut topic_parts = topic.split('/');
    loop {
        match (filter_parts.next(), topic_parts.next()) {
            (None, None) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            _ => return false,
        }
    }
}

/// Noisy sensor snapshot published on `truck/<id>/sensors`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorFrame {
    pub truck_id: u32,
    pub position_x: i32,
    pub position_y: i32,
    pub angle_x: i32,
    pub temperature: i32,
    pub fault_electrical: bool,
    pub fault_hydraulic: bool,
    pub timestamp: u64,
}

/// Mode/fault summary published on `truck/<id>/state`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StateFrame {
    pub automatic: bool,
    pub fault: bool,
}

/// Partial command update carried on `truck/<id>/commands`.
///
/// Every field is independently optional; an absent field means "no change",
/// never an implicit zero. `acceleration`/`steering` are the absolute
/// actuator-level vocabulary, `accelerate`/`steer_left`/`steer_right` the
/// operator vocabulary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandFrame {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acceleration: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steering: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accelerate: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steer_left: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steer_right: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_mode: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manual_mode: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rearm: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arrived: Option<bool>,
}

impl CommandFrame {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Last-write-wins field merge: any field present in `newer` replaces
    /// the corresponding field here.
    pub fn merge_from(&mut self, newer: &CommandFrame) {
        if newer.acceleration.is_some() {
            self.acceleration = newer.acceleration;
        }
        if newer.steering.is_some() {
            self.steering = newer.steering;
        }
        if newer.accelerate.is_some() {
            self.accelerate = newer.accelerate;
        }
        if newer.steer_left.is_some() {
            self.steer_left = newer.steer_left;
        }
        if newer.steer_right.is_some() {
            self.steer_right = newer.steer_right;
        }
        if newer.auto_mode.is_some() {
            self.auto_mode = newer.auto_mode;
        }
        if newer.manual_mode.is_some() {
            self.manual_mode = newer.manual_mode;
        }
        if newer.rearm.is_some() {
            self.rearm = newer.rearm;
        }
        if newer.arrived.is_some() {
            self.arrived = newer.arrived;
        }
    }
}

/// One-shot waypoint on `truck/<id>/setpoint`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetpointFrame {
    pub target_x: i32,
    pub target_y: i32,
    pub target_speed: i32,
}

/// Unit of transfer for the bus and the file relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub topic: String,
    pub payload: Value,
    pub timestamp: u64,
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed topic `{0}`")]
    MalformedTopic(String),
    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("missing or malformed field `{0}`")]
    MissingField(&'static str),
}
