use std::collections::BTreeMap;

use serde_json::Value;
use tracing::info;

use crate::codec::TelemetryCodec;
use crate::protocol::{MessageClass, ProtocolError, SensorFrame, StateFrame};

pub const POSITION_HISTORY_CAPACITY: usize = 20;
pub const TEMPERATURE_WARNING_C: i32 = 95;
pub const TEMPERATURE_CRITICAL_C: i32 = 120;

/// Operating mode as observed on the state topic. `Unknown` until the first
/// state message for a truck arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruckMode {
    Manual,
    Auto,
    Unknown,
}

/// Ranking used when a truck can be summarized by only one status; the
/// first applicable entry wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DisplayPriority {
    Fault,
    CriticalTemperature,
    WarningTemperature,
    Automatic,
    Manual,
}

/// Latest reported state of one truck, as seen from the supervisory side.
///
/// This record is rebuilt purely from messages; it never aliases the
/// simulator's own state. Created lazily on the first message for an id and
/// kept for the life of the process.
#[derive(Debug)]
pub struct TruckRecord {
    pub id: u32,
    pub position_x: i32,
    pub position_y: i32,
    pub angle: i32,
    pub temperature: i32,
    pub fault_electrical: bool,
    pub fault_hydraulic: bool,
    pub mode: TruckMode,
    pub fault_state: bool,
    pub acceleration: i32,
    pub steering: i32,
    pub arrived: bool,
    pub last_update: u64,
    history: heapless::Deque<(i32, i32), POSITION_HISTORY_CAPACITY>,
}

impl TruckRecord {
    fn new(id: u32) -> Self {
        Self {
            id,
            position_x: 0,
            position_y: 0,
            angle: 0,
            temperature: 0,
            fault_electrical: false,
            fault_hydraulic: false,
            mode: TruckMode::Unknown,
            fault_state: false,
            acceleration: 0,
            steering: 0,
            arrived: false,
            last_update: 0,
            history: heapless::Deque::new(),
        }
    }

    fn merge_sensors(&mut self, frame: &SensorFrame, now_ms: u64) {
        self.position_x = frame.position_x;
        self.position_y = frame.position_y;
        self.angle = frame.angle_x;
        self.temperature = frame.temperature;
        self.fault_electrical = frame.fault_electrical;
        self.fault_hydraulic = frame.fault_hydraulic;
        self.last_update = now_ms;

        if self.history.is_full() {
            self.history.pop_front();
        }
        let _ = self.history.push_back((frame.position_x, frame.position_y));
    }

    fn merge_state(&mut self, frame: &StateFrame, now_ms: u64) {
        self.mode = if frame.automatic {
            TruckMode::Auto
        } else {
            TruckMode::Manual
        };
        self.fault_state = frame.fault;
        self.last_update = now_ms;
    }

    fn merge_commands(&mut self, payload: &Value, codec: &TelemetryCodec, now_ms: u64) {
        let frame = codec.decode_command(payload);
        if let Some(v) = frame.acceleration {
            self.acceleration = v;
        }
        if let Some(v) = frame.steering {
            self.steering = v;
        }
        if let Some(v) = frame.arrived {
            self.arrived = v;
        }
        self.last_update = now_ms;
    }

    /// Oldest-first reported positions, bounded to the ring capacity.
    pub fn position_history(&self) -> impl Iterator<Item = &(i32, i32)> {
        self.history.iter()
    }

    pub fn has_any_fault(&self) -> bool {
        self.fault_state
            || self.fault_electrical
            || self.fault_hydraulic
            || self.temperature > TEMPERATURE_CRITICAL_C
    }

    pub fn is_temperature_warning(&self) -> bool {
        self.temperature > TEMPERATURE_WARNING_C
    }

    pub fn display_priority(&self) -> DisplayPriority {
        if self.fault_state || self.fault_electrical || self.fault_hydraulic {
            DisplayPriority::Fault
        } else if self.temperature > TEMPERATURE_CRITICAL_C {
            DisplayPriority::CriticalTemperature
        } else if self.is_temperature_warning() {
            DisplayPriority::WarningTemperature
        } else if self.mode == TruckMode::Auto {
            DisplayPriority::Automatic
        } else {
            DisplayPriority::Manual
        }
    }

    /// Milliseconds since the last message touched this record. Advisory
    /// only; a stale truck is never quarantined automatically.
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_update)
    }
}

/// What one ingested message did to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ingest {
    pub truck_id: u32,
    pub class: MessageClass,
    /// True when this message created the record, i.e. the roster grew.
    pub roster_changed: bool,
}

/// Supervisor-side view of the fleet: one lazily created record per truck
/// id, updated only through `on_message`.
#[derive(Debug, Default)]
pub struct TruckRegistry {
    trucks: BTreeMap<u32, TruckRecord>,
    codec: TelemetryCodec,
}

impl TruckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Demultiplexes one bus message into the owning record. Sensor and
    /// state payloads are machine-generated and decoded strictly (a
    /// malformed one discards that message); command payloads are merged
    /// leniently field by field.
    pub fn on_message(
        &mut self,
        topic: &str,
        payload: &Value,
        now_ms: u64,
    ) -> Result<Ingest, ProtocolError> {
        let (truck_id, class) = crate::protocol::parse_topic(topic)?;

        // Decode before touching the roster so malformed payloads cannot
        // conjure trucks into existence.
        enum Decoded {
            Sensors(SensorFrame),
            State(StateFrame),
            Commands,
            Setpoint,
        }
        let decoded = match class {
            MessageClass::Sensors => Decoded::Sensors(serde_json::from_value(payload.clone())?),
            MessageClass::State => Decoded::State(serde_json::from_value(payload.clone())?),
            MessageClass::Commands => Decoded::Commands,
            MessageClass::Setpoint => Decoded::Setpoint,
        };

        let roster_changed = !self.trucks.contains_key(&truck_id);
        let record = self
            .trucks
            .entry(truck_id)
            .or_insert_with(|| TruckRecord::new(truck_id));
        if roster_changed {
            info!(truck_id, "new truck observed, roster grew");
        }

        match decoded {
            Decoded::Sensors(frame) => record.merge_sensors(&frame, now_ms),
            Decoded::State(frame) => record.merge_state(&frame, now_ms),
            Decoded::Commands => record.merge_commands(payload, &self.codec, now_ms),
            // Setpoints flow supervisor -> truck; nothing to track beyond
            // the record's existence and freshness.
            Decoded::Setpoint => record.last_update = now_ms,
        }

        Ok(Ingest {
            truck_id,
            class,
            roster_changed,
        })
    }

    pub fn get(&self, truck_id: u32) -> Option<&TruckRecord> {
        self.trucks.get(&truck_id)
    }

    pub fn len(&self) -> usize {
        self.trucks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trucks.is_empty()
    }

    /// Known truck ids in ascending order.
    pub fn roster(&self) -> impl Iterator<Item = u32> + '_ {
        self.trucks.keys().copied()
    }

    pub fn records(&self) -> impl Iterator<Item = &TruckRecord> {
        self.trucks.values()
    }

    /// Mean record age across the fleet; the console surfaces this as a
    /// link-health indicator.
    pub fn average_age_ms(&self, now_ms: u64) -> Option<u64> {
        if self.trucks.is_empty() {
            return None;
        }
        let total: u64 = self.trucks.values().map(|r| r.age_ms(now_ms)).sum();
        Some(total / self.trucks.len() as u64)
    }
}

/// Ingest pump: feeds sensors, state, and command-echo traffic into the
/// registry. Setpoints flow the other way and are skipped. Malformed
/// payloads discard that one message and the pump keeps going.
pub async fn run_ingest(
    registry: std::sync::Arc<tokio::sync::Mutex<TruckRegistry>>,
    bus: crate::bus::LocalBus,
    clock: std::sync::Arc<dyn crate::clock::Clock>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut subscription = bus.subscribe_filtered("truck/+/+");
    loop {
        tokio::select! {
            Some(envelope) = subscription.recv() => {
                if crate::protocol::topic_matches(crate::protocol::FILTER_SETPOINT, &envelope.topic) {
                    continue;
                }
                let now_ms = clock.now_ms();
                let mut registry = registry.lock().await;
                match registry.on_message(&envelope.topic, &envelope.payload, now_ms) {
                    Ok(ingest) if ingest.roster_changed => {
                        info!(truck_id = ingest.truck_id, roster = registry.len(), "roster changed");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(topic = %envelope.topic, error = %e, "message discarded");
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

    fn sensor_payload(id: u32, x: i32, y: i32) -> Value {
        json!({
            "truck_id": id,
            "position_x": x,
            "position_y": y,
            "angle_x": 45,
            "temperature": 80,
            "fault_electrical": false,
            "fault_hydraulic": false,
            "timestamp": 1000u64
        })
    }

    #[test]
    fn first_sensor_message_creates_record() {
        let mut registry = TruckRegistry::new();
        let ingest = registry
            .on_message("truck/7/sensors", &sensor_payload(7, 10, 20), 1000)
            .unwrap();
        assert!(ingest.roster_changed);
        assert_eq!(registry.len(), 1);

        let record = registry.get(7).unwrap();
        assert_eq!(record.mode, TruckMode::Unknown);
        assert_eq!(record.position_x, 10);

        let ingest = registry
            .on_message("truck/7/sensors", &sensor_payload(7, 11, 21), 1100)
            .unwrap();
        assert!(!ingest.roster_changed);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn malformed_sensor_payload_does_not_create_record() {
        let mut registry = TruckRegistry::new();
        let result = registry.on_message("truck/7/sensors", &json!({ "position_x": "left" }), 0);
        assert!(result.is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn command_echo_before_first_sensor_frame_is_fine() {
        let mut registry = TruckRegistry::new();
        let ingest = registry
            .on_message(
                "truck/3/commands",
                &json!({ "acceleration": 40, "steering": 10, "arrived": false }),
                500,
            )
            .unwrap();
        assert!(ingest.roster_changed);

        let record = registry.get(3).unwrap();
        assert_eq!(record.acceleration, 40);
        assert_eq!(record.mode, TruckMode::Unknown);
        assert_eq!(record.last_update, 500);
    }

    #[test]
    fn empty_command_only_refreshes_timestamp() {
        let mut registry = TruckRegistry::new();
        registry
            .on_message("truck/1/sensors", &sensor_payload(1, 5, 6), 1000)
            .unwrap();
        let before = {
            let r = registry.get(1).unwrap();
            (r.position_x, r.position_y, r.acceleration, r.steering, r.arrived)
        };

        registry
            .on_message("truck/1/commands", &json!({ "warp_factor": 9 }), 2000)
            .unwrap();
        let record = registry.get(1).unwrap();
        assert_eq!(
            (
                record.position_x,
                record.position_y,
                record.acceleration,
                record.steering,
                record.arrived
            ),
            before
        );
        assert_eq!(record.last_update, 2000);
    }

    #[test]
    fn history_ring_is_bounded_and_evicts_oldest() {
        let mut registry = TruckRegistry::new();
        for i in 0..30 {
            registry
                .on_message("truck/1/sensors", &sensor_payload(1, i, i), u64::from(i as u32))
                .unwrap();
        }
        let record = registry.get(1).unwrap();
        let history: Vec<_> = record.position_history().copied().collect();
        assert_eq!(history.len(), POSITION_HISTORY_CAPACITY);
        assert_eq!(history[0], (10, 10));
        assert_eq!(history[POSITION_HISTORY_CAPACITY - 1], (29, 29));
    }

    #[test]
    fn critical_temperature_alone_is_a_fault() {
        let mut registry = TruckRegistry::new();
        let payload = json!({
            "truck_id": 1,
            "position_x": 0,
            "position_y": 0,
            "angle_x": 0,
            "temperature": 121,
            "fault_electrical": false,
            "fault_hydraulic": false,
            "timestamp": 0u64
        });
        registry.on_message("truck/1/sensors", &payload, 0).unwrap();
        registry
            .on_message("truck/1/state", &json!({ "automatic": false, "fault": false }), 0)
            .unwrap();

        let record = registry.get(1).unwrap();
        assert!(record.has_any_fault());
        assert_eq!(
            record.display_priority(),
            DisplayPriority::CriticalTemperature
        );
    }

    #[test]
    fn display_priority_ordering() {
        let mut registry = TruckRegistry::new();
        registry
            .on_message("truck/1/sensors", &sensor_payload(1, 0, 0), 0)
            .unwrap();
        registry
            .on_message("truck/1/state", &json!({ "automatic": true, "fault": false }), 0)
            .unwrap();
        assert_eq!(
            registry.get(1).unwrap().display_priority(),
            DisplayPriority::Automatic
        );

        // Warning temperature outranks mode.
        let warm = json!({
            "truck_id": 1,
            "position_x": 0,
            "position_y": 0,
            "angle_x": 0,
            "temperature": 96,
            "fault_electrical": false,
            "fault_hydraulic": false,
            "timestamp": 0u64
        });
        registry.on_message("truck/1/sensors", &warm, 0).unwrap();
        assert_eq!(
            registry.get(1).unwrap().display_priority(),
            DisplayPriority::WarningTemperature
        );

        // Any fault outranks temperature.
        registry
            .on_message("truck/1/state", &json!({ "automatic": true, "fault": true }), 0)
            .unwrap();
        assert_eq!(
            registry.get(1).unwrap().display_priority(),
            DisplayPriority::Fault
        );
    }

    #[test]
    fn staleness_is_advisory() {
        let mut registry = TruckRegistry::new();
        registry
            .on_message("truck/1/sensors", &sensor_payload(1, 0, 0), 1000)
            .unwrap();
        let record = registry.get(1).unwrap();
        assert_eq!(record.age_ms(4000), 3000);
        assert_eq!(registry.average_age_ms(4000), Some(3000));
        // Still present no matter how old.
        assert_eq!(registry.len(), 1);
    }
}
