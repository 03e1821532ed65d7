use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::bus::{LocalBus, Transport};
use crate::clock::Clock;
use crate::codec::TelemetryCodec;
use crate::protocol::{commands_topic, sensors_topic, setpoint_topic, state_topic};
use crate::truck::agent::RunState;
use crate::truck::{TickOutputs, TruckAgent, TruckParams};

pub const DEFAULT_TICK_PERIOD_MS: u64 = 33;

/// Fleet-wide simulation settings.
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub tick_period_ms: u64,
    /// Publish telemetry every Nth tick.
    pub publish_every: u64,
    pub command_timeout_ms: u64,
    pub params: TruckParams,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            tick_period_ms: DEFAULT_TICK_PERIOD_MS,
            publish_every: 1,
            command_timeout_ms: crate::truck::agent::DEFAULT_COMMAND_TIMEOUT_MS,
            params: TruckParams::default(),
        }
    }
}

/// Bench controls addressed to one running truck task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruckControl {
    Pause,
    Resume,
    ToggleElectricalFault,
    ToggleHydraulicFault,
    BumpTemperature,
}

/// Handle over a spawned fleet: control channels plus the task handles.
pub struct FleetHandle {
    controls: HashMap<u32, mpsc::UnboundedSender<TruckControl>>,
    tasks: Vec<JoinHandle<()>>,
}

impl FleetHandle {
    /// Sends a bench control to one truck; false if the id is unknown or
    /// its task is gone.
    pub fn control(&self, truck_id: u32, control: TruckControl) -> bool {
        self.controls
            .get(&truck_id)
            .is_some_and(|tx| tx.send(control).is_ok())
    }

    pub fn truck_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.controls.keys().copied()
    }

    /// Waits for every truck task to wind down after shutdown fires.
    pub async fn join(self) {
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

/// Owns the fleet before launch: one agent per truck id, no shared state
/// between trucks beyond the bus itself.
///
/// Commands and setpoints are taken from `ingress`, telemetry goes out on
/// `egress`. Standalone runs pass the same bus for both; the relay bridge
/// keeps them separate so imported traffic is never re-exported.
pub struct FleetSimulator {
    config: SimConfig,
    ingress: LocalBus,
    egress: LocalBus,
    clock: Arc<dyn Clock>,
    agents: Vec<TruckAgent>,
}

impl FleetSimulator {
    pub fn new(config: SimConfig, ingress: LocalBus, egress: LocalBus, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            ingress,
            egress,
            clock,
            agents: Vec::new(),
        }
    }

    pub fn add_truck(&mut self, truck_id: u32, x: f64, y: f64) {
        let agent = TruckAgent::new(truck_id, x, y, self.config.params.clone())
            .with_publish_every(self.config.publish_every)
            .with_command_timeout_ms(self.config.command_timeout_ms);
        self.agents.push(agent);
    }

    /// Seeds `count` trucks on the staging diagonal used by the bench
    /// scenario: truck 1 at (100, 200), truck 2 at (200, 300), and so on,
    /// clamped to the map.
    pub fn add_standard_fleet(&mut self, count: u32) {
        for i in 1..=count {
            let x = (f64::from(i) * 100.0).min(self.config.params.map_width);
            let y = (100.0 + f64::from(i) * 100.0).min(self.config.params.map_height);
            self.add_truck(i, x, y);
        }
    }

    pub fn truck_count(&self) -> usize {
        self.agents.len()
    }

    /// Launches one independent task per truck and returns the handle.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> FleetHandle {
        let mut controls = HashMap::new();
        let mut tasks = Vec::new();

        for agent in self.agents {
            let (control_tx, control_rx) = mpsc::unbounded_channel();
            controls.insert(agent.id(), control_tx);
            tasks.push(tokio::spawn(run_truck(
                agent,
                self.ingress.clone(),
                self.egress.clone(),
                Arc::clone(&self.clock),
                self.config.tick_period_ms,
                control_rx,
                shutdown.clone(),
            )));
        }

        info!(trucks = tasks.len(), "fleet launched");
        FleetHandle { controls, tasks }
    }
}

/// One truck's task: fixed-rate tick, async command/setpoint intake, bench
/// controls, and cadence-gated telemetry publication.
async fn run_truck(
    mut agent: TruckAgent,
    ingress: LocalBus,
    egress: LocalBus,
    clock: Arc<dyn Clock>,
    tick_period_ms: u64,
    mut control_rx: mpsc::UnboundedReceiver<TruckControl>,
    mut shutdown: watch::Receiver<bool>,
) {
    let truck_id = agent.id();
    let codec = TelemetryCodec::default();
    let mut rng = StdRng::from_os_rng();

    let mut commands = ingress.subscribe_filtered(&commands_topic(truck_id));
    let mut setpoints = ingress.subscribe_filtered(&setpoint_topic(truck_id));

    let mut interval = tokio::time::interval(Duration::from_millis(tick_period_ms.max(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(truck_id, "truck task started");
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let now_ms = clock.now_ms();
                let outputs = agent.tick(now_ms, &mut rng);
                publish_outputs(&egress, truck_id, outputs, now_ms);
            }
            Some(envelope) = commands.recv() => {
                let frame = codec.decode_command(&envelope.payload);
                agent.handle_command(frame, clock.now_ms());
            }
            Some(envelope) = setpoints.recv() => {
                match codec.decode_setpoint(&envelope.payload) {
                    Ok(setpoint) => agent.handle_setpoint(setpoint),
                    Err(e) => warn!(truck_id, error = %e, "setpoint discarded"),
                }
            }
            Some(control) = control_rx.recv() => {
                apply_control(&mut agent, control);
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!(truck_id, "truck task stopped");
}

fn apply_control(agent: &mut TruckAgent, control: TruckControl) {
    match control {
        TruckControl::Pause => agent.set_run_state(RunState::Paused),
        TruckControl::Resume => agent.set_run_state(RunState::Running),
        TruckControl::ToggleElectricalFault => {
            agent.toggle_electrical_fault();
        }
        TruckControl::ToggleHydraulicFault => {
            agent.toggle_hydraulic_fault();
        }
        TruckControl::BumpTemperature => agent.bump_temperature(),
    }
}

fn publish_outputs(bus: &LocalBus, truck_id: u32, outputs: TickOutputs, now_ms: u64) {
    if let Some(sensors) = outputs.sensors {
        publish_json(bus, &sensors_topic(truck_id), &sensors, now_ms);
    }
    if let Some(state) = outputs.state {
        publish_json(bus, &state_topic(truck_id), &state, now_ms);
    }
    if let Some(echo) = outputs.echo {
        publish_json(bus, &commands_topic(truck_id), &echo, now_ms);
    }
}

fn publish_json<T: serde::Serialize>(bus: &LocalBus, topic: &str, value: &T, now_ms: u64) {
    match serde_json::to_value(value) {
        Ok(payload) => {
            if let Err(e) = bus.publish(topic, payload, now_ms) {
                // Fire-and-forget: log and let the next cycle retry.
                warn!(%topic, error = %e, "telemetry publish failed");
            }
        }
        Err(e) => warn!(%topic, error = %e, "telemetry encode failed"),
    }
}
