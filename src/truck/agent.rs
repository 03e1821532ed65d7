use rand::Rng;
use tracing::{debug, info};

use crate::codec::TelemetryCodec;
use crate::kinematics::KinematicModel;
use crate::protocol::{CommandFrame, SensorFrame, SetpointFrame, StateFrame};
use crate::truck::nav::NavigationController;
use crate::truck::{TruckParams, TruckState, TEMPERATURE_TEST_INCREMENT_C};

const MAX_COMMAND_BATCH: usize = 32;

/// Default milliseconds of command silence before the watchdog zeroes the
/// acceleration command of a manually driven truck.
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 500;

/// Run state toggled by the bench operator. Pausing stops physics
/// integration only; message intake and telemetry keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Paused,
}

/// Frames produced by one tick, cadence-gated.
#[derive(Debug, Clone, Default)]
pub struct TickOutputs {
    pub sensors: Option<SensorFrame>,
    pub state: Option<StateFrame>,
    /// Applied actuator values echoed back on the commands topic.
    pub echo: Option<CommandFrame>,
}

/// One simulated truck: physical state, physics model, telemetry codec,
/// and the command inbox that is merged last-write-wins at tick start.
#[derive(Debug)]
pub struct TruckAgent {
    state: TruckState,
    model: KinematicModel,
    codec: TelemetryCodec,
    nav: NavigationController,

    inbox: heapless::Vec<CommandFrame, MAX_COMMAND_BATCH>,
    setpoint: Option<SetpointFrame>,

    run_state: RunState,
    automatic: bool,
    arrived: bool,

    last_command_ms: u64,
    command_timeout_ms: u64,

    publish_every: u64,
    tick_count: u64,
}

impl TruckAgent {
    pub fn new(id: u32, x: f64, y: f64, params: TruckParams) -> Self {
        Self {
            state: TruckState::new(id, x, y),
            model: KinematicModel::new(params),
            codec: TelemetryCodec::default(),
            nav: NavigationController::new(),
            inbox: heapless::Vec::new(),
            setpoint: None,
            run_state: RunState::Running,
            automatic: false,
            arrived: false,
            last_command_ms: 0,
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT_MS,
            publish_every: 1,
            tick_count: 0,
        }
    }

    pub fn with_publish_every(mut self, publish_every: u64) -> Self {
        self.publish_every = publish_every.max(1);
        self
    }

    pub fn with_command_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.command_timeout_ms = timeout_ms;
        self
    }

    pub fn id(&self) -> u32 {
        self.state.id
    }

    pub fn state(&self) -> &TruckState {
        &self.state
    }

    pub fn is_automatic(&self) -> bool {
        self.automatic
    }

    pub fn is_arrived(&self) -> bool {
        self.arrived
    }

    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    pub fn set_run_state(&mut self, run_state: RunState) {
        if self.run_state != run_state {
            info!(truck_id = self.state.id, ?run_state, "run state change");
        }
        self.run_state = run_state;
    }

    /// Bench toggle: flips the electrical fault flag.
    pub fn toggle_electrical_fault(&mut self) -> bool {
        self.state.fault_electrical = !self.state.fault_electrical;
        info!(
            truck_id = self.state.id,
            active = self.state.fault_electrical,
            "electrical fault toggled"
        );
        self.state.fault_electrical
    }

    /// Bench toggle: flips the hydraulic fault flag.
    pub fn toggle_hydraulic_fault(&mut self) -> bool {
        self.state.fault_hydraulic = !self.state.fault_hydraulic;
        info!(
            truck_id = self.state.id,
            active = self.state.fault_hydraulic,
            "hydraulic fault toggled"
        );
        self.state.fault_hydraulic
    }

    /// Bench toggle: drives temperature up to exercise the thermal alarms.
    pub fn bump_temperature(&mut self) {
        self.state.temperature = (self.state.temperature + TEMPERATURE_TEST_INCREMENT_C)
            .min(crate::truck::TEMPERATURE_MAX_C);
    }

    /// Buffers an inbound command for the next tick. Intake continues while
    /// paused. Actuator echoes (frames carrying `arrived`) originate from
    /// this agent and are dropped here, otherwise a truck would hear its
    /// own echo and never trip the command watchdog.
    pub fn handle_command(&mut self, frame: CommandFrame, now_ms: u64) {
        if frame.arrived.is_some() {
            return;
        }
        self.last_command_ms = now_ms;
        if self.inbox.is_full() {
            self.inbox.remove(0);
        }
        let _ = self.inbox.push(frame);
    }

    /// Stores a one-shot waypoint; it steers the truck only in automatic
    /// mode. A new target clears the arrival latch.
    pub fn handle_setpoint(&mut self, setpoint: SetpointFrame) {
        info!(
            truck_id = self.state.id,
            x = setpoint.target_x,
            y = setpoint.target_y,
            speed = setpoint.target_speed,
            "setpoint received"
        );
        self.setpoint = Some(setpoint);
        self.nav.retarget();
        self.arrived = false;
    }

    /// One simulation step: merge buffered commands, run the command
    /// watchdog, let navigation drive in automatic mode, integrate physics,
    /// and emit telemetry on the configured cadence.
    pub fn tick<R: Rng + ?Sized>(&mut self, now_ms: u64, rng: &mut R) -> TickOutputs {
        let merged = self.drain_inbox();
        if let Some(frame) = merged {
            self.apply_command(&frame);
        }

        self.check_command_watchdog(now_ms);

        if self.automatic {
            self.run_navigation();
        }

        if self.state.has_fault() {
            // A faulted truck stops; its heading target is left alone.
            self.state.acceleration = 0;
        }

        if self.run_state == RunState::Running {
            self.model.advance(&mut self.state);
        }

        self.tick_count += 1;
        if self.tick_count % self.publish_every == 0 {
            self.emit(now_ms, rng)
        } else {
            TickOutputs::default()
        }
    }

    fn drain_inbox(&mut self) -> Option<CommandFrame> {
        if self.inbox.is_empty() {
            return None;
        }
        let mut merged = CommandFrame::default();
        for frame in self.inbox.iter() {
            merged.merge_from(frame);
        }
        self.inbox.clear();
        Some(merged)
    }

    fn apply_command(&mut self, cmd: &CommandFrame) {
        // Operator vocabulary first; the absolute actuator-level fields win
        // when both appear in the same merge window.
        if let Some(v) = cmd.accelerate {
            self.state.acceleration = v.clamp(-100, 100);
        }
        if let Some(v) = cmd.acceleration {
            self.state.acceleration = v.clamp(-100, 100);
        }

        let mut steering = self.state.steering;
        if let Some(d) = cmd.steer_left {
            steering += d;
        }
        if let Some(d) = cmd.steer_right {
            steering -= d;
        }
        if let Some(v) = cmd.steering {
            steering = v;
        }
        self.state.steering = steering;

        if cmd.rearm == Some(true) {
            // Unconditional: clears both flags, touches nothing else.
            self.state.fault_electrical = false;
            self.state.fault_hydraulic = false;
            info!(truck_id = self.state.id, "rearm");
        }

        if cmd.auto_mode == Some(true) {
            if self.state.has_fault() {
                debug!(truck_id = self.state.id, "auto mode rejected while faulted");
            } else if !self.automatic {
                self.automatic = true;
                info!(truck_id = self.state.id, "mode change to auto");
            }
        }
        if cmd.manual_mode == Some(true) && self.automatic {
            self.automatic = false;
            info!(truck_id = self.state.id, "mode change to manual");
        }
    }

    fn check_command_watchdog(&mut self, now_ms: u64) {
        if self.automatic || self.state.acceleration == 0 {
            return;
        }
        if now_ms.saturating_sub(self.last_command_ms) > self.command_timeout_ms {
            debug!(
                truck_id = self.state.id,
                idle_ms = now_ms.saturating_sub(self.last_command_ms),
                "command watchdog expired, stopping"
            );
            self.state.acceleration = 0;
        }
    }

    fn run_navigation(&mut self) {
        let Some(target) = self.setpoint else {
            self.state.acceleration = 0;
            return;
        };
        let out = self.nav.update(&self.state, &target);
        self.state.acceleration = out.acceleration;
        self.state.steering = out.steering;
        if out.arrived && !self.arrived {
            info!(truck_id = self.state.id, "arrived at waypoint");
        }
        self.arrived = out.arrived;
    }

    fn emit<R: Rng + ?Sized>(&self, now_ms: u64, rng: &mut R) -> TickOutputs {
        TickOutputs {
            sensors: Some(self.codec.encode_sensors(&self.state, now_ms, rng)),
            state: Some(self.codec.encode_state(self.automatic, self.state.has_fault())),
            echo: Some(CommandFrame {
                acceleration: Some(self.state.acceleration),
                steering: Some(self.state.steering),
                arrived: Some(self.arrived),
                ..CommandFrame::default()
            }),
        }
    }
}
