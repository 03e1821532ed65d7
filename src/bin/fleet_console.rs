use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{watch, Mutex};
use tracing::info;

use fleetbus::bus::{LocalBus, Transport};
use fleetbus::clock::{Clock, SystemClock};
use fleetbus::protocol::{CommandFrame, FILTER_COMMANDS, FILTER_SETPOINT};
use fleetbus::registry::{DisplayPriority, TruckRegistry};
use fleetbus::relay::{run_relay_bridge, RelayReader, RelayWriter};
use fleetbus::supervisor::{run_heartbeat, SupervisoryController};

/// Supervisory console for the truck fleet simulator.
#[derive(Parser, Debug)]
#[command(name = "fleetbus-console", version, about = "Supervisory console: fleet monitor and operator command issuance")]
struct Args {
    /// Relay spool base directory shared with the simulator: commands are
    /// written to <DIR>/to_sim, telemetry is read from <DIR>/from_sim
    #[arg(long)]
    relay_dir: PathBuf,

    #[command(subcommand)]
    command: ConsoleCommand,
}

#[derive(Subcommand, Debug)]
enum ConsoleCommand {
    /// Watch the fleet: roster, staleness, and status snapshots
    Monitor,
    /// Drive one truck interactively from stdin, with the keep-alive
    /// heartbeat running
    Drive {
        truck: u32,
    },
    /// Send a one-shot waypoint
    Waypoint {
        truck: u32,
        x: String,
        y: String,
    },
    /// Switch operating mode
    Mode {
        truck: u32,
        #[arg(value_enum)]
        mode: ModeArg,
    },
    /// Clear fault flags
    Rearm {
        truck: u32,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Auto,
    Manual,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    match args.command {
        ConsoleCommand::Monitor => monitor(&args.relay_dir).await,
        ConsoleCommand::Drive { truck } => drive(&args.relay_dir, truck).await,
        ConsoleCommand::Waypoint { truck, x, y } => one_shot_waypoint(&args.relay_dir, truck, &x, &y),
        ConsoleCommand::Mode { truck, mode } => one_shot_mode(&args.relay_dir, truck, mode),
        ConsoleCommand::Rearm { truck } => one_shot_rearm(&args.relay_dir, truck),
    }
}

fn command_writer(relay_dir: &std::path::Path) -> Result<RelayWriter, Box<dyn std::error::Error>> {
    Ok(RelayWriter::new(relay_dir.join("to_sim"))?)
}

fn send_frame(
    writer: &RelayWriter,
    topic: &str,
    frame: impl serde::Serialize,
) -> Result<(), Box<dyn std::error::Error>> {
    let payload = serde_json::to_value(frame)?;
    writer.publish(topic, payload, SystemClock.now_ms())?;
    Ok(())
}

fn one_shot_waypoint(
    relay_dir: &std::path::Path,
    truck: u32,
    x: &str,
    y: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut controller = SupervisoryController::new();
    controller.select_truck(truck, &TruckRegistry::new());
    let (topic, frame) = controller.waypoint(x, y)?;
    send_frame(&command_writer(relay_dir)?, &topic, frame)?;
    println!(
        "{} waypoint ({}, {}) -> truck {}",
        "sent".green(),
        frame.target_x,
        frame.target_y,
        truck
    );
    Ok(())
}

fn one_shot_mode(
    relay_dir: &std::path::Path,
    truck: u32,
    mode: ModeArg,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut controller = SupervisoryController::new();
    controller.select_truck(truck, &TruckRegistry::new());
    let (topic, frame) = controller.mode(matches!(mode, ModeArg::Auto))?;
    send_frame(&command_writer(relay_dir)?, &topic, frame)?;
    println!("{} {:?} mode -> truck {}", "sent".green(), mode, truck);
    Ok(())
}

fn one_shot_rearm(relay_dir: &std::path::Path, truck: u32) -> Result<(), Box<dyn std::error::Error>> {
    let mut controller = SupervisoryController::new();
    controller.select_truck(truck, &TruckRegistry::new());
    let (topic, frame) = controller.rearm()?;
    send_frame(&command_writer(relay_dir)?, &topic, frame)?;
    println!("{} rearm -> truck {}", "sent".green(), truck);
    Ok(())
}

/// Wires the ingest side: relay bridge plus registry pump.
struct ConsoleLink {
    egress: LocalBus,
    registry: Arc<Mutex<TruckRegistry>>,
    clock: Arc<dyn Clock>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

fn connect(relay_dir: &std::path::Path) -> Result<ConsoleLink, Box<dyn std::error::Error>> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let egress = LocalBus::default();
    let ingress = LocalBus::default();
    let registry = Arc::new(Mutex::new(TruckRegistry::new()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let writer = RelayWriter::new(relay_dir.join("to_sim"))?;
    let reader = RelayReader::new(relay_dir.join("from_sim"))?;

    let mut tasks = Vec::new();
    tasks.push(tokio::spawn(run_relay_bridge(
        egress.clone(),
        ingress.clone(),
        writer,
        reader,
        vec![FILTER_COMMANDS.to_string(), FILTER_SETPOINT.to_string()],
        Arc::clone(&clock),
        shutdown_rx.clone(),
    )));
    tasks.push(tokio::spawn(fleetbus::registry::run_ingest(
        Arc::clone(&registry),
        ingress,
        Arc::clone(&clock),
        shutdown_rx,
    )));

    Ok(ConsoleLink {
        egress,
        registry,
        clock,
        shutdown_tx,
        tasks,
    })
}

impl ConsoleLink {
    async fn close(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

async fn monitor(relay_dir: &std::path::Path) -> Result<(), Box<dyn std::error::Error>> {
    let link = connect(relay_dir)?;
    println!("{}", "Fleet monitor. Ctrl-C to stop.".bright_blue().bold());

    let mut snapshot = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = snapshot.tick() => {
                print_fleet(&link).await;
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    link.close().await;
    Ok(())
}

async fn print_fleet(link: &ConsoleLink) {
    let now_ms = link.clock.now_ms();
    let registry = link.registry.lock().await;
    if registry.is_empty() {
        println!("{}", "no trucks observed yet".dimmed());
        return;
    }
    for record in registry.records() {
        let status = match record.display_priority() {
            DisplayPriority::Fault => "FAULT".red().bold(),
            DisplayPriority::CriticalTemperature => "TEMP-CRIT".red(),
            DisplayPriority::WarningTemperature => "TEMP-WARN".yellow(),
            DisplayPriority::Automatic => "AUTO".green(),
            DisplayPriority::Manual => "MANUAL".cyan(),
        };
        let arrived = if record.arrived { " [arrived]" } else { "" };
        println!(
            "T{} [{}] pos=({}, {}) hdg={}° temp={}°C acc={}% str={}° age={:.1}s{}",
            record.id,
            status,
            record.position_x,
            record.position_y,
            record.angle,
            record.temperature,
            record.acceleration,
            record.steering,
            record.age_ms(now_ms) as f64 / 1000.0,
            arrived
        );
    }
    if let Some(avg) = registry.average_age_ms(now_ms) {
        println!("{}", format!("fleet: {} truck(s), avg age {} ms", registry.len(), avg).dimmed());
    }
}

async fn drive(relay_dir: &std::path::Path, truck: u32) -> Result<(), Box<dyn std::error::Error>> {
    let link = connect(relay_dir)?;
    let controller = Arc::new(Mutex::new(SupervisoryController::new()));
    {
        let registry = link.registry.lock().await;
        controller.lock().await.select_truck(truck, &registry);
    }

    // Keep-alive runs for as long as the drive session does.
    let heartbeat = tokio::spawn(run_heartbeat(
        Arc::clone(&controller),
        Arc::clone(&link.registry),
        Arc::new(link.egress.clone()),
        Arc::clone(&link.clock),
        link.shutdown_tx.subscribe(),
    ));

    println!("{}", format!("Driving truck {truck}").bright_blue().bold());
    println!("commands: w/s accel±5, a/d steer, h halt, auto, manual, rearm, wp X Y, status, q");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        if !handle_drive_line(&link, &controller, line.trim()).await {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    heartbeat.abort();
    link.close().await;
    println!("{}", "Drive session ended".yellow());
    Ok(())
}

/// Returns false when the session should end.
async fn handle_drive_line(
    link: &ConsoleLink,
    controller: &Arc<Mutex<SupervisoryController>>,
    line: &str,
) -> bool {
    let now_ms = link.clock.now_ms();
    let mut controller = controller.lock().await;

    let result: Result<Option<(String, CommandFrame)>, fleetbus::supervisor::SupervisorError> =
        match line.split_whitespace().collect::<Vec<_>>().as_slice() {
            ["q"] | ["quit"] => return false,
            ["w"] => controller.accelerate(now_ms).map(Some),
            ["s"] => controller.decelerate(now_ms).map(Some),
            ["a"] => controller.steer_left(now_ms).map(Some),
            ["d"] => controller.steer_right(now_ms).map(Some),
            ["h"] | ["halt"] => controller.halt(now_ms).map(Some),
            ["auto"] => controller.mode(true).map(Some),
            ["manual"] => controller.mode(false).map(Some),
            ["rearm"] => controller.rearm().map(Some),
            ["wp", x, y] => match controller.waypoint(x, y) {
                Ok((topic, setpoint)) => {
                    publish(&link.egress, &topic, &setpoint, now_ms);
                    info!(x = setpoint.target_x, y = setpoint.target_y, "waypoint sent");
                    Ok(None)
                }
                Err(e) => Err(e),
            },
            ["status"] => {
                drop(controller);
                print_fleet(link).await;
                return true;
            }
            [] => Ok(None),
            _ => {
                println!("{}", "unknown command".red());
                Ok(None)
            }
        };

    match result {
        Ok(Some((topic, frame))) => publish(&link.egress, &topic, &frame, now_ms),
        Ok(None) => {}
        Err(e) => println!("{} {}", "rejected:".red(), e),
    }
    true
}

fn publish<T: serde::Serialize>(bus: &LocalBus, topic: &str, frame: &T, now_ms: u64) {
    match serde_json::to_value(frame) {
        Ok(payload) => {
            if let Err(e) = bus.publish(topic, payload, now_ms) {
                println!("{} {}", "publish failed:".red(), e);
            }
        }
        Err(e) => println!("{} {}", "encode failed:".red(), e),
    }
}
