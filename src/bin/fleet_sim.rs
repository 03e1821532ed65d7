use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use tokio::sync::watch;
use tracing::info;

use fleetbus::bus::LocalBus;
use fleetbus::clock::{Clock, SystemClock};
use fleetbus::protocol::{FILTER_COMMANDS, FILTER_SENSORS, FILTER_STATE};
use fleetbus::relay::{run_relay_bridge, RelayReader, RelayWriter};
use fleetbus::sim::{FleetSimulator, SimConfig};
use fleetbus::truck::TruckParams;

/// Mining truck fleet simulator server.
#[derive(Parser, Debug)]
#[command(name = "fleetbus-sim", version, about = "Simulates a fleet of mining trucks publishing telemetry on a topic bus")]
struct Args {
    /// Number of trucks to simulate
    #[arg(long, default_value_t = 3)]
    trucks: u32,

    /// Physics tick period in milliseconds
    #[arg(long, default_value_t = 33)]
    tick_ms: u64,

    /// Publish telemetry every Nth tick
    #[arg(long, default_value_t = 1)]
    publish_every: u64,

    /// Milliseconds of command silence before a manual truck stops itself
    #[arg(long, default_value_t = 500)]
    command_timeout_ms: u64,

    /// Relay spool base directory: telemetry is written to <DIR>/from_sim,
    /// commands and setpoints are read from <DIR>/to_sim
    #[arg(long)]
    relay_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    println!("{}", "Mining Truck Fleet Simulator".bright_blue().bold());
    println!("============================");
    println!("   Trucks:       {}", args.trucks);
    println!("   Tick period:  {} ms", args.tick_ms);
    println!("   Publish every: {} tick(s)", args.publish_every);
    match &args.relay_dir {
        Some(dir) => println!("   Relay spool:  {}", dir.display()),
        None => println!("   Relay spool:  (standalone, in-process bus only)"),
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let egress = LocalBus::default();
    // Without a relay peer, commands arrive on the same in-process bus the
    // telemetry leaves on.
    let ingress = if args.relay_dir.is_some() {
        LocalBus::default()
    } else {
        egress.clone()
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Failing to set up the transport at startup is the one fatal error.
    let relay_task = match &args.relay_dir {
        Some(dir) => {
            let writer = RelayWriter::new(dir.join("from_sim"))?;
            let reader = RelayReader::new(dir.join("to_sim"))?;
            Some(tokio::spawn(run_relay_bridge(
                egress.clone(),
                ingress.clone(),
                writer,
                reader,
                vec![
                    FILTER_SENSORS.to_string(),
                    FILTER_STATE.to_string(),
                    FILTER_COMMANDS.to_string(),
                ],
                Arc::clone(&clock),
                shutdown_rx.clone(),
            )))
        }
        None => None,
    };

    let config = SimConfig {
        tick_period_ms: args.tick_ms,
        publish_every: args.publish_every,
        command_timeout_ms: args.command_timeout_ms,
        params: TruckParams::default(),
    };

    let mut fleet = FleetSimulator::new(config, ingress, egress, clock);
    fleet.add_standard_fleet(args.trucks);
    let handle = fleet.spawn(shutdown_rx);

    println!("{}", "Fleet running. Ctrl-C to stop.".green());

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    handle.join().await;
    if let Some(task) = relay_task {
        let _ = task.await;
    }

    println!("{}", "Fleet simulator stopped".yellow());
    Ok(())
}
