//! oppnet - opportunistic network simulation runner
//!
//! Runs one of the built-in scenarios and reports what moved where.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;

use oppnet_logging::{FileConfig, LogConfig, SubscriberBuilder, WorkerGuard};
use oppnet_simulation::scenarios::{self, RandomWalkConfig};
use oppnet_simulation::{
    CommConfig, ConsoleMonitor, DeviceSnapshot, EventRecorder, MapBuilder, SessionStats,
    SimulationContext, Simulator, StatsMonitor,
};

#[derive(Parser)]
#[command(
    name = "oppnet",
    about = "Opportunistic network simulation: mobile devices replicating artifacts on contact",
    version
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log to the console as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Also write JSON logs into this directory
    #[arg(long, global = true, value_name = "DIR")]
    log_file: Option<PathBuf>,

    /// Seed for a reproducible run
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Print every recorded event as JSON lines after the run
    #[arg(long, global = true)]
    events: bool,

    /// Print the final statistics and device states as JSON
    #[arg(long, global = true)]
    json_summary: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// One mobile object ferrying between its home node and an information source
    Ferry {
        /// Distance between the two nodes
        #[arg(long, default_value_t = scenarios::DEFAULT_FERRY_DISTANCE)]
        distance: f64,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Mobile objects wandering a grid with random sources and beacons
    RandomWalk {
        #[arg(long, default_value = "5")]
        width: usize,

        #[arg(long, default_value = "5")]
        height: usize,

        /// Distance between neighbouring grid nodes
        #[arg(long, default_value = "25")]
        spacing: f64,

        #[arg(short, long, default_value = "10")]
        mobile: usize,

        #[arg(short, long, default_value = "3")]
        sources: usize,

        #[arg(short, long, default_value = "2")]
        beacons: usize,

        /// Movement speed of every mobile object
        #[arg(long, default_value_t = oppnet_simulation::DEFAULT_SPEED)]
        speed: f64,

        /// Weight multiplier for turning straight back (0 = never, 1 = unbiased)
        #[arg(long, default_value_t = oppnet_simulation::DEFAULT_RETURN_BIAS)]
        return_bias: f64,

        #[command(flatten)]
        run: RunArgs,
    },

    /// A line with a source at one end and a relaying beacon in the middle
    BeaconRelay {
        #[arg(short, long, default_value = "9")]
        nodes: usize,

        #[arg(long, default_value = "25")]
        spacing: f64,

        #[arg(short, long, default_value = "4")]
        mobile: usize,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Build and print a map
    Map {
        #[arg(short, long, value_enum, default_value = "grid")]
        kind: MapKind,

        /// Nodes per side (grid) or in total (line, ring)
        #[arg(short, long, default_value = "4")]
        nodes: usize,

        #[arg(long, default_value = "10")]
        spacing: f64,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Simulated seconds to run
    #[arg(short, long, default_value = "300")]
    duration: f64,

    /// Length of one tick in simulated seconds
    #[arg(short, long, default_value_t = oppnet_simulation::DEFAULT_TIMESTEP)]
    timestep: f64,

    /// Channel setup time before discovery
    #[arg(long, default_value = "0.5")]
    setup_time: f64,

    /// Probability that discovery succeeds
    #[arg(long, default_value = "0.95")]
    discovery_rate: f64,

    /// Probability that a transfer is committed
    #[arg(long, default_value = "0.95")]
    transmission_rate: f64,

    /// Log every tick, not just protocol events
    #[arg(long)]
    log_ticks: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum MapKind {
    Line,
    Ring,
    Grid,
}

#[derive(Serialize)]
struct RunSummary {
    time: f64,
    iterations: i64,
    stats: SessionStats,
    devices: Vec<DeviceSnapshot>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging(&cli);

    match &cli.command {
        Commands::Ferry { distance, run } => {
            let sim = scenarios::two_node_ferry(context(&cli, run)?, *distance)?;
            execute(&cli, sim, run)?;
        }
        Commands::RandomWalk {
            width,
            height,
            spacing,
            mobile,
            sources,
            beacons,
            speed,
            return_bias,
            run,
        } => {
            let config = RandomWalkConfig {
                grid_width: *width,
                grid_height: *height,
                spacing: *spacing,
                mobile_objects: *mobile,
                information_sources: *sources,
                beacons: *beacons,
                timestep: run.timestep,
                speed: *speed,
                return_bias: *return_bias,
            };
            let sim = scenarios::random_walk(context(&cli, run)?, &config)?;
            execute(&cli, sim, run)?;
        }
        Commands::BeaconRelay {
            nodes,
            spacing,
            mobile,
            run,
        } => {
            let sim = scenarios::beacon_relay(context(&cli, run)?, *nodes, *spacing, *mobile)?;
            execute(&cli, sim, run)?;
        }
        Commands::Map {
            kind,
            nodes,
            spacing,
        } => {
            let map = match kind {
                MapKind::Line => MapBuilder::line(*nodes, *spacing)?,
                MapKind::Ring => MapBuilder::ring(*nodes, *spacing)?,
                MapKind::Grid => MapBuilder::grid(*nodes, *nodes, *spacing)?,
            };
            println!("{}", map.visualize());
        }
    }

    Ok(())
}

fn init_logging(cli: &Cli) -> Option<WorkerGuard> {
    let mut config = if cli.verbose {
        LogConfig::development()
    } else {
        LogConfig::default()
    };
    config.console.pretty = !cli.json_logs;
    if let Some(dir) = &cli.log_file {
        config.file = Some(FileConfig {
            directory: dir.clone(),
            ..FileConfig::default()
        });
    }
    SubscriberBuilder::new().with_config(config).init()
}

fn context(cli: &Cli, run: &RunArgs) -> anyhow::Result<SimulationContext> {
    let context = match cli.seed {
        Some(seed) => SimulationContext::seeded(seed),
        None => SimulationContext::new(),
    };
    let config = CommConfig::default()
        .with_channel_setup_time(run.setup_time)
        .with_discovery_success_rate(run.discovery_rate)
        .with_transmission_success_rate(run.transmission_rate);
    Ok(context.with_comm_config(config)?)
}

fn execute(cli: &Cli, mut sim: Simulator, run: &RunArgs) -> anyhow::Result<()> {
    sim.set_timestep(run.timestep)?;

    let console = Arc::new(ConsoleMonitor::new(run.log_ticks, true));
    let stats = Arc::new(StatsMonitor::new());
    let recorder = Arc::new(EventRecorder::new());
    sim.add_monitor(console);
    sim.add_monitor(stats.clone());
    if cli.events {
        sim.add_monitor(recorder.clone());
    }

    sim.run(run.duration)?;

    let totals = stats.stats();
    println!("\n=== Run complete ===");
    println!("  Simulated time:        {:.2}s", sim.time());
    println!("  Iterations:            {}", sim.iteration());
    println!("  Sessions initiated:    {}", totals.initiated);
    println!(
        "  Discovery ok/failed:   {}/{}",
        totals.discovery_succeeded, totals.discovery_failed
    );
    println!(
        "  Transfers ok/failed:   {}/{}",
        totals.transmission_succeeded, totals.transmission_failed
    );
    println!("  Aborted:               {}", totals.aborted);
    println!("  Artifacts transferred: {}", totals.artifacts_transferred);
    println!("  Delivery ratio:        {:.1}%", totals.delivery_ratio() * 100.0);

    if cli.events {
        print!("{}", recorder.to_json_lines()?);
    }

    if cli.json_summary {
        let summary = RunSummary {
            time: sim.time(),
            iterations: sim.iteration(),
            stats: totals,
            devices: sim.all_devices().iter().map(|d| d.snapshot()).collect(),
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    Ok(())
}
