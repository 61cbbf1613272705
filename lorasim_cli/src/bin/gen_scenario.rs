use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use lorasimcore::{
    mac::MacConfig,
    scenario::{
        ScenarioIdentity,
        generation::{ScenarioGenerator, power::IntermittentPower, traffic::PeriodicTraffic},
    },
    sim_file::{self, load_file},
    simulation::models::{Collision, DownlinkModel},
    units::SECONDS,
};
use rand::Rng;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(long)]
    seed: Option<u64>,

    /// Generate from an identity
    #[arg(long)]
    id: Option<PathBuf>,

    /// Generate as an identity
    #[arg(long)]
    asid: bool,

    /// Use JSON instead of rust messagepack
    #[arg(long)]
    json: bool,

    #[arg(long, default_value_t = 100)]
    devices: usize,

    #[arg(long, default_value_t = 1)]
    gateways: usize,

    /// Percentage of devices sending confirmed packets
    #[arg(long, default_value_t = 0)]
    confirmed: u32,

    /// Transmissions allowed per packet
    #[arg(long, default_value_t = 1)]
    transmissions: u8,

    #[arg(long, default_value_t = 5)]
    data_rate: u8,

    /// Application period in seconds
    #[arg(long, default_value_t = 591.0)]
    period: f64,

    #[arg(long, default_value_t = 10)]
    size: u32,

    /// Largest random addition to the packet size
    #[arg(long, default_value_t = 0)]
    extra_size: u32,

    /// Devices run on harvested energy with this mean availability
    #[arg(long)]
    intermittent: Option<f64>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let seed: u64 = args.seed.unwrap_or_else(|| rand::rng().random());
    let output_file = args.output.clone().unwrap_or("sim_file.sim".into());
    let use_rmp = !args.json;

    let identity = match &args.id {
        Some(path) => match load_file::<ScenarioIdentity>(path) {
            Ok(identity) => identity,
            Err(e) => {
                eprintln!("<Error> {e}");
                return ExitCode::FAILURE;
            }
        },
        None => ScenarioIdentity::Generated {
            generator: generator(&args),
            seed,
        },
    };

    let result = if args.asid {
        sim_file::write_file(output_file, &identity, use_rmp)
    } else {
        let scenario = match identity.create() {
            Ok(scenario) => scenario,
            Err(e) => {
                eprintln!("<Error> {e}");
                return ExitCode::FAILURE;
            }
        };
        sim_file::write_file(output_file, &scenario, use_rmp)
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("<Error> {e}");
            ExitCode::FAILURE
        }
    }
}

fn generator(args: &Args) -> ScenarioGenerator {
    let mac = MacConfig {
        max_transmissions: args.transmissions,
        data_rate: args.data_rate,
        ..Default::default()
    };

    let traffic = PeriodicTraffic {
        app_period: args.period * SECONDS,
        base_size: args.size,
        extra_size_max: args.extra_size,
        ..Default::default()
    };

    match args.intermittent {
        None => ScenarioGenerator::Periodic {
            device_count: args.devices,
            gateway_count: args.gateways,
            confirmed_percentage: args.confirmed,
            mac,
            traffic,
            reception: Collision::default().into(),
            downlink: DownlinkModel::default(),
        },
        Some(availability) => ScenarioGenerator::Intermittent {
            device_count: args.devices,
            gateway_count: args.gateways,
            confirmed_percentage: args.confirmed,
            mac: MacConfig {
                energy_retry_backoff: Some(10.0 * SECONDS),
                ..mac
            },
            traffic,
            power: IntermittentPower {
                energy_availability: availability,
                ..Default::default()
            },
            reception: Collision::default().into(),
            downlink: DownlinkModel::default(),
        },
    }
}
