use std::{
    fs::{File, read_dir},
    io::{self, Write},
    path::PathBuf,
    process::ExitCode,
};

use clap::Parser;
use lorasimcore::{
    metrics::{PerformanceReport, tx_time_statistics},
    scenario::ScenarioIdentity,
    sim_file::{OutputIdentity, SimOutput, load_file},
    simulation::run_simulation,
    verification::verify_all,
};
use rayon::prelude::*;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// A file containing a list of scenario identities that will be run.
    /// This overrides `results`.
    #[arg(long)]
    pack: Option<PathBuf>,

    /// Seed used for every simulation of a pack
    #[arg(long, default_value_t = 123456)]
    seed: u64,

    #[arg(long)]
    no_verify: bool,

    /// Results file or directory containing results files
    #[arg(short, long)]
    results: Option<PathBuf>,

    /// Gateway the reports are computed for
    #[arg(long, default_value_t = 0)]
    gateway: usize,

    /// CSV file to write, stdout if not set
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print the full report line of every result
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let results = if let Some(pack_path) = &args.pack {
        let scenarios = match load_file::<Vec<ScenarioIdentity>>(pack_path) {
            Ok(scenarios) => scenarios,
            Err(e) => {
                eprintln!("<Error> {e}");
                return ExitCode::FAILURE;
            }
        };

        scenarios
            .into_par_iter()
            .filter_map(|identity| {
                let scenario = identity
                    .create()
                    .map_err(|e| eprintln!("<Warning> {e}"))
                    .ok()?;
                run_simulation(args.seed, scenario, false)
                    .map_err(|e| eprintln!("<Error> {e}"))
                    .ok()
            })
            .collect()
    } else {
        load_result_files(args.results.clone().unwrap_or("sim_output.sim".into()))
    };

    if args.verbose {
        println!("{}", PerformanceReport::legend());
    }

    let table: Vec<TableEntry> = results
        .par_iter()
        .map(|x| make_table_entry(&args, x))
        .collect();

    match write_table(args.output.clone(), &table) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("<Error> {e}");
            ExitCode::FAILURE
        }
    }
}

fn write_table(maybe_path: Option<PathBuf>, table: &[TableEntry]) -> Result<(), csv::Error> {
    let write = if let Some(out_path) = maybe_path {
        let file = File::create(out_path)?;
        Box::new(file) as Box<dyn Write>
    } else {
        Box::new(io::stdout())
    };

    let mut writer = csv::Writer::from_writer(write);
    for entry in table {
        writer.serialize(entry)?;
    }
    writer.flush()?;

    Ok(())
}

fn make_table_entry(args: &Args, results: &SimOutput) -> TableEntry {
    let OutputIdentity {
        scenario_identity,
        simulation_seed,
        sim_version,
    } = &results.complete_identity;

    let report = results.report(args.gateway);

    if args.verbose {
        println!("{}", report.to_line());
    }

    if !args.no_verify && !verify_all(results) {
        eprintln!("<Error> Verification failed for {:#?}", results.complete_identity);
    }

    let devices = results
        .transmissions
        .iter()
        .map(|x| x.device + 1)
        .max()
        .unwrap_or(0);

    let intervals: Vec<f64> = (0..devices)
        .map(|device| {
            tx_time_statistics(
                &results.records,
                report.start,
                report.stop,
                device,
            )
        })
        .filter(|x| x.count > 1)
        .map(|x| x.mean_interval.seconds())
        .collect();

    let mean_tx_interval = if intervals.is_empty() {
        0.0
    } else {
        intervals.iter().sum::<f64>() / intervals.len() as f64
    };

    TableEntry {
        scenario_identity: serde_json::to_string(scenario_identity).unwrap_or_default(),
        sim_version: sim_version.clone(),
        seed: *simulation_seed,
        gateway: args.gateway,
        start: report.start.seconds(),
        stop: report.stop.seconds(),
        total_unconfirmed: report.total_unconfirmed,
        successful_unconfirmed: report.successful_unconfirmed,
        unconfirmed_pdr: report.unconfirmed_pdr(),
        cpsr_sent: report.cpsr.sent,
        cpsr_acked: report.cpsr.acked,
        cpsr: report.cpsr_ratio(),
        incomplete_confirmed: report.incomplete_confirmed,
        retransmissions: report.sum_retransmissions(),
        average_delay: report.average_delay.seconds(),
        average_ack_delay: report.average_ack_delay.seconds(),
        phy_total: report.phy.total,
        phy_received: report.phy.received,
        phy_interfered: report.phy.interfered,
        phy_no_more_receivers: report.phy.no_more_receivers,
        phy_under_sensitivity: report.phy.under_sensitivity,
        phy_lost_because_tx: report.phy.lost_because_tx,
        energy_denied: report.energy.denied,
        transmissions: results.transmissions.len(),
        total_airtime: results
            .transmissions
            .iter()
            .map(|x| x.airtime().seconds())
            .sum(),
        mean_tx_interval,
    }
}

fn load_result_files(results_path: PathBuf) -> Vec<SimOutput> {
    if results_path.is_file() {
        return match load_file(results_path) {
            Ok(loaded) => vec![loaded],
            Err(e) => {
                eprintln!("<Error> {e}");
                Vec::new()
            }
        };
    }

    let files: Vec<PathBuf> = match read_dir(results_path) {
        Ok(entries) => entries
            .filter_map(|x| x.map_err(|e| eprintln!("<Error> {e}")).ok())
            .map(|x| x.path())
            .collect(),
        Err(e) => {
            eprintln!("<Error> {e}");
            return Vec::new();
        }
    };

    files
        .into_par_iter()
        .filter_map(|path| match load_file(path) {
            Ok(loaded) => Some(loaded),
            Err(e) => {
                eprintln!("<Warning> {e}");
                None
            }
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
struct TableEntry {
    scenario_identity: String,
    sim_version: String,
    seed: u64,
    gateway: usize,
    start: f64,
    stop: f64,

    total_unconfirmed: usize,
    successful_unconfirmed: usize,
    unconfirmed_pdr: f64,

    cpsr_sent: usize,
    cpsr_acked: usize,
    cpsr: f64,
    incomplete_confirmed: usize,
    retransmissions: usize,

    average_delay: f64,
    average_ack_delay: f64,

    phy_total: usize,
    phy_received: usize,
    phy_interfered: usize,
    phy_no_more_receivers: usize,
    phy_under_sensitivity: usize,
    phy_lost_because_tx: usize,

    energy_denied: usize,
    transmissions: usize,
    total_airtime: f64,
    mean_tx_interval: f64,
}
