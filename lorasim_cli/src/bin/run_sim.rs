//! The simulator cli.

use std::{
    fs::{create_dir_all, read_dir},
    path::{Path, PathBuf},
    process::ExitCode,
    sync::atomic::{AtomicU64, Ordering},
    time::Instant,
};

use clap::Parser;
use lorasimcore::{
    scenario::{RegenerationError, Scenario, ScenarioIdentity},
    sim_file::{self, SimFileError, load_file},
    simulation::{SimError, run_simulation},
    verification::verify_all,
};
use rand::{Rng, rng};
use rayon::prelude::*;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
enum RunError {
    #[error("{path:?} is not a scenario: {source}")]
    NotAScenario { path: PathBuf, source: SimFileError },
    #[error(transparent)]
    Regeneration(#[from] RegenerationError),
    #[error(transparent)]
    Simulation(#[from] SimError),
    #[error(transparent)]
    File(#[from] SimFileError),
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(short, long)]
    quiet: bool,

    /// Scenario file, scenario identity file or directory containing either
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// File name for output or folder to put simulation results into
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Seed for the rng. A random seed will be used if not specified
    #[arg(long)]
    seed: Option<u64>,

    /// Leave device events out of the output logs
    #[arg(long)]
    no_device_logs: bool,

    /// Check the results before writing them
    #[arg(long)]
    verify: bool,

    /// Show timing information
    #[arg(long)]
    time: bool,

    /// Use JSON instead of rust messagepack
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let input_path = args.input.clone().unwrap_or("sim_file.sim".into());

    let output_path = match args.output.clone() {
        Some(path) => path,
        None if !input_path.is_dir() => "sim_output.sim".into(),
        None => match next_output_dir() {
            Ok(path) => path,
            Err(e) => {
                eprintln!("<Error> Could not create output directory: {e}");
                return ExitCode::FAILURE;
            }
        },
    };

    let timer = args.time.then(Instant::now);

    if !input_path.is_dir() {
        let path = if output_path.is_dir() {
            output_path.join("sim_output.sim")
        } else {
            output_path
        };

        if let Err(e) = run_one(&args, &input_path, path) {
            eprintln!("<Error> {e}");
            return ExitCode::FAILURE;
        }

        if let Some(timer) = timer {
            println!("Ran 1 sim in {:.4}s", timer.elapsed().as_secs_f32());
        }
        return ExitCode::SUCCESS;
    }

    let files: Vec<PathBuf> = match read_dir(&input_path) {
        Ok(entries) => entries
            .filter_map(|x| match x {
                Ok(entry) => Some(entry.path()),
                Err(e) => {
                    eprintln!("<Error> {e}");
                    None
                }
            })
            .filter(|x| x.is_file())
            .collect(),
        Err(e) => {
            eprintln!("<Error> {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = create_dir_all(&output_path) {
        eprintln!("<Error> Output path must be a directory when the input is one: {e}");
        return ExitCode::FAILURE;
    }

    let count = AtomicU64::new(0);
    let failures = AtomicU64::new(0);

    files.par_iter().for_each(|file| {
        let Some(file_name) = file.file_name().and_then(|x| x.to_str()) else {
            eprintln!("<Warning> Skipping {file:?}, name is not valid unicode");
            return;
        };

        if !args.quiet {
            println!("<Message> Running simulation for {file_name}");
        }

        let out = output_path.join(format!("output_{file_name}"));
        match run_one(&args, file, out) {
            Ok(()) => {
                count.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                failures.fetch_add(1, Ordering::Relaxed);
                eprintln!("<Warning> {file_name}: {e}");
            }
        }
    });

    if let Some(timer) = timer {
        let final_count = count.load(Ordering::Relaxed);
        let final_time = timer.elapsed().as_secs_f32();
        println!(
            "Ran {final_count} sims in {:.4}s ({} sims / s)",
            final_time,
            final_count as f32 / final_time
        )
    }

    if failures.load(Ordering::Relaxed) > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// Picks `outputs/<n>` with `n` the number of runs already in `outputs`.
fn next_output_dir() -> std::io::Result<PathBuf> {
    create_dir_all("outputs")?;
    let count = read_dir("outputs")?.count();
    let out_name = PathBuf::from(format!("outputs/{count}"));
    create_dir_all(&out_name)?;
    Ok(out_name)
}

/// A scenario file, or failing that an identity to regenerate one from.
fn load_scenario(path: &Path) -> Result<Scenario, RunError> {
    match load_file::<Scenario>(path) {
        Ok(scenario) => Ok(scenario),
        Err(source) => {
            let identity = load_file::<ScenarioIdentity>(path).map_err(|_| {
                RunError::NotAScenario {
                    path: path.to_path_buf(),
                    source,
                }
            })?;
            Ok(identity.create()?)
        }
    }
}

fn run_one(args: &Args, input: &Path, output: PathBuf) -> Result<(), RunError> {
    let scenario = load_scenario(input)?;
    let random_seed = args.seed.unwrap_or_else(|| rng().random());

    let results = run_simulation(random_seed, scenario, !args.no_device_logs)?;

    info!(
        seed = random_seed,
        packets = results.records.mac.len(),
        "simulated {input:?}"
    );

    if args.verify && !verify_all(&results) {
        eprintln!("<Error> Verification failed for {input:?} with seed {random_seed}");
    }

    if !args.quiet {
        println!("<Message> Writing output to {output:?}");
    }

    sim_file::write_file(output, &results, !args.json)?;
    Ok(())
}
