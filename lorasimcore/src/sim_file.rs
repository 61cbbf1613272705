use std::{fs, io::BufWriter, path::Path};

use rmp_serde::{decode, encode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::{
    metrics::PerformanceReport,
    scenario::{MeasurementWindow, ScenarioIdentity},
    simulation::data_structs::{LogItem, Transmission},
    tracker::TrackerRecords,
};

#[derive(Debug, Error)]
pub enum SimFileError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Encode(#[from] encode::Error),
    #[error(transparent)]
    Decode(#[from] decode::Error),
}

/// Scenarios, identities and outputs are all stored either as pretty JSON or as
/// MessagePack. Loading accepts both.
pub fn load_file<T>(path: impl AsRef<Path>) -> Result<T, SimFileError>
where
    T: DeserializeOwned,
{
    let bytes = fs::read(path)?;

    match serde_json::from_slice(&bytes) {
        Ok(value) => Ok(value),
        // Truncated JSON rather than another format.
        Err(err) if err.is_eof() => Err(err.into()),
        Err(_) => Ok(decode::from_slice(&bytes)?),
    }
}

pub fn write_file<T>(path: impl AsRef<Path>, object: &T, use_rmp: bool) -> Result<(), SimFileError>
where
    T: Serialize,
{
    let mut out = BufWriter::new(fs::File::create(path)?);

    if use_rmp {
        encode::write(&mut out, object)?;
    } else {
        serde_json::to_writer_pretty(out, object)?;
    }

    Ok(())
}

/// Seed and scenario a run came from. Enough to repeat the run exactly, unless the
/// scenario was written by hand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputIdentity {
    pub scenario_identity: ScenarioIdentity,
    pub simulation_seed: u64,
    pub sim_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimOutput {
    pub logs: Vec<LogItem>,
    pub transmissions: Vec<Transmission>,
    pub records: TrackerRecords,
    pub measurement: MeasurementWindow,

    pub complete_identity: OutputIdentity,
}

impl SimOutput {
    /// Report over the measurement window of the run.
    pub fn report(&self, gateway: usize) -> PerformanceReport {
        PerformanceReport::new(
            &self.records,
            self.measurement.start,
            self.measurement.stop,
            gateway,
        )
    }
}

#[cfg(test)]
mod tests {
    use std::env::temp_dir;

    use super::*;
    use crate::{
        mac::MacConfig,
        scenario::generation::ScenarioGenerator,
        simulation::run_simulation,
        units::{SECONDS, Time},
    };

    fn small_output() -> SimOutput {
        let identity = ScenarioIdentity::Generated {
            generator: ScenarioGenerator::periodic(4, 50, MacConfig::default()),
            seed: 11,
        };
        let mut scenario = identity.create().unwrap();
        scenario.end_time = 1800.0 * SECONDS;
        scenario.measurement = MeasurementWindow {
            start: Time::ZERO,
            stop: 1800.0 * SECONDS,
        };

        run_simulation(7, scenario, true).unwrap()
    }

    #[test]
    fn json_and_rmp() {
        let output = small_output();

        let files = [
            ("lorasim_test_output.json", false),
            ("lorasim_test_output.rmp", true),
        ];

        for (name, use_rmp) in files {
            let path = temp_dir().join(name);
            write_file(path.clone(), &output, use_rmp).unwrap();

            let loaded: SimOutput = load_file(path.clone()).unwrap();
            assert_eq!(loaded.records.mac.len(), output.records.mac.len());
            assert_eq!(loaded.complete_identity, output.complete_identity);
            assert_eq!(loaded.logs.len(), output.logs.len());
            assert_eq!(loaded.report(0).to_line(), output.report(0).to_line());

            std::fs::remove_file(path).unwrap();
        }
    }

    #[test]
    fn missing_file() {
        let result: Result<SimOutput, _> = load_file(temp_dir().join("lorasim_does_not_exist"));
        assert!(matches!(result, Err(SimFileError::Io(_))));
    }
}
