pub mod power;
pub mod traffic;

use power::IntermittentPower;
use rand::SeedableRng;
use rand_chacha::ChaCha12Rng;
use serde::{Deserialize, Serialize};
use traffic::PeriodicTraffic;

use crate::{
    mac::MacConfig,
    packet::MessageKind,
    scenario::{DeviceSettings, Scenario, ScenarioIdentity},
    simulation::models::{Collision, DownlinkModel, ReceptionModel},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScenarioGenerator {
    /// Always powered devices sending periodically.
    Periodic {
        device_count: usize,
        gateway_count: usize,

        /// Percentage of devices (the lowest ids) sending confirmed traffic.
        confirmed_percentage: u32,

        /// Shared by every device.
        mac: MacConfig,
        traffic: PeriodicTraffic,
        reception: ReceptionModel,
        downlink: DownlinkModel,
    },
    /// Periodic traffic from devices with intermittent power.
    Intermittent {
        device_count: usize,
        gateway_count: usize,
        confirmed_percentage: u32,
        mac: MacConfig,
        traffic: PeriodicTraffic,
        power: IntermittentPower,
        reception: ReceptionModel,
        downlink: DownlinkModel,
    },
}

impl ScenarioGenerator {
    /// Periodic traffic over a collision limited channel with one gateway.
    pub fn periodic(device_count: usize, confirmed_percentage: u32, mac: MacConfig) -> Self {
        ScenarioGenerator::Periodic {
            device_count,
            gateway_count: 1,
            confirmed_percentage,
            mac,
            traffic: PeriodicTraffic::default(),
            reception: Collision::default().into(),
            downlink: DownlinkModel::default(),
        }
    }

    pub fn generate_from_seed(&self, seed: u64) -> Scenario {
        let rng = ChaCha12Rng::seed_from_u64(seed);
        self.generate(rng)
    }

    pub fn generate(&self, mut rng: ChaCha12Rng) -> Scenario {
        match self.clone() {
            ScenarioGenerator::Periodic {
                device_count,
                gateway_count,
                confirmed_percentage,
                mac,
                traffic,
                reception,
                downlink,
            } => {
                let devices = traffic
                    .generate(device_count, &mut rng)
                    .into_iter()
                    .enumerate()
                    .map(|(n, x)| DeviceSettings {
                        mac: mac.clone(),
                        kind: message_kind(n, device_count, confirmed_percentage),
                        traffic: x,
                        ..Default::default()
                    })
                    .collect();

                Scenario {
                    identity: ScenarioIdentity::Custom,
                    gateway_count,
                    devices,
                    reception,
                    downlink,
                    end_time: traffic.end_time(),
                    measurement: traffic.measurement(),
                }
            }
            ScenarioGenerator::Intermittent {
                device_count,
                gateway_count,
                confirmed_percentage,
                mac,
                traffic,
                power,
                reception,
                downlink,
            } => {
                let end_time = traffic.end_time();

                let devices = traffic
                    .generate(device_count, &mut rng)
                    .into_iter()
                    .enumerate()
                    .map(|(n, x)| {
                        let (energy, off_windows) = power.generate(end_time, &mut rng);

                        DeviceSettings {
                            mac: mac.clone(),
                            kind: message_kind(n, device_count, confirmed_percentage),
                            traffic: x,
                            energy,
                            off_windows,
                            ..Default::default()
                        }
                    })
                    .collect();

                Scenario {
                    identity: ScenarioIdentity::Custom,
                    gateway_count,
                    devices,
                    reception,
                    downlink,
                    end_time,
                    measurement: traffic.measurement(),
                }
            }
        }
    }
}

/// A lone device is confirmed for any nonzero percentage.
fn message_kind(index: usize, device_count: usize, confirmed_percentage: u32) -> MessageKind {
    let confirmed_number = confirmed_percentage as usize * device_count / 100;

    if index < confirmed_number || (device_count == 1 && confirmed_percentage > 0) {
        MessageKind::Confirmed
    } else {
        MessageKind::Unconfirmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::SECONDS;

    #[test]
    fn confirmed_share() {
        let kinds: Vec<_> = (0..20).map(|n| message_kind(n, 20, 15)).collect();
        let confirmed = kinds
            .iter()
            .filter(|x| **x == MessageKind::Confirmed)
            .count();

        assert_eq!(confirmed, 3);
        assert_eq!(kinds[0], MessageKind::Confirmed);
        assert_eq!(kinds[3], MessageKind::Unconfirmed);

        assert_eq!(message_kind(0, 1, 1), MessageKind::Confirmed);
        assert_eq!(message_kind(0, 1, 0), MessageKind::Unconfirmed);
    }

    #[test]
    fn same_seed_same_scenario() {
        let generator = ScenarioGenerator::periodic(30, 20, MacConfig::default());

        let a = generator.generate_from_seed(42);
        let b = generator.generate_from_seed(42);
        let c = generator.generate_from_seed(43);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.devices.len(), 30);
        assert_eq!(a.measurement.start, 20.0 * 591.0 * SECONDS);
    }

    #[test]
    fn identity_regenerates() {
        let identity = ScenarioIdentity::Generated {
            generator: ScenarioGenerator::periodic(5, 0, MacConfig::default()),
            seed: 1,
        };

        let scenario = identity.create().unwrap();
        assert_eq!(scenario.identity, identity);
        assert_eq!(scenario.devices.len(), 5);
    }
}
