pub mod generation;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    mac::MacConfig,
    packet::{MacCommand, MessageKind},
    phy::{EnergyModel, OffWindow},
    scenario::generation::ScenarioGenerator,
    simulation::models::{DownlinkModel, ReceptionModel},
    units::{SECONDS, Time},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScenarioIdentity {
    Generated {
        generator: ScenarioGenerator,
        seed: u64,
    },
    /// A custom created scenario
    Custom,
}

#[derive(Debug, Error)]
#[error("a custom scenario cannot be regenerated")]
pub struct RegenerationError;

impl ScenarioIdentity {
    pub fn create(&self) -> Result<Scenario, RegenerationError> {
        match self {
            ScenarioIdentity::Custom => Err(RegenerationError),
            ScenarioIdentity::Generated { generator, seed } => {
                let mut output = generator.generate_from_seed(*seed);
                output.identity = self.clone();
                Ok(output)
            }
        }
    }
}

/// Inclusive window of send times the results are computed over.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeasurementWindow {
    pub start: Time,
    pub stop: Time,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    // Regeneration
    pub identity: ScenarioIdentity,

    // Data values
    pub gateway_count: usize,
    pub devices: Vec<DeviceSettings>,
    pub reception: ReceptionModel,
    pub downlink: DownlinkModel,

    /// No event after this time is processed.
    pub end_time: Time,
    pub measurement: MeasurementWindow,
}

/// Application traffic of one device.
///
/// Packets are generated at `start + n * period` for as long as that is not after `stop`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Traffic {
    pub start: Time,
    pub period: Time,
    pub stop: Time,

    /// Payload size in bytes is `base_size` plus a uniform random
    /// amount in `0..=extra_size_max`, drawn per packet.
    pub base_size: u32,
    pub extra_size_max: u32,
}

impl Default for Traffic {
    fn default() -> Self {
        Self {
            start: Time::ZERO,
            period: 600.0 * SECONDS,
            stop: Time::ZERO,
            base_size: 10,
            extra_size_max: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSettings {
    pub mac: MacConfig,
    pub kind: MessageKind,
    pub traffic: Traffic,

    pub energy: EnergyModel,
    pub off_windows: Vec<OffWindow>,

    /// Gateways that can hear the device, all of them if `None`.
    /// The others report every uplink as under sensitivity.
    pub reachable_gateways: Option<Vec<usize>>,

    /// Commands the network server piggy-backs on its first downlink to the device.
    pub downlink_commands: Vec<MacCommand>,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            mac: MacConfig::default(),
            kind: MessageKind::Unconfirmed,
            traffic: Traffic::default(),
            energy: EnergyModel::Unlimited,
            off_windows: Vec::new(),
            reachable_gateways: None,
            downlink_commands: Vec::new(),
        }
    }
}

impl DeviceSettings {
    pub fn confirmed(mut self) -> DeviceSettings {
        self.kind = MessageKind::Confirmed;
        self
    }

    pub fn with_traffic(mut self, traffic: Traffic) -> DeviceSettings {
        self.traffic = traffic;
        self
    }

    pub fn with_mac(mut self, mac: MacConfig) -> DeviceSettings {
        self.mac = mac;
        self
    }

    pub fn can_reach(&self, gateway: usize) -> bool {
        self.reachable_gateways
            .as_ref()
            .map(|x| x.contains(&gateway))
            .unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_cannot_regenerate() {
        assert!(ScenarioIdentity::Custom.create().is_err());
    }

    #[test]
    fn reachability() {
        let mut settings = DeviceSettings::default();
        assert!(settings.can_reach(3));

        settings.reachable_gateways = Some(vec![0, 2]);
        assert!(settings.can_reach(2));
        assert!(!settings.can_reach(1));
    }
}
