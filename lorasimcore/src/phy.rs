//! End device radio as seen by the MAC.

use std::collections::VecDeque;

use rand::Rng;
use rand_chacha::ChaCha12Rng;
use serde::{Deserialize, Serialize};

use crate::{
    notification::Notifier,
    packet::{Frame, PacketId},
    region,
    units::{Frequency, Time},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceState {
    TurnOn,
    Idle,
    Tx,
    Rx,
    Standby,
    Sleep,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TxParams {
    pub frequency: Frequency,
    pub data_rate: u8,
    pub tx_power_dbm: f64,
    pub duration: Time,
}

pub trait EndDevicePhy {
    fn state(&self) -> DeviceState;

    /// The switch functions return false if the radio has no power,
    /// in which case the radio is left [`DeviceState::Off`].
    fn switch_to_standby(&mut self, now: Time) -> bool;
    fn switch_to_idle(&mut self, now: Time) -> bool;
    fn switch_to_sleep(&mut self, now: Time) -> bool;

    /// Asked once before every transmission attempt. Always false without power.
    fn is_energy_sufficient(&mut self, now: Time) -> bool;

    /// Returns false, sending nothing, if the radio has no power.
    fn send(&mut self, now: Time, frame: &Frame, params: TxParams) -> bool;

    /// Receiver frequency and data rate.
    fn set_frequency(&mut self, frequency: Frequency);
    fn set_data_rate(&mut self, data_rate: u8);
    fn frequency(&self) -> Frequency;
    fn data_rate(&self) -> u8;
}

#[derive(Debug, Clone, PartialEq)]
pub enum PhyNotification {
    StateChanged {
        from: DeviceState,
        to: DeviceState,
    },
    TransmissionStarted {
        frame: Frame,
        params: TxParams,
    },
    /// The radio lost power before the transmission ended.
    TransmissionInterrupted {
        id: PacketId,
        at: Time,
    },
}

/// Decides whether the energy store can cover a transmission.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum EnergyModel {
    #[default]
    Unlimited,
    Bernoulli { availability: f64 },
    /// Consumed front to back, unlimited once exhausted.
    Scripted { admissions: VecDeque<bool> },
}

/// Interval during which the radio has no power.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OffWindow {
    pub start: Time,
    pub end: Time,
}

impl OffWindow {
    pub fn contains(&self, time: Time) -> bool {
        time >= self.start && time < self.end
    }
}

#[derive(Debug, Clone)]
pub struct SimulatedPhy {
    state: DeviceState,
    frequency: Frequency,
    data_rate: u8,
    energy: EnergyModel,
    off_windows: Vec<OffWindow>,
    rng: ChaCha12Rng,
    pub notifier: Notifier<PhyNotification>,
}

impl SimulatedPhy {
    pub fn new(energy: EnergyModel, off_windows: Vec<OffWindow>, rng: ChaCha12Rng) -> Self {
        Self {
            state: DeviceState::Sleep,
            frequency: region::DEFAULT_RX2_FREQUENCY,
            data_rate: region::DEFAULT_RX2_DATA_RATE,
            energy,
            off_windows,
            rng,
            notifier: Notifier::default(),
        }
    }

    pub fn is_powered(&self, now: Time) -> bool {
        !self.off_windows.iter().any(|x| x.contains(now))
    }

    fn set_state(&mut self, now: Time, to: DeviceState) {
        if self.state != to {
            self.notifier.emit(
                now,
                PhyNotification::StateChanged {
                    from: self.state,
                    to,
                },
            );
            self.state = to;
        }
    }

    fn switch(&mut self, now: Time, to: DeviceState) -> bool {
        if self.is_powered(now) {
            self.set_state(now, to);
            true
        } else {
            self.set_state(now, DeviceState::Off);
            false
        }
    }

    /// Moves the radio to [`DeviceState::Off`] if it has lost power.
    pub fn update(&mut self, now: Time) {
        if !self.is_powered(now) {
            self.set_state(now, DeviceState::Off);
        }
    }

    /// A downlink preamble arrives. Only a radio listening in standby on the
    /// right frequency and data rate locks on to it.
    pub fn start_reception(&mut self, now: Time, frequency: Frequency, data_rate: u8) -> bool {
        self.update(now);

        let listening = self.state == DeviceState::Standby
            && self.frequency.same_channel(frequency)
            && self.data_rate == data_rate;

        if listening {
            self.set_state(now, DeviceState::Rx);
        }

        listening
    }

    /// Returns false if the radio was not receiving.
    pub fn end_reception(&mut self, now: Time) -> bool {
        if self.state != DeviceState::Rx {
            return false;
        }

        self.switch(now, DeviceState::Standby)
    }
}

impl EndDevicePhy for SimulatedPhy {
    fn state(&self) -> DeviceState {
        self.state
    }

    fn switch_to_standby(&mut self, now: Time) -> bool {
        self.switch(now, DeviceState::Standby)
    }

    fn switch_to_idle(&mut self, now: Time) -> bool {
        self.switch(now, DeviceState::Idle)
    }

    fn switch_to_sleep(&mut self, now: Time) -> bool {
        self.switch(now, DeviceState::Sleep)
    }

    fn is_energy_sufficient(&mut self, now: Time) -> bool {
        if !self.is_powered(now) {
            self.set_state(now, DeviceState::Off);
            return false;
        }

        match &mut self.energy {
            EnergyModel::Unlimited => true,
            EnergyModel::Bernoulli { availability } => {
                let p = availability.clamp(0.0, 1.0);
                self.rng.random_bool(p)
            }
            EnergyModel::Scripted { admissions } => admissions.pop_front().unwrap_or(true),
        }
    }

    fn send(&mut self, now: Time, frame: &Frame, params: TxParams) -> bool {
        if !self.is_powered(now) {
            self.set_state(now, DeviceState::Off);
            return false;
        }

        self.set_state(now, DeviceState::Tx);
        self.notifier.emit(
            now,
            PhyNotification::TransmissionStarted {
                frame: frame.clone(),
                params,
            },
        );

        let end = now + params.duration;
        let power_loss = self
            .off_windows
            .iter()
            .filter(|x| x.start < end && x.end > now)
            .map(|x| x.start.max(now))
            .min_by(|a, b| a.total_cmp(b));

        if let Some(at) = power_loss {
            self.notifier
                .emit(at, PhyNotification::TransmissionInterrupted { id: frame.id, at });
        }

        true
    }

    fn set_frequency(&mut self, frequency: Frequency) {
        self.frequency = frequency;
    }

    fn set_data_rate(&mut self, data_rate: u8) {
        self.data_rate = data_rate;
    }

    fn frequency(&self) -> Frequency {
        self.frequency
    }

    fn data_rate(&self) -> u8 {
        self.data_rate
    }
}
