use std::collections::VecDeque;

use rand::Rng;
use rand_chacha::ChaCha12Rng;
use serde::{Deserialize, Serialize};

use crate::{mac::ReceiveWindow, tracker::PhyOutcome};

use super::data_structs::Transmission;

macro_rules! reception_model {
    ($($variant:ident),+) => {

        /// Decides what a gateway that can hear an uplink makes of it.
        #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
        pub enum ReceptionModel {
            $(
                $variant($variant),
            )*
        }

        impl ReceptionModel {
            /// `overlapping` holds the other uplinks the gateway hears
            /// that overlap `uplink` in time.
            pub fn outcome(
                &mut self,
                uplink: &Transmission,
                overlapping: &[&Transmission],
                rng: &mut ChaCha12Rng,
            ) -> PhyOutcome {
                match self {
                    $(
                        ReceptionModel::$variant(inner) => inner.outcome(uplink, overlapping, rng),
                    )*
                }
            }
        }

        $(
        impl From<$variant> for ReceptionModel {
            fn from(value: $variant) -> Self {
                ReceptionModel::$variant(value)
            }
        }
        )*
    };
}

reception_model!(Perfect, Bernoulli, Collision, Scripted);

trait ImplReceptionModel {
    fn outcome(
        &mut self,
        uplink: &Transmission,
        overlapping: &[&Transmission],
        rng: &mut ChaCha12Rng,
    ) -> PhyOutcome;
}

/// Every uplink is received.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Perfect;
impl ImplReceptionModel for Perfect {
    fn outcome(
        &mut self,
        _uplink: &Transmission,
        _overlapping: &[&Transmission],
        _rng: &mut ChaCha12Rng,
    ) -> PhyOutcome {
        PhyOutcome::Received
    }
}

/// Independent losses, reported as interference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bernoulli {
    pub success_probability: f64,
}
impl ImplReceptionModel for Bernoulli {
    fn outcome(
        &mut self,
        _uplink: &Transmission,
        _overlapping: &[&Transmission],
        rng: &mut ChaCha12Rng,
    ) -> PhyOutcome {
        if rng.random_bool(self.success_probability.clamp(0.0, 1.0)) {
            PhyOutcome::Received
        } else {
            PhyOutcome::Interfered
        }
    }
}

/// A gateway locks a reception path at the start of every uplink it hears and
/// drops the uplink if all paths are taken. Any time overlap with another uplink
/// on the same channel and data rate destroys both.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Collision {
    pub receive_paths: usize,
}

impl Default for Collision {
    fn default() -> Self {
        Self { receive_paths: 8 }
    }
}

impl ImplReceptionModel for Collision {
    fn outcome(
        &mut self,
        uplink: &Transmission,
        overlapping: &[&Transmission],
        _rng: &mut ChaCha12Rng,
    ) -> PhyOutcome {
        let busy_paths = overlapping
            .iter()
            .filter(|x| {
                x.start_time < uplink.start_time
                    || (x.start_time == uplink.start_time && x.id < uplink.id)
            })
            .count();

        if busy_paths >= self.receive_paths {
            return PhyOutcome::NoMoreReceivers;
        }

        if overlapping.iter().any(|x| x.collides_with(uplink)) {
            return PhyOutcome::Interfered;
        }

        PhyOutcome::Received
    }
}

/// Outcomes handed out in order, one per uplink and gateway, [`PhyOutcome::Received`]
/// once exhausted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Scripted {
    pub outcomes: VecDeque<PhyOutcome>,
}
impl ImplReceptionModel for Scripted {
    fn outcome(
        &mut self,
        _uplink: &Transmission,
        _overlapping: &[&Transmission],
        _rng: &mut ChaCha12Rng,
    ) -> PhyOutcome {
        self.outcomes.pop_front().unwrap_or(PhyOutcome::Received)
    }
}

/// How the network server answers uplinks.
///
/// Confirmed uplinks are always answered with an acknowledgment. Unconfirmed
/// uplinks only get a downlink if there are MAC commands for the device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DownlinkModel {
    /// Used unless the gateway is already transmitting, then the other window is tried.
    pub window: ReceiveWindow,

    /// Chance that a downlink arrives uncorrupted.
    pub delivery_probability: f64,
}

impl Default for DownlinkModel {
    fn default() -> Self {
        Self {
            window: ReceiveWindow::First,
            delivery_probability: 1.0,
        }
    }
}
