use rand::Rng;
use rand_chacha::ChaCha12Rng;
use rand_distr::Exp;
use serde::{Deserialize, Serialize};

use crate::{
    phy::{EnergyModel, OffWindow},
    units::*,
};

/// Energy harvesting devices that alternate between having power and being off.
/// On and off durations are exponentially distributed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntermittentPower {
    pub mean_on_time: Time,
    pub mean_off_time: Time,

    /// Chance that a transmission attempt finds enough stored energy.
    pub energy_availability: f64,
}

impl Default for IntermittentPower {
    fn default() -> Self {
        Self {
            mean_on_time: 3600.0 * SECONDS,
            mean_off_time: 600.0 * SECONDS,
            energy_availability: 1.0,
        }
    }
}

impl IntermittentPower {
    pub(super) fn generate(
        &self,
        until: Time,
        rng: &mut ChaCha12Rng,
    ) -> (EnergyModel, Vec<OffWindow>) {
        let energy = if self.energy_availability < 1.0 {
            EnergyModel::Bernoulli {
                availability: self.energy_availability.max(0.0),
            }
        } else {
            EnergyModel::Unlimited
        };

        if self.mean_on_time <= Time::ZERO {
            return (energy, Vec::new());
        }

        let (Ok(on), Ok(off)) = (
            Exp::new(1.0 / self.mean_on_time.seconds()),
            Exp::new(1.0 / self.mean_off_time.seconds()),
        ) else {
            return (energy, Vec::new());
        };

        let mut windows = Vec::new();
        let mut time = Time::from_seconds(rng.sample(on));

        while time < until {
            let end = time + Time::from_seconds(rng.sample(off));
            windows.push(OffWindow { start: time, end });
            time = end + Time::from_seconds(rng.sample(on));
        }

        (energy, windows)
    }
}
