//! Regulatory airtime limits per sub-band.
//!
//! A transmission of length `d` on a sub-band with duty cycle `dc` closes every
//! channel of that sub-band until `start + d / dc`.

use rand::{Rng, seq::IndexedRandom};
use serde::{Deserialize, Serialize};

use crate::units::{Frequency, Time};

/// Closed periods ending within this of `now` count as over.
const SLACK: Time = Time::from_seconds(1e-9);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubBand {
    pub first: Frequency,
    pub last: Frequency,
    pub duty_cycle: f64,
    pub next_allowed: Time,
}

impl SubBand {
    pub fn contains(&self, frequency: Frequency) -> bool {
        frequency >= self.first && frequency <= self.last
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelLedger {
    channels: Vec<Frequency>,
    sub_bands: Vec<SubBand>,
}

impl ChannelLedger {
    pub fn new(channels: Vec<Frequency>, sub_bands: Vec<SubBand>) -> Self {
        Self { channels, sub_bands }
    }

    /// The three default join channels in the 868.0 - 868.6 MHz sub-band (1%)
    /// plus the RX2 sub-band (10%).
    pub fn eu868() -> Self {
        Self::new(
            vec![
                Frequency::from_MHz(868.1),
                Frequency::from_MHz(868.3),
                Frequency::from_MHz(868.5),
            ],
            vec![
                SubBand {
                    first: Frequency::from_MHz(868.0),
                    last: Frequency::from_MHz(868.6),
                    duty_cycle: 0.01,
                    next_allowed: Time::ZERO,
                },
                SubBand {
                    first: Frequency::from_MHz(869.4),
                    last: Frequency::from_MHz(869.65),
                    duty_cycle: 0.1,
                    next_allowed: Time::ZERO,
                },
            ],
        )
    }

    fn sub_band(&self, frequency: Frequency) -> Option<&SubBand> {
        self.sub_bands.iter().find(|x| x.contains(frequency))
    }

    /// Record a transmission starting at `now`.
    /// Frequencies outside every sub-band are not limited.
    pub fn register_transmission(&mut self, now: Time, duration: Time, frequency: Frequency) {
        if let Some(band) = self.sub_bands.iter_mut().find(|x| x.contains(frequency)) {
            band.next_allowed = now + duration / band.duty_cycle;
        }
    }

    pub fn is_available(&self, now: Time, frequency: Frequency) -> bool {
        self.sub_band(frequency)
            .map(|x| x.next_allowed <= now + SLACK)
            .unwrap_or(true)
    }

    /// Time until at least one channel may be used, zero if one is free now.
    pub fn waiting_time(&self, now: Time) -> Time {
        self.channels
            .iter()
            .map(|x| {
                self.sub_band(*x)
                    .map(|band| match band.next_allowed - now {
                        wait if wait <= SLACK => Time::ZERO,
                        wait => wait,
                    })
                    .unwrap_or(Time::ZERO)
            })
            .min_by(|a, b| a.total_cmp(b))
            .unwrap_or(Time::ZERO)
    }

    /// Uniformly random channel among those currently available.
    pub fn pick_channel<R: Rng>(&self, now: Time, rng: &mut R) -> Option<Frequency> {
        let available: Vec<_> = self
            .channels
            .iter()
            .copied()
            .filter(|x| self.is_available(now, *x))
            .collect();

        available.choose(rng).copied()
    }
}
