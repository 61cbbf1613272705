use rand::Rng;
use rand_chacha::ChaCha12Rng;
use rand_distr::Normal;
use serde::{Deserialize, Serialize};

use crate::{
    scenario::{MeasurementWindow, Traffic},
    units::*,
};

/// Every device sends once per application period, starting at a uniformly random
/// offset inside the first period.
///
/// Results are measured from the end of the warm up periods to the end of the last
/// period. The run goes on for one more period so the last packets can finish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodicTraffic {
    pub app_period: Time,
    pub warmup_periods: u32,

    /// Periods with traffic, including the warm up.
    pub periods: u32,

    pub base_size: u32,
    pub extra_size_max: u32,

    /// Standard deviation of each device's period as a fraction of `app_period`.
    /// `0.0` gives every device exactly `app_period`.
    pub period_jitter: f64,
}

impl Default for PeriodicTraffic {
    fn default() -> Self {
        Self {
            app_period: 591.0 * SECONDS,
            warmup_periods: 20,
            periods: 50,
            base_size: 10,
            extra_size_max: 0,
            period_jitter: 0.0,
        }
    }
}

impl PeriodicTraffic {
    pub fn measurement(&self) -> MeasurementWindow {
        MeasurementWindow {
            start: self.warmup_periods as f64 * self.app_period,
            stop: self.periods as f64 * self.app_period,
        }
    }

    pub fn end_time(&self) -> Time {
        (self.periods + 1) as f64 * self.app_period
    }

    pub(super) fn generate(&self, device_count: usize, rng: &mut ChaCha12Rng) -> Vec<Traffic> {
        let stop = self.measurement().stop;
        let period_seconds = self.app_period.seconds();

        let jitter = Normal::new(period_seconds, period_seconds * self.period_jitter.abs()).ok();

        (0..device_count)
            .map(|_| {
                let period = match jitter {
                    Some(dist) if self.period_jitter != 0.0 => {
                        let sampled = rng.sample(dist);
                        Time::from_seconds(sampled.clamp(period_seconds / 2.0, period_seconds * 2.0))
                    }
                    _ => self.app_period,
                };

                Traffic {
                    start: self.app_period.map(|x| rng.random_range(0.0..x)),
                    period,
                    stop,
                    base_size: self.base_size,
                    extra_size_max: self.extra_size_max,
                }
            })
            .collect()
    }
}
