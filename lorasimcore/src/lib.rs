//! Class-A LoRaWAN end device simulation and packet lifecycle tracking.
//!
//! ## Overview
//! [`mac::ClassAMac`] drives the receive window state machine of a single end device
//! against the narrow [`timer::Timer`] and [`phy::EndDevicePhy`] interfaces, so it can
//! be run by the full [`simulation`] or by a hand advanced fake clock.
//!
//! Every notification the devices and gateways emit is fed to a [`tracker::PacketTracker`],
//! which correlates them by [`packet::PacketId`]. [`metrics`] turns the tracker's records
//! into delivery, acknowledgment and energy statistics over a time window.

pub mod duty_cycle;
pub mod mac;
pub mod metrics;
pub mod notification;
pub mod packet;
pub mod phy;
pub mod region;
pub mod scenario;
pub mod sim_file;
pub mod simulation;
pub mod timer;
pub mod tracker;
pub mod units;
pub mod verification;

use std::fmt::Debug;

use units::*;

const PREAMBLE_LEN: f64 = 8.0;

/// On-air time of a LoRa frame with an explicit header, CRC and 4/5 coding rate,
/// see Semtech AN1200.13.
///
/// * `frame_size` - size of the whole MAC frame in bytes.
pub fn calculate_air_time(frame_size: u32, data_rate: u8) -> Time {
    const HEADER_DISABLED: i64 = 0;
    const CRC: i64 = 1;
    /// 4/5
    const CODING_RATE: i64 = 1;

    let sf = region::spreading_factor(data_rate) as i64;
    let symbol_time = region::symbol_duration(data_rate);

    let low_data_rate_optimise = symbol_time > Time::from_milis(16.0);
    let de = if low_data_rate_optimise { 1 } else { 0 };

    let preamble_time = (PREAMBLE_LEN + 4.25) * symbol_time;

    let numerator = (8 * frame_size as i64 - 4 * sf + 28 + 16 * CRC - 20 * HEADER_DISABLED) as f64;
    let denominator = (4 * (sf - 2 * de)) as f64;

    let payload_symbols =
        8.0 + ((numerator / denominator).ceil() * (CODING_RATE + 4) as f64).max(0.0);

    preamble_time + payload_symbols * symbol_time
}

/// Checks two values are within 0.001% of each other.
#[allow(unused)]
fn assert_close<T>(a: T, b: T)
where
    T: Into<f64> + Copy + Debug,
{
    let float_a: f64 = a.into();
    let float_b: f64 = b.into();

    if float_a == 0. || float_b == 0. {
        assert!(float_a == float_b, "{a:?} and {b:?} are not close.");
        return;
    }

    let percent_diff = (float_a - float_b).abs() / float_a.abs();

    assert!(percent_diff < 0.00001, "{a:?} and {b:?} are not close.");
}

#[cfg(test)]
mod tests {
    use crate::{assert_close, calculate_air_time, units::Time};

    #[test]
    fn test_assert_close_pos() {
        assert_close(10.0, 10.0);
        assert_close(Time::from_seconds(200.002), Time::from_seconds(200.001));
    }

    #[test]
    fn test_assert_close_neg() {
        let result = std::panic::catch_unwind(|| assert_close(10.0, 11.0));
        assert!(result.is_err());
        let result = std::panic::catch_unwind(|| {
            assert_close(Time::from_seconds(10231.0), Time::from_seconds(10231.15))
        });
        assert!(result.is_err());
        let result = std::panic::catch_unwind(|| assert_close(0.01, 0.002));
        assert!(result.is_err());
    }

    #[test]
    fn air_time_sf7() {
        // 13 byte frame, 45.25 symbols of 1.024 ms
        assert_close(calculate_air_time(13, 5), Time::from_milis(46.336));
    }

    #[test]
    fn air_time_sf12_low_data_rate() {
        // 13 byte frame, 35.25 symbols of 32.768 ms
        assert_close(calculate_air_time(13, 0), Time::from_milis(1155.072));
    }

    #[test]
    fn air_time_of_oversized_frame() {
        let huge = calculate_air_time(u32::MAX, 5);
        assert!(huge.seconds().is_finite());
        assert!(huge > calculate_air_time(255, 5));
    }

    #[test]
    fn air_time_grows_with_size() {
        assert!(calculate_air_time(50, 3) > calculate_air_time(20, 3));
        assert!(calculate_air_time(20, 2) > calculate_air_time(20, 3));
    }
}
