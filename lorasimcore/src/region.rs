//! EU868 regional parameters.

use crate::units::{Frequency, Time};

pub const MAX_DATA_RATE: u8 = 5;
pub const MAX_RX1_DR_OFFSET: u8 = 5;

pub const DEFAULT_RX2_FREQUENCY: Frequency = Frequency::from_MHz(869.525);
pub const DEFAULT_RX2_DATA_RATE: u8 = 0;
pub const DEFAULT_TX_POWER_DBM: f64 = 14.0;

pub const BANDWIDTH: Frequency = Frequency::from_kHz(125.0);

/// RX1 data rate indexed by `[uplink data rate][rx1 data rate offset]`.
const REPLY_DATA_RATE_MATRIX: [[u8; 6]; 6] = [
    [0, 0, 0, 0, 0, 0],
    [1, 0, 0, 0, 0, 0],
    [2, 1, 0, 0, 0, 0],
    [3, 2, 1, 0, 0, 0],
    [4, 3, 2, 1, 0, 0],
    [5, 4, 3, 2, 1, 0],
];

/// DR0 is SF12 and DR5 is SF7, all at 125 kHz.
/// Data rates above [`MAX_DATA_RATE`] are clamped.
pub fn spreading_factor(data_rate: u8) -> i32 {
    12 - data_rate.min(MAX_DATA_RATE) as i32
}

pub fn reply_data_rate(data_rate: u8, rx1_dr_offset: u8) -> u8 {
    let row = data_rate.min(MAX_DATA_RATE) as usize;
    let col = rx1_dr_offset.min(MAX_RX1_DR_OFFSET) as usize;
    REPLY_DATA_RATE_MATRIX[row][col]
}

pub fn symbol_duration(data_rate: u8) -> Time {
    2f64.powi(spreading_factor(data_rate)) / BANDWIDTH
}

/// Time a receive window stays open before giving up on a preamble.
pub fn receive_window_duration(data_rate: u8, window_symbols: u32) -> Time {
    (4.25 + window_symbols as f64) * symbol_duration(data_rate)
}

/// Frequencies a device may be told to listen on in RX2.
pub fn is_valid_frequency(frequency: Frequency) -> bool {
    frequency.MHz() >= 863.0 && frequency.MHz() <= 870.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert_close;

    #[test]
    fn reply_matrix_floors_at_zero() {
        assert_eq!(reply_data_rate(5, 0), 5);
        assert_eq!(reply_data_rate(5, 2), 3);
        assert_eq!(reply_data_rate(1, 3), 0);
        assert_eq!(reply_data_rate(0, 5), 0);
    }

    #[test]
    fn window_duration() {
        // SF12: 32.768 ms symbols
        assert_close(
            receive_window_duration(0, 8),
            Time::from_milis(12.25 * 32.768),
        );
        // SF7: 1.024 ms symbols
        assert_close(receive_window_duration(5, 0), Time::from_milis(4.25 * 1.024));
    }

    #[test]
    fn spreading_factors() {
        assert_eq!(spreading_factor(0), 12);
        assert_eq!(spreading_factor(5), 7);
        assert_eq!(spreading_factor(9), 7);
    }
}
