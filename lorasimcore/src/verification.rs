//! Verifications to be run on simulation results to make sure the simulator is working correctly.
//! Each public function, other than [`verify_all`], represents some property that should hold for all simulation results.

use tracing::error;

use crate::{mac::MAX_TRANSMISSIONS, sim_file::SimOutput, tracker::TrackerRecords};

pub fn verify_all(output: &SimOutput) -> bool {
    let records = &output.records;

    every_phy_record_has_mac_record(records)
        && attempts_within_bounds(records)
        && outcomes_within_gateway_count(records)
        && energy_attempts_bounded(records)
        && interrupted_attempts_have_no_outcomes(records)
        && no_overlapping_transmission(output)
}

/// A physical attempt is always preceded by the MAC transmission of its packet.
pub fn every_phy_record_has_mac_record(records: &TrackerRecords) -> bool {
    for id in records.phy.keys() {
        if !records.mac.contains_key(id) {
            error!(packet = %id, "PHY record without MAC record");
            return false;
        }
    }

    true
}

/// Finished packets used between one and the maximum number of transmissions.
pub fn attempts_within_bounds(records: &TrackerRecords) -> bool {
    for record in records.retransmissions.values() {
        if record.attempts_used == 0 || record.attempts_used > MAX_TRANSMISSIONS {
            error!(?record, "attempts out of range");
            return false;
        }
    }

    true
}

/// No attempt has more outcomes than there are gateways, or an outcome from an unknown gateway.
pub fn outcomes_within_gateway_count(records: &TrackerRecords) -> bool {
    for attempt in records.phy_attempts() {
        let too_many = attempt.outcomes.len() > records.gateway_count;
        let unknown = attempt
            .outcomes
            .keys()
            .any(|x| *x >= records.gateway_count);

        if too_many || unknown {
            error!(?attempt, "outcomes do not match the gateways");
            return false;
        }
    }

    true
}

pub fn energy_attempts_bounded(records: &TrackerRecords) -> bool {
    for record in records.energy_expanded.values() {
        if record.attempt_count() > MAX_TRANSMISSIONS as usize {
            error!(?record, "too many energy checks recorded");
            return false;
        }
    }

    true
}

/// Gateways never report on an attempt the device did not finish.
pub fn interrupted_attempts_have_no_outcomes(records: &TrackerRecords) -> bool {
    for attempt in records.phy_attempts() {
        if !attempt.tx_successful && !attempt.outcomes.is_empty() {
            error!(?attempt, "interrupted attempt was received");
            return false;
        }
    }

    true
}

/// No device can make more than one transmission at a time.
///
/// Transmissions are in start order so only neighbours from the same device need checking.
pub fn no_overlapping_transmission(output: &SimOutput) -> bool {
    let mut last_end = Vec::new();

    for trans in output.transmissions.iter() {
        if last_end.len() <= trans.device {
            last_end.resize(trans.device + 1, None);
        }

        if let Some(end) = last_end[trans.device] {
            if trans.start_time < end {
                error!(?trans, "overlapping transmission");
                return false;
            }
        }

        last_end[trans.device] = Some(trans.end_time);
    }

    true
}
