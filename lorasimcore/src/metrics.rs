//! Aggregate delivery, acknowledgment and energy statistics computed from tracker records.

use serde::{Deserialize, Serialize};

use crate::{
    mac::MAX_TRANSMISSIONS,
    packet::MessageKind,
    tracker::{
        AppConfirmedCounts, AppUnconfirmedCounts, CpsrCounts, EnergyResults, PhyGatewayCounts,
        TrackerRecords,
    },
    units::Time,
};

const BUCKETS: usize = MAX_TRANSMISSIONS as usize;

/// Summary of one measurement window as seen from one gateway.
///
/// Histograms are indexed by `attempts_used - 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub start: Time,
    pub stop: Time,
    pub gateway: usize,

    pub total_unconfirmed: usize,
    pub successful_unconfirmed: usize,

    /// Confirmed packets that reached a gateway, acknowledged or not.
    pub extracted_confirmed: usize,
    pub acked_confirmed: usize,

    /// Confirmed packets sent in the window that the device has not finished with.
    pub incomplete_confirmed: usize,

    pub successful_attempts: [usize; BUCKETS],
    pub failed_attempts: [usize; BUCKETS],
    pub total_attempts: [usize; BUCKETS],

    /// Mean first transmission to gateway reception time over received packets.
    pub average_delay: Time,

    /// Mean first transmission to acknowledgment time over received confirmed packets.
    pub average_ack_delay: Time,

    pub phy: PhyGatewayCounts,
    pub cpsr: CpsrCounts,
    pub app_confirmed: AppConfirmedCounts,
    pub app_unconfirmed: AppUnconfirmedCounts,
    pub energy: EnergyResults,
}

impl PerformanceReport {
    pub fn new(records: &TrackerRecords, start: Time, stop: Time, gateway: usize) -> Self {
        let mut report = PerformanceReport {
            start,
            stop,
            gateway,
            total_unconfirmed: 0,
            successful_unconfirmed: 0,
            extracted_confirmed: 0,
            acked_confirmed: 0,
            incomplete_confirmed: 0,
            successful_attempts: [0; BUCKETS],
            failed_attempts: [0; BUCKETS],
            total_attempts: [0; BUCKETS],
            average_delay: Time::ZERO,
            average_ack_delay: Time::ZERO,
            phy: records.count_phy_per_gateway(start, stop, gateway),
            cpsr: records.count_mac_globally_cpsr(start, stop),
            app_confirmed: records.count_app_packets_confirmed(start, stop),
            app_unconfirmed: records.count_app_packets_unconfirmed(start, stop),
            energy: records.determine_energy_results(start, stop),
        };

        let mut delay_sum = Time::ZERO;
        let mut ack_delay_sum = Time::ZERO;
        let mut received_confirmed = 0;

        for mac in records
            .mac
            .values()
            .filter(|x| x.send_time.within(start, stop))
        {
            let delay = mac.reception_time(gateway).map(|x| x - mac.send_time);

            if mac.kind == MessageKind::Unconfirmed {
                report.total_unconfirmed += 1;

                if let Some(delay) = delay {
                    report.successful_unconfirmed += 1;
                    delay_sum = delay_sum + delay;
                }
                continue;
            }

            let Some(retx) = records.retransmissions.get(&mac.id) else {
                report.incomplete_confirmed += 1;
                continue;
            };

            // Bounded by the tracker on insertion.
            let bucket = (retx.attempts_used as usize).clamp(1, BUCKETS) - 1;
            report.total_attempts[bucket] += 1;

            if retx.successful {
                report.successful_attempts[bucket] += 1;
                report.extracted_confirmed += 1;
                report.acked_confirmed += 1;
            } else {
                report.failed_attempts[bucket] += 1;
                if mac.received() {
                    report.extracted_confirmed += 1;
                }
            }

            if let Some(delay) = delay {
                received_confirmed += 1;
                delay_sum = delay_sum + delay;
                ack_delay_sum = ack_delay_sum + (retx.finish_time - retx.first_attempt);
            }
        }

        let delayed = received_confirmed + report.successful_unconfirmed;
        if delayed > 0 {
            report.average_delay = delay_sum / delayed as f64;
        }
        if received_confirmed > 0 {
            report.average_ack_delay = ack_delay_sum / received_confirmed as f64;
        }

        report
    }

    /// Transmissions used by finished confirmed packets.
    pub fn sum_retransmissions(&self) -> usize {
        self.total_attempts
            .iter()
            .enumerate()
            .map(|(n, count)| count * (n + 1))
            .sum()
    }

    /// Unconfirmed packet delivery ratio, zero when nothing was sent.
    pub fn unconfirmed_pdr(&self) -> f64 {
        ratio(self.successful_unconfirmed, self.total_unconfirmed)
    }

    /// Confirmed packet success ratio, zero when nothing was sent.
    pub fn cpsr_ratio(&self) -> f64 {
        ratio(self.cpsr.acked, self.cpsr.sent)
    }

    pub fn legend() -> &'static str {
        "Total unconfirmed Successful unconfirmed \
        | Successfully extracted confirmed packets Successfully ACKed confirmed packets \
        | Incomplete Confirmed \
        | Successful with 1 Successful with 2 Successful with 3 Successful with 4 \
        Successful with 5 Successful with 6 Successful with 7 Successful with 8 \
        | Failed after 1 Failed after 2 Failed after 3 Failed after 4 \
        Failed after 5 Failed after 6 Failed after 7 Failed after 8 \
        | Average Delay Average ACK Delay \
        | Total Retransmission amounts \
        || PHY Total PHY Successful PHY Interfered PHY No More Receivers \
        PHY Under Sensitivity PHY Lost Because TX \
        ** CPSR confirmed sent CPSR confirmed ACKed \
        ** App confirmed generated App confirmed sent App confirmed extracted \
        App confirmed ACKed App unconfirmed generated App unconfirmed sent \
        App unconfirmed extracted \
        $ Generated Interrupted No energy No energy attempts \
        No energy unconfirmed No energy confirmed"
    }

    /// Fixed field text rendering, fields in the order of [`Self::legend`].
    pub fn to_line(&self) -> String {
        format!(
            "{} {} | {} {} | {} | {} | {} | {:.6} {:.6} | {} || {} ** {} ** {} {} $ {}",
            self.total_unconfirmed,
            self.successful_unconfirmed,
            self.extracted_confirmed,
            self.acked_confirmed,
            self.incomplete_confirmed,
            join(&self.successful_attempts),
            join(&self.failed_attempts),
            self.average_delay.seconds(),
            self.average_ack_delay.seconds(),
            self.sum_retransmissions(),
            self.phy,
            self.cpsr,
            self.app_confirmed,
            self.app_unconfirmed,
            self.energy,
        )
    }
}

fn join(values: &[usize]) -> String {
    values
        .iter()
        .map(|x| x.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Start times of the uninterrupted transmissions of `device`, sorted.
pub fn tx_times(records: &TrackerRecords, start: Time, stop: Time, device: usize) -> Vec<Time> {
    let mut times: Vec<_> = records
        .phy_attempts()
        .filter(|x| x.sender == device && x.tx_successful && x.send_time.within(start, stop))
        .map(|x| x.send_time)
        .collect();

    times.sort_by(|a, b| a.total_cmp(b));
    times
}

pub fn tx_time_intervals(
    records: &TrackerRecords,
    start: Time,
    stop: Time,
    device: usize,
) -> Vec<Time> {
    tx_times(records, start, stop, device)
        .windows(2)
        .map(|x| x[1] - x[0])
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TxTimeStatistics {
    pub count: usize,
    pub mean_interval: Time,
    pub std_deviation: Time,
}

pub fn tx_time_statistics(
    records: &TrackerRecords,
    start: Time,
    stop: Time,
    device: usize,
) -> TxTimeStatistics {
    let times = tx_times(records, start, stop, device);
    let intervals: Vec<_> = times.windows(2).map(|x| x[1] - x[0]).collect();

    if intervals.is_empty() {
        return TxTimeStatistics {
            count: times.len(),
            mean_interval: Time::ZERO,
            std_deviation: Time::ZERO,
        };
    }

    let n = intervals.len() as f64;
    let mean = intervals.iter().copied().sum::<Time>() / n;
    let variance = intervals
        .iter()
        .map(|x| (*x - mean).seconds().powi(2))
        .sum::<f64>()
        / n;

    TxTimeStatistics {
        count: times.len(),
        mean_interval: mean,
        std_deviation: Time::from_seconds(variance.sqrt()),
    }
}
