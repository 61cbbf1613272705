//! Packet lifecycle tracking.
//!
//! [`PacketTracker`] passively records what the MAC and PHY layers of every device and
//! every gateway report, keyed by [`PacketId`]. The queries on [`TrackerRecords`] count
//! those records over an inclusive `[start, stop]` window of send (or generation) times.

use std::{collections::BTreeMap, fmt::Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::{
    mac::{MAX_TRANSMISSIONS, MacNotification},
    notification::Subscriber,
    packet::{Direction, MessageKind, PacketId},
    phy::PhyNotification,
    simulation::{GatewayNotification, LogContent, LogItem, LogLevel, LogSource},
    units::Time,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PhyOutcome {
    Received,
    Interfered,
    NoMoreReceivers,
    UnderSensitivity,
    LostBecauseTx,
    Unset,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacPacketRecord {
    pub id: PacketId,
    pub sender: usize,
    pub send_time: Time,
    pub kind: MessageKind,

    /// First reception time at each gateway.
    pub reception_times: BTreeMap<usize, Time>,
}

impl MacPacketRecord {
    pub fn received(&self) -> bool {
        !self.reception_times.is_empty()
    }

    /// Reception time at `gateway`, or the earliest reception if that gateway missed it.
    pub fn reception_time(&self, gateway: usize) -> Option<Time> {
        self.reception_times.get(&gateway).copied().or_else(|| {
            self.reception_times
                .values()
                .copied()
                .min_by(|a, b| a.total_cmp(b))
        })
    }
}

/// One physical transmission attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhyPacketRecord {
    pub id: PacketId,
    pub sender: usize,
    pub send_time: Time,
    pub tx_successful: bool,
    pub outcomes: BTreeMap<usize, PhyOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetransmissionRecord {
    pub id: PacketId,
    pub kind: MessageKind,
    pub first_attempt: Time,
    pub finish_time: Time,
    pub attempts_used: u8,
    pub successful: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppPacketRecord {
    pub id: PacketId,
    pub generated_time: Time,
    pub size: u32,
    pub kind: MessageKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyDenialRecord {
    pub id: PacketId,
    pub device: usize,
    pub generated_time: Time,
    pub kind: MessageKind,

    /// Once true, stays true.
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyDenialExpandedRecord {
    pub id: PacketId,
    pub device: usize,
    pub generated_time: Time,
    pub kind: MessageKind,

    /// Admission result of every attempt, at most [`MAX_TRANSMISSIONS`].
    pub attempts: Vec<bool>,
}

impl EnergyDenialExpandedRecord {
    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }

    pub fn denials(&self) -> usize {
        self.attempts.iter().filter(|x| !**x).count()
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum TrackerError {
    #[error("gateway reception of {id} has no MAC transmission record")]
    MissingMacRecord { id: PacketId },
    #[error("PHY event for {id} has no PHY transmission record")]
    MissingPhyRecord { id: PacketId },
    #[error("gateway {gateway} does not exist, there are {gateway_count} gateways")]
    UnknownGateway { gateway: usize, gateway_count: usize },
    #[error("{id} finished after {attempts} transmissions, expected 1 to 8")]
    AttemptsOutOfRange { id: PacketId, attempts: u8 },
}

/// Everything the tracker has recorded, in a form that can be stored with the run output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackerRecords {
    pub gateway_count: usize,
    pub mac: BTreeMap<PacketId, MacPacketRecord>,

    /// Every attempt of a packet, in transmission order.
    pub phy: BTreeMap<PacketId, Vec<PhyPacketRecord>>,
    pub retransmissions: BTreeMap<PacketId, RetransmissionRecord>,
    pub app: BTreeMap<PacketId, AppPacketRecord>,
    pub energy: BTreeMap<PacketId, EnergyDenialRecord>,
    pub energy_expanded: BTreeMap<PacketId, EnergyDenialExpandedRecord>,
}

#[derive(Debug, Clone, Default)]
pub struct PacketTracker {
    records: TrackerRecords,
    logs: Vec<LogItem>,
}

impl PacketTracker {
    pub fn new(gateway_count: usize) -> Self {
        Self {
            records: TrackerRecords {
                gateway_count,
                ..Default::default()
            },
            logs: Vec::new(),
        }
    }

    pub fn records(&self) -> &TrackerRecords {
        &self.records
    }

    pub fn logs(&self) -> &[LogItem] {
        &self.logs
    }

    pub fn into_parts(self) -> (TrackerRecords, Vec<LogItem>) {
        (self.records, self.logs)
    }

    fn check_gateway(&self, gateway: usize) -> Result<(), TrackerError> {
        if gateway >= self.records.gateway_count {
            return Err(TrackerError::UnknownGateway {
                gateway,
                gateway_count: self.records.gateway_count,
            });
        }
        Ok(())
    }

    fn log_error(&mut self, time: Time, text: String) {
        error!(time = time.seconds(), "{text}");
        self.logs.push(LogItem {
            time,
            log_level: LogLevel::Error,
            source: LogSource::Tracker,
            content: LogContent::Text(text),
        });
    }

    /// First transmission of a logical packet. Later attempts reuse the record.
    pub fn on_mac_transmit(&mut self, id: PacketId, sender: usize, kind: MessageKind, time: Time) {
        self.records.mac.entry(id).or_insert_with(|| MacPacketRecord {
            id,
            sender,
            send_time: time,
            kind,
            reception_times: BTreeMap::new(),
        });
    }

    pub fn on_gateway_mac_receive(
        &mut self,
        id: PacketId,
        gateway: usize,
        time: Time,
    ) -> Result<(), TrackerError> {
        self.check_gateway(gateway)?;

        let record = self
            .records
            .mac
            .get_mut(&id)
            .ok_or(TrackerError::MissingMacRecord { id })?;
        record.reception_times.entry(gateway).or_insert(time);

        Ok(())
    }

    /// Every attempt gets its own record, a repeated report of the same attempt does not.
    pub fn on_phy_transmit(&mut self, id: PacketId, sender: usize, time: Time) {
        let attempts = self.records.phy.entry(id).or_default();

        if attempts
            .iter()
            .any(|x| x.sender == sender && x.send_time == time)
        {
            debug!(packet = %id, "repeated PHY transmission report ignored");
            return;
        }

        attempts.push(PhyPacketRecord {
            id,
            sender,
            send_time: time,
            tx_successful: true,
            outcomes: BTreeMap::new(),
        });
    }

    /// Attaches the outcome to the first attempt still missing one for `gateway`.
    pub fn on_phy_outcome(
        &mut self,
        id: PacketId,
        gateway: usize,
        outcome: PhyOutcome,
        time: Time,
    ) -> Result<(), TrackerError> {
        self.check_gateway(gateway)?;

        let attempts = self
            .records
            .phy
            .get_mut(&id)
            .filter(|x| !x.is_empty())
            .ok_or(TrackerError::MissingPhyRecord { id })?;

        match attempts
            .iter_mut()
            .find(|x| !x.outcomes.contains_key(&gateway))
        {
            Some(attempt) => {
                attempt.outcomes.insert(gateway, outcome);
            }
            None => {
                debug!(packet = %id, gateway, time = time.seconds(), ?outcome, "every attempt already has an outcome");
            }
        }

        Ok(())
    }

    pub fn on_phy_interrupted(&mut self, id: PacketId, time: Time) -> Result<(), TrackerError> {
        let attempts = self
            .records
            .phy
            .get_mut(&id)
            .filter(|x| !x.is_empty())
            .ok_or(TrackerError::MissingPhyRecord { id })?;

        if let [only] = attempts.as_mut_slice() {
            only.tx_successful = false;
            return Ok(());
        }

        let open: Vec<usize> = attempts
            .iter()
            .enumerate()
            .filter(|(_, x)| x.tx_successful && x.outcomes.is_empty())
            .map(|(n, _)| n)
            .collect();

        match open.as_slice() {
            [n] => attempts[*n].tx_successful = false,
            [] => {
                self.log_error(time, format!("Interruption of {id} matches no transmission"));
            }
            _ => {
                self.log_error(
                    time,
                    format!("Interruption of {id} matches more than one transmission"),
                );
            }
        }

        Ok(())
    }

    /// Only the first report for a packet is kept.
    pub fn on_retransmission_finished(
        &mut self,
        id: PacketId,
        kind: MessageKind,
        attempts_used: u8,
        successful: bool,
        first_attempt: Time,
        time: Time,
    ) -> Result<(), TrackerError> {
        if attempts_used == 0 || attempts_used > MAX_TRANSMISSIONS {
            return Err(TrackerError::AttemptsOutOfRange {
                id,
                attempts: attempts_used,
            });
        }

        self.records
            .retransmissions
            .entry(id)
            .or_insert(RetransmissionRecord {
                id,
                kind,
                first_attempt,
                finish_time: time,
                attempts_used,
                successful,
            });

        Ok(())
    }

    pub fn on_app_packet_generated(
        &mut self,
        id: PacketId,
        size: u32,
        kind: MessageKind,
        time: Time,
    ) {
        self.records.app.entry(id).or_insert(AppPacketRecord {
            id,
            generated_time: time,
            size,
            kind,
        });
    }

    pub fn on_energy_admission_check(
        &mut self,
        device: usize,
        id: PacketId,
        time: Time,
        admitted: bool,
        kind: MessageKind,
    ) {
        let expanded = self
            .records
            .energy_expanded
            .entry(id)
            .or_insert_with(|| EnergyDenialExpandedRecord {
                id,
                device,
                generated_time: time,
                kind,
                attempts: Vec::new(),
            });

        if expanded.attempts.len() < MAX_TRANSMISSIONS as usize {
            expanded.attempts.push(admitted);
        } else {
            warn!(packet = %id, "more than {MAX_TRANSMISSIONS} energy checks, extra ones dropped");
        }

        self.records
            .energy
            .entry(id)
            .and_modify(|x| x.success |= admitted)
            .or_insert(EnergyDenialRecord {
                id,
                device,
                generated_time: time,
                kind,
                success: admitted,
            });
    }
}

impl Subscriber<MacNotification> for PacketTracker {
    type Error = TrackerError;

    fn notify(
        &mut self,
        time: Time,
        source: usize,
        event: &MacNotification,
    ) -> Result<(), TrackerError> {
        match *event {
            MacNotification::Transmitted { id, kind, .. } => {
                self.on_mac_transmit(id, source, kind, time);
            }
            MacNotification::RequiredTransmissions {
                id,
                kind,
                attempts,
                success,
                first_attempt,
            } => {
                self.on_retransmission_finished(id, kind, attempts, success, first_attempt, time)?;
            }
            MacNotification::EnergyAdmission { id, kind, admitted } => {
                self.on_energy_admission_check(source, id, time, admitted, kind);
            }
            _ => (),
        }

        Ok(())
    }
}

impl Subscriber<PhyNotification> for PacketTracker {
    type Error = TrackerError;

    fn notify(
        &mut self,
        time: Time,
        source: usize,
        event: &PhyNotification,
    ) -> Result<(), TrackerError> {
        match event {
            PhyNotification::TransmissionStarted { frame, .. }
                if frame.direction == Direction::Uplink =>
            {
                self.on_phy_transmit(frame.id, source, time);
            }
            PhyNotification::TransmissionInterrupted { id, at } => {
                self.on_phy_interrupted(*id, *at)?;
            }
            _ => (),
        }

        Ok(())
    }
}

impl Subscriber<GatewayNotification> for PacketTracker {
    type Error = TrackerError;

    fn notify(
        &mut self,
        time: Time,
        source: usize,
        event: &GatewayNotification,
    ) -> Result<(), TrackerError> {
        match *event {
            GatewayNotification::PhyOutcome { id, outcome } => {
                self.on_phy_outcome(id, source, outcome, time)
            }
            GatewayNotification::MacReceived { id } => {
                self.on_gateway_mac_receive(id, source, time)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhyDeviceCounts {
    pub sent: usize,
    pub succeeded: usize,
    pub interrupted: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhyGatewayCounts {
    pub total: usize,
    pub received: usize,
    pub interfered: usize,
    pub no_more_receivers: usize,
    pub under_sensitivity: usize,
    pub lost_because_tx: usize,
}

impl PhyGatewayCounts {
    pub fn as_array(&self) -> [usize; 6] {
        [
            self.total,
            self.received,
            self.interfered,
            self.no_more_receivers,
            self.under_sensitivity,
            self.lost_because_tx,
        ]
    }
}

impl Display for PhyGatewayCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [a, b, c, d, e, g] = self.as_array();
        write!(f, "{a} {b} {c} {d} {e} {g}")
    }
}

/// Sent and received by at least one gateway.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacCounts {
    pub sent: usize,
    pub received: usize,
}

impl Display for MacCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.sent, self.received)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpsrCounts {
    pub sent: usize,
    pub acked: usize,
}

impl Display for CpsrCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.sent, self.acked)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppUnconfirmedCounts {
    pub generated: usize,
    pub sent: usize,
    pub extracted: usize,
}

impl Display for AppUnconfirmedCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.generated, self.sent, self.extracted)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfirmedCounts {
    pub generated: usize,
    pub sent: usize,
    pub extracted: usize,
    pub acked: usize,
}

impl Display for AppConfirmedCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.generated, self.sent, self.extracted, self.acked
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnergyResults {
    pub generated: usize,
    pub interrupted: usize,

    /// Packets never admitted on any attempt.
    pub denied: usize,

    /// Denied attempts over all packets.
    pub denied_attempts: usize,
    pub denied_unconfirmed: usize,
    pub denied_confirmed: usize,
}

impl Display for EnergyResults {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {}",
            self.generated,
            self.interrupted,
            self.denied,
            self.denied_attempts,
            self.denied_unconfirmed,
            self.denied_confirmed
        )
    }
}

impl TrackerRecords {
    pub fn phy_attempts(&self) -> impl Iterator<Item = &PhyPacketRecord> {
        self.phy.values().flatten()
    }

    pub fn count_phy_per_device(&self, start: Time, stop: Time, device: usize) -> PhyDeviceCounts {
        let mut counts = PhyDeviceCounts::default();

        for attempt in self
            .phy_attempts()
            .filter(|x| x.sender == device && x.send_time.within(start, stop))
        {
            counts.sent += 1;
            if attempt.tx_successful {
                counts.succeeded += 1;
            } else {
                counts.interrupted += 1;
            }
        }

        counts
    }

    /// Interrupted transmissions are not counted.
    pub fn count_phy_per_gateway(
        &self,
        start: Time,
        stop: Time,
        gateway: usize,
    ) -> PhyGatewayCounts {
        let mut counts = PhyGatewayCounts::default();

        for attempt in self
            .phy_attempts()
            .filter(|x| x.tx_successful && x.send_time.within(start, stop))
        {
            counts.total += 1;

            match attempt.outcomes.get(&gateway) {
                Some(PhyOutcome::Received) => counts.received += 1,
                Some(PhyOutcome::Interfered) => counts.interfered += 1,
                Some(PhyOutcome::NoMoreReceivers) => counts.no_more_receivers += 1,
                Some(PhyOutcome::UnderSensitivity) => counts.under_sensitivity += 1,
                Some(PhyOutcome::LostBecauseTx) => counts.lost_because_tx += 1,
                Some(PhyOutcome::Unset) | None => (),
            }
        }

        counts
    }

    fn mac_in(&self, start: Time, stop: Time) -> impl Iterator<Item = &MacPacketRecord> {
        self.mac
            .values()
            .filter(move |x| x.send_time.within(start, stop))
    }

    pub fn count_mac_per_device(&self, start: Time, stop: Time, device: usize) -> MacCounts {
        self.mac_in(start, stop)
            .filter(|x| x.sender == device)
            .fold(MacCounts::default(), |acc, x| MacCounts {
                sent: acc.sent + 1,
                received: acc.received + x.received() as usize,
            })
    }

    pub fn count_mac_globally(&self, start: Time, stop: Time) -> MacCounts {
        self.mac_in(start, stop)
            .fold(MacCounts::default(), |acc, x| MacCounts {
                sent: acc.sent + 1,
                received: acc.received + x.received() as usize,
            })
    }

    fn confirmed_finished_in(
        &self,
        start: Time,
        stop: Time,
    ) -> impl Iterator<Item = &RetransmissionRecord> {
        self.retransmissions.values().filter(move |x| {
            x.kind == MessageKind::Confirmed && x.first_attempt.within(start, stop)
        })
    }

    /// Confirmed packets by first attempt time, and how many of them were acknowledged.
    pub fn count_mac_globally_cpsr(&self, start: Time, stop: Time) -> CpsrCounts {
        self.confirmed_finished_in(start, stop)
            .fold(CpsrCounts::default(), |acc, x| CpsrCounts {
                sent: acc.sent + 1,
                acked: acc.acked + x.successful as usize,
            })
    }

    fn generated_in(&self, start: Time, stop: Time, kind: MessageKind) -> usize {
        self.app
            .values()
            .filter(|x| x.kind == kind && x.generated_time.within(start, stop))
            .count()
    }

    pub fn count_app_packets_unconfirmed(&self, start: Time, stop: Time) -> AppUnconfirmedCounts {
        let generated = self.generated_in(start, stop, MessageKind::Unconfirmed);

        self.mac_in(start, stop)
            .filter(|x| x.kind == MessageKind::Unconfirmed)
            .fold(
                AppUnconfirmedCounts {
                    generated,
                    ..Default::default()
                },
                |acc, x| AppUnconfirmedCounts {
                    sent: acc.sent + 1,
                    extracted: acc.extracted + x.received() as usize,
                    ..acc
                },
            )
    }

    /// A confirmed packet counts as extracted if it was acknowledged or, failing that,
    /// reached at least one gateway.
    pub fn count_app_packets_confirmed(&self, start: Time, stop: Time) -> AppConfirmedCounts {
        let mut counts = AppConfirmedCounts {
            generated: self.generated_in(start, stop, MessageKind::Confirmed),
            ..Default::default()
        };

        for record in self.confirmed_finished_in(start, stop) {
            counts.sent += 1;

            if record.successful {
                counts.extracted += 1;
                counts.acked += 1;
            } else if self
                .mac
                .get(&record.id)
                .map(|x| x.received())
                .unwrap_or(false)
            {
                counts.extracted += 1;
            }
        }

        counts
    }

    pub fn determine_energy_results(&self, start: Time, stop: Time) -> EnergyResults {
        let mut results = EnergyResults {
            generated: self
                .app
                .values()
                .filter(|x| x.generated_time.within(start, stop))
                .count(),
            interrupted: self
                .phy_attempts()
                .filter(|x| !x.tx_successful && x.send_time.within(start, stop))
                .count(),
            denied: self
                .energy
                .values()
                .filter(|x| !x.success && x.generated_time.within(start, stop))
                .count(),
            ..Default::default()
        };

        for record in self
            .energy_expanded
            .values()
            .filter(|x| x.generated_time.within(start, stop))
        {
            let denials = record.denials();
            results.denied_attempts += denials;
            match record.kind {
                MessageKind::Unconfirmed => results.denied_unconfirmed += denials,
                MessageKind::Confirmed => results.denied_confirmed += denials,
            }
        }

        results
    }
}
