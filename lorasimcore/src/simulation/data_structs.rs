use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::{
    mac::{MacEvent, ReceiveWindow},
    packet::{Frame, MessageKind, PacketId},
    tracker::PhyOutcome,
    units::*,
};

/// One uplink transmission on the air.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transmission {
    // Simulation Properties
    pub id: u32,
    pub device: usize,
    pub packet: PacketId,
    pub kind: MessageKind,

    // Timing
    pub start_time: Time,
    pub end_time: Time,

    // Physical Properties
    pub frequency: Frequency,
    pub data_rate: u8,

    /// The device lost power before the end of the transmission.
    pub interrupted: bool,
}

impl Transmission {
    pub fn airtime(&self) -> Time {
        self.end_time - self.start_time
    }

    pub fn overlaps(&self, other: &Transmission) -> bool {
        self.start_time < other.end_time && other.start_time < self.end_time
    }

    /// Same channel and same spreading factor.
    pub fn collides_with(&self, other: &Transmission) -> bool {
        self.overlaps(other)
            && self.data_rate == other.data_rate
            && self.frequency.same_channel(other.frequency)
    }
}

/// A reply from the network server, sent by one gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Downlink {
    pub gateway: usize,
    pub frame: Frame,
    pub window: ReceiveWindow,

    pub start_time: Time,
    pub end_time: Time,
    pub frequency: Frequency,
    pub data_rate: u8,

    /// False if the frame is corrupted on the way to the device.
    pub intact: bool,
}

/// What gateways report to the network side about each uplink.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum GatewayNotification {
    PhyOutcome { id: PacketId, outcome: PhyOutcome },
    /// The gateway decoded the frame and forwarded it.
    MacReceived { id: PacketId },
}

#[derive(Debug, Clone)]
pub enum SimAction {
    GeneratePacket {
        device: usize,
    },
    Mac {
        device: usize,
        event: MacEvent,
    },
    TransmissionEnd {
        transmission: usize,
    },
    DownlinkStart {
        downlink: usize,
    },
    DownlinkEnd {
        device: usize,
        downlink: usize,
    },
    PowerLoss {
        device: usize,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogItem {
    pub time: Time,
    pub log_level: LogLevel,
    pub source: LogSource,
    pub content: LogContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Error,
    Info,
    Debug,
    Trace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogSource {
    Simulation,
    Device(usize),
    Gateway(usize),
    Tracker,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogContent {
    Text(String),
    PacketGenerated {
        device: usize,
        id: PacketId,
        size: u32,
    },
    UplinkSent {
        device: usize,
        id: PacketId,
        attempt: u8,
        data_rate: u8,
        frequency: Frequency,
    },
    GatewayOutcome {
        gateway: usize,
        id: PacketId,
        outcome: PhyOutcome,
    },
    DownlinkSent {
        gateway: usize,
        device: usize,
        id: PacketId,
        window: ReceiveWindow,
        ack: bool,
    },
    DownlinkReceived {
        device: usize,
        id: PacketId,
        ack: bool,
    },
    /// `window` is `None` if neither window could be scheduled.
    WindowMissed {
        device: usize,
        window: Option<ReceiveWindow>,
    },
    RetransmissionFinished {
        device: usize,
        id: PacketId,
        attempts: u8,
        success: bool,
    },
    EnergyAdmission {
        device: usize,
        id: PacketId,
        admitted: bool,
    },
    SendingPostponed {
        device: usize,
        id: PacketId,
        delay: Time,
    },
}

impl Display for LogContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogContent::Text(text) => text.fmt(f),
            LogContent::PacketGenerated { device, id, size } => {
                write!(f, "Packet {id} of {size} bytes generated at device {device}")
            }
            LogContent::UplinkSent {
                device,
                id,
                attempt,
                data_rate,
                frequency,
            } => write!(
                f,
                "Device {device} sent {id} (attempt {attempt}) at DR{data_rate} on {} MHz",
                frequency.MHz()
            ),
            LogContent::GatewayOutcome {
                gateway,
                id,
                outcome,
            } => write!(f, "Gateway {gateway} outcome for {id}: {outcome:?}"),
            LogContent::DownlinkSent {
                gateway,
                device,
                id,
                window,
                ack,
            } => write!(
                f,
                "Gateway {gateway} replied to {id} from device {device} in {window:?} window (ack: {ack})"
            ),
            LogContent::DownlinkReceived { device, id, ack } => {
                write!(f, "Device {device} received reply to {id} (ack: {ack})")
            }
            LogContent::WindowMissed {
                device,
                window: Some(window),
            } => write!(f, "Device {device} missed {window:?} window, no power"),
            LogContent::WindowMissed {
                device,
                window: None,
            } => write!(f, "Device {device} missed both windows, no power"),
            LogContent::RetransmissionFinished {
                device,
                id,
                attempts,
                success,
            } => write!(
                f,
                "Device {device} finished {id} after {attempts} transmissions (success: {success})"
            ),
            LogContent::EnergyAdmission {
                device,
                id,
                admitted,
            } => write!(
                f,
                "Device {device} energy check for {id}: {}",
                if *admitted { "admitted" } else { "denied" }
            ),
            LogContent::SendingPostponed { device, id, delay } => write!(
                f,
                "Device {device} postponed {id} by {:.3}s",
                delay.seconds()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uplink(id: u32, start: f64, end: f64, data_rate: u8) -> Transmission {
        Transmission {
            id,
            device: id as usize,
            packet: PacketId(id as u64),
            kind: MessageKind::Unconfirmed,
            start_time: start * SECONDS,
            end_time: end * SECONDS,
            frequency: Frequency::from_MHz(868.1),
            data_rate,
            interrupted: false,
        }
    }

    #[test]
    fn overlap_is_strict() {
        let a = uplink(0, 0.0, 1.0, 5);
        let b = uplink(1, 1.0, 2.0, 5);
        let c = uplink(2, 0.5, 1.5, 5);
        let d = uplink(3, 0.5, 1.5, 4);

        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(a.collides_with(&c));
        assert!(!a.collides_with(&d));
    }

    #[test]
    fn log_display() {
        let text = LogContent::GatewayOutcome {
            gateway: 1,
            id: PacketId(7),
            outcome: PhyOutcome::Interfered,
        }
        .to_string();
        assert_eq!(text, "Gateway 1 outcome for #7: Interfered");

        let text = LogContent::WindowMissed {
            device: 2,
            window: None,
        }
        .to_string();
        assert_eq!(text, "Device 2 missed both windows, no power");
    }
}
