//! Frames exchanged between end devices and the network.
//!
//! Every application payload gets a [`PacketId`] when it is generated. The id is
//! carried by value through the MAC, the PHY and the gateways, and every retransmission
//! of the payload reuses it, so it is the correlation key for all tracker records.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::units::Frequency;

/// MHDR (1) + FHDR without options (7) + FPort (1) + MIC (4).
pub const FRAME_OVERHEAD: u32 = 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PacketId(pub u64);

impl Display for PacketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Hands out monotonically increasing packet ids for one run.
#[derive(Debug, Clone, Default)]
pub struct PacketIdAllocator {
    next: u64,
}

impl PacketIdAllocator {
    pub fn allocate(&mut self) -> PacketId {
        let id = PacketId(self.next);
        self.next += 1;
        id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    Unconfirmed,
    Confirmed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Uplink,
    Downlink,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MacCommand {
    RxParamSetupReq {
        rx1_dr_offset: u8,
        rx2_data_rate: u8,
        frequency: Frequency,
    },
    RxParamSetupAns {
        offset_ok: bool,
        data_rate_ok: bool,
        channel_ok: bool,
    },
    LinkAdrReq {
        data_rate: u8,
        tx_power_dbm: f64,
    },
    LinkAdrAns {
        data_rate_ok: bool,
        power_ok: bool,
    },
}

impl MacCommand {
    /// Size in bytes including the command identifier.
    pub fn size(&self) -> u32 {
        match self {
            MacCommand::RxParamSetupReq { .. } => 5,
            MacCommand::RxParamSetupAns { .. } => 2,
            MacCommand::LinkAdrReq { .. } => 5,
            MacCommand::LinkAdrAns { .. } => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub id: PacketId,
    pub direction: Direction,
    pub kind: MessageKind,

    /// Uplink sender or downlink destination.
    pub device: usize,

    /// Downlinks only, acknowledges the last confirmed uplink.
    pub ack: bool,
    pub frame_counter: u32,
    pub commands: Vec<MacCommand>,

    /// Application payload in bytes.
    pub payload_size: u32,
}

impl Frame {
    pub fn uplink(id: PacketId, device: usize, kind: MessageKind, payload_size: u32) -> Self {
        Self {
            id,
            direction: Direction::Uplink,
            kind,
            device,
            ack: false,
            frame_counter: 0,
            commands: Vec::new(),
            payload_size,
        }
    }

    pub fn downlink(id: PacketId, device: usize, ack: bool, commands: Vec<MacCommand>) -> Self {
        Self {
            id,
            direction: Direction::Downlink,
            kind: MessageKind::Unconfirmed,
            device,
            ack,
            frame_counter: 0,
            commands,
            payload_size: 0,
        }
    }

    /// Size on air in bytes.
    pub fn size(&self) -> u32 {
        self.payload_size + FRAME_OVERHEAD + self.commands.iter().map(|x| x.size()).sum::<u32>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_ordered() {
        let mut alloc = PacketIdAllocator::default();
        let a = alloc.allocate();
        let b = alloc.allocate();
        assert!(a < b);
        assert_ne!(a, b);
    }

    #[test]
    fn frame_size_counts_commands() {
        let mut frame = Frame::uplink(PacketId(0), 3, MessageKind::Confirmed, 10);
        assert_eq!(frame.size(), 23);

        frame.commands.push(MacCommand::RxParamSetupAns {
            offset_ok: true,
            data_rate_ok: true,
            channel_ok: true,
        });
        assert_eq!(frame.size(), 25);
    }
}
