//! Network server stub. Acknowledges confirmed uplinks and delivers queued MAC
//! commands through the first gateway that decoded the uplink.

use rand::Rng;
use rand_chacha::ChaCha12Rng;
use tracing::debug;

use crate::{
    calculate_air_time,
    mac::ReceiveWindow,
    packet::{Frame, MacCommand, MessageKind},
    units::{Frequency, Time},
};

use super::{
    data_structs::{Downlink, Transmission},
    models::DownlinkModel,
};

/// Where and when the device listens in one receive window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) struct ListenSlot {
    pub start: Time,
    pub frequency: Frequency,
    pub data_rate: u8,
}

#[derive(Debug, Clone)]
pub(super) struct NetworkServer {
    model: DownlinkModel,

    /// Commands still to be sent, per device.
    pending_commands: Vec<Vec<MacCommand>>,

    /// Downlink air time of each gateway.
    gateway_busy: Vec<Vec<(Time, Time)>>,
    rng: ChaCha12Rng,
}

impl NetworkServer {
    pub fn new(
        model: DownlinkModel,
        gateway_count: usize,
        pending_commands: Vec<Vec<MacCommand>>,
        rng: ChaCha12Rng,
    ) -> Self {
        Self {
            model,
            pending_commands,
            gateway_busy: vec![Vec::new(); gateway_count],
            rng,
        }
    }

    /// Whether `gateway` is transmitting at any point in `[start, end)`.
    pub fn is_transmitting(&self, gateway: usize, start: Time, end: Time) -> bool {
        self.gateway_busy
            .get(gateway)
            .map(|busy| busy.iter().any(|x| x.0 < end && start < x.1))
            .unwrap_or(false)
    }

    /// Forget downlinks that ended before `time`.
    pub fn forget_before(&mut self, time: Time) {
        for busy in self.gateway_busy.iter_mut() {
            busy.retain(|x| x.1 >= time);
        }
    }

    /// Plans the answer to `uplink`, if one is needed.
    ///
    /// * `receivers` - gateways that decoded the uplink, in ascending order.
    /// * `slots` - RX1 and RX2 of the device for this uplink.
    pub fn reply(
        &mut self,
        uplink: &Transmission,
        receivers: &[usize],
        slots: [ListenSlot; 2],
    ) -> Option<Downlink> {
        let ack = uplink.kind == MessageKind::Confirmed;
        let has_commands = self
            .pending_commands
            .get(uplink.device)
            .map(|x| !x.is_empty())
            .unwrap_or(false);

        if receivers.is_empty() || !(ack || has_commands) {
            return None;
        }

        let commands = if has_commands {
            self.pending_commands[uplink.device].clone()
        } else {
            Vec::new()
        };
        let frame = Frame::downlink(uplink.packet, uplink.device, ack, commands);

        let order = match self.model.window {
            ReceiveWindow::First => [ReceiveWindow::First, ReceiveWindow::Second],
            ReceiveWindow::Second => [ReceiveWindow::Second, ReceiveWindow::First],
        };

        let (window, slot, gateway, end) = order.into_iter().find_map(|window| {
            let slot = match window {
                ReceiveWindow::First => slots[0],
                ReceiveWindow::Second => slots[1],
            };
            let end = slot.start + calculate_air_time(frame.size(), slot.data_rate);

            receivers
                .iter()
                .copied()
                .find(|x| !self.is_transmitting(*x, slot.start, end))
                .map(|gateway| (window, slot, gateway, end))
        })?;

        if has_commands {
            self.pending_commands[uplink.device].clear();
        }
        self.gateway_busy[gateway].push((slot.start, end));

        let intact = self
            .rng
            .random_bool(self.model.delivery_probability.clamp(0.0, 1.0));

        debug!(gateway, device = uplink.device, packet = %uplink.packet, ?window, intact, "downlink planned");

        Some(Downlink {
            gateway,
            frame,
            window,
            start_time: slot.start,
            end_time: end,
            frequency: slot.frequency,
            data_rate: slot.data_rate,
            intact,
        })
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;
    use crate::{
        packet::PacketId,
        units::{Frequency, SECONDS},
    };

    fn uplink(kind: MessageKind) -> Transmission {
        Transmission {
            id: 0,
            device: 0,
            packet: PacketId(3),
            kind,
            start_time: Time::ZERO,
            end_time: 1.0 * SECONDS,
            frequency: Frequency::from_MHz(868.1),
            data_rate: 5,
            interrupted: false,
        }
    }

    fn slots() -> [ListenSlot; 2] {
        [
            ListenSlot {
                start: 2.0 * SECONDS,
                frequency: Frequency::from_MHz(868.1),
                data_rate: 5,
            },
            ListenSlot {
                start: 3.0 * SECONDS,
                frequency: Frequency::from_MHz(869.525),
                data_rate: 0,
            },
        ]
    }

    fn server(commands: Vec<MacCommand>) -> NetworkServer {
        NetworkServer::new(
            DownlinkModel::default(),
            2,
            vec![commands],
            ChaCha12Rng::seed_from_u64(0),
        )
    }

    #[test]
    fn acks_confirmed_in_rx1() {
        let mut server = server(Vec::new());
        let downlink = server
            .reply(&uplink(MessageKind::Confirmed), &[1], slots())
            .unwrap();

        assert_eq!(downlink.gateway, 1);
        assert_eq!(downlink.window, ReceiveWindow::First);
        assert!(downlink.frame.ack);
        assert_eq!(downlink.frame.id, PacketId(3));
        assert!(downlink.intact);
        assert!(server.is_transmitting(1, downlink.start_time, downlink.end_time));
        assert!(!server.is_transmitting(0, downlink.start_time, downlink.end_time));
    }

    #[test]
    fn unconfirmed_needs_commands() {
        let mut quiet = server(Vec::new());
        assert!(
            quiet
                .reply(&uplink(MessageKind::Unconfirmed), &[0], slots())
                .is_none()
        );

        let command = MacCommand::LinkAdrReq {
            data_rate: 3,
            tx_power_dbm: 14.0,
        };
        let mut busy = server(vec![command.clone()]);
        let downlink = busy
            .reply(&uplink(MessageKind::Unconfirmed), &[0], slots())
            .unwrap();
        assert!(!downlink.frame.ack);
        assert_eq!(downlink.frame.commands, vec![command]);

        // Commands are only sent once.
        busy.forget_before(10.0 * SECONDS);
        assert!(
            busy.reply(&uplink(MessageKind::Unconfirmed), &[0], slots())
                .is_none()
        );
    }

    #[test]
    fn busy_gateway_falls_back_to_rx2() {
        let mut server = server(Vec::new());
        let first = server
            .reply(&uplink(MessageKind::Confirmed), &[0], slots())
            .unwrap();
        let second = server
            .reply(&uplink(MessageKind::Confirmed), &[0], slots())
            .unwrap();
        let third = server
            .reply(&uplink(MessageKind::Confirmed), &[0, 1], slots())
            .unwrap();

        assert_eq!(first.window, ReceiveWindow::First);
        assert_eq!(second.window, ReceiveWindow::Second);
        assert_eq!(third.window, ReceiveWindow::First);
        assert_eq!(third.gateway, 1);
    }

    #[test]
    fn nobody_received() {
        let mut server = server(Vec::new());
        assert!(
            server
                .reply(&uplink(MessageKind::Confirmed), &[], slots())
                .is_none()
        );
    }
}
