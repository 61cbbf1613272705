//! Class-A end device MAC.
//!
//! After every uplink the device opens two short receive windows, RX1 `rx1_delay` and
//! RX2 `rx2_delay` after the end of the transmission. A downlink addressed to the device
//! in either window ends the attempt. Otherwise, once RX2 has closed, the packet is
//! either sent again (if transmissions remain) or finalized as failed.
//!
//! The MAC never owns a clock or a radio. Every operation takes a [`MacContext`]
//! borrowing the timer, the PHY and the random number generator of the device.

use rand_chacha::ChaCha12Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::{
    calculate_air_time,
    duty_cycle::ChannelLedger,
    notification::Notifier,
    packet::{Direction, Frame, MacCommand, MessageKind, PacketId},
    phy::{DeviceState, EndDevicePhy, TxParams},
    region,
    timer::{Timer, TimerHandle},
    units::{Frequency, SECONDS, Time},
};

pub const MAX_TRANSMISSIONS: u8 = 8;
pub const MAX_TX_POWER_DBM: f64 = 16.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MacConfig {
    /// Transmissions allowed per packet (NbTrans), including the first.
    pub max_transmissions: u8,

    /// Lower the data rate every second retransmission.
    pub data_rate_adaptation: bool,
    pub rx1_delay: Time,
    pub rx2_delay: Time,
    pub rx1_dr_offset: u8,

    /// Listen in RX2 at the uplink data rate.
    pub fast_rx2: bool,
    /// Same effect as `fast_rx2`, kept separate as the two are configured separately.
    pub rx2_matches_rx1: bool,
    pub receive_window_symbols: u32,

    pub data_rate: u8,
    pub tx_power_dbm: f64,
    pub rx2_data_rate: u8,
    pub rx2_frequency: Frequency,

    /// Wait this long and try again when the energy store refuses a transmission.
    /// `None` gives up on the packet instead.
    pub energy_retry_backoff: Option<Time>,
}

impl Default for MacConfig {
    fn default() -> Self {
        Self {
            max_transmissions: 1,
            data_rate_adaptation: false,
            rx1_delay: 1.0 * SECONDS,
            rx2_delay: 2.0 * SECONDS,
            rx1_dr_offset: 0,
            fast_rx2: false,
            rx2_matches_rx1: false,
            receive_window_symbols: 8,
            data_rate: 5,
            tx_power_dbm: region::DEFAULT_TX_POWER_DBM,
            rx2_data_rate: region::DEFAULT_RX2_DATA_RATE,
            rx2_frequency: region::DEFAULT_RX2_FREQUENCY,
            energy_retry_backoff: None,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("max_transmissions must be between 1 and 8, got {0}")]
    MaxTransmissions(u8),
    #[error("data rate {0} is not defined for EU868")]
    DataRate(u8),
    #[error("rx1 data rate offset {0} is out of range")]
    Rx1DrOffset(u8),
    #[error("receive delays must satisfy 0 < rx1_delay < rx2_delay, got {rx1} s and {rx2} s")]
    ReceiveDelays { rx1: Time, rx2: Time },
    #[error("rx2_delay of {rx2} s opens RX2 before RX1 can close at {rx1_close} s")]
    OverlappingWindows { rx2: Time, rx1_close: Time },
    #[error("frequency {0} Hz is outside the EU868 band")]
    Frequency(Frequency),
    #[error("tx power {0} dBm is out of range")]
    TxPower(f64),
    #[error("energy retry backoff must be positive, got {0} s")]
    EnergyBackoff(Time),
}

impl MacConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_transmissions == 0 || self.max_transmissions > MAX_TRANSMISSIONS {
            return Err(ConfigError::MaxTransmissions(self.max_transmissions));
        }

        for data_rate in [self.data_rate, self.rx2_data_rate] {
            if data_rate > region::MAX_DATA_RATE {
                return Err(ConfigError::DataRate(data_rate));
            }
        }

        if self.rx1_dr_offset > region::MAX_RX1_DR_OFFSET {
            return Err(ConfigError::Rx1DrOffset(self.rx1_dr_offset));
        }

        if self.rx1_delay <= Time::ZERO || self.rx2_delay <= self.rx1_delay {
            return Err(ConfigError::ReceiveDelays {
                rx1: self.rx1_delay,
                rx2: self.rx2_delay,
            });
        }

        // Data rate commands can move RX1 down to DR0, the longest window.
        let rx1_close = self.rx1_delay
            + region::receive_window_duration(0, self.receive_window_symbols);
        if self.rx2_delay < rx1_close {
            return Err(ConfigError::OverlappingWindows {
                rx2: self.rx2_delay,
                rx1_close,
            });
        }

        if !region::is_valid_frequency(self.rx2_frequency) {
            return Err(ConfigError::Frequency(self.rx2_frequency));
        }

        if !(0.0..=MAX_TX_POWER_DBM).contains(&self.tx_power_dbm) {
            return Err(ConfigError::TxPower(self.tx_power_dbm));
        }

        if let Some(backoff) = self.energy_retry_backoff {
            if backoff <= Time::ZERO {
                return Err(ConfigError::EnergyBackoff(backoff));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReceiveWindow {
    First,
    Second,
}

/// Protocol invariant violations. The run cannot continue after one of these.
#[derive(Debug, Error, PartialEq)]
pub enum MacError {
    #[error("{window:?} receive window closed while the radio was in {state:?}")]
    InvalidStateAtWindowClose {
        window: ReceiveWindow,
        state: DeviceState,
    },
    #[error("packet {id} has a negative number of transmissions left ({retx_left})")]
    NegativeRetransmissions { id: PacketId, retx_left: i32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MacEvent {
    OpenFirstWindow,
    CloseFirstWindow,
    OpenSecondWindow,
    CloseSecondWindow,
    PostponedSend,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MacNotification {
    Transmitted {
        id: PacketId,
        kind: MessageKind,
        /// 1 for the first transmission of the packet.
        attempt: u8,
        data_rate: u8,
        frequency: Frequency,
        duration: Time,
    },
    TxFinished {
        id: PacketId,
    },
    WindowOpened(ReceiveWindow),
    WindowClosed(ReceiveWindow),
    MissedWindowBecauseOff(ReceiveWindow),
    /// The radio had no power when the transmission ended so no window was scheduled.
    MissedWindowsBecauseOff {
        id: PacketId,
    },
    Received {
        id: PacketId,
        ack: bool,
    },
    /// Emitted once per confirmed packet, and once per unconfirmed packet sent more
    /// than once, when the device stops working on it.
    RequiredTransmissions {
        id: PacketId,
        kind: MessageKind,
        attempts: u8,
        success: bool,
        first_attempt: Time,
    },
    EnergyAdmission {
        id: PacketId,
        kind: MessageKind,
        admitted: bool,
    },
    SendingPostponed {
        id: PacketId,
        delay: Time,
    },
}

/// Everything outside the MAC that an operation may touch.
pub struct MacContext<'a> {
    pub timer: &'a mut dyn Timer<Event = MacEvent>,
    pub phy: &'a mut dyn EndDevicePhy,
    pub rng: &'a mut ChaCha12Rng,
}

#[derive(Debug, Clone)]
struct RetransmissionParams {
    packet: Option<Frame>,
    first_attempt: Time,
    retx_left: i32,
    waiting_ack: bool,
    multiple_unconfirmed: bool,
    frame_counter: Option<u32>,

    /// A transmission of `packet` has gone out and its windows have not been resolved.
    in_flight: bool,
}

impl RetransmissionParams {
    fn idle(max_transmissions: u8) -> Self {
        Self {
            packet: None,
            first_attempt: Time::ZERO,
            retx_left: max_transmissions as i32,
            waiting_ack: false,
            multiple_unconfirmed: false,
            frame_counter: None,
            in_flight: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct WindowEvents {
    open_first: Option<TimerHandle>,
    close_first: Option<TimerHandle>,
    open_second: Option<TimerHandle>,
    close_second: Option<TimerHandle>,
    rx2_end: Time,
}

impl WindowEvents {
    fn handles(&self) -> impl Iterator<Item = TimerHandle> {
        [
            self.open_first,
            self.close_first,
            self.open_second,
            self.close_second,
        ]
        .into_iter()
        .flatten()
    }
}

#[derive(Debug, Clone)]
pub struct ClassAMac {
    device: usize,
    config: MacConfig,

    data_rate: u8,
    tx_power_dbm: f64,
    rx1_dr_offset: u8,
    rx2_data_rate: u8,
    rx2_frequency: Frequency,

    ledger: ChannelLedger,
    retx: RetransmissionParams,
    windows: WindowEvents,
    postponed: Option<TimerHandle>,

    /// End of the last transmission.
    tx_end: Time,

    /// MAC command answers waiting for the next uplink.
    pending_answers: Vec<MacCommand>,
    frame_counter: u32,

    pub notifier: Notifier<MacNotification>,
}

impl ClassAMac {
    pub fn new(device: usize, config: MacConfig) -> Result<Self, ConfigError> {
        Self::with_ledger(device, config, ChannelLedger::eu868())
    }

    pub fn with_ledger(
        device: usize,
        config: MacConfig,
        ledger: ChannelLedger,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            device,
            data_rate: config.data_rate,
            tx_power_dbm: config.tx_power_dbm,
            rx1_dr_offset: config.rx1_dr_offset,
            rx2_data_rate: config.rx2_data_rate,
            rx2_frequency: config.rx2_frequency,
            ledger,
            retx: RetransmissionParams::idle(config.max_transmissions),
            windows: WindowEvents::default(),
            postponed: None,
            tx_end: Time::ZERO,
            pending_answers: Vec::new(),
            frame_counter: 0,
            notifier: Notifier::default(),
            config,
        })
    }

    pub fn device(&self) -> usize {
        self.device
    }

    pub fn config(&self) -> &MacConfig {
        &self.config
    }

    pub fn data_rate(&self) -> u8 {
        self.data_rate
    }

    pub fn tx_power_dbm(&self) -> f64 {
        self.tx_power_dbm
    }

    pub fn rx1_data_rate(&self) -> u8 {
        region::reply_data_rate(self.data_rate, self.rx1_dr_offset)
    }

    /// Data rate the device listens at in RX2.
    pub fn rx2_data_rate(&self) -> u8 {
        if self.config.fast_rx2 || self.config.rx2_matches_rx1 {
            self.data_rate
        } else {
            self.rx2_data_rate
        }
    }

    pub fn rx2_frequency(&self) -> Frequency {
        self.rx2_frequency
    }

    /// Packet the device is currently working on.
    pub fn outstanding(&self) -> Option<&Frame> {
        self.retx.packet.as_ref()
    }

    pub fn transmissions_left(&self) -> i32 {
        self.retx.retx_left
    }

    pub fn ledger(&self) -> &ChannelLedger {
        &self.ledger
    }

    /// Hand a new application packet to the MAC.
    /// A packet still being worked on is finalized as failed.
    pub fn send(&mut self, ctx: &mut MacContext, frame: Frame) -> Result<(), MacError> {
        let now = ctx.timer.now();

        if let Some(handle) = self.postponed.take() {
            ctx.timer.cancel(handle);
        }

        if let Some(old) = self.retx.packet.as_ref() {
            debug!(
                device = self.device,
                old = %old.id,
                new = %frame.id,
                "new packet replaces outstanding packet"
            );
            self.finalize(now, false);
        }

        let max = self.config.max_transmissions;
        self.retx = RetransmissionParams {
            waiting_ack: frame.kind == MessageKind::Confirmed,
            multiple_unconfirmed: frame.kind == MessageKind::Unconfirmed && max > 1,
            packet: Some(frame),
            first_attempt: now,
            retx_left: max as i32,
            frame_counter: None,
            in_flight: false,
        };

        self.attempt_send(ctx)
    }

    /// Time until the device may transmit. While receive windows are pending
    /// this is at least the time until RX2 closes.
    pub fn next_transmission_delay(&self, timer: &dyn Timer<Event = MacEvent>) -> Time {
        let now = timer.now();
        let duty = self.ledger.waiting_time(now).max(self.tx_end - now);

        let class = if self.windows_pending(timer) {
            (self.windows.rx2_end - now).max(Time::ZERO)
        } else {
            Time::ZERO
        };

        duty.max(class)
    }

    fn windows_pending(&self, timer: &dyn Timer<Event = MacEvent>) -> bool {
        self.windows.handles().any(|x| timer.is_pending(x))
    }

    fn postpone(&mut self, ctx: &mut MacContext, id: PacketId, delay: Time) {
        let now = ctx.timer.now();
        self.postponed = Some(ctx.timer.schedule_after(delay, MacEvent::PostponedSend));
        self.notifier
            .emit(now, MacNotification::SendingPostponed { id, delay });
        trace!(device = self.device, packet = %id, delay = delay.seconds(), "sending postponed");
    }

    fn attempt_send(&mut self, ctx: &mut MacContext) -> Result<(), MacError> {
        let now = ctx.timer.now();
        let Some(frame) = self.retx.packet.clone() else {
            return Ok(());
        };

        if let Some(handle) = self.postponed.take() {
            ctx.timer.cancel(handle);
        }

        let delay = self.next_transmission_delay(&*ctx.timer);
        if delay > Time::ZERO || self.windows_pending(&*ctx.timer) {
            self.postpone(ctx, frame.id, delay);
            return Ok(());
        }

        let Some(channel) = self.ledger.pick_channel(now, ctx.rng) else {
            let wait = self.ledger.waiting_time(now);
            self.postpone(ctx, frame.id, wait);
            return Ok(());
        };

        let remaining = self.retx.retx_left;
        let max = self.config.max_transmissions as i32;

        let admitted = ctx.phy.is_energy_sufficient(now);
        self.notifier.emit(
            now,
            MacNotification::EnergyAdmission {
                id: frame.id,
                kind: frame.kind,
                admitted,
            },
        );

        self.retx.retx_left -= 1;
        if self.retx.retx_left < 0 {
            return Err(MacError::NegativeRetransmissions {
                id: frame.id,
                retx_left: self.retx.retx_left,
            });
        }

        if !admitted {
            debug!(device = self.device, packet = %frame.id, "not enough energy to transmit");
            self.energy_denied(ctx, frame.id);
            return Ok(());
        }

        if self.config.data_rate_adaptation
            && self.data_rate > 0
            && remaining < max
            && remaining % 2 == 0
        {
            self.data_rate -= 1;
            self.tx_power_dbm = region::DEFAULT_TX_POWER_DBM;
            debug!(device = self.device, data_rate = self.data_rate, "data rate lowered");
        }

        let mut on_air = frame;
        on_air.frame_counter = match self.retx.frame_counter {
            Some(counter) => counter,
            None => {
                self.frame_counter += 1;
                self.retx.frame_counter = Some(self.frame_counter);
                self.frame_counter
            }
        };
        let own_commands = on_air.commands.len();
        on_air.commands.append(&mut self.pending_answers);

        let duration = calculate_air_time(on_air.size(), self.data_rate);
        let params = TxParams {
            frequency: channel,
            data_rate: self.data_rate,
            tx_power_dbm: self.tx_power_dbm,
            duration,
        };

        if !ctx.phy.send(now, &on_air, params) {
            debug!(device = self.device, packet = %on_air.id, "radio lost power before sending");
            self.pending_answers = on_air.commands.split_off(own_commands);
            self.energy_denied(ctx, on_air.id);
            return Ok(());
        }

        self.ledger.register_transmission(now, duration, channel);
        self.tx_end = now + duration;

        // RX1 listens on the uplink channel.
        ctx.phy.set_frequency(channel);
        ctx.phy.set_data_rate(self.rx1_data_rate());

        self.retx.in_flight = true;

        let attempt = (max - self.retx.retx_left) as u8;
        self.notifier.emit(
            now,
            MacNotification::Transmitted {
                id: on_air.id,
                kind: on_air.kind,
                attempt,
                data_rate: self.data_rate,
                frequency: channel,
                duration,
            },
        );
        debug!(device = self.device, packet = %on_air.id, attempt, "transmitting");

        Ok(())
    }

    /// The attempt is already consumed. Retry after the backoff if possible.
    fn energy_denied(&mut self, ctx: &mut MacContext, id: PacketId) {
        match self.config.energy_retry_backoff {
            Some(backoff) if self.retx.retx_left > 0 => self.postpone(ctx, id, backoff),
            _ => self.finalize(ctx.timer.now(), false),
        }
    }

    /// The PHY finished sending the last frame.
    pub fn tx_finished(&mut self, ctx: &mut MacContext) {
        let now = ctx.timer.now();
        let id = self.retx.packet.as_ref().map(|x| x.id);

        if ctx.phy.switch_to_idle(now) {
            let timer = &mut *ctx.timer;
            self.windows.open_first =
                Some(timer.schedule_after(self.config.rx1_delay, MacEvent::OpenFirstWindow));
            self.windows.open_second =
                Some(timer.schedule_after(self.config.rx2_delay, MacEvent::OpenSecondWindow));
            self.windows.rx2_end = now
                + self.config.rx2_delay
                + region::receive_window_duration(
                    self.rx2_data_rate(),
                    self.config.receive_window_symbols,
                );
        } else if let Some(id) = id {
            self.notifier
                .emit(now, MacNotification::MissedWindowsBecauseOff { id });
        }

        if let Some(id) = id {
            self.notifier.emit(now, MacNotification::TxFinished { id });
        }
    }

    pub fn handle_timer(&mut self, ctx: &mut MacContext, event: MacEvent) -> Result<(), MacError> {
        trace!(device = self.device, ?event, "mac timer");

        match event {
            MacEvent::OpenFirstWindow => {
                self.open_first_window(ctx);
                Ok(())
            }
            MacEvent::CloseFirstWindow => self.close_first_window(ctx),
            MacEvent::OpenSecondWindow => {
                self.open_second_window(ctx);
                Ok(())
            }
            MacEvent::CloseSecondWindow => self.close_second_window(ctx),
            MacEvent::PostponedSend => {
                self.postponed = None;
                self.attempt_send(ctx)
            }
        }
    }

    fn open_first_window(&mut self, ctx: &mut MacContext) {
        let now = ctx.timer.now();
        self.windows.open_first = None;

        if ctx.phy.switch_to_standby(now) {
            let duration = region::receive_window_duration(
                self.rx1_data_rate(),
                self.config.receive_window_symbols,
            );
            self.windows.close_first =
                Some(ctx.timer.schedule_after(duration, MacEvent::CloseFirstWindow));
            self.notifier
                .emit(now, MacNotification::WindowOpened(ReceiveWindow::First));
        } else {
            self.notifier.emit(
                now,
                MacNotification::MissedWindowBecauseOff(ReceiveWindow::First),
            );
        }
    }

    fn close_first_window(&mut self, ctx: &mut MacContext) -> Result<(), MacError> {
        let now = ctx.timer.now();
        self.windows.close_first = None;

        match ctx.phy.state() {
            state @ (DeviceState::Tx | DeviceState::Idle | DeviceState::TurnOn) => {
                return Err(MacError::InvalidStateAtWindowClose {
                    window: ReceiveWindow::First,
                    state,
                });
            }
            // The reception decides what happens next.
            DeviceState::Rx => {
                self.notifier
                    .emit(now, MacNotification::WindowClosed(ReceiveWindow::First));
            }
            DeviceState::Standby => {
                ctx.phy.switch_to_idle(now);
                self.notifier
                    .emit(now, MacNotification::WindowClosed(ReceiveWindow::First));
            }
            DeviceState::Sleep => (),
            DeviceState::Off => {
                self.notifier.emit(
                    now,
                    MacNotification::MissedWindowBecauseOff(ReceiveWindow::First),
                );
            }
        }

        Ok(())
    }

    fn open_second_window(&mut self, ctx: &mut MacContext) {
        let now = ctx.timer.now();
        self.windows.open_second = None;

        if ctx.phy.state() == DeviceState::Rx {
            debug!(device = self.device, "still receiving, RX2 not opened");
            return;
        }

        if ctx.phy.switch_to_standby(now) {
            let data_rate = self.rx2_data_rate();
            ctx.phy.set_frequency(self.rx2_frequency);
            ctx.phy.set_data_rate(data_rate);

            let duration =
                region::receive_window_duration(data_rate, self.config.receive_window_symbols);
            self.windows.close_second =
                Some(ctx.timer.schedule_after(duration, MacEvent::CloseSecondWindow));
            self.notifier
                .emit(now, MacNotification::WindowOpened(ReceiveWindow::Second));
        } else {
            self.notifier.emit(
                now,
                MacNotification::MissedWindowBecauseOff(ReceiveWindow::Second),
            );
        }
    }

    fn close_second_window(&mut self, ctx: &mut MacContext) -> Result<(), MacError> {
        let now = ctx.timer.now();
        self.windows.close_second = None;

        match ctx.phy.state() {
            state @ (DeviceState::Tx | DeviceState::Idle | DeviceState::TurnOn) => {
                return Err(MacError::InvalidStateAtWindowClose {
                    window: ReceiveWindow::Second,
                    state,
                });
            }
            DeviceState::Rx => {
                self.notifier
                    .emit(now, MacNotification::WindowClosed(ReceiveWindow::Second));
                return Ok(());
            }
            DeviceState::Standby => {
                self.notifier
                    .emit(now, MacNotification::WindowClosed(ReceiveWindow::Second));
                ctx.phy.switch_to_sleep(now);
            }
            DeviceState::Sleep => (),
            DeviceState::Off => {
                self.notifier.emit(
                    now,
                    MacNotification::MissedWindowBecauseOff(ReceiveWindow::Second),
                );
            }
        }

        self.retry_decision(ctx)
    }

    fn rx2_expired(&self, timer: &dyn Timer<Event = MacEvent>) -> bool {
        self.windows
            .open_second
            .map(|x| !timer.is_pending(x))
            .unwrap_or(true)
    }

    fn cancel_windows(&mut self, timer: &mut dyn Timer<Event = MacEvent>) {
        for handle in self.windows.handles() {
            timer.cancel(handle);
        }

        let rx2_end = self.windows.rx2_end;
        self.windows = WindowEvents {
            rx2_end,
            ..Default::default()
        };
    }

    /// Send the outstanding packet again if transmissions remain, otherwise give up on it.
    fn retry_decision(&mut self, ctx: &mut MacContext) -> Result<(), MacError> {
        let now = ctx.timer.now();

        let Some(id) = self.retx.packet.as_ref().map(|x| x.id) else {
            return Ok(());
        };
        if !self.retx.in_flight {
            return Ok(());
        }

        self.cancel_windows(ctx.timer);

        match self.retx.retx_left {
            left if left > 0 => {
                debug!(device = self.device, packet = %id, left, "retransmitting");
                self.retx.in_flight = false;
                self.attempt_send(ctx)
            }
            0 => {
                if ctx.phy.state() != DeviceState::Rx {
                    self.finalize(now, false);
                }
                Ok(())
            }
            retx_left => Err(MacError::NegativeRetransmissions { id, retx_left }),
        }
    }

    fn finalize(&mut self, now: Time, success: bool) {
        if let Some(frame) = self.retx.packet.take() {
            let attempts = self.config.max_transmissions as i32 - self.retx.retx_left;

            if (self.retx.waiting_ack || self.retx.multiple_unconfirmed) && attempts > 0 {
                self.notifier.emit(
                    now,
                    MacNotification::RequiredTransmissions {
                        id: frame.id,
                        kind: frame.kind,
                        attempts: attempts as u8,
                        success,
                        first_attempt: self.retx.first_attempt,
                    },
                );
            }

            debug!(device = self.device, packet = %frame.id, attempts, success, "packet finished");
        }

        self.retx = RetransmissionParams::idle(self.config.max_transmissions);
    }

    /// The PHY decoded a frame.
    pub fn receive(&mut self, ctx: &mut MacContext, frame: &Frame) -> Result<(), MacError> {
        let now = ctx.timer.now();

        if frame.direction == Direction::Downlink && frame.device == self.device {
            for handle in [self.windows.open_second, self.windows.close_second]
                .into_iter()
                .flatten()
            {
                ctx.timer.cancel(handle);
            }
            self.windows.open_second = None;
            self.windows.close_second = None;

            self.apply_commands(&frame.commands);

            self.notifier.emit(
                now,
                MacNotification::Received {
                    id: frame.id,
                    ack: frame.ack,
                },
            );
            ctx.phy.switch_to_sleep(now);

            if self.retx.in_flight {
                if frame.ack || !self.retx.waiting_ack {
                    self.cancel_windows(ctx.timer);
                    self.finalize(now, true);
                } else {
                    // Confirmed packet answered without an acknowledgment.
                    self.retry_decision(ctx)?;
                }
            }

            return Ok(());
        }

        trace!(device = self.device, packet = %frame.id, "frame not for this device");
        ctx.phy.switch_to_sleep(now);

        if self.rx2_expired(&*ctx.timer) {
            self.retry_decision(ctx)?;
        }

        Ok(())
    }

    /// The PHY locked on to a frame but could not decode it.
    pub fn failed_reception(
        &mut self,
        ctx: &mut MacContext,
        interference: bool,
    ) -> Result<(), MacError> {
        let now = ctx.timer.now();

        if interference {
            ctx.phy.switch_to_sleep(now);
        }

        if self.rx2_expired(&*ctx.timer) {
            self.retry_decision(ctx)?;
        }

        Ok(())
    }

    fn apply_commands(&mut self, commands: &[MacCommand]) {
        for command in commands {
            match *command {
                MacCommand::RxParamSetupReq {
                    rx1_dr_offset,
                    rx2_data_rate,
                    frequency,
                } => {
                    let offset_ok = rx1_dr_offset <= region::MAX_RX1_DR_OFFSET;
                    let data_rate_ok = rx2_data_rate <= region::MAX_DATA_RATE;
                    let channel_ok = region::is_valid_frequency(frequency);

                    if offset_ok && data_rate_ok && channel_ok {
                        self.rx1_dr_offset = rx1_dr_offset;
                        self.rx2_data_rate = rx2_data_rate;
                        self.rx2_frequency = frequency;
                    }

                    self.pending_answers.push(MacCommand::RxParamSetupAns {
                        offset_ok,
                        data_rate_ok,
                        channel_ok,
                    });
                }
                MacCommand::LinkAdrReq {
                    data_rate,
                    tx_power_dbm,
                } => {
                    let data_rate_ok = data_rate <= region::MAX_DATA_RATE;
                    let power_ok = (0.0..=MAX_TX_POWER_DBM).contains(&tx_power_dbm);

                    if data_rate_ok && power_ok {
                        self.data_rate = data_rate;
                        self.tx_power_dbm = tx_power_dbm;
                    }

                    self.pending_answers.push(MacCommand::LinkAdrAns {
                        data_rate_ok,
                        power_ok,
                    });
                }
                MacCommand::RxParamSetupAns { .. } | MacCommand::LinkAdrAns { .. } => {
                    warn!(device = self.device, ?command, "uplink only command in downlink");
                }
            }
        }
    }
}
