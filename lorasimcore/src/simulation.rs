use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha12Rng;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    mac::{ClassAMac, ConfigError, MacContext, MacError, MacEvent, MacNotification},
    notification::Subscriber,
    packet::{Direction, Frame, PacketIdAllocator},
    phy::{DeviceState, EndDevicePhy, PhyNotification, SimulatedPhy},
    scenario::{DeviceSettings, Scenario},
    sim_file::{OutputIdentity, SimOutput},
    timer::{Scheduler, Timer, TimerHandle},
    tracker::{PacketTracker, PhyOutcome},
    units::Time,
};

pub use data_structs::{GatewayNotification, LogContent, LogItem, LogLevel, LogSource};
use data_structs::{Downlink, SimAction, Transmission};
use models::ReceptionModel;
use network::{ListenSlot, NetworkServer};

pub mod data_structs;
pub mod models;
mod network;

/// Longest uplink considered when looking back for overlapping transmissions.
const MAX_AIR_TIME: Time = Time::from_seconds(10.0);

#[derive(Debug, Error)]
pub enum SimError {
    #[error("device {device}: {source}")]
    Mac { device: usize, source: MacError },
    #[error("device {device}: {source}")]
    Config { device: usize, source: ConfigError },
    #[error(transparent)]
    Tracker(#[from] crate::tracker::TrackerError),
    #[error("device {device} can reach gateway {gateway} but there are only {gateway_count}")]
    UnknownGateway {
        device: usize,
        gateway: usize,
        gateway_count: usize,
    },
}

/// Runs `scenario` to its end time. A protocol or correlation error aborts the run.
pub fn run_simulation(
    random_seed: u64,
    scenario: Scenario,
    do_device_logs: bool,
) -> Result<SimOutput, SimError> {
    let scenario_identity = scenario.identity.clone();
    let measurement = scenario.measurement;

    let mut sim = init_simulation(random_seed, scenario, do_device_logs)?;

    while !sim.finished() {
        sim.step()?;
    }

    info!(
        packets = sim.tracker.records().mac.len(),
        transmissions = sim.transmissions.len(),
        "simulation finished"
    );

    let end = sim.sim_time();
    let (records, tracker_logs) = sim.tracker.into_parts();
    let mut logs = sim.logs;
    logs.push(LogItem {
        time: end,
        log_level: LogLevel::Info,
        source: LogSource::Simulation,
        content: LogContent::Text(format!(
            "Simulation finished with {} packets and {} transmissions",
            records.mac.len(),
            sim.transmissions.len()
        )),
    });
    logs.extend(tracker_logs);
    logs.sort_by(|a, b| a.time.total_cmp(&b.time));

    Ok(SimOutput {
        complete_identity: OutputIdentity {
            scenario_identity,
            simulation_seed: random_seed,
            sim_version: env!("CARGO_PKG_VERSION").to_string(),
        },
        measurement,
        logs,
        transmissions: sim.transmissions,
        records,
    })
}

pub fn init_simulation(
    random_seed: u64,
    scenario: Scenario,
    do_device_logs: bool,
) -> Result<Simulation, SimError> {
    let mut sim = Simulation::new(random_seed, scenario, do_device_logs)?;

    sim.enqueue_traffic();
    sim.enqueue_power_losses();

    Ok(sim)
}

/// Gives the MAC of one device a view of the global event queue.
struct DeviceTimer<'a> {
    scheduler: &'a mut Scheduler<SimAction>,
    device: usize,
}

impl Timer for DeviceTimer<'_> {
    type Event = MacEvent;

    fn now(&self) -> Time {
        self.scheduler.now()
    }

    fn schedule_after(&mut self, delay: Time, event: MacEvent) -> TimerHandle {
        self.scheduler.schedule_after(
            delay,
            SimAction::Mac {
                device: self.device,
                event,
            },
        )
    }

    fn cancel(&mut self, handle: TimerHandle) {
        self.scheduler.cancel(handle);
    }

    fn is_pending(&self, handle: TimerHandle) -> bool {
        self.scheduler.is_pending(handle)
    }
}

#[derive(Debug, Clone)]
struct Device {
    mac: ClassAMac,
    phy: SimulatedPhy,
    rng: ChaCha12Rng,
    settings: DeviceSettings,

    /// Index of the last uplink in [`Simulation::transmissions`].
    current: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct Simulation {
    scheduler: Scheduler<SimAction>,
    end_time: Time,

    devices: Vec<Device>,
    gateway_count: usize,
    reception: ReceptionModel,
    network: NetworkServer,

    tracker: PacketTracker,
    packet_ids: PacketIdAllocator,

    /// Every uplink, in order of start time.
    pub transmissions: Vec<Transmission>,
    downlinks: Vec<Downlink>,

    pub logs: Vec<LogItem>,

    // Output Detail
    do_device_logs: bool,

    rng: ChaCha12Rng,
}

/// Runs `$body` with `$mac` bound to the MAC of device `$device` and `$ctx` to its context.
/// `mac_context!(self, device, |mac, ctx| mac.tx_finished(&mut ctx));`
macro_rules! mac_context {
    ($sim: expr, $device: expr, |$mac: ident, $ctx: ident| $body: expr) => {{
        let device = &mut $sim.devices[$device];
        let mut timer = DeviceTimer {
            scheduler: &mut $sim.scheduler,
            device: $device,
        };
        let mut $ctx = MacContext {
            timer: &mut timer,
            phy: &mut device.phy,
            rng: &mut device.rng,
        };
        let $mac = &mut device.mac;
        $body
    }};
}

impl Simulation {
    pub fn new(
        random_seed: u64,
        scenario: Scenario,
        do_device_logs: bool,
    ) -> Result<Self, SimError> {
        let mut rng = ChaCha12Rng::seed_from_u64(random_seed);
        let gateway_count = scenario.gateway_count;

        let mut devices = Vec::with_capacity(scenario.devices.len());
        for (id, settings) in scenario.devices.into_iter().enumerate() {
            if let Some(&gateway) = settings
                .reachable_gateways
                .iter()
                .flatten()
                .find(|x| **x >= gateway_count)
            {
                return Err(SimError::UnknownGateway {
                    device: id,
                    gateway,
                    gateway_count,
                });
            }

            let mac = ClassAMac::new(id, settings.mac.clone())
                .map_err(|source| SimError::Config { device: id, source })?;
            let phy = SimulatedPhy::new(
                settings.energy.clone(),
                settings.off_windows.clone(),
                ChaCha12Rng::seed_from_u64(rng.random()),
            );

            devices.push(Device {
                mac,
                phy,
                rng: ChaCha12Rng::seed_from_u64(rng.random()),
                settings,
                current: None,
            });
        }

        let network = NetworkServer::new(
            scenario.downlink,
            gateway_count,
            devices
                .iter()
                .map(|x| x.settings.downlink_commands.clone())
                .collect(),
            ChaCha12Rng::seed_from_u64(rng.random()),
        );

        Ok(Simulation {
            scheduler: Scheduler::new(),
            end_time: scenario.end_time,
            devices,
            gateway_count,
            reception: scenario.reception,
            network,
            tracker: PacketTracker::new(gateway_count),
            packet_ids: PacketIdAllocator::default(),
            transmissions: Vec::new(),
            downlinks: Vec::new(),
            logs: Vec::new(),
            do_device_logs,
            rng,
        })
    }

    pub fn sim_time(&self) -> Time {
        self.scheduler.now()
    }

    pub fn tracker(&self) -> &PacketTracker {
        &self.tracker
    }

    /// Returns true if there are no more events to process before the end time.
    pub fn finished(&mut self) -> bool {
        self.scheduler
            .peek_time()
            .map(|x| x > self.end_time)
            .unwrap_or(true)
    }

    fn enqueue_traffic(&mut self) {
        for (device, x) in self.devices.iter().enumerate() {
            if x.settings.traffic.start <= x.settings.traffic.stop {
                self.scheduler
                    .schedule_at(x.settings.traffic.start, SimAction::GeneratePacket { device });
            }
        }
    }

    fn enqueue_power_losses(&mut self) {
        for (device, x) in self.devices.iter().enumerate() {
            for window in x.settings.off_windows.iter() {
                self.scheduler
                    .schedule_at(window.start, SimAction::PowerLoss { device });
            }
        }
    }

    pub fn step(&mut self) -> Result<(), SimError> {
        let Some((time, action)) = self.scheduler.pop_next() else {
            return Ok(());
        };

        if time > self.end_time {
            self.scheduler.clear();
            return Ok(());
        }

        match action {
            SimAction::GeneratePacket { device } => self.generate_packet(device),
            SimAction::Mac { device, event } => {
                mac_context!(self, device, |mac, ctx| mac.handle_timer(&mut ctx, event))
                    .map_err(|source| SimError::Mac { device, source })?;
                self.flush_device(device)
            }
            SimAction::TransmissionEnd { transmission } => self.end_transmission(transmission),
            SimAction::DownlinkStart { downlink } => {
                let Downlink {
                    frequency,
                    data_rate,
                    end_time,
                    ..
                } = self.downlinks[downlink];

                // Any device listening on the channel locks on, addressed to it or not.
                for device in 0..self.devices.len() {
                    if self.devices[device]
                        .phy
                        .start_reception(time, frequency, data_rate)
                    {
                        self.scheduler
                            .schedule_at(end_time, SimAction::DownlinkEnd { device, downlink });
                    }
                }

                Ok(())
            }
            SimAction::DownlinkEnd { device, downlink } => self.end_downlink(device, downlink),
            SimAction::PowerLoss { device } => {
                self.devices[device].phy.update(time);
                self.flush_device(device)
            }
        }
    }

    fn generate_packet(&mut self, device: usize) -> Result<(), SimError> {
        let now = self.scheduler.now();
        let id = self.packet_ids.allocate();

        let traffic = self.devices[device].settings.traffic;
        let kind = self.devices[device].settings.kind;

        let extra = match traffic.extra_size_max {
            0 => 0,
            max => self.devices[device].rng.random_range(0..=max),
        };
        let size = traffic.base_size + extra;

        self.tracker.on_app_packet_generated(id, size, kind, now);
        self.device_log(
            now,
            device,
            LogContent::PacketGenerated { device, id, size },
            LogLevel::Debug,
        );

        let next = now + traffic.period;
        if traffic.period > Time::ZERO && next <= traffic.stop {
            self.scheduler
                .schedule_at(next, SimAction::GeneratePacket { device });
        }

        let frame = Frame::uplink(id, device, kind, size);
        mac_context!(self, device, |mac, ctx| mac.send(&mut ctx, frame))
            .map_err(|source| SimError::Mac { device, source })?;

        self.flush_device(device)
    }

    fn end_transmission(&mut self, transmission: usize) -> Result<(), SimError> {
        let now = self.scheduler.now();
        let uplink = self.transmissions[transmission].clone();
        let device = uplink.device;

        mac_context!(self, device, |mac, ctx| mac.tx_finished(&mut ctx));
        self.flush_device(device)?;

        if uplink.interrupted {
            debug!(device, packet = %uplink.packet, "interrupted uplink not received");
            return Ok(());
        }

        self.network.forget_before(now - MAX_AIR_TIME);

        let outcomes: Vec<PhyOutcome> = {
            let first = self
                .transmissions
                .partition_point(|x| x.start_time < uplink.start_time - MAX_AIR_TIME);

            let overlapping: Vec<&Transmission> = self.transmissions[first..]
                .iter()
                .filter(|x| x.id != uplink.id && x.overlaps(&uplink))
                .collect();

            (0..self.gateway_count)
                .map(|gateway| {
                    let settings = &self.devices[device].settings;

                    if !settings.can_reach(gateway) {
                        PhyOutcome::UnderSensitivity
                    } else if self.network.is_transmitting(
                        gateway,
                        uplink.start_time,
                        uplink.end_time,
                    ) {
                        PhyOutcome::LostBecauseTx
                    } else {
                        let heard: Vec<&Transmission> = overlapping
                            .iter()
                            .copied()
                            .filter(|x| self.devices[x.device].settings.can_reach(gateway))
                            .collect();

                        self.reception.outcome(&uplink, &heard, &mut self.rng)
                    }
                })
                .collect()
        };

        let mut receivers = Vec::new();
        for (gateway, outcome) in outcomes.into_iter().enumerate() {
            self.gateway_event(
                now,
                gateway,
                GatewayNotification::PhyOutcome {
                    id: uplink.packet,
                    outcome,
                },
            )?;

            if outcome == PhyOutcome::Received {
                self.gateway_event(
                    now,
                    gateway,
                    GatewayNotification::MacReceived { id: uplink.packet },
                )?;
                receivers.push(gateway);
            }
        }

        let slots = {
            let mac = &self.devices[device].mac;
            [
                ListenSlot {
                    start: now + mac.config().rx1_delay,
                    frequency: uplink.frequency,
                    data_rate: mac.rx1_data_rate(),
                },
                ListenSlot {
                    start: now + mac.config().rx2_delay,
                    frequency: mac.rx2_frequency(),
                    data_rate: mac.rx2_data_rate(),
                },
            ]
        };

        if let Some(downlink) = self.network.reply(&uplink, &receivers, slots) {
            self.logs.push(LogItem {
                time: now,
                log_level: LogLevel::Info,
                source: LogSource::Gateway(downlink.gateway),
                content: LogContent::DownlinkSent {
                    gateway: downlink.gateway,
                    device,
                    id: downlink.frame.id,
                    window: downlink.window,
                    ack: downlink.frame.ack,
                },
            });

            let index = self.downlinks.len();
            self.scheduler.schedule_at(
                downlink.start_time,
                SimAction::DownlinkStart { downlink: index },
            );
            self.downlinks.push(downlink);
        }

        Ok(())
    }

    fn end_downlink(&mut self, device: usize, downlink: usize) -> Result<(), SimError> {
        let now = self.scheduler.now();

        // Lost power or was otherwise pulled off the reception.
        if self.devices[device].phy.state() != DeviceState::Rx {
            return self.flush_device(device);
        }
        self.devices[device].phy.end_reception(now);

        let intact = self.downlinks[downlink].intact;
        let frame = self.downlinks[downlink].frame.clone();

        let result = if intact {
            mac_context!(self, device, |mac, ctx| mac.receive(&mut ctx, &frame))
        } else {
            mac_context!(self, device, |mac, ctx| mac.failed_reception(&mut ctx, true))
        };
        result.map_err(|source| SimError::Mac { device, source })?;

        self.flush_device(device)
    }

    /// Hands everything the device emitted to the tracker and the log.
    fn flush_device(&mut self, device: usize) -> Result<(), SimError> {
        let mac_events: Vec<_> = self.devices[device].mac.notifier.drain().collect();
        for (time, event) in mac_events {
            self.tracker.notify(time, device, &event)?;
            self.log_mac(time, device, &event);
        }

        let phy_events: Vec<_> = self.devices[device].phy.notifier.drain().collect();
        for (time, event) in phy_events {
            self.tracker.notify(time, device, &event)?;

            match event {
                PhyNotification::TransmissionStarted { frame, params }
                    if frame.direction == Direction::Uplink =>
                {
                    let id = self.transmissions.len();
                    let end_time = time + params.duration;

                    self.transmissions.push(Transmission {
                        id: id as u32,
                        device,
                        packet: frame.id,
                        kind: frame.kind,
                        start_time: time,
                        end_time,
                        frequency: params.frequency,
                        data_rate: params.data_rate,
                        interrupted: false,
                    });
                    self.devices[device].current = Some(id);

                    self.scheduler
                        .schedule_at(end_time, SimAction::TransmissionEnd { transmission: id });
                }
                PhyNotification::TransmissionInterrupted { id, .. } => {
                    if let Some(current) = self.devices[device].current {
                        if self.transmissions[current].packet == id {
                            self.transmissions[current].interrupted = true;
                        }
                    }
                }
                PhyNotification::StateChanged { from, to } => {
                    if self.do_device_logs {
                        self.device_log(
                            time,
                            device,
                            LogContent::Text(format!("Radio {from:?} -> {to:?}")),
                            LogLevel::Trace,
                        );
                    }
                }
                PhyNotification::TransmissionStarted { .. } => (),
            }
        }

        Ok(())
    }

    fn gateway_event(
        &mut self,
        time: Time,
        gateway: usize,
        event: GatewayNotification,
    ) -> Result<(), SimError> {
        self.tracker.notify(time, gateway, &event)?;

        if let GatewayNotification::PhyOutcome { id, outcome } = event {
            self.logs.push(LogItem {
                time,
                log_level: LogLevel::Debug,
                source: LogSource::Gateway(gateway),
                content: LogContent::GatewayOutcome {
                    gateway,
                    id,
                    outcome,
                },
            });
        }

        Ok(())
    }

    fn log_mac(&mut self, time: Time, device: usize, event: &MacNotification) {
        if !self.do_device_logs {
            return;
        }

        let (content, level) = match *event {
            MacNotification::Transmitted {
                id,
                attempt,
                data_rate,
                frequency,
                ..
            } => (
                LogContent::UplinkSent {
                    device,
                    id,
                    attempt,
                    data_rate,
                    frequency,
                },
                LogLevel::Info,
            ),
            MacNotification::Received { id, ack } => (
                LogContent::DownlinkReceived { device, id, ack },
                LogLevel::Info,
            ),
            MacNotification::RequiredTransmissions {
                id,
                attempts,
                success,
                ..
            } => (
                LogContent::RetransmissionFinished {
                    device,
                    id,
                    attempts,
                    success,
                },
                LogLevel::Info,
            ),
            MacNotification::EnergyAdmission { id, admitted, .. } => (
                LogContent::EnergyAdmission {
                    device,
                    id,
                    admitted,
                },
                LogLevel::Debug,
            ),
            MacNotification::SendingPostponed { id, delay } => (
                LogContent::SendingPostponed { device, id, delay },
                LogLevel::Debug,
            ),
            MacNotification::MissedWindowBecauseOff(window) => (
                LogContent::WindowMissed {
                    device,
                    window: Some(window),
                },
                LogLevel::Debug,
            ),
            MacNotification::MissedWindowsBecauseOff { .. } => (
                LogContent::WindowMissed {
                    device,
                    window: None,
                },
                LogLevel::Debug,
            ),
            MacNotification::WindowOpened(window) => (
                LogContent::Text(format!("{window:?} window opened")),
                LogLevel::Trace,
            ),
            MacNotification::WindowClosed(window) => (
                LogContent::Text(format!("{window:?} window closed")),
                LogLevel::Trace,
            ),
            MacNotification::TxFinished { id } => (
                LogContent::Text(format!("Transmission of {id} finished")),
                LogLevel::Trace,
            ),
        };

        self.device_log(time, device, content, level);
    }

    /// Logs an event associated with a device, if device logs are enabled.
    fn device_log(&mut self, time: Time, device: usize, content: LogContent, level: LogLevel) {
        if self.do_device_logs {
            self.logs.push(LogItem {
                time,
                log_level: level,
                source: LogSource::Device(device),
                content,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        mac::MacConfig,
        scenario::{MeasurementWindow, ScenarioIdentity, Traffic},
        simulation::models::{DownlinkModel, Perfect},
        units::SECONDS,
    };

    fn single_device(kind_confirmed: bool) -> Scenario {
        let mut device = DeviceSettings::default().with_traffic(Traffic {
            start: Time::ZERO,
            period: 100.0 * SECONDS,
            stop: 250.0 * SECONDS,
            base_size: 10,
            extra_size_max: 0,
        });
        if kind_confirmed {
            device = device.confirmed();
        }

        Scenario {
            identity: ScenarioIdentity::Custom,
            gateway_count: 1,
            devices: vec![device],
            reception: Perfect.into(),
            downlink: DownlinkModel::default(),
            end_time: 400.0 * SECONDS,
            measurement: MeasurementWindow {
                start: Time::ZERO,
                stop: 400.0 * SECONDS,
            },
        }
    }

    #[test]
    fn periodic_generation() {
        let output = run_simulation(1, single_device(false), false).unwrap();

        // 0, 100 and 200 seconds
        assert_eq!(output.records.app.len(), 3);
        assert_eq!(output.transmissions.len(), 3);
        assert!(output.logs.iter().all(|x| x.source != LogSource::Device(0)));
    }

    #[test]
    fn device_logs_toggle() {
        let output = run_simulation(1, single_device(true), true).unwrap();

        assert!(
            output
                .logs
                .iter()
                .any(|x| matches!(x.content, LogContent::DownlinkReceived { ack: true, .. }))
        );
        assert!(output.logs.windows(2).all(|x| x[0].time <= x[1].time));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut scenario = single_device(false);
        scenario.devices[0].mac = MacConfig {
            max_transmissions: 9,
            ..Default::default()
        };

        assert!(matches!(
            run_simulation(1, scenario, false),
            Err(SimError::Config { device: 0, .. })
        ));
    }

    #[test]
    fn unknown_gateway_is_rejected() {
        let mut scenario = single_device(false);
        scenario.devices[0].reachable_gateways = Some(vec![1]);

        assert!(matches!(
            run_simulation(1, scenario, false),
            Err(SimError::UnknownGateway { gateway: 1, .. })
        ));
    }

    #[test]
    fn nothing_after_end_time() {
        let mut scenario = single_device(false);
        scenario.end_time = 150.0 * SECONDS;

        let mut sim = init_simulation(3, scenario, false).unwrap();
        while !sim.finished() {
            sim.step().unwrap();
        }

        assert!(sim.sim_time() <= 150.0 * SECONDS);
        assert_eq!(sim.tracker().records().app.len(), 2);
    }
}
