use lorasimcore::{
    mac::{ConfigError, MacConfig},
    phy::{EnergyModel, OffWindow},
    scenario::{
        DeviceSettings, MeasurementWindow, Scenario, ScenarioIdentity, Traffic,
        generation::{ScenarioGenerator, power::IntermittentPower, traffic::PeriodicTraffic},
    },
    sim_file::SimOutput,
    simulation::{
        LogContent, SimError, run_simulation,
        models::{Collision, Perfect, ReceptionModel, Scripted},
    },
    tracker::PhyOutcome,
    units::{SECONDS, Time},
    verification::verify_all,
};

/// One packet at time zero, one gateway.
fn one_packet(device: DeviceSettings, reception: ReceptionModel) -> Scenario {
    Scenario {
        identity: ScenarioIdentity::Custom,
        gateway_count: 1,
        devices: vec![device.with_traffic(Traffic {
            start: Time::ZERO,
            period: 1000.0 * SECONDS,
            stop: Time::ZERO,
            ..Default::default()
        })],
        reception,
        downlink: Default::default(),
        end_time: 300.0 * SECONDS,
        measurement: MeasurementWindow {
            start: Time::ZERO,
            stop: 300.0 * SECONDS,
        },
    }
}

fn run(scenario: Scenario) -> SimOutput {
    let output = run_simulation(5, scenario, true).unwrap();
    assert!(verify_all(&output));
    output
}

#[test]
fn unconfirmed_received() {
    let output = run(one_packet(DeviceSettings::default(), Perfect.into()));
    let records = &output.records;

    let mac = records.count_mac_globally(Time::ZERO, 2.0 * SECONDS);
    assert_eq!((mac.sent, mac.received), (1, 1));
    assert_eq!(
        records.count_mac_per_device(Time::ZERO, 2.0 * SECONDS, 0),
        mac
    );
    assert_eq!(
        records
            .count_phy_per_gateway(Time::ZERO, 2.0 * SECONDS, 0)
            .as_array(),
        [1, 1, 0, 0, 0, 0]
    );
}

#[test]
fn confirmed_acked_on_third_attempt() {
    let device = DeviceSettings::default()
        .confirmed()
        .with_mac(MacConfig {
            max_transmissions: 3,
            ..Default::default()
        });
    let reception = Scripted {
        outcomes: vec![PhyOutcome::Interfered, PhyOutcome::Interfered].into(),
    };

    let output = run(one_packet(device, reception.into()));

    let retx: Vec<_> = output.records.retransmissions.values().collect();
    assert_eq!(retx.len(), 1);
    assert_eq!((retx[0].attempts_used, retx[0].successful), (3, true));
    assert_eq!(output.transmissions.len(), 3);

    let report = output.report(0);
    assert_eq!(report.successful_attempts, [0, 0, 1, 0, 0, 0, 0, 0]);
    assert_eq!(report.failed_attempts, [0; 8]);
    assert_eq!(report.phy.interfered, 2);
}

#[test]
fn energy_denied_then_granted() {
    let mut device = DeviceSettings::default().with_mac(MacConfig {
        max_transmissions: 2,
        energy_retry_backoff: Some(5.0 * SECONDS),
        ..Default::default()
    });
    device.energy = EnergyModel::Scripted {
        admissions: vec![false, true].into(),
    };

    let output = run(one_packet(device, Perfect.into()));

    let compact: Vec<_> = output.records.energy.values().collect();
    assert_eq!(compact.len(), 1);
    assert!(compact[0].success);

    let expanded: Vec<_> = output.records.energy_expanded.values().collect();
    assert_eq!(expanded[0].attempt_count(), 2);
    assert_eq!(expanded[0].attempts, vec![false, true]);
    assert_eq!(expanded[0].denials(), 1);
}

#[test]
fn ack_in_first_window_skips_second() {
    let device = DeviceSettings::default()
        .confirmed()
        .with_mac(MacConfig {
            max_transmissions: 4,
            ..Default::default()
        });

    let output = run(one_packet(device, Perfect.into()));

    assert_eq!(output.transmissions.len(), 1);
    assert!(
        !output
            .logs
            .iter()
            .any(|x| matches!(x.content, LogContent::WindowMissed { .. }))
    );
    assert!(
        !output
            .logs
            .iter()
            .any(|x| matches!(&x.content, LogContent::Text(text) if text.starts_with("Second")))
    );

    let retx: Vec<_> = output.records.retransmissions.values().collect();
    assert_eq!((retx[0].attempts_used, retx[0].successful), (1, true));
}

#[test]
fn unreachable_gateway_under_sensitivity() {
    let mut scenario = one_packet(DeviceSettings::default(), Perfect.into());
    scenario.gateway_count = 2;
    scenario.devices[0].reachable_gateways = Some(vec![1]);

    let output = run(scenario);
    let records = &output.records;

    assert_eq!(
        records
            .count_phy_per_gateway(Time::ZERO, 2.0 * SECONDS, 0)
            .under_sensitivity,
        1
    );
    assert_eq!(
        records
            .count_phy_per_gateway(Time::ZERO, 2.0 * SECONDS, 1)
            .received,
        1
    );
}

#[test]
fn window_bounds_are_inclusive() {
    let mut scenario = one_packet(DeviceSettings::default(), Perfect.into());
    scenario.devices[0].traffic = Traffic {
        start: 10.0 * SECONDS,
        period: 1000.0 * SECONDS,
        stop: 10.0 * SECONDS,
        ..Default::default()
    };

    let output = run(scenario);
    let records = &output.records;

    assert_eq!(records.count_mac_globally(10.0 * SECONDS, 10.0 * SECONDS).sent, 1);
    assert_eq!(records.count_mac_globally(Time::ZERO, 9.0 * SECONDS).sent, 0);
}

/// One packet at 10 s from a device that loses power at `off_start`.
fn packet_at_ten_seconds(off_start: Time) -> Scenario {
    let mut scenario = one_packet(DeviceSettings::default(), Perfect.into());
    scenario.devices[0].traffic = Traffic {
        start: 10.0 * SECONDS,
        period: 1000.0 * SECONDS,
        stop: 10.0 * SECONDS,
        ..Default::default()
    };
    scenario.devices[0].off_windows = vec![OffWindow {
        start: off_start,
        end: 100.0 * SECONDS,
    }];
    scenario
}

#[test]
fn packet_inside_off_window_denied() {
    let output = run(packet_at_ten_seconds(Time::ZERO));
    let records = &output.records;

    assert!(output.transmissions.is_empty());
    assert_eq!(records.count_mac_globally(Time::ZERO, 300.0 * SECONDS).sent, 0);
    assert_eq!(
        records
            .count_phy_per_gateway(Time::ZERO, 300.0 * SECONDS, 0)
            .as_array(),
        [0; 6]
    );

    let compact: Vec<_> = records.energy.values().collect();
    assert_eq!(compact.len(), 1);
    assert!(!compact[0].success);

    let expanded: Vec<_> = records.energy_expanded.values().collect();
    assert_eq!(expanded[0].attempts, vec![false]);

    let report = output.report(0);
    assert_eq!(report.energy.generated, 1);
    assert_eq!(report.energy.denied, 1);
    assert_eq!(report.energy.denied_unconfirmed, 1);
}

#[test]
fn transmission_cut_by_off_window_is_interrupted() {
    // The uplink at 10 s lasts about 62 ms.
    let output = run(packet_at_ten_seconds(Time::from_milis(10_020.0)));
    let records = &output.records;

    assert_eq!(output.transmissions.len(), 1);
    assert!(output.transmissions[0].interrupted);

    let device = records.count_phy_per_device(Time::ZERO, 300.0 * SECONDS, 0);
    assert_eq!((device.sent, device.succeeded, device.interrupted), (1, 0, 1));
    assert_eq!(
        records
            .count_phy_per_gateway(Time::ZERO, 300.0 * SECONDS, 0)
            .total,
        0
    );
    assert!(records.phy_attempts().all(|x| x.outcomes.is_empty()));

    let report = output.report(0);
    assert_eq!(report.energy.interrupted, 1);
    assert_eq!(report.energy.denied, 0);
}

#[test]
fn intermittent_devices_never_transmit_while_off() {
    let generator = ScenarioGenerator::Intermittent {
        device_count: 30,
        gateway_count: 1,
        confirmed_percentage: 50,
        mac: MacConfig {
            max_transmissions: 2,
            energy_retry_backoff: Some(30.0 * SECONDS),
            ..Default::default()
        },
        traffic: PeriodicTraffic {
            app_period: 60.0 * SECONDS,
            warmup_periods: 0,
            periods: 20,
            ..Default::default()
        },
        power: IntermittentPower {
            mean_on_time: 120.0 * SECONDS,
            mean_off_time: 120.0 * SECONDS,
            energy_availability: 1.0,
        },
        reception: Collision::default().into(),
        downlink: Default::default(),
    };

    let scenario = generator.generate_from_seed(4);
    let devices = scenario.devices.clone();
    let output = run_simulation(17, scenario, true).unwrap();

    assert!(verify_all(&output));
    assert!(!output.transmissions.is_empty());
    for uplink in &output.transmissions {
        assert!(
            !devices[uplink.device]
                .off_windows
                .iter()
                .any(|x| x.contains(uplink.start_time)),
            "device {} transmitted at {} s without power",
            uplink.device,
            uplink.start_time.seconds()
        );
    }

    assert!(output.report(0).energy.denied_attempts > 0);
}

#[test]
fn overlapping_receive_windows_rejected_before_running() {
    let device = DeviceSettings::default().with_mac(MacConfig {
        data_rate: 0,
        rx2_delay: 1.1 * SECONDS,
        ..Default::default()
    });

    let result = run_simulation(5, one_packet(device, Perfect.into()), false);
    assert!(matches!(
        result,
        Err(SimError::Config {
            device: 0,
            source: ConfigError::OverlappingWindows { .. }
        })
    ));
}

fn busy_generator() -> ScenarioGenerator {
    ScenarioGenerator::Periodic {
        device_count: 40,
        gateway_count: 2,
        confirmed_percentage: 50,
        mac: MacConfig {
            max_transmissions: 4,
            ..Default::default()
        },
        traffic: PeriodicTraffic {
            app_period: 60.0 * SECONDS,
            warmup_periods: 2,
            periods: 10,
            extra_size_max: 20,
            ..Default::default()
        },
        reception: Collision { receive_paths: 4 }.into(),
        downlink: Default::default(),
    }
}

#[test]
fn same_seed_same_results() {
    let identity = ScenarioIdentity::Generated {
        generator: busy_generator(),
        seed: 21,
    };

    let first = run_simulation(3, identity.create().unwrap(), false).unwrap();
    let second = run_simulation(3, identity.create().unwrap(), false).unwrap();

    assert_eq!(first.records, second.records);
    assert_eq!(first.transmissions, second.transmissions);
    assert_eq!(first.report(1).to_line(), second.report(1).to_line());
}

#[test]
fn generated_scenario_verifies() {
    let scenario = busy_generator().generate_from_seed(8);
    let output = run_simulation(13, scenario, true).unwrap();

    assert!(verify_all(&output));
    assert!(output.records.mac.len() >= 300);

    let report = output.report(0);
    assert_eq!(
        report.total_attempts.iter().sum::<usize>(),
        report.successful_attempts.iter().sum::<usize>()
            + report.failed_attempts.iter().sum::<usize>()
    );
}
