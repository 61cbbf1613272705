use criterion::{Criterion, criterion_group, criterion_main};
use lorasimcore::{
    mac::MacConfig, scenario::generation::ScenarioGenerator, simulation::run_simulation,
};
use std::{hint::black_box, time::Duration};

pub fn criterion_benchmark(c: &mut Criterion) {
    let mac = MacConfig {
        max_transmissions: 3,
        ..Default::default()
    };
    let scenario = ScenarioGenerator::periodic(100, 30, mac).generate_from_seed(42);

    let mut group = c.benchmark_group("main");
    group.measurement_time(Duration::from_secs(15));

    group.bench_function("Full Simulation", |b| {
        b.iter(|| {
            black_box(run_simulation(123456, scenario.clone(), false)).ok();
        })
    });

    group.bench_function("Full Simulation with Logs", |b| {
        b.iter(|| {
            black_box(run_simulation(123456, scenario.clone(), true)).ok();
        })
    });

    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
