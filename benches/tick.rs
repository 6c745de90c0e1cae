use criterion::{criterion_group, criterion_main, Criterion};

use skein::drivers::EventWindow;
use skein::{GroupSpec, Network, NetworkParams, ProcKind, TickDriver};

fn layered_net(width: usize) -> Network {
    let mut net = Network::new(NetworkParams {
        history_length: 8,
        max_ticks: 1000,
        seed: 99,
        ..NetworkParams::default()
    });
    net.add_group(GroupSpec::new("in", width).with_output(&[ProcKind::HardClamp]))
        .unwrap();
    net.add_group(
        GroupSpec::new("hidden", width)
            .with_input(&[ProcKind::DotProduct])
            .with_output(&[ProcKind::Logistic]),
    )
    .unwrap();
    net.add_group(
        GroupSpec::new("out", width)
            .with_input(&[ProcKind::DotProduct])
            .with_output(&[ProcKind::Logistic])
            .with_cost(&[ProcKind::SquaredError]),
    )
    .unwrap();
    net.connect(0, 1).unwrap();
    net.connect(1, 2).unwrap();
    net.finalize().unwrap();
    net.randomize_weights(0.5);

    let clamp: Vec<Option<f32>> = (0..width).map(|i| Some((i % 2) as f32)).collect();
    let targets: Vec<Option<f32>> = (0..width).map(|i| Some(((i + 1) % 2) as f32)).collect();
    net.set_external_inputs(0, &clamp);
    net.set_targets(2, &targets);
    net
}

fn bench_standard_tick(c: &mut Criterion) {
    let window = EventWindow {
        grace_ticks: 0,
        min_ticks: 0,
        max_ticks: usize::MAX,
    };
    for width in [16, 64] {
        let mut net = layered_net(width);
        let mut driver = TickDriver::Standard;
        c.bench_function(&format!("standard_tick_{width}"), |b| {
            b.iter(|| {
                net.active_tick = net.current_tick;
                driver.tick(&mut net, &window, 0);
                net.current_tick = (net.current_tick + 1) % 500;
            })
        });
    }
}

criterion_group!(benches, bench_standard_tick);
criterion_main!(benches);
