// Finite-difference gradient checks.
//
// For every processor kind with both a forward and a backward procedure,
// the analytic derivative produced by the backward pass must match a
// central-difference perturbation of the forward pass. The probe loss is
// a fixed linear readout L = sum(c_i * value_i), so dL/dvalue_i = c_i
// seeds the backward pass directly.

use skein::{GroupParams, GroupSpec, Network, NetworkParams, ProcKind};

const H: f32 = 1e-2;
const C: [f32; 3] = [0.7, -0.3, 0.5];

fn close(analytic: f32, fd: f32, label: &str) {
    let tol = 1e-3 + 1e-2 * analytic.abs();
    assert!(
        (analytic - fd).abs() < tol,
        "{label}: analytic {analytic} vs finite-difference {fd}"
    );
}

// --- output-chain activations ----------------------------------------------

/// One free-standing group whose inputs are poked directly.
fn activation_probe(kind: ProcKind, gain: f32) -> Network {
    let mut net = Network::new(NetworkParams::default());
    net.add_group(
        GroupSpec::new("probe", 3)
            .with_output(&[kind])
            .with_params(GroupParams {
                gain: Some(gain),
                ..GroupParams::default()
            }),
    )
    .unwrap();
    net.finalize().unwrap();
    net
}

fn loss_of_outputs(net: &Network) -> f32 {
    net.groups[0]
        .units
        .iter()
        .zip(C)
        .map(|(u, c)| c * u.output)
        .sum()
}

fn set_inputs(net: &mut Network, inputs: &[f32; 3]) {
    for (u, &x) in net.groups[0].units.iter_mut().zip(inputs) {
        u.input = x;
    }
}

fn check_activation_gradient(kind: ProcKind, gain: f32, inputs: [f32; 3]) {
    let mut net = activation_probe(kind, gain);

    set_inputs(&mut net, &inputs);
    net.compute_output(0);
    for (u, c) in net.groups[0].units.iter_mut().zip(C) {
        u.output_deriv = c;
    }
    net.compute_output_back(0);
    let analytic: Vec<f32> = net.groups[0].units.iter().map(|u| u.input_deriv).collect();

    for j in 0..3 {
        let mut probe = |x: f32| {
            let mut shifted = inputs;
            shifted[j] = x;
            set_inputs(&mut net, &shifted);
            net.compute_output(0);
            loss_of_outputs(&net)
        };
        let fd = (probe(inputs[j] + H) - probe(inputs[j] - H)) / (2.0 * H);
        close(analytic[j], fd, &format!("{:?} input {j}", kind));
    }
}

#[test]
fn logistic_gradient() {
    check_activation_gradient(ProcKind::Logistic, 1.0, [0.4, -1.2, 2.0]);
    check_activation_gradient(ProcKind::Logistic, 2.5, [0.4, -1.2, 0.3]);
}

#[test]
fn tanh_gradient() {
    check_activation_gradient(ProcKind::Tanh, 1.0, [0.4, -0.9, 1.5]);
}

#[test]
fn gaussian_gradient() {
    check_activation_gradient(ProcKind::Gaussian, 1.0, [0.4, -0.8, 1.1]);
}

#[test]
fn exponential_gradient() {
    check_activation_gradient(ProcKind::Exponential, 0.7, [0.4, -1.0, 0.9]);
}

#[test]
fn linear_gradient() {
    check_activation_gradient(ProcKind::Linear, 1.3, [0.4, -1.0, 0.9]);
}

#[test]
fn softmax_gradient() {
    check_activation_gradient(ProcKind::Softmax, 1.0, [0.5, -0.5, 1.5]);
}

#[test]
fn adaptive_gain_gradients() {
    let mut net = activation_probe(ProcKind::AdaptiveLogistic, 1.0);
    let inputs = [0.6, -0.4, 1.2];
    let gains = [0.8, 1.0, 1.7];
    for (u, &g) in net.groups[0].units.iter_mut().zip(&gains) {
        u.gain = g;
    }

    set_inputs(&mut net, &inputs);
    net.compute_output(0);
    for (u, c) in net.groups[0].units.iter_mut().zip(C) {
        u.output_deriv = c;
        u.gain_deriv = 0.0;
    }
    net.compute_output_back(0);
    let input_derivs: Vec<f32> = net.groups[0].units.iter().map(|u| u.input_deriv).collect();
    let gain_derivs: Vec<f32> = net.groups[0].units.iter().map(|u| u.gain_deriv).collect();

    for j in 0..3 {
        // dL/dinput with the per-unit gain in place
        let mut probe_input = |x: f32| {
            let mut shifted = inputs;
            shifted[j] = x;
            set_inputs(&mut net, &shifted);
            net.compute_output(0);
            loss_of_outputs(&net)
        };
        let fd = (probe_input(inputs[j] + H) - probe_input(inputs[j] - H)) / (2.0 * H);
        close(input_derivs[j], fd, &format!("adaptive input {j}"));

        // dL/dgain for the same unit
        let mut probe_gain = |g: f32| {
            net.groups[0].units[j].gain = g;
            set_inputs(&mut net, &inputs);
            net.compute_output(0);
            loss_of_outputs(&net)
        };
        let fd = (probe_gain(gains[j] + H) - probe_gain(gains[j] - H)) / (2.0 * H);
        net.groups[0].units[j].gain = gains[j];
        close(gain_derivs[j], fd, &format!("adaptive gain {j}"));
    }
}

// --- input-chain aggregation ------------------------------------------------

/// A source group whose cached outputs are poked directly, feeding the
/// probe group's input chain.
fn aggregator_probe(kinds: &[ProcKind]) -> Network {
    let mut net = Network::new(NetworkParams::default());
    net.add_group(GroupSpec::new("src", 3)).unwrap();
    net.add_group(GroupSpec::new("probe", 3).with_input(kinds))
        .unwrap();
    net.connect(0, 1).unwrap();
    net.finalize().unwrap();
    net
}

fn set_source(net: &mut Network, outputs: &[f32; 3]) {
    net.caches[0].output.copy_from_slice(outputs);
}

fn loss_of_inputs(net: &Network) -> f32 {
    net.groups[1]
        .units
        .iter()
        .zip(C)
        .map(|(u, c)| c * u.input)
        .sum()
}

fn check_aggregator_gradient(kinds: &[ProcKind], weights: [[f32; 3]; 3], source: [f32; 3]) {
    let mut net = aggregator_probe(kinds);
    for (d, row) in weights.iter().enumerate() {
        for (s, &w) in row.iter().enumerate() {
            net.set_weight(1, d, 0, s, w).unwrap();
        }
    }

    let reset_state = |net: &mut Network| {
        for node in &mut net.groups[1].input_chain.nodes {
            node.unit_data.fill(0.0);
        }
    };

    // Analytic pass.
    set_source(&mut net, &source);
    reset_state(&mut net);
    net.compute_input(1);
    for (u, c) in net.groups[1].units.iter_mut().zip(C) {
        u.input_deriv = c;
    }
    net.caches[0].output_deriv.fill(0.0);
    net.reset_derivs();
    net.reset_back_integrators(1);
    net.compute_input_back(1);
    let src_derivs = net.caches[0].output_deriv.clone();
    let link_derivs: Vec<Vec<f32>> = (0..3)
        .map(|d| (0..3).map(|s| net.link_deriv(1, d, 0, s)).collect())
        .collect();

    // dL/dsource_j
    for j in 0..3 {
        let mut probe = |x: f32| {
            let mut shifted = source;
            shifted[j] = x;
            set_source(&mut net, &shifted);
            reset_state(&mut net);
            net.compute_input(1);
            loss_of_inputs(&net)
        };
        let fd = (probe(source[j] + H) - probe(source[j] - H)) / (2.0 * H);
        close(src_derivs[j], fd, &format!("{:?} source {j}", kinds));
    }

    // dL/dweight for every link
    for d in 0..3 {
        for s in 0..3 {
            let w = weights[d][s];
            let mut probe = |x: f32| {
                net.set_weight(1, d, 0, s, x).unwrap();
                set_source(&mut net, &source);
                reset_state(&mut net);
                net.compute_input(1);
                loss_of_inputs(&net)
            };
            let fd = (probe(w + H) - probe(w - H)) / (2.0 * H);
            net.set_weight(1, d, 0, s, w).unwrap();
            close(link_derivs[d][s], fd, &format!("{:?} weight {d}<-{s}", kinds));
        }
    }
}

const WEIGHTS: [[f32; 3]; 3] = [
    [0.5, -0.3, 0.8],
    [-0.6, 0.4, 0.2],
    [0.9, 0.7, -0.5],
];

#[test]
fn dot_product_gradient() {
    check_aggregator_gradient(&[ProcKind::DotProduct], WEIGHTS, [0.3, -0.7, 0.9]);
}

#[test]
fn distance_gradient() {
    check_aggregator_gradient(&[ProcKind::Distance], WEIGHTS, [0.3, -0.7, 0.9]);
}

#[test]
fn product_gradient() {
    // Factors kept away from zero; the backward pass divides them out.
    check_aggregator_gradient(&[ProcKind::Product], WEIGHTS, [0.8, -0.9, 1.1]);
}

#[test]
fn leaky_integrator_gradient() {
    let mut params = GroupParams::default();
    params.integration_rate = Some(0.35);
    let mut net = Network::new(NetworkParams::default());
    net.add_group(GroupSpec::new("src", 3)).unwrap();
    net.add_group(
        GroupSpec::new("probe", 3)
            .with_input(&[ProcKind::DotProduct, ProcKind::IntegrateInput])
            .with_params(params),
    )
    .unwrap();
    net.connect(0, 1).unwrap();
    net.finalize().unwrap();
    for (d, row) in WEIGHTS.iter().enumerate() {
        for (s, &w) in row.iter().enumerate() {
            net.set_weight(1, d, 0, s, w).unwrap();
        }
    }
    check_integrator(&mut net, [0.3, -0.7, 0.9]);
}

fn check_integrator(net: &mut Network, source: [f32; 3]) {
    let reset_state = |net: &mut Network| {
        for node in &mut net.groups[1].input_chain.nodes {
            node.unit_data.fill(0.0);
        }
    };

    set_source(net, &source);
    reset_state(net);
    net.compute_input(1);
    for (u, c) in net.groups[1].units.iter_mut().zip(C) {
        u.input_deriv = c;
    }
    net.caches[0].output_deriv.fill(0.0);
    net.reset_back_integrators(1);
    net.compute_input_back(1);
    let src_derivs = net.caches[0].output_deriv.clone();

    for j in 0..3 {
        let mut probe = |x: f32| {
            let mut shifted = source;
            shifted[j] = x;
            set_source(net, &shifted);
            reset_state(net);
            net.compute_input(1);
            loss_of_inputs(net)
        };
        let fd = (probe(source[j] + H) - probe(source[j] - H)) / (2.0 * H);
        close(src_derivs[j], fd, &format!("integrator source {j}"));
    }
}

#[test]
fn normalization_gradient() {
    check_aggregator_gradient(
        &[ProcKind::DotProduct, ProcKind::NormalizeInput],
        WEIGHTS,
        [0.8, -0.4, 1.1],
    );
}

// --- cost-chain error measures ----------------------------------------------

fn check_cost_gradient(kind: ProcKind, outputs: [f32; 3], targets: [f32; 3]) {
    let mut net = Network::new(NetworkParams::default());
    net.add_group(GroupSpec::new("probe", 3).with_cost(&[kind]))
        .unwrap();
    net.finalize().unwrap();
    net.set_targets(0, &[Some(targets[0]), Some(targets[1]), Some(targets[2])]);

    let set_outputs = |net: &mut Network, outs: &[f32; 3]| {
        for (u, &o) in net.groups[0].units.iter_mut().zip(outs) {
            u.output = o;
        }
    };

    set_outputs(&mut net, &outputs);
    net.compute_cost(0);
    net.compute_cost_back(0);
    let analytic: Vec<f32> = net.groups[0].units.iter().map(|u| u.output_deriv).collect();

    for j in 0..3 {
        let mut probe = |x: f32| {
            let mut shifted = outputs;
            shifted[j] = x;
            set_outputs(&mut net, &shifted);
            let before = net.error;
            net.compute_cost(0);
            net.error - before
        };
        let fd = (probe(outputs[j] + H) - probe(outputs[j] - H)) / (2.0 * H);
        close(analytic[j], fd, &format!("{:?} output {j}", kind));
    }
}

#[test]
fn squared_error_gradient() {
    check_cost_gradient(ProcKind::SquaredError, [0.3, 0.6, 0.9], [0.8, 0.2, 0.5]);
}

#[test]
fn cross_entropy_gradient() {
    check_cost_gradient(
        ProcKind::CrossEntropyError,
        [0.3, 0.6, 0.9],
        [0.8, 0.2, 0.5],
    );
}

#[test]
fn divergence_gradient() {
    check_cost_gradient(ProcKind::DivergenceError, [0.3, 0.6, 0.9], [0.8, 0.2, 0.5]);
}

#[test]
fn cosine_error_gradient() {
    check_cost_gradient(ProcKind::CosineError, [0.3, 0.6, 0.9], [0.8, 0.2, 0.5]);
}

// --- structural backward contracts ------------------------------------------

#[test]
fn softmax_outputs_sum_to_one_under_extreme_inputs() {
    let mut net = activation_probe(ProcKind::Softmax, 1.0);
    for inputs in [
        [0.0f32, 0.0, 0.0],
        [1000.0, -1000.0, 500.0],
        [88.0, 89.0, 90.0],
        [-300.0, -299.0, -298.0],
    ] {
        set_inputs(&mut net, &inputs);
        net.compute_output(0);
        let sum: f32 = net.groups[0].units.iter().map(|u| u.output).sum();
        assert!(
            (sum - 1.0).abs() < 1e-5,
            "softmax sum {sum} for inputs {inputs:?}"
        );
        assert!(net.groups[0].units.iter().all(|u| u.output.is_finite()));
    }
}

#[test]
fn elman_backward_routes_credit_and_restores_output() {
    let mut net = Network::new(NetworkParams::default());
    net.add_group(GroupSpec::new("context", 2)).unwrap();
    net.add_group(
        GroupSpec::new("probe", 2)
            .with_output(&[ProcKind::Linear, ProcKind::ElmanClamp { source: 0 }]),
    )
    .unwrap();
    net.finalize().unwrap();

    net.caches[0].output.copy_from_slice(&[0.25, -0.5]);
    net.groups[1].units[0].input = 1.0;
    net.groups[1].units[1].input = 2.0;
    net.compute_output(1);
    assert_eq!(net.outputs(1), vec![1.25, 1.5]);

    for (u, c) in net.groups[1].units.iter_mut().zip(C) {
        u.output_deriv = c;
    }
    net.compute_output_back(1);
    // Credit for the context contribution lands in the source cache.
    assert_eq!(net.caches[0].output_deriv, vec![C[0], C[1]]);
    // The context share is subtracted back out of the live output.
    assert_eq!(net.outputs(1), vec![1.0, 2.0]);
}

#[test]
fn weak_clamp_backward_restores_and_rescales() {
    let mut net = Network::new(NetworkParams::default());
    net.add_group(
        GroupSpec::new("probe", 2)
            .with_output(&[ProcKind::Linear, ProcKind::WeakClamp])
            .with_params(GroupParams {
                clamp_strength: Some(0.25),
                ..GroupParams::default()
            }),
    )
    .unwrap();
    net.finalize().unwrap();

    net.set_external_inputs(0, &[Some(1.0), None]);
    net.groups[0].units[0].input = 0.2;
    net.groups[0].units[1].input = 0.4;
    net.compute_output(0);
    // 0.2 + 0.25 * (1.0 - 0.2)
    assert!((net.outputs(0)[0] - 0.4).abs() < 1e-6);
    assert!((net.outputs(0)[1] - 0.4).abs() < 1e-6);

    net.groups[0].units[0].output_deriv = 1.0;
    net.groups[0].units[1].output_deriv = 1.0;
    net.compute_output_back(0);
    // Blended unit: derivative rescaled by (1 - strength) and the
    // pre-blend output restored before the linear backward ran.
    assert!((net.groups[0].units[0].input_deriv - 0.75).abs() < 1e-6);
    assert!((net.groups[0].units[1].input_deriv - 1.0).abs() < 1e-6);
}

#[test]
fn winner_take_all_restores_cached_outputs() {
    let mut net = Network::new(NetworkParams::default());
    net.add_group(
        GroupSpec::new("probe", 3).with_output(&[ProcKind::Logistic, ProcKind::WinnerTakeAll]),
    )
    .unwrap();
    net.finalize().unwrap();

    set_inputs(&mut net, &[0.5, 2.0, -1.0]);
    net.compute_output(0);
    let outs = net.outputs(0);
    assert_eq!(outs[0], 0.0);
    assert!(outs[1] > 0.0);
    assert_eq!(outs[2], 0.0);

    for u in net.groups[0].units.iter_mut() {
        u.output_deriv = 1.0;
    }
    net.compute_output_back(0);
    // All pre-selection activations are back in place.
    let restored = net.outputs(0);
    assert!(restored.iter().all(|&o| o > 0.0));
}
