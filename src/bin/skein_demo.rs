//! Small training demo.
//!
//! Builds a network from a JSON description, trains it on one pattern
//! association with the standard driver, and applies plain gradient
//! descent to the accumulated link derivatives.
//!
//!   skein-demo [epochs]
//!
//! Logging via env_logger: RUST_LOG=debug skein-demo

use std::env;
use std::process;

use skein::{Event, Example, ExampleController, Network, TickDriver};

const DESCRIPTION: &str = r#"{
    "params": { "max_ticks": 10, "criterion": 0.1, "seed": 7 },
    "groups": [
        { "name": "in",  "num_units": 2, "output": ["HardClamp"] },
        { "name": "out", "num_units": 1,
          "input":  ["DotProduct"],
          "output": ["Logistic"],
          "cost":   ["SquaredError"],
          "criterion": "Standard" }
    ],
    "connections": [["in", "out"]]
}"#;

fn build_network() -> Result<Network, Box<dyn std::error::Error>> {
    let description: skein::network::NetworkDescription = serde_json::from_str(DESCRIPTION)?;
    let mut net = description.build()?;
    net.randomize_weights(0.5);
    Ok(net)
}

fn apply_gradient_descent(net: &mut Network, lr: f32) {
    for group in &mut net.groups {
        for unit in &mut group.units {
            for block in &mut unit.blocks {
                for link in &mut block.links {
                    let delta = -lr * link.deriv;
                    link.weight += delta;
                    link.last_delta = delta;
                }
            }
        }
    }
    net.reset_derivs();
}

fn main() {
    env_logger::init();

    let epochs: usize = env::args()
        .nth(1)
        .map(|s| s.parse().unwrap_or(200))
        .unwrap_or(200);

    let mut net = match build_network() {
        Ok(net) => net,
        Err(e) => {
            eprintln!("bad network description: {e}");
            process::exit(1);
        }
    };
    let out = net.group_index("out").expect("described above");
    let input = net.group_index("in").expect("described above");

    let controller = ExampleController::new();
    let mut driver = TickDriver::Standard;
    let patterns: [(f32, f32, f32); 2] = [(1.0, 0.0, 0.9), (0.0, 1.0, 0.1)];
    let examples: Vec<Example> = patterns
        .iter()
        .map(|&(a, b, t)| {
            Example::new(vec![Event::new(1)
                .clamp(input, &[Some(a), Some(b)])
                .target(out, &[Some(t)])])
        })
        .collect();

    for epoch in 0..epochs {
        net.reset_error();
        let mut reached = true;
        for example in &examples {
            let outcome = controller.run_example(&mut net, &mut driver, example);
            reached &= outcome.criterion_met;
        }
        apply_gradient_descent(&mut net, 0.5);

        if epoch % 20 == 0 || reached {
            log::info!("epoch {epoch}: error {:.5}", net.error);
        }
        if reached {
            println!("criterion reached after {} epochs, error {:.5}", epoch, net.error);
            return;
        }
    }
    println!("stopped after {epochs} epochs, error {:.5}", net.error);
}
