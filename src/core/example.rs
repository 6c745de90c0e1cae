// Examples, events, and the controller that walks a network through them.
//
// An example is an ordered sequence of events; each event supplies input
// and target patterns and its own timing window. The controller owns tick
// counting and the grace flag, invokes the driver once per tick, and
// checks the halt flag only between ticks so the network is always left
// current-tick-complete.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::debug;

use crate::drivers::{EventWindow, TickDriver};
use crate::network::Network;

#[derive(Debug, Clone)]
pub struct Event {
    /// An event never outlives this many ticks.
    pub max_ticks: usize,
    /// Before this many ticks, the criterion cannot end the event.
    pub min_ticks: usize,
    /// Cost is not evaluated for this many initial ticks.
    pub grace_ticks: usize,
    /// (group index, per-unit clamp pattern); `None` leaves a unit free.
    pub inputs: Vec<(usize, Vec<Option<f32>>)>,
    /// (group index, per-unit target pattern).
    pub targets: Vec<(usize, Vec<Option<f32>>)>,
}

impl Event {
    pub fn new(max_ticks: usize) -> Self {
        Self {
            max_ticks,
            min_ticks: 0,
            grace_ticks: 0,
            inputs: Vec::new(),
            targets: Vec::new(),
        }
    }

    pub fn with_min(mut self, min_ticks: usize) -> Self {
        self.min_ticks = min_ticks;
        self
    }

    pub fn with_grace(mut self, grace_ticks: usize) -> Self {
        self.grace_ticks = grace_ticks;
        self
    }

    pub fn clamp(mut self, group: usize, pattern: &[Option<f32>]) -> Self {
        self.inputs.push((group, pattern.to_vec()));
        self
    }

    pub fn target(mut self, group: usize, pattern: &[Option<f32>]) -> Self {
        self.targets.push((group, pattern.to_vec()));
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct Example {
    pub name: Option<String>,
    pub events: Vec<Event>,
}

impl Example {
    pub fn new(events: Vec<Event>) -> Self {
        Self { name: None, events }
    }

    pub fn named(name: &str, events: Vec<Event>) -> Self {
        Self {
            name: Some(name.to_string()),
            events,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ExampleOutcome {
    pub ticks: usize,
    /// Criterion state at the end of the last event. A caller that
    /// requires criterion success halts its run when this is false.
    pub criterion_met: bool,
    /// True when the external halt flag cut the example short.
    pub halted: bool,
    /// Error accumulated by this example alone.
    pub error: f32,
}

pub struct ExampleController {
    halt: Arc<AtomicBool>,
}

impl Default for ExampleController {
    fn default() -> Self {
        Self::new()
    }
}

impl ExampleController {
    pub fn new() -> Self {
        Self {
            halt: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shareable halt signal; honored between ticks only.
    pub fn halt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.halt)
    }

    pub fn run_example(
        &self,
        net: &mut Network,
        driver: &mut TickDriver,
        example: &Example,
    ) -> ExampleOutcome {
        net.begin_example();
        let error_before = net.error;
        let mut total_ticks = 0usize;
        let mut halted = false;

        'events: for (ei, event) in example.events.iter().enumerate() {
            apply_event(net, event);
            let window = EventWindow {
                grace_ticks: event.grace_ticks,
                min_ticks: event.min_ticks,
                max_ticks: event.max_ticks,
            };
            let mut event_tick = 0usize;

            loop {
                if total_ticks >= net.params.max_ticks {
                    debug!("example out of ticks during event {ei}");
                    break 'events;
                }
                if self.halt.load(Ordering::Relaxed) {
                    halted = true;
                    break 'events;
                }

                // Grace ends independently of the event end conditions.
                net.in_grace = event_tick < event.grace_ticks;
                net.active_tick = net.current_tick;

                let outcome = driver.tick(net, &window, event_tick);

                net.current_tick += 1;
                total_ticks += 1;
                event_tick += 1;

                if outcome.event_done {
                    break;
                }
                if event_tick >= event.max_ticks {
                    break;
                }
                if !driver.controls_event_end()
                    && event_tick >= event.min_ticks
                    && net.criterion_reached()
                {
                    debug!("event {ei} reached criterion after {event_tick} ticks");
                    break;
                }
            }
        }

        driver.finish_example(net);
        net.in_grace = false;
        let criterion_met = net.criterion_reached();
        net.end_example(total_ticks);

        ExampleOutcome {
            ticks: total_ticks,
            criterion_met,
            halted,
            error: net.error - error_before,
        }
    }
}

/// Each event re-initializes the clamp/target ranges from a clean slate.
fn apply_event(net: &mut Network, event: &Event) {
    net.clear_external();
    for (g, pattern) in &event.inputs {
        net.set_external_inputs(*g, pattern);
    }
    for (g, pattern) in &event.targets {
        net.set_targets(*g, pattern);
    }
}
