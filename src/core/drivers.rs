// Temporal drivers: four mutually exclusive ways to push one simulated
// tick (or a whole example) through every group's passes.
//
// All four share the orchestrator and the history ring; they differ in
// when the backward passes run and which tick's state they run against.
// The controller owns tick counting and the grace flag; a driver works
// against `net.current_tick` and moves `net.active_tick` only while it
// replays history, restoring present-tick state before returning.

use log::{debug, trace};

use crate::network::Network;

/// Event timing, as seen by a driver for the tick being processed.
#[derive(Debug, Clone, Copy)]
pub struct EventWindow {
    pub grace_ticks: usize,
    pub min_ticks: usize,
    pub max_ticks: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TickOutcome {
    /// Set when the driver itself decides the event is over (Boltzmann
    /// settling); the controller then skips its own criterion check.
    pub event_done: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BoltzPhase {
    NewEvent,
    Positive,
    Negative,
}

#[derive(Debug, Clone)]
pub struct BoltzmannState {
    phase: BoltzPhase,
    /// Ticks spent in the current phase; drives the annealing schedule.
    phase_tick: usize,
    /// Positive-phase settled outputs, cached per group.
    positive: Vec<Vec<f32>>,
    /// Previous-tick outputs for the settling check.
    prev_outputs: Vec<Vec<f32>>,
}

impl BoltzmannState {
    fn new() -> Self {
        Self {
            phase: BoltzPhase::NewEvent,
            phase_tick: 0,
            positive: Vec::new(),
            prev_outputs: Vec::new(),
        }
    }
}

pub enum TickDriver {
    /// Discrete time; backward runs every tick, optionally unrolled over
    /// `backprop_ticks` recorded ticks.
    Standard,
    /// Full unroll: derivatives stored every tick, one dense
    /// backward-through-time sweep at example end.
    Srbptt,
    /// Euler-integrated forward, reverse-time adjoint sweep at example end.
    Continuous,
    /// Mean-field annealing with positive/negative phases and a settling
    /// criterion.
    Boltzmann(BoltzmannState),
}

impl TickDriver {
    pub fn boltzmann() -> Self {
        TickDriver::Boltzmann(BoltzmannState::new())
    }

    /// True when the driver ends events itself rather than leaving the
    /// decision to the controller's criterion check.
    pub fn controls_event_end(&self) -> bool {
        matches!(self, TickDriver::Boltzmann(_))
    }

    pub fn tick(&mut self, net: &mut Network, window: &EventWindow, event_tick: usize) -> TickOutcome {
        match self {
            TickDriver::Standard => standard_tick(net),
            TickDriver::Srbptt => srbptt_tick(net),
            TickDriver::Continuous => continuous_tick(net),
            TickDriver::Boltzmann(state) => boltzmann_tick(state, net, window, event_tick),
        }
    }

    /// End-of-example hook: the unrolling drivers run their full backward
    /// sweeps here. The Boltzmann state machine rewinds in case the
    /// example was cut off mid-phase.
    pub fn finish_example(&mut self, net: &mut Network) {
        match self {
            TickDriver::Srbptt => srbptt_backward(net),
            TickDriver::Continuous => continuous_backward(net),
            TickDriver::Standard => {}
            TickDriver::Boltzmann(state) => {
                state.phase = BoltzPhase::NewEvent;
                net.live_gain = None;
            }
        }
    }
}

// --- standard -------------------------------------------------------------

fn standard_tick(net: &mut Network) -> TickOutcome {
    let n = net.num_groups();
    for g in 0..n {
        net.compute_input(g);
        net.compute_output(g);
        net.compute_cost(g);
    }
    for g in (0..n).rev() {
        net.reset_back_integrators(g);
        net.compute_cost_back(g);
        net.compute_output_back(g);
        net.compute_input_back(g);
    }

    let depth = net.params.backprop_ticks;
    if depth > 1 {
        standard_truncated_unroll(net, depth);
    }
    TickOutcome::default()
}

/// Walks previously recorded ticks, bounded by the highest group touched
/// by a recurrent-context connection, repeating the backward pass against
/// each restored state. Present-tick state is restored before returning.
fn standard_truncated_unroll(net: &mut Network, depth: usize) {
    let Some(bound) = net.last_elman_source() else {
        return;
    };
    let now = net.current_tick as i64;
    let mut walked = false;

    for d in 1..depth {
        let t = now - d as i64;
        let mut ok = true;
        for g in 0..=bound {
            ok &= net.restore_outputs(g, t);
            ok &= net.restore_inputs(g, t);
        }
        if !ok {
            break;
        }
        walked = true;
        net.active_tick = t as usize;
        trace!("truncated unroll replaying tick {t}");
        for g in (0..=bound).rev() {
            net.zero_output_derivs(g);
            net.compute_output_back(g);
            net.compute_input_back(g);
        }
    }

    if walked {
        for g in 0..=bound {
            net.restore_outputs(g, now);
            net.restore_inputs(g, now);
        }
    }
    net.active_tick = net.current_tick;
}

// --- srbptt ---------------------------------------------------------------

/// Forward only: run the passes, then compute and store this tick's
/// instantaneous output derivative from the cost chain. Grace is never
/// honored mid-unroll.
fn srbptt_tick(net: &mut Network) -> TickOutcome {
    let n = net.num_groups();
    for g in 0..n {
        net.compute_input(g);
        net.compute_output(g);
        net.compute_cost_impl(g, false);
    }
    for g in 0..n {
        net.compute_cost_back_impl(g, false);
        net.store_output_derivs(g);
    }
    TickOutcome::default()
}

/// The dense sweep: every recorded tick from the last down to zero gets a
/// full backward pass against its restored state.
fn srbptt_backward(net: &mut Network) {
    let ticks = net.current_tick;
    if ticks == 0 {
        return;
    }
    let n = net.num_groups();
    debug!("srbptt backward over {ticks} ticks");
    for g in 0..n {
        net.reset_back_integrators(g);
    }

    let last = ticks as i64 - 1;
    for t in (0..=last).rev() {
        net.active_tick = t as usize;
        let mut in_window = true;
        for g in 0..n {
            in_window &= net.restore_output_derivs(g, t);
            if t < last {
                in_window &= net.restore_outputs(g, t);
                in_window &= net.restore_inputs(g, t);
            }
        }
        if !in_window {
            // Stale state is never backpropagated; the sweep ends where
            // the retained window does.
            debug!("history window exhausted at tick {t}");
            break;
        }
        for g in (0..n).rev() {
            net.compute_output_back(g);
            net.compute_input_back(g);
        }
    }

    for g in 0..n {
        net.restore_outputs(g, last);
        net.restore_inputs(g, last);
    }
    net.active_tick = net.current_tick;
}

// --- continuous -----------------------------------------------------------

/// One Euler sub-step: each phase runs across all groups before the next
/// phase starts, so every group integrates against the same time slice.
fn continuous_tick(net: &mut Network) -> TickOutcome {
    let n = net.num_groups();
    for g in 0..n {
        net.compute_input(g);
    }
    for g in 0..n {
        net.compute_output(g);
    }
    for g in 0..n {
        net.compute_cost(g);
    }
    for g in 0..n {
        net.compute_cost_back(g);
        net.store_output_derivs(g);
    }
    TickOutcome::default()
}

/// Reverse-time adjoint sweep: restore tick `t`'s stored error derivative,
/// run the output backward passes, step the state back to `t - 1`, then
/// run the input backward passes so credit crosses the links into the
/// previous time slice.
fn continuous_backward(net: &mut Network) {
    let ticks = net.current_tick;
    if ticks == 0 {
        return;
    }
    let n = net.num_groups();
    debug!("adjoint sweep over {ticks} ticks");
    for g in 0..n {
        net.reset_back_integrators(g);
    }

    let last = ticks as i64 - 1;
    for t in (0..=last).rev() {
        net.active_tick = t as usize;
        let mut in_window = true;
        for g in 0..n {
            in_window &= net.restore_output_derivs(g, t);
        }
        if !in_window {
            debug!("history window exhausted at tick {t}");
            break;
        }
        for g in (0..n).rev() {
            net.compute_output_back(g);
        }
        // Step the state back one slice; at t = 0 there is nothing
        // earlier and the tick-0 state stands in for it.
        for g in 0..n {
            net.restore_outputs(g, t - 1);
            net.restore_inputs(g, t - 1);
        }
        for g in (0..n).rev() {
            net.compute_input_back(g);
        }
    }

    for g in 0..n {
        net.restore_outputs(g, last);
        net.restore_inputs(g, last);
    }
    net.active_tick = net.current_tick;
}

// --- boltzmann ------------------------------------------------------------

/// Geometric annealing from `init_gain` to `final_gain` over
/// `anneal_ticks`; the schedule restarts with each phase.
fn annealed_gain(net: &Network, k: usize) -> f32 {
    let p = &net.params;
    if p.anneal_ticks == 0 || p.init_gain <= 0.0 {
        return p.final_gain;
    }
    let frac = (k as f32 / p.anneal_ticks as f32).min(1.0);
    p.init_gain * (p.final_gain / p.init_gain).powf(frac)
}

fn boltzmann_tick(
    state: &mut BoltzmannState,
    net: &mut Network,
    window: &EventWindow,
    event_tick: usize,
) -> TickOutcome {
    let n = net.num_groups();

    if state.phase == BoltzPhase::NewEvent {
        boltzmann_init_event(state, net);
        state.phase = BoltzPhase::Positive;
        state.phase_tick = 0;
    }

    net.live_gain = Some(annealed_gain(net, state.phase_tick));

    match state.phase {
        BoltzPhase::Positive => {
            boltzmann_update(net);
            state.phase_tick += 1;
            // The positive phase is the grace period: targets act as
            // clamps until grace elapses.
            if event_tick + 1 >= window.grace_ticks {
                for g in 0..n {
                    state.positive[g].clear();
                    state.positive[g].extend(net.groups[g].units.iter().map(|u| u.output));
                }
                debug!("boltzmann positive phase settled, entering negative phase");
                state.phase = BoltzPhase::Negative;
                state.phase_tick = 0;
            }
            TickOutcome::default()
        }
        BoltzPhase::Negative => {
            for g in 0..n {
                state.prev_outputs[g].clear();
                state.prev_outputs[g].extend(net.groups[g].units.iter().map(|u| u.output));
            }
            boltzmann_update(net);
            state.phase_tick += 1;

            let settled = boltzmann_settled(state, net);
            let out_of_time = event_tick + 1 >= window.max_ticks;
            if settled || out_of_time {
                debug!(
                    "boltzmann negative phase done (settled: {settled}, out of time: {out_of_time})"
                );
                boltzmann_contrastive_backward(state, net);
                state.phase = BoltzPhase::NewEvent;
                net.live_gain = None;
                TickOutcome { event_done: true }
            } else {
                TickOutcome::default()
            }
        }
        BoltzPhase::NewEvent => unreachable!("handled above"),
    }
}

/// Outputs start from the clamp value, the grace-period target, or the
/// resting level; bias groups keep their fixed output.
fn boltzmann_init_event(state: &mut BoltzmannState, net: &mut Network) {
    let n = net.num_groups();
    state.positive.resize(n, Vec::new());
    state.prev_outputs.resize(n, Vec::new());

    for g in 0..n {
        if net.groups[g].is_bias() {
            continue;
        }
        let rest = net.resolved(g).rest_level;
        let in_grace = net.in_grace;
        let group = &mut net.groups[g];
        let cache = &mut net.caches[g];
        for (i, unit) in group.units.iter_mut().enumerate() {
            let v = match (unit.external_input, unit.target) {
                (Some(e), _) => e,
                (None, Some(t)) if in_grace => t,
                _ => rest,
            };
            unit.output = v;
            cache.output[i] = v;
        }
    }
}

fn boltzmann_update(net: &mut Network) {
    let n = net.num_groups();
    for g in 0..n {
        net.compute_input(g);
        net.compute_output(g);
    }
}

/// Fixed-point convergence: the largest per-unit output change across all
/// unclamped units must drop below each group's criterion tolerance.
fn boltzmann_settled(state: &BoltzmannState, net: &Network) -> bool {
    for g in 0..net.num_groups() {
        let tolerance = net.resolved(g).criterion;
        for (i, unit) in net.groups[g].units.iter().enumerate() {
            if unit.is_clamped(net.in_grace) {
                continue;
            }
            let prev = state.prev_outputs[g].get(i).copied().unwrap_or(unit.output);
            if (unit.output - prev).abs() >= tolerance {
                return false;
            }
        }
    }
    true
}

/// The cached positive-phase outputs become the targets; the ordinary
/// cost machinery then yields the contrastive derivative and the input
/// backward pass spreads it across the links.
fn boltzmann_contrastive_backward(state: &BoltzmannState, net: &mut Network) {
    let n = net.num_groups();
    for g in 0..n {
        if net.groups[g].is_bias() {
            continue;
        }
        for (i, unit) in net.groups[g].units.iter_mut().enumerate() {
            if let Some(&pos) = state.positive[g].get(i) {
                unit.target = Some(pos);
            }
        }
    }
    net.in_grace = false;
    for g in 0..n {
        net.compute_cost(g);
    }
    for g in (0..n).rev() {
        net.reset_back_integrators(g);
        net.compute_cost_back(g);
        net.compute_output_back(g);
        net.compute_input_back(g);
    }
}
