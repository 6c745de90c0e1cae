// The orchestrator: the six per-group passes and the chain dispatch.
//
// A pass destructures the network into disjoint pieces (the group's units,
// the chain being run, the shared cache container, the accumulators) and
// hands them to the kernel functions as one `PassCtx`. Forward visits
// nodes head->tail, backward tail->head; a node lacking the requested
// procedure is skipped.

use crate::chain::{Chain, ProcKind, ProcNode};
use crate::config::Resolved;
use crate::cost_procs;
use crate::group::GroupCache;
use crate::input_procs;
use crate::network::Network;
use crate::output_procs;
use crate::prng::Prng;
use crate::unit::Unit;

pub(crate) struct PassCtx<'a> {
    pub units: &'a mut [Unit],
    pub caches: &'a mut [GroupCache],
    pub p: Resolved,
    pub prng: &'a mut Prng,
    /// Slot of the tick currently loaded; `None` outside the window.
    pub slot: Option<usize>,
    /// Slot of the preceding tick, for delta penalties.
    pub prev_slot: Option<usize>,
    pub in_grace: bool,
    pub live_gain: Option<f32>,
    pub error: &'a mut f32,
    pub output_cost: &'a mut f32,
    pub group_error: &'a mut f32,
    pub group_output_cost: &'a mut f32,
}

impl PassCtx<'_> {
    #[inline]
    pub fn act_gain(&self) -> f32 {
        self.live_gain.unwrap_or(self.p.gain)
    }
}

fn run_forward(ctx: &mut PassCtx, chain: &mut Chain) {
    for node in chain.nodes.iter_mut() {
        dispatch_forward(ctx, node);
    }
}

fn run_backward(ctx: &mut PassCtx, chain: &mut Chain) {
    for node in chain.nodes.iter_mut().rev() {
        if node.kind.has_backward() {
            dispatch_backward(ctx, node);
        }
    }
}

fn dispatch_forward(ctx: &mut PassCtx, node: &mut ProcNode) {
    use ProcKind::*;
    match node.kind {
        ClearInput => input_procs::clear_forward(ctx),
        DotProduct => input_procs::dot_forward(ctx),
        Distance => input_procs::distance_forward(ctx),
        Product => input_procs::product_forward(ctx, node),
        BoltzmannDot => input_procs::boltzmann_dot_forward(ctx),
        SoftClamp => input_procs::soft_clamp_forward(ctx),
        IntegrateInput => input_procs::integrate_forward(ctx, node),
        NormalizeInput => input_procs::normalize_forward(ctx, node),
        NoiseInput => input_procs::noise_input_forward(ctx),
        CopyInputs { source } => input_procs::copy_inputs_forward(ctx, source),

        Logistic => output_procs::logistic_forward(ctx),
        AdaptiveLogistic => output_procs::adaptive_logistic_forward(ctx),
        Tanh => output_procs::tanh_forward(ctx),
        Gaussian => output_procs::gaussian_forward(ctx),
        Exponential => output_procs::exponential_forward(ctx),
        Linear => output_procs::linear_forward(ctx),
        Softmax => output_procs::softmax_forward(ctx),
        HardClamp => output_procs::hard_clamp_forward(ctx, node),
        WeakClamp => output_procs::weak_clamp_forward(ctx, node),
        BiasClamp => output_procs::bias_clamp_forward(ctx),
        ElmanClamp { source } => output_procs::elman_forward(ctx, source),
        WinnerTakeAll => output_procs::wta_forward(ctx, node),
        Kohonen => output_procs::kohonen_forward(ctx, node),
        InteractiveActivation => output_procs::iac_forward(ctx),
        NoiseOutput => output_procs::noise_output_forward(ctx, node),
        CopyOutputs { source } => output_procs::copy_outputs_forward(ctx, source),
        BoltzmannLogistic => output_procs::boltzmann_logistic_forward(ctx),

        SquaredError => cost_procs::squared_error_forward(ctx),
        CrossEntropyError => cost_procs::cross_entropy_forward(ctx),
        DivergenceError => cost_procs::divergence_forward(ctx),
        CosineError => cost_procs::cosine_error_forward(ctx, node),
        LinearCost => cost_procs::output_cost_forward(ctx, node.kind),
        QuadraticCost => cost_procs::output_cost_forward(ctx, node.kind),
        ConvexQuadraticCost => cost_procs::output_cost_forward(ctx, node.kind),
        LogisticCost => cost_procs::output_cost_forward(ctx, node.kind),
        CosineCost => cost_procs::output_cost_forward(ctx, node.kind),
        DeltaCost => cost_procs::delta_cost_forward(ctx),
    }
}

fn dispatch_backward(ctx: &mut PassCtx, node: &mut ProcNode) {
    use ProcKind::*;
    match node.kind {
        DotProduct => input_procs::dot_backward(ctx),
        Distance => input_procs::distance_backward(ctx),
        Product => input_procs::product_backward(ctx, node),
        BoltzmannDot => input_procs::boltzmann_dot_backward(ctx),
        IntegrateInput => input_procs::integrate_backward(ctx, node),
        NormalizeInput => input_procs::normalize_backward(ctx, node),

        Logistic => output_procs::logistic_backward(ctx),
        AdaptiveLogistic => output_procs::adaptive_logistic_backward(ctx),
        Tanh => output_procs::tanh_backward(ctx),
        Gaussian => output_procs::gaussian_backward(ctx),
        Exponential => output_procs::exponential_backward(ctx),
        Linear => output_procs::linear_backward(ctx),
        Softmax => output_procs::softmax_backward(ctx),
        HardClamp => output_procs::hard_clamp_backward(ctx, node),
        WeakClamp => output_procs::weak_clamp_backward(ctx, node),
        BiasClamp => output_procs::bias_clamp_backward(ctx),
        ElmanClamp { source } => output_procs::elman_backward(ctx, source),
        WinnerTakeAll => output_procs::wta_backward(ctx, node),
        Kohonen => output_procs::kohonen_backward(ctx, node),
        NoiseOutput => output_procs::noise_output_backward(ctx, node),
        BoltzmannLogistic => output_procs::boltzmann_logistic_backward(ctx),

        SquaredError => cost_procs::squared_error_backward(ctx),
        CrossEntropyError => cost_procs::cross_entropy_backward(ctx),
        DivergenceError => cost_procs::divergence_backward(ctx),
        CosineError => cost_procs::cosine_error_backward(ctx, node),
        LinearCost => cost_procs::output_cost_backward(ctx, node.kind),
        QuadraticCost => cost_procs::output_cost_backward(ctx, node.kind),
        ConvexQuadraticCost => cost_procs::output_cost_backward(ctx, node.kind),
        LogisticCost => cost_procs::output_cost_backward(ctx, node.kind),
        CosineCost => cost_procs::output_cost_backward(ctx, node.kind),
        DeltaCost => cost_procs::delta_cost_backward(ctx),

        // Forward-only kinds are filtered by has_backward.
        _ => {}
    }
}

/// Runs one chain of group `g` in the requested direction, with the
/// network split into disjoint borrows.
macro_rules! with_pass_ctx {
    ($net:expr, $g:expr, $chain:ident, $body:expr) => {{
        let slot = $net.active_slot();
        let prev_slot = $net.slot_for($net.active_tick as i64 - 1);
        let p = $net.resolved($g);
        let Network {
            groups,
            caches,
            prng,
            error,
            output_cost,
            in_grace,
            live_gain,
            ..
        } = $net;
        let group = &mut groups[$g];
        let chain = &mut group.$chain;
        let mut ctx = PassCtx {
            units: &mut group.units,
            caches,
            p,
            prng,
            slot,
            prev_slot,
            in_grace: *in_grace,
            live_gain: *live_gain,
            error,
            output_cost,
            group_error: &mut group.error,
            group_output_cost: &mut group.output_cost,
        };
        #[allow(clippy::redundant_closure_call)]
        ($body)(&mut ctx, chain)
    }};
}

impl Network {
    /// Input pass. Skipped outright for chainless groups and for
    /// output-clamped groups whose units are all externally set.
    pub fn compute_input(&mut self, g: usize) {
        let (skip, has_aggregator, needs_zero) = {
            let group = &self.groups[g];
            (
                group.input_chain.is_empty()
                    || (group.is_output_clamped() && group.fully_ext_clamped()),
                group.input_chain.has_aggregator(),
                group.input_chain.needs_input_zero(),
            )
        };
        if skip {
            if !has_aggregator {
                for unit in &mut self.groups[g].units {
                    unit.input = 0.0;
                }
            }
            self.record_inputs(g);
            return;
        }
        if needs_zero {
            for unit in &mut self.groups[g].units {
                unit.input = 0.0;
            }
        }
        with_pass_ctx!(self, g, input_chain, |ctx: &mut PassCtx,
                                             chain: &mut Chain| {
            run_forward(ctx, chain)
        });
        self.record_inputs(g);
    }

    /// Mirror of `compute_input`: same skip logic, reverse node order.
    pub fn compute_input_back(&mut self, g: usize) {
        let skip = {
            let group = &self.groups[g];
            group.input_chain.is_empty()
                || (group.is_output_clamped() && group.fully_ext_clamped())
        };
        if skip {
            return;
        }
        with_pass_ctx!(self, g, input_chain, |ctx: &mut PassCtx,
                                             chain: &mut Chain| {
            run_backward(ctx, chain)
        });
    }

    pub fn compute_output(&mut self, g: usize) {
        if self.groups[g].output_chain.needs_output_zero() {
            for unit in &mut self.groups[g].units {
                unit.output = 0.0;
            }
        }
        with_pass_ctx!(self, g, output_chain, |ctx: &mut PassCtx,
                                              chain: &mut Chain| {
            run_forward(ctx, chain)
        });
        // Mirror into the flat cache other groups read from.
        let group = &mut self.groups[g];
        let cache = &mut self.caches[g];
        for (i, unit) in group.units.iter_mut().enumerate() {
            cache.output[i] = unit.output;
        }
        self.record_outputs(g);
    }

    /// Folds externally-injected derivative contributions (Elman and other
    /// cross-group routing) into the live units, resets the cache, then
    /// runs the output chain backward.
    pub fn compute_output_back(&mut self, g: usize) {
        {
            let group = &mut self.groups[g];
            let cache = &mut self.caches[g];
            for (i, unit) in group.units.iter_mut().enumerate() {
                unit.output_deriv += cache.output_deriv[i];
                cache.output_deriv[i] = 0.0;
            }
        }
        with_pass_ctx!(self, g, output_chain, |ctx: &mut PassCtx,
                                              chain: &mut Chain| {
            run_backward(ctx, chain)
        });
    }

    pub fn compute_cost(&mut self, g: usize) {
        self.compute_cost_impl(g, true);
    }

    pub(crate) fn compute_cost_impl(&mut self, g: usize, respect_grace: bool) {
        if respect_grace && self.in_grace {
            // No error is charged while grace is active; targets are
            // recorded as absent and stale adjustments are dropped.
            for unit in &mut self.groups[g].units {
                unit.adjusted_target = None;
            }
            self.record_targets(g, true);
            return;
        }
        with_pass_ctx!(self, g, cost_chain, |ctx: &mut PassCtx,
                                            chain: &mut Chain| {
            run_forward(ctx, chain)
        });
        self.record_targets(g, false);
    }

    /// Cost backward is the sole source of a unit's initial outputDeriv
    /// each tick: the previous value is always discarded first.
    pub fn compute_cost_back(&mut self, g: usize) {
        self.compute_cost_back_impl(g, true);
    }

    pub(crate) fn compute_cost_back_impl(&mut self, g: usize, respect_grace: bool) {
        for unit in &mut self.groups[g].units {
            unit.output_deriv = 0.0;
        }
        if respect_grace && self.in_grace {
            return;
        }
        with_pass_ctx!(self, g, cost_chain, |ctx: &mut PassCtx,
                                            chain: &mut Chain| {
            run_backward(ctx, chain)
        });
    }

    /// Clears derivative-stream integrator state ahead of a fresh backward
    /// sweep. Drivers call this once per sweep; tests that drive the
    /// passes by hand do the same.
    pub fn reset_back_integrators(&mut self, g: usize) {
        for node in &mut self.groups[g].input_chain.nodes {
            node.back_data.fill(0.0);
        }
    }

    fn record_inputs(&mut self, g: usize) {
        let Some(slot) = self.active_slot() else {
            return;
        };
        for unit in &mut self.groups[g].units {
            let v = unit.input;
            unit.input_history.store(slot, v);
        }
    }

    fn record_outputs(&mut self, g: usize) {
        let Some(slot) = self.active_slot() else {
            return;
        };
        for unit in &mut self.groups[g].units {
            let v = unit.output;
            unit.output_history.store(slot, v);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::NetworkParams;
    use crate::group::GroupSpec;
    use crate::network::Network;
    use crate::ProcKind;

    fn clamped_pair() -> Network {
        let mut net = Network::new(NetworkParams::default());
        net.add_group(GroupSpec::new("in", 2).with_output(&[ProcKind::HardClamp]))
            .unwrap();
        net.add_group(
            GroupSpec::new("out", 1)
                .with_input(&[ProcKind::DotProduct])
                .with_output(&[ProcKind::Logistic]),
        )
        .unwrap();
        net.connect(0, 1).unwrap();
        net.finalize().unwrap();
        net
    }

    #[test]
    fn hard_clamp_is_idempotent() {
        let mut net = clamped_pair();
        net.set_external_inputs(0, &[Some(1.0), Some(0.25)]);
        net.compute_output(0);
        let first = net.outputs(0);
        net.compute_output(0);
        assert_eq!(first, net.outputs(0));
        assert_eq!(first, vec![1.0, 0.25]);
    }

    #[test]
    fn fully_clamped_group_skips_its_input_chain() {
        let mut net = Network::new(NetworkParams::default());
        net.add_group(
            GroupSpec::new("loop", 2)
                .with_input(&[ProcKind::DotProduct])
                .with_output(&[ProcKind::HardClamp]),
        )
        .unwrap();
        net.connect(0, 0).unwrap();
        net.finalize().unwrap();
        net.set_external_inputs(0, &[Some(0.5), Some(0.5)]);
        net.groups[0].units[0].input = 9.0;
        net.compute_input(0);
        // Aggregator present, so the skip leaves input untouched.
        assert_eq!(net.groups[0].units[0].input, 9.0);
    }

    #[test]
    fn cost_back_overwrites_stale_derivs() {
        let mut net = clamped_pair();
        net.groups[1].units[0].output_deriv = 123.0;
        net.compute_cost_back(1);
        assert_eq!(net.groups[1].units[0].output_deriv, 0.0);
    }

    #[test]
    fn grace_period_charges_no_error() {
        let mut net = clamped_pair();
        net.groups[1].cost_chain = crate::chain::Chain::from_kinds(&[ProcKind::SquaredError]);
        net.groups[1].units[0].output = 0.3;
        net.set_targets(1, &[Some(0.8)]);
        net.in_grace = true;
        net.compute_cost(1);
        assert_eq!(net.error, 0.0);
        net.in_grace = false;
        net.compute_cost(1);
        assert!(net.error > 0.0);
    }
}
