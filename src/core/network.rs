// The network: ordered groups, their cross-group caches, global time
// bookkeeping, and the shared history addressing scheme.
//
// Topology is assembled through `add_group`/`connect`/`set_weight`, then
// frozen by `finalize`. Drivers assume the frozen topology for the whole
// of an invocation; in particular the Elman "last source" bound computed
// from the output chains cannot go stale mid-run.

use hashbrown::HashMap;

use crate::chain::{Chain, Phase, ProcKind};
use crate::config::{NetworkParams, Resolved};
use crate::criterion::group_reached;
use crate::error::{Result, SkeinError};
use crate::group::{Group, GroupCache, GroupSpec};
use crate::history::encode_opt;
use crate::prng::Prng;
use crate::unit::{Link, LinkBlock, Unit};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub struct Network {
    pub params: NetworkParams,
    pub groups: Vec<Group>,
    /// Flat output / outputDeriv mirrors, indexed in lockstep with `groups`.
    pub caches: Vec<GroupCache>,

    pub(crate) names: HashMap<String, usize>,
    pub(crate) prng: Prng,

    /// Ticks completed within the current example.
    pub current_tick: usize,
    /// The tick whose unit state is currently loaded. Equal to
    /// `current_tick` except while a driver replays history. The
    /// controller keeps it synchronized; code driving ticks by hand must
    /// do the same.
    pub active_tick: usize,
    pub(crate) example_history_start: usize,

    pub error: f32,
    pub output_cost: f32,
    pub in_grace: bool,
    /// Annealed gain, driven by the Boltzmann driver; other drivers leave
    /// it at the resolved group gain.
    pub(crate) live_gain: Option<f32>,

    pub(crate) hist_slots: usize,
    pub(crate) finalized: bool,
}

impl Network {
    pub fn new(params: NetworkParams) -> Self {
        let seed = params.seed;
        let hist_slots = params.history_length.max(1);
        Self {
            params,
            groups: Vec::new(),
            caches: Vec::new(),
            names: HashMap::new(),
            prng: Prng::new(seed),
            current_tick: 0,
            active_tick: 0,
            example_history_start: 0,
            error: 0.0,
            output_cost: 0.0,
            in_grace: false,
            live_gain: None,
            hist_slots,
            finalized: false,
        }
    }

    pub fn num_groups(&self) -> usize {
        self.groups.len()
    }

    pub fn group_index(&self, name: &str) -> Result<usize> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| SkeinError::UnknownGroup(name.to_string()))
    }

    pub fn add_group(&mut self, spec: GroupSpec) -> Result<usize> {
        if self.finalized {
            return Err(SkeinError::AlreadyFinalized);
        }
        for kind in spec
            .input
            .iter()
            .chain(spec.output.iter())
            .chain(spec.cost.iter())
        {
            let expected = match kind.phase() {
                Phase::Input => spec.input.contains(kind),
                Phase::Output => spec.output.contains(kind),
                Phase::Cost => spec.cost.contains(kind),
            };
            if !expected {
                return Err(SkeinError::BadDescription(format!(
                    "processor `{}` listed under the wrong chain on group `{}`",
                    kind.name(),
                    spec.name
                )));
            }
        }

        let idx = self.groups.len();
        self.names.insert(spec.name.clone(), idx);
        let units = (0..spec.num_units).map(|_| Unit::new(1.0)).collect();
        self.caches.push(GroupCache::new(spec.num_units));
        self.groups.push(Group {
            name: spec.name,
            units,
            input_chain: Chain::from_kinds(&spec.input),
            output_chain: Chain::from_kinds(&spec.output),
            cost_chain: Chain::from_kinds(&spec.cost),
            criterion: spec.criterion,
            reset_on_example: spec.reset_on_example,
            params: spec.params,
            error: 0.0,
            output_cost: 0.0,
        });
        Ok(idx)
    }

    /// Fully connects `src` into `dst`: each destination unit gets one link
    /// per source unit, zero-weighted, in one block per source group.
    pub fn connect(&mut self, src: usize, dst: usize) -> Result<()> {
        if self.finalized {
            return Err(SkeinError::AlreadyFinalized);
        }
        if src >= self.groups.len() {
            return Err(SkeinError::GroupIndex(src));
        }
        let n_src = self.groups[src].num_units();
        let dst_group = self
            .groups
            .get_mut(dst)
            .ok_or(SkeinError::GroupIndex(dst))?;
        for unit in &mut dst_group.units {
            unit.blocks.push(LinkBlock {
                source: src,
                links: (0..n_src).map(|s| Link::new(s, 0.0)).collect(),
            });
        }
        Ok(())
    }

    pub fn set_weight(
        &mut self,
        dst: usize,
        dst_unit: usize,
        src: usize,
        src_unit: usize,
        weight: f32,
    ) -> Result<()> {
        let group = self
            .groups
            .get_mut(dst)
            .ok_or(SkeinError::GroupIndex(dst))?;
        let unit = &mut group.units[dst_unit];
        for block in &mut unit.blocks {
            if block.source != src {
                continue;
            }
            if let Some(link) = block.links.iter_mut().find(|l| l.src_unit == src_unit) {
                link.weight = weight;
                return Ok(());
            }
        }
        Err(SkeinError::BadDescription(format!(
            "no link {}:{} -> {}:{}",
            src, src_unit, dst, dst_unit
        )))
    }

    /// Uniform random weights in `[-range, range]` on every link.
    pub fn randomize_weights(&mut self, range: f32) {
        let Network { groups, prng, .. } = self;
        for group in groups {
            for unit in &mut group.units {
                for block in &mut unit.blocks {
                    for link in &mut block.links {
                        link.weight = prng.gen_noise(range);
                    }
                }
            }
        }
    }

    /// Freezes topology: validates pairings, allocates history rings,
    /// node state, and per-unit gains.
    pub fn finalize(&mut self) -> Result<()> {
        if self.finalized {
            return Err(SkeinError::AlreadyFinalized);
        }
        let history_length = self.params.history_length;
        let slots = self.hist_slots;
        let sizes: Vec<usize> = self.groups.iter().map(|g| g.num_units()).collect();

        for gi in 0..self.groups.len() {
            let num_units = sizes[gi];
            let resolved = self.groups[gi].params.resolve(&self.params);
            let group = &mut self.groups[gi];

            for chain in [
                &mut group.input_chain,
                &mut group.output_chain,
                &mut group.cost_chain,
            ] {
                for node in &mut chain.nodes {
                    if let Some(source) = node.kind.paired_source() {
                        let peer = *sizes.get(source).ok_or(SkeinError::GroupIndex(source))?;
                        if peer != num_units {
                            return Err(SkeinError::BadPairing {
                                kind: node.kind.name(),
                                group: group.name.clone(),
                            });
                        }
                    }
                    node.alloc(slots, num_units);
                }
            }

            for unit in &mut group.units {
                unit.gain = resolved.gain;
                unit.alloc_history(history_length);
                for block in &unit.blocks {
                    if block.source >= sizes.len() {
                        return Err(SkeinError::GroupIndex(block.source));
                    }
                }
            }
        }
        self.finalized = true;
        Ok(())
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub(crate) fn resolved(&self, g: usize) -> Resolved {
        self.groups[g].params.resolve(&self.params)
    }

    // --- history addressing -------------------------------------------------

    /// Storage slot for an example-relative tick, or `None` when the tick
    /// lies outside the retained window. Out-of-window reads must surface
    /// as NaN upstream, never as stale data.
    pub fn slot_for(&self, t: i64) -> Option<usize> {
        if t < 0 {
            return None;
        }
        let t = t as usize;
        if t > self.current_tick || self.current_tick - t >= self.hist_slots {
            return None;
        }
        Some((t + self.example_history_start) % self.hist_slots)
    }

    pub(crate) fn active_slot(&self) -> Option<usize> {
        self.slot_for(self.active_tick as i64)
    }

    /// Loads the recorded outputs of tick `t` into the live units and the
    /// flat cache. Returns false when `t` is outside the window.
    pub(crate) fn restore_outputs(&mut self, g: usize, t: i64) -> bool {
        let Some(slot) = self.slot_for(t) else {
            return false;
        };
        let group = &mut self.groups[g];
        let cache = &mut self.caches[g];
        for (i, unit) in group.units.iter_mut().enumerate() {
            let v = unit.output_history.restore(slot);
            if !v.is_nan() {
                unit.output = v;
                cache.output[i] = v;
            }
        }
        true
    }

    pub(crate) fn restore_inputs(&mut self, g: usize, t: i64) -> bool {
        let Some(slot) = self.slot_for(t) else {
            return false;
        };
        for unit in &mut self.groups[g].units {
            let v = unit.input_history.restore(slot);
            if !v.is_nan() {
                unit.input = v;
            }
        }
        true
    }

    /// Reloads the stored instantaneous output derivative of tick `t`
    /// (overwrite, not accumulate). Unrecorded values load as zero.
    pub(crate) fn restore_output_derivs(&mut self, g: usize, t: i64) -> bool {
        let Some(slot) = self.slot_for(t) else {
            return false;
        };
        for unit in &mut self.groups[g].units {
            let v = unit.output_deriv_history.restore(slot);
            unit.output_deriv = if v.is_nan() { 0.0 } else { v };
        }
        true
    }

    pub(crate) fn zero_output_derivs(&mut self, g: usize) {
        for unit in &mut self.groups[g].units {
            unit.output_deriv = 0.0;
        }
    }

    pub(crate) fn store_output_derivs(&mut self, g: usize) {
        let Some(slot) = self.active_slot() else {
            return;
        };
        for unit in &mut self.groups[g].units {
            let v = unit.output_deriv;
            unit.output_deriv_history.store(slot, v);
        }
    }

    // --- per-example bookkeeping -------------------------------------------

    /// Starts a fresh example: tick counters rewind; groups flagged
    /// `reset_on_example` drop integrator state and return their outputs
    /// to the resting level.
    pub fn begin_example(&mut self) {
        self.current_tick = 0;
        self.active_tick = 0;
        for g in 0..self.groups.len() {
            if !self.groups[g].reset_on_example {
                continue;
            }
            let rest = self.resolved(g).rest_level;
            let group = &mut self.groups[g];
            for chain in [&mut group.input_chain, &mut group.output_chain] {
                for node in &mut chain.nodes {
                    node.unit_data.fill(0.0);
                    node.back_data.fill(0.0);
                }
            }
            for (i, unit) in group.units.iter_mut().enumerate() {
                unit.output = rest;
                self.caches[g].output[i] = rest;
            }
        }
    }

    /// Advances the shared history origin past a finished example, so the
    /// ring retains at most `history_length` most-recent ticks.
    pub fn end_example(&mut self, ticks: usize) {
        self.example_history_start = (self.example_history_start + ticks) % self.hist_slots;
    }

    /// External reset used by the optimizer between batches.
    pub fn reset_derivs(&mut self) {
        for group in &mut self.groups {
            for unit in &mut group.units {
                unit.gain_deriv = 0.0;
                for block in &mut unit.blocks {
                    for link in &mut block.links {
                        link.deriv = 0.0;
                    }
                }
            }
        }
    }

    pub fn reset_error(&mut self) {
        self.error = 0.0;
        self.output_cost = 0.0;
        for group in &mut self.groups {
            group.error = 0.0;
            group.output_cost = 0.0;
        }
    }

    // --- external per-tick surface -----------------------------------------

    pub fn set_external_inputs(&mut self, g: usize, values: &[Option<f32>]) {
        for (unit, v) in self.groups[g].units.iter_mut().zip(values) {
            unit.external_input = *v;
        }
    }

    pub fn set_targets(&mut self, g: usize, values: &[Option<f32>]) {
        for (unit, v) in self.groups[g].units.iter_mut().zip(values) {
            unit.target = *v;
        }
    }

    pub fn clear_external(&mut self) {
        for group in &mut self.groups {
            for unit in &mut group.units {
                unit.external_input = None;
                unit.target = None;
                unit.adjusted_target = None;
            }
        }
    }

    pub fn outputs(&self, g: usize) -> Vec<f32> {
        self.groups[g].units.iter().map(|u| u.output).collect()
    }

    /// Accumulated derivative for one link, for the optimizer and tests.
    pub fn link_deriv(&self, dst: usize, dst_unit: usize, src: usize, src_unit: usize) -> f32 {
        for block in &self.groups[dst].units[dst_unit].blocks {
            if block.source == src {
                if let Some(l) = block.links.iter().find(|l| l.src_unit == src_unit) {
                    return l.deriv;
                }
            }
        }
        0.0
    }

    // --- network-level checks ----------------------------------------------

    /// All criterion-bearing groups pass; no criterion anywhere means the
    /// criterion is never reached.
    pub fn criterion_reached(&self) -> bool {
        let mut any = false;
        for g in 0..self.groups.len() {
            let Some(kind) = self.groups[g].criterion else {
                continue;
            };
            any = true;
            let tolerance = self.resolved(g).criterion;
            if !group_reached(&self.groups[g].units, kind, tolerance) {
                return false;
            }
        }
        any
    }

    /// Highest group index reached by an Elman (recurrent context)
    /// connection, the truncated-unroll bound for the standard driver.
    /// Valid while topology stays frozen, which `finalize` guarantees.
    pub(crate) fn last_elman_source(&self) -> Option<usize> {
        let mut last = None;
        for (g, group) in self.groups.iter().enumerate() {
            for src in group.output_chain.elman_sources() {
                let hi = src.max(g);
                if last.map(|l| hi > l).unwrap_or(true) {
                    last = Some(hi);
                }
            }
        }
        last
    }

    pub(crate) fn record_targets(&mut self, g: usize, graceful_none: bool) {
        let Some(slot) = self.active_slot() else {
            return;
        };
        for unit in &mut self.groups[g].units {
            let v = if graceful_none {
                f32::NAN
            } else {
                encode_opt(unit.target)
            };
            unit.target_history.store(slot, v);
        }
    }
}

/// A whole-network build description, loadable from JSON by the demo
/// binary and test fixtures.
#[cfg(feature = "serde")]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkDescription {
    #[serde(default)]
    pub params: NetworkParams,
    pub groups: Vec<GroupSpec>,
    /// (source group name, destination group name) pairs, fully connected.
    #[serde(default)]
    pub connections: Vec<(String, String)>,
}

#[cfg(feature = "serde")]
impl NetworkDescription {
    pub fn build(&self) -> Result<Network> {
        let mut net = Network::new(self.params.clone());
        for spec in &self.groups {
            net.add_group(spec.clone())?;
        }
        for (src, dst) in &self.connections {
            let s = net.group_index(src)?;
            let d = net.group_index(dst)?;
            net.connect(s, d)?;
        }
        net.finalize()?;
        Ok(net)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_group_net(history_length: usize) -> Network {
        let mut net = Network::new(NetworkParams {
            history_length,
            ..NetworkParams::default()
        });
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
    fn history_window_boundaries() {
        let mut net = two_group_net(4);
        net.current_tick = 10;
        net.active_tick = 10;

        assert!(net.slot_for(10).is_some());
        assert!(net.slot_for(7).is_some());
        // history_length ticks back is already outside the window
        assert!(net.slot_for(6).is_none());
        assert!(net.slot_for(-1).is_none());
        assert!(net.slot_for(11).is_none());
    }

    #[test]
    fn example_start_offsets_the_ring() {
        let mut net = two_group_net(4);
        assert_eq!(net.slot_for(0), Some(0));
        net.end_example(3);
        net.begin_example();
        assert_eq!(net.slot_for(0), Some(3));
        assert_eq!(net.slot_for(1), Some(0));
    }

    #[test]
    fn duplicate_finalize_is_rejected() {
        let mut net = two_group_net(0);
        assert!(matches!(
            net.finalize(),
            Err(SkeinError::AlreadyFinalized)
        ));
    }

    #[test]
    fn pairing_size_mismatch_is_rejected() {
        let mut net = Network::new(NetworkParams::default());
        net.add_group(GroupSpec::new("a", 3)).unwrap();
        net.add_group(
            GroupSpec::new("b", 2).with_output(&[
                ProcKind::Logistic,
                ProcKind::ElmanClamp { source: 0 },
            ]),
        )
        .unwrap();
        assert!(matches!(
            net.finalize(),
            Err(SkeinError::BadPairing { .. })
        ));
    }

    #[test]
    fn elman_bound_covers_source_and_destination() {
        let mut net = Network::new(NetworkParams::default());
        net.add_group(GroupSpec::new("context", 2)).unwrap();
        net.add_group(
            GroupSpec::new("hidden", 2)
                .with_output(&[ProcKind::Logistic, ProcKind::ElmanClamp { source: 0 }]),
        )
        .unwrap();
        net.add_group(GroupSpec::new("out", 1)).unwrap();
        net.finalize().unwrap();
        assert_eq!(net.last_elman_source(), Some(1));
    }

    #[test]
    fn link_derivs_reset_only_on_explicit_call() {
        let mut net = two_group_net(0);
        net.groups[1].units[0].blocks[0].links[0].deriv = 0.5;
        net.begin_example();
        net.end_example(1);
        assert_eq!(net.link_deriv(1, 0, 0, 0), 0.5);
        net.reset_derivs();
        assert_eq!(net.link_deriv(1, 0, 0, 0), 0.0);
    }
}
