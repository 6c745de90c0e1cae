// Processor chains.
//
// Each group carries three chains (input / output / cost). A chain is an
// ordered sequence of nodes; forward runs head->tail, backward runs
// tail->head, and the two orders are mirror images by construction. Chain
// membership is fixed when the group is finalized and never changes
// mid-run.
//
// Dispatch is a closed tagged enum: one `match` per direction per phase,
// in `input_procs` / `output_procs` / `cost_procs`. A node that defines
// only a forward (or only a backward) procedure is silently skipped for
// the other direction.

use crate::history::{HistoryMatrix, Ring};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Input,
    Output,
    Cost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ProcKind {
    // --- input chain ---
    /// Explicit zero-fill head node.
    ClearInput,
    /// input = sum(source_output * weight) over all link blocks.
    DotProduct,
    /// input = sum((weight - source_output)^2).
    Distance,
    /// input = prod(source_output * weight).
    Product,
    /// Dot product skipped for units currently clamped (mean-field input).
    BoltzmannDot,
    /// Adds an inverse-activation bias pulling input toward the clamp value.
    SoftClamp,
    /// Leaky integrator on input; symmetric recurrence on the backward pass.
    IntegrateInput,
    /// input /= sum(input), skipped when the sum is exactly zero.
    NormalizeInput,
    /// Additive or multiplicative uniform noise; not restorable.
    NoiseInput,
    /// Overwrites input with the paired group's output.
    CopyInputs { source: usize },

    // --- output chain ---
    Logistic,
    /// Logistic with a per-unit gain; accumulates gain derivatives.
    AdaptiveLogistic,
    Tanh,
    Gaussian,
    Exponential,
    Linear,
    /// Max-subtracted, renormalized softmax.
    Softmax,
    /// output = external_input when present; clamp mask recorded per tick.
    HardClamp,
    /// Blends output toward external_input by clamp_strength.
    WeakClamp,
    /// output = 1 with zero derivative.
    BiasClamp,
    /// Adds a source group's cached output; credit flows back to the cache.
    ElmanClamp { source: usize },
    WinnerTakeAll,
    /// Self-organizing neighborhood response around the minimum-input unit.
    Kohonen,
    /// Grossberg-style shunting integrator; forward only.
    InteractiveActivation,
    /// Noise with the clean output cached and restored on backward.
    NoiseOutput,
    /// Overwrites output with the paired group's output.
    CopyOutputs { source: usize },
    /// Logistic under the driver's annealed gain, skipped for clamped units.
    BoltzmannLogistic,

    // --- cost chain ---
    SquaredError,
    CrossEntropyError,
    DivergenceError,
    CosineError,
    LinearCost,
    QuadraticCost,
    ConvexQuadraticCost,
    LogisticCost,
    CosineCost,
    /// Penalizes tick-to-tick output change.
    DeltaCost,
}

impl ProcKind {
    pub fn phase(&self) -> Phase {
        use ProcKind::*;
        match self {
            ClearInput | DotProduct | Distance | Product | BoltzmannDot | SoftClamp
            | IntegrateInput | NormalizeInput | NoiseInput | CopyInputs { .. } => Phase::Input,

            Logistic | AdaptiveLogistic | Tanh | Gaussian | Exponential | Linear | Softmax
            | HardClamp | WeakClamp | BiasClamp | ElmanClamp { .. } | WinnerTakeAll | Kohonen
            | InteractiveActivation | NoiseOutput | CopyOutputs { .. } | BoltzmannLogistic => {
                Phase::Output
            }

            SquaredError | CrossEntropyError | DivergenceError | CosineError | LinearCost
            | QuadraticCost | ConvexQuadraticCost | LogisticCost | CosineCost | DeltaCost => {
                Phase::Cost
            }
        }
    }

    pub fn has_backward(&self) -> bool {
        use ProcKind::*;
        !matches!(
            self,
            ClearInput
                | SoftClamp
                | NoiseInput
                | CopyInputs { .. }
                | InteractiveActivation
                | CopyOutputs { .. }
        )
    }

    /// Weighted aggregation over links ("basic" input types).
    pub fn is_aggregator(&self) -> bool {
        use ProcKind::*;
        matches!(self, DotProduct | Distance | Product | BoltzmannDot)
    }

    /// Forward unconditionally overwrites `input` for every unit.
    pub fn overwrites_input(&self) -> bool {
        use ProcKind::*;
        matches!(self, ClearInput | CopyInputs { .. })
    }

    /// Forward sets or manages `output` itself, so the orchestrator must
    /// not zero-fill first. Winner-take-all and output noise only modify
    /// what an earlier node produced and are deliberately absent.
    pub fn manages_output(&self) -> bool {
        use ProcKind::*;
        matches!(
            self,
            Logistic
                | AdaptiveLogistic
                | Tanh
                | Gaussian
                | Exponential
                | Linear
                | Softmax
                | BoltzmannLogistic
                | HardClamp
                | WeakClamp
                | BiasClamp
                | ElmanClamp { .. }
                | Kohonen
                | InteractiveActivation
                | CopyOutputs { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        use ProcKind::*;
        match self {
            ClearInput => "clear-input",
            DotProduct => "dot-product",
            Distance => "distance",
            Product => "product",
            BoltzmannDot => "boltzmann-dot",
            SoftClamp => "soft-clamp",
            IntegrateInput => "integrate-input",
            NormalizeInput => "normalize-input",
            NoiseInput => "noise-input",
            CopyInputs { .. } => "copy-inputs",
            Logistic => "logistic",
            AdaptiveLogistic => "adaptive-logistic",
            Tanh => "tanh",
            Gaussian => "gaussian",
            Exponential => "exponential",
            Linear => "linear",
            Softmax => "softmax",
            HardClamp => "hard-clamp",
            WeakClamp => "weak-clamp",
            BiasClamp => "bias-clamp",
            ElmanClamp { .. } => "elman-clamp",
            WinnerTakeAll => "winner-take-all",
            Kohonen => "kohonen",
            InteractiveActivation => "interactive-activation",
            NoiseOutput => "noise-output",
            CopyOutputs { .. } => "copy-outputs",
            BoltzmannLogistic => "boltzmann-logistic",
            SquaredError => "squared-error",
            CrossEntropyError => "cross-entropy-error",
            DivergenceError => "divergence-error",
            CosineError => "cosine-error",
            LinearCost => "linear-cost",
            QuadraticCost => "quadratic-cost",
            ConvexQuadraticCost => "convex-quadratic-cost",
            LogisticCost => "logistic-cost",
            CosineCost => "cosine-cost",
            DeltaCost => "delta-cost",
        }
    }

    /// The group this node reads from or routes credit to, if any.
    pub fn paired_source(&self) -> Option<usize> {
        use ProcKind::*;
        match self {
            CopyInputs { source } | ElmanClamp { source } | CopyOutputs { source } => {
                Some(*source)
            }
            _ => None,
        }
    }
}

/// A chain node: the kind tag plus the private state it owns. No other
/// node or driver touches this state.
#[derive(Debug, Clone)]
pub struct ProcNode {
    pub kind: ProcKind,
    /// Per-unit forward state (integrator level, Kohonen live mask).
    pub unit_data: Vec<f32>,
    /// Per-unit backward state (derivative-stream integrator).
    pub back_data: Vec<f32>,
    /// Per-tick-per-unit cache for procs that must replay old ticks.
    pub unit_history: HistoryMatrix,
    /// Per-tick scalar cache (normalization scale).
    pub group_history: Ring,
    /// Same-tick scalar scratch (cosine partials).
    pub group_data: Vec<f32>,
}

impl ProcNode {
    pub fn new(kind: ProcKind) -> Self {
        Self {
            kind,
            unit_data: Vec::new(),
            back_data: Vec::new(),
            unit_history: HistoryMatrix::empty(),
            group_history: Ring::empty(),
            group_data: Vec::new(),
        }
    }

    /// Allocates private state once the owning group is finalized.
    /// `slots` is at least 1 even when unit history recording is off, so
    /// same-tick backward caches (clamp masks, pre-selection outputs) work
    /// without a history ring.
    pub fn alloc(&mut self, slots: usize, num_units: usize) {
        use ProcKind::*;
        match self.kind {
            IntegrateInput => {
                self.unit_data = vec![0.0; num_units];
                self.back_data = vec![0.0; num_units];
            }
            Product | HardClamp | WeakClamp | WinnerTakeAll | Kohonen | NoiseOutput => {
                self.unit_history = HistoryMatrix::new(slots, num_units);
            }
            NormalizeInput => {
                self.group_history = Ring::new(slots);
            }
            CosineError => {
                // cos, 1/dot, 1/|output|^2
                self.group_data = vec![0.0; 3];
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Chain {
    pub nodes: Vec<ProcNode>,
}

impl Chain {
    pub fn from_kinds(kinds: &[ProcKind]) -> Self {
        Self {
            nodes: kinds.iter().map(|&k| ProcNode::new(k)).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn has(&self, pred: impl Fn(&ProcKind) -> bool) -> bool {
        self.nodes.iter().any(|n| pred(&n.kind))
    }

    /// Input phase: zero-fill unless some node unconditionally overwrites.
    pub fn needs_input_zero(&self) -> bool {
        !self.has(|k| k.overwrites_input())
    }

    pub fn has_aggregator(&self) -> bool {
        self.has(|k| k.is_aggregator())
    }

    /// Output phase: zero-fill only when no basic/clamping node is present.
    pub fn needs_output_zero(&self) -> bool {
        !self.has(|k| k.manages_output())
    }

    pub fn has_output_clamp(&self) -> bool {
        self.has(|k| matches!(k, ProcKind::HardClamp))
    }

    pub fn elman_sources(&self) -> impl Iterator<Item = usize> + '_ {
        self.nodes.iter().filter_map(|n| match n.kind {
            ProcKind::ElmanClamp { source } => Some(source),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_preserves_declaration_order() {
        let kinds = [
            ProcKind::DotProduct,
            ProcKind::IntegrateInput,
            ProcKind::NormalizeInput,
        ];
        let chain = Chain::from_kinds(&kinds);
        let stored: Vec<_> = chain.nodes.iter().map(|n| n.kind).collect();
        assert_eq!(stored, kinds);
        // Backward traversal is the exact reverse of forward.
        let backward: Vec<_> = chain.nodes.iter().rev().map(|n| n.kind).collect();
        assert_eq!(backward.first(), Some(&ProcKind::NormalizeInput));
        assert_eq!(backward.last(), Some(&ProcKind::DotProduct));
    }

    #[test]
    fn zero_fill_classification() {
        let dot = Chain::from_kinds(&[ProcKind::DotProduct]);
        assert!(dot.needs_input_zero());
        assert!(dot.has_aggregator());

        let copy = Chain::from_kinds(&[ProcKind::CopyInputs { source: 0 }]);
        assert!(!copy.needs_input_zero());

        let logistic = Chain::from_kinds(&[ProcKind::Logistic]);
        assert!(!logistic.needs_output_zero());

        let wta_only = Chain::from_kinds(&[ProcKind::WinnerTakeAll]);
        assert!(wta_only.needs_output_zero());
    }

    #[test]
    fn phases_are_disjoint() {
        assert_eq!(ProcKind::DotProduct.phase(), Phase::Input);
        assert_eq!(ProcKind::Softmax.phase(), Phase::Output);
        assert_eq!(ProcKind::SquaredError.phase(), Phase::Cost);
    }

    #[test]
    fn forward_only_nodes_report_no_backward() {
        assert!(!ProcKind::SoftClamp.has_backward());
        assert!(!ProcKind::NoiseInput.has_backward());
        assert!(!ProcKind::InteractiveActivation.has_backward());
        assert!(ProcKind::HardClamp.has_backward());
    }
}
