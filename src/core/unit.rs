// Per-neuron and per-edge records.
//
// A unit's clamp and target fields are `Option<f32>`: `None` means "no
// external clamp" / "no target this tick" and is never conflated with zero.

use crate::history::Ring;

/// A directed weighted edge, owned by its destination unit.
#[derive(Debug, Clone)]
pub struct Link {
    /// Index of the source unit inside the block's source group.
    pub src_unit: usize,
    pub weight: f32,
    /// Accumulated derivative. The core only ever adds to this; it is
    /// reset exclusively through `Network::reset_derivs`.
    pub deriv: f32,
    /// Last weight delta, written and read by the optimizer only.
    pub last_delta: f32,
}

impl Link {
    pub fn new(src_unit: usize, weight: f32) -> Self {
        Self {
            src_unit,
            weight,
            deriv: 0.0,
            last_delta: 0.0,
        }
    }
}

/// Links grouped by source group, for locality and per-source masking.
#[derive(Debug, Clone)]
pub struct LinkBlock {
    pub source: usize,
    pub links: Vec<Link>,
}

#[derive(Debug, Clone)]
pub struct Unit {
    pub input: f32,
    pub output: f32,
    pub external_input: Option<f32>,
    pub target: Option<f32>,
    /// Target after the radius adjustment; what cost backward actually uses.
    pub adjusted_target: Option<f32>,

    pub input_deriv: f32,
    pub output_deriv: f32,

    pub gain: f32,
    pub gain_deriv: f32,

    pub blocks: Vec<LinkBlock>,

    // History rings, empty unless the network records history.
    pub input_history: Ring,
    pub output_history: Ring,
    pub target_history: Ring,
    pub output_deriv_history: Ring,
}

impl Unit {
    pub fn new(gain: f32) -> Self {
        Self {
            input: 0.0,
            output: 0.0,
            external_input: None,
            target: None,
            adjusted_target: None,
            input_deriv: 0.0,
            output_deriv: 0.0,
            gain,
            gain_deriv: 0.0,
            blocks: Vec::new(),
            input_history: Ring::empty(),
            output_history: Ring::empty(),
            target_history: Ring::empty(),
            output_deriv_history: Ring::empty(),
        }
    }

    pub fn alloc_history(&mut self, len: usize) {
        if len > 0 {
            self.input_history = Ring::new(len);
            self.output_history = Ring::new(len);
            self.target_history = Ring::new(len);
            self.output_deriv_history = Ring::new(len);
        }
    }

    /// True when an external clamp, or a target during a grace period,
    /// pins this unit's output (Boltzmann masking rule).
    #[inline]
    pub fn is_clamped(&self, in_grace: bool) -> bool {
        self.external_input.is_some() || (in_grace && self.target.is_some())
    }
}
