// Groups: ordered units of one type plus their three processor chains.
//
// The flat output/outputDeriv caches are the only state other groups may
// touch. They live in a container parallel to the group list (see
// `Network`) so cross-group reads and derivative routing never alias the
// group being processed.

use crate::chain::{Chain, Phase, ProcKind};
use crate::config::GroupParams;
use crate::criterion::CriterionKind;
use crate::unit::Unit;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Build-time description of a group, consumed by `Network::add_group`.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GroupSpec {
    pub name: String,
    pub num_units: usize,
    #[cfg_attr(feature = "serde", serde(default))]
    pub input: Vec<ProcKind>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub output: Vec<ProcKind>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub cost: Vec<ProcKind>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub criterion: Option<CriterionKind>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub reset_on_example: bool,
    #[cfg_attr(feature = "serde", serde(default))]
    pub params: GroupParams,
}

impl GroupSpec {
    pub fn new(name: &str, num_units: usize) -> Self {
        Self {
            name: name.to_string(),
            num_units,
            input: Vec::new(),
            output: Vec::new(),
            cost: Vec::new(),
            criterion: None,
            reset_on_example: false,
            params: GroupParams::default(),
        }
    }

    pub fn with_input(mut self, kinds: &[ProcKind]) -> Self {
        self.input = kinds.to_vec();
        self
    }

    pub fn with_output(mut self, kinds: &[ProcKind]) -> Self {
        self.output = kinds.to_vec();
        self
    }

    pub fn with_cost(mut self, kinds: &[ProcKind]) -> Self {
        self.cost = kinds.to_vec();
        self
    }

    pub fn with_criterion(mut self, kind: CriterionKind) -> Self {
        self.criterion = Some(kind);
        self
    }

    pub fn with_params(mut self, params: GroupParams) -> Self {
        self.params = params;
        self
    }

    pub fn reset_on_example(mut self) -> Self {
        self.reset_on_example = true;
        self
    }
}

#[derive(Debug, Clone)]
pub struct Group {
    pub name: String,
    pub units: Vec<Unit>,
    pub input_chain: Chain,
    pub output_chain: Chain,
    pub cost_chain: Chain,
    pub criterion: Option<CriterionKind>,
    pub reset_on_example: bool,
    pub params: GroupParams,
    pub error: f32,
    pub output_cost: f32,
}

impl Group {
    #[inline]
    pub fn num_units(&self) -> usize {
        self.units.len()
    }

    /// Output chain contains a hard clamp.
    pub fn is_output_clamped(&self) -> bool {
        self.output_chain.has_output_clamp()
    }

    pub fn is_bias(&self) -> bool {
        self.output_chain.has(|k| matches!(k, ProcKind::BiasClamp))
    }

    /// Every unit currently carries an external input.
    pub fn fully_ext_clamped(&self) -> bool {
        self.units.iter().all(|u| u.external_input.is_some())
    }

    pub fn chain(&self, phase: Phase) -> &Chain {
        match phase {
            Phase::Input => &self.input_chain,
            Phase::Output => &self.output_chain,
            Phase::Cost => &self.cost_chain,
        }
    }
}

/// The cross-group-visible mirror of a group's outputs and output
/// derivatives. Indexed in lockstep with `Network::groups`.
#[derive(Debug, Clone)]
pub struct GroupCache {
    pub output: Vec<f32>,
    pub output_deriv: Vec<f32>,
}

impl GroupCache {
    pub fn new(num_units: usize) -> Self {
        Self {
            output: vec![0.0; num_units],
            output_deriv: vec![0.0; num_units],
        }
    }
}
