// Hyperparameter surface.
//
// Values resolve through an override chain: unit/link -> group -> network.
// A group leaves a knob unset (`None`) to fall through to the network
// default. Per-unit gain is the only unit-level override and lives on the
// unit record itself.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Network-wide defaults plus the global time parameters.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct NetworkParams {
    /// History ring length in ticks. Zero disables history recording
    /// (and with it every replaying driver).
    pub history_length: usize,
    /// Euler sub-steps per nominal time interval (continuous driver).
    pub ticks_per_interval: usize,
    /// Hard cap on ticks spent inside one example.
    pub max_ticks: usize,
    /// Truncation depth for the standard driver. 1 means no unroll.
    pub backprop_ticks: usize,

    pub gain: f32,
    pub dt: f32,
    pub dt_scale: f32,
    pub integration_rate: f32,

    pub clamp_strength: f32,
    pub noise_range: f32,
    pub noise_multiplicative: bool,

    pub target_radius: f32,
    pub zero_error_radius: f32,
    pub error_scale: f32,
    pub output_cost_scale: f32,
    pub output_cost_peak: f32,

    /// Criterion tolerance, also the Boltzmann settling tolerance.
    pub criterion: f32,

    /// Boltzmann annealing schedule: gain moves geometrically from
    /// `init_gain` to `final_gain` over `anneal_ticks` ticks.
    pub init_gain: f32,
    pub final_gain: f32,
    pub anneal_ticks: usize,

    /// Interactive-activation levels.
    pub rest_level: f32,
    pub ceiling: f32,
    pub floor: f32,
    pub iac_decay: f32,

    /// Kohonen neighborhood: grid rows, radius in cells, periodic wrap.
    pub kohonen_rows: usize,
    pub kohonen_radius: f32,
    pub kohonen_periodic: bool,

    pub seed: u64,
}

impl Default for NetworkParams {
    fn default() -> Self {
        Self {
            history_length: 0,
            ticks_per_interval: 1,
            max_ticks: 100,
            backprop_ticks: 1,

            gain: 1.0,
            dt: 1.0,
            dt_scale: 1.0,
            integration_rate: 1.0,

            clamp_strength: 0.5,
            noise_range: 0.1,
            noise_multiplicative: false,

            target_radius: 0.0,
            zero_error_radius: 0.0,
            error_scale: 1.0,
            output_cost_scale: 1.0,
            output_cost_peak: 0.5,

            criterion: 0.2,

            init_gain: 0.2,
            final_gain: 1.0,
            anneal_ticks: 10,

            rest_level: 0.0,
            ceiling: 1.0,
            floor: -0.2,
            iac_decay: 0.1,

            kohonen_rows: 1,
            kohonen_radius: 1.0,
            kohonen_periodic: false,

            seed: 1,
        }
    }
}

/// Per-group overrides. `None` falls through to the network value.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct GroupParams {
    pub gain: Option<f32>,
    pub dt_scale: Option<f32>,
    pub integration_rate: Option<f32>,

    pub clamp_strength: Option<f32>,
    pub noise_range: Option<f32>,
    pub noise_multiplicative: Option<bool>,

    pub target_radius: Option<f32>,
    pub zero_error_radius: Option<f32>,
    pub error_scale: Option<f32>,
    pub output_cost_scale: Option<f32>,
    pub output_cost_peak: Option<f32>,

    pub criterion: Option<f32>,

    pub init_gain: Option<f32>,
    pub final_gain: Option<f32>,
    pub anneal_ticks: Option<usize>,

    pub rest_level: Option<f32>,
    pub ceiling: Option<f32>,
    pub floor: Option<f32>,
    pub iac_decay: Option<f32>,

    pub kohonen_rows: Option<usize>,
    pub kohonen_radius: Option<f32>,
    pub kohonen_periodic: Option<bool>,
}

/// Fully resolved knobs for one group, recomputed per pass.
#[derive(Debug, Clone, Copy)]
pub struct Resolved {
    pub gain: f32,
    pub dt: f32,
    pub dt_scale: f32,
    pub integration_rate: f32,

    pub clamp_strength: f32,
    pub noise_range: f32,
    pub noise_multiplicative: bool,

    pub target_radius: f32,
    pub zero_error_radius: f32,
    pub error_scale: f32,
    pub output_cost_scale: f32,
    pub output_cost_peak: f32,

    pub criterion: f32,

    pub init_gain: f32,
    pub final_gain: f32,
    pub anneal_ticks: usize,

    pub rest_level: f32,
    pub ceiling: f32,
    pub floor: f32,
    pub iac_decay: f32,

    pub kohonen_rows: usize,
    pub kohonen_radius: f32,
    pub kohonen_periodic: bool,
}

impl GroupParams {
    pub fn resolve(&self, net: &NetworkParams) -> Resolved {
        Resolved {
            gain: self.gain.unwrap_or(net.gain),
            dt: net.dt,
            dt_scale: self.dt_scale.unwrap_or(net.dt_scale),
            integration_rate: self.integration_rate.unwrap_or(net.integration_rate),

            clamp_strength: self.clamp_strength.unwrap_or(net.clamp_strength),
            noise_range: self.noise_range.unwrap_or(net.noise_range),
            noise_multiplicative: self
                .noise_multiplicative
                .unwrap_or(net.noise_multiplicative),

            target_radius: self.target_radius.unwrap_or(net.target_radius),
            zero_error_radius: self.zero_error_radius.unwrap_or(net.zero_error_radius),
            error_scale: self.error_scale.unwrap_or(net.error_scale),
            output_cost_scale: self.output_cost_scale.unwrap_or(net.output_cost_scale),
            output_cost_peak: self.output_cost_peak.unwrap_or(net.output_cost_peak),

            criterion: self.criterion.unwrap_or(net.criterion),

            init_gain: self.init_gain.unwrap_or(net.init_gain),
            final_gain: self.final_gain.unwrap_or(net.final_gain),
            anneal_ticks: self.anneal_ticks.unwrap_or(net.anneal_ticks),

            rest_level: self.rest_level.unwrap_or(net.rest_level),
            ceiling: self.ceiling.unwrap_or(net.ceiling),
            floor: self.floor.unwrap_or(net.floor),
            iac_decay: self.iac_decay.unwrap_or(net.iac_decay),

            kohonen_rows: self.kohonen_rows.unwrap_or(net.kohonen_rows),
            kohonen_radius: self.kohonen_radius.unwrap_or(net.kohonen_radius),
            kohonen_periodic: self.kohonen_periodic.unwrap_or(net.kohonen_periodic),
        }
    }
}
