// Output-chain kernels: activations with closed-form derivatives, the
// clamp family, and the competitive/self-organizing responses.
//
// Activation backward kernels overwrite `input_deriv` outright: the
// output chain is the sole producer of a unit's input derivative each
// sweep, exactly as the cost chain is the sole producer of its output
// derivative. Stateful kernels cache what they destroy (clean outputs,
// clamp masks) per tick, because the backward pass may replay a tick
// whose live state is long gone.

use crate::activate::PassCtx;
use crate::chain::ProcNode;

#[inline]
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

pub(crate) fn logistic_forward(ctx: &mut PassCtx) {
    let gain = ctx.p.gain;
    for unit in ctx.units.iter_mut() {
        unit.output = sigmoid(gain * unit.input);
    }
}

pub(crate) fn logistic_backward(ctx: &mut PassCtx) {
    let gain = ctx.p.gain;
    for unit in ctx.units.iter_mut() {
        let out = unit.output;
        unit.input_deriv = unit.output_deriv * gain * out * (1.0 - out);
    }
}

/// Per-unit gain variant; the gain derivative accumulates across ticks
/// like a link derivative does.
pub(crate) fn adaptive_logistic_forward(ctx: &mut PassCtx) {
    for unit in ctx.units.iter_mut() {
        unit.output = sigmoid(unit.gain * unit.input);
    }
}

pub(crate) fn adaptive_logistic_backward(ctx: &mut PassCtx) {
    for unit in ctx.units.iter_mut() {
        let out = unit.output;
        let act_deriv = out * (1.0 - out);
        unit.gain_deriv += unit.output_deriv * act_deriv * unit.input;
        unit.input_deriv = unit.output_deriv * unit.gain * act_deriv;
    }
}

pub(crate) fn tanh_forward(ctx: &mut PassCtx) {
    let gain = ctx.p.gain;
    for unit in ctx.units.iter_mut() {
        unit.output = (gain * unit.input).tanh();
    }
}

pub(crate) fn tanh_backward(ctx: &mut PassCtx) {
    let gain = ctx.p.gain;
    for unit in ctx.units.iter_mut() {
        let out = unit.output;
        unit.input_deriv = unit.output_deriv * gain * (1.0 - out * out);
    }
}

pub(crate) fn gaussian_forward(ctx: &mut PassCtx) {
    let gain = ctx.p.gain;
    for unit in ctx.units.iter_mut() {
        unit.output = (-unit.input * unit.input / gain).exp();
    }
}

pub(crate) fn gaussian_backward(ctx: &mut PassCtx) {
    let gain = ctx.p.gain;
    for unit in ctx.units.iter_mut() {
        unit.input_deriv = unit.output_deriv * (-2.0 * unit.input / gain) * unit.output;
    }
}

pub(crate) fn exponential_forward(ctx: &mut PassCtx) {
    let gain = ctx.p.gain;
    for unit in ctx.units.iter_mut() {
        unit.output = (gain * unit.input).exp();
    }
}

pub(crate) fn exponential_backward(ctx: &mut PassCtx) {
    let gain = ctx.p.gain;
    for unit in ctx.units.iter_mut() {
        unit.input_deriv = unit.output_deriv * gain * unit.output;
    }
}

pub(crate) fn linear_forward(ctx: &mut PassCtx) {
    let gain = ctx.p.gain;
    for unit in ctx.units.iter_mut() {
        unit.output = gain * unit.input;
    }
}

pub(crate) fn linear_backward(ctx: &mut PassCtx) {
    let gain = ctx.p.gain;
    for unit in ctx.units.iter_mut() {
        unit.input_deriv = unit.output_deriv * gain;
    }
}

/// Running-max subtraction guards the exponentials against overflow on
/// large-magnitude inputs; the outputs still sum to one.
pub(crate) fn softmax_forward(ctx: &mut PassCtx) {
    let max = ctx
        .units
        .iter()
        .map(|u| u.input)
        .fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0;
    for unit in ctx.units.iter_mut() {
        let e = (unit.input - max).exp();
        unit.output = e;
        sum += e;
    }
    if sum > 0.0 {
        for unit in ctx.units.iter_mut() {
            unit.output /= sum;
        }
    }
}

pub(crate) fn softmax_backward(ctx: &mut PassCtx) {
    let dot: f32 = ctx.units.iter().map(|u| u.output_deriv * u.output).sum();
    for unit in ctx.units.iter_mut() {
        unit.input_deriv = unit.output * (unit.output_deriv - dot);
    }
}

/// The clamp mask is recorded per tick: by the time backward runs, the
/// live input state differs from what forward saw.
pub(crate) fn hard_clamp_forward(ctx: &mut PassCtx, node: &mut ProcNode) {
    let slot = ctx.slot;
    for (i, unit) in ctx.units.iter_mut().enumerate() {
        let clamped = if let Some(ext) = unit.external_input {
            unit.output = ext;
            1.0
        } else {
            0.0
        };
        if let Some(slot) = slot {
            node.unit_history.row_mut(slot)[i] = clamped;
        }
    }
}

pub(crate) fn hard_clamp_backward(ctx: &mut PassCtx, node: &mut ProcNode) {
    let Some(slot) = ctx.slot else {
        return;
    };
    for (i, unit) in ctx.units.iter_mut().enumerate() {
        if node.unit_history.row(slot)[i] == 1.0 {
            unit.output_deriv = 0.0;
            unit.input_deriv = 0.0;
        }
    }
}

pub(crate) fn weak_clamp_forward(ctx: &mut PassCtx, node: &mut ProcNode) {
    let strength = ctx.p.clamp_strength;
    let slot = ctx.slot;
    for (i, unit) in ctx.units.iter_mut().enumerate() {
        let cached = if let Some(ext) = unit.external_input {
            let clean = unit.output;
            unit.output += strength * (ext - unit.output);
            clean
        } else {
            f32::NAN
        };
        if let Some(slot) = slot {
            node.unit_history.row_mut(slot)[i] = cached;
        }
    }
}

/// Restores the pre-blend output and rescales the derivative by the
/// share of the output the blend left in place.
pub(crate) fn weak_clamp_backward(ctx: &mut PassCtx, node: &mut ProcNode) {
    let strength = ctx.p.clamp_strength;
    let Some(slot) = ctx.slot else {
        return;
    };
    for (i, unit) in ctx.units.iter_mut().enumerate() {
        let clean = node.unit_history.row(slot)[i];
        if clean.is_nan() {
            continue;
        }
        unit.output = clean;
        unit.output_deriv *= 1.0 - strength;
    }
}

pub(crate) fn bias_clamp_forward(ctx: &mut PassCtx) {
    for unit in ctx.units.iter_mut() {
        unit.output = 1.0;
    }
}

pub(crate) fn bias_clamp_backward(ctx: &mut PassCtx) {
    for unit in ctx.units.iter_mut() {
        unit.output_deriv = 0.0;
        unit.input_deriv = 0.0;
    }
}

/// Recurrent context: the source group's cached output folds into this
/// group's output.
pub(crate) fn elman_forward(ctx: &mut PassCtx, source: usize) {
    let src = &ctx.caches[source].output;
    for (i, unit) in ctx.units.iter_mut().enumerate() {
        unit.output += src[i];
    }
}

/// Subtracts the context back out and routes the derivative to the
/// source group's cache, where its next backward sweep will fold it in.
pub(crate) fn elman_backward(ctx: &mut PassCtx, source: usize) {
    for (i, unit) in ctx.units.iter_mut().enumerate() {
        unit.output -= ctx.caches[source].output[i];
        ctx.caches[source].output_deriv[i] += unit.output_deriv;
    }
}

pub(crate) fn wta_forward(ctx: &mut PassCtx, node: &mut ProcNode) {
    let slot = ctx.slot;
    let mut winner = 0usize;
    let mut best = f32::NEG_INFINITY;
    for (i, unit) in ctx.units.iter().enumerate() {
        if let Some(slot) = slot {
            node.unit_history.row_mut(slot)[i] = unit.output;
        }
        if unit.output > best {
            best = unit.output;
            winner = i;
        }
    }
    for (i, unit) in ctx.units.iter_mut().enumerate() {
        if i != winner {
            unit.output = 0.0;
        }
    }
}

pub(crate) fn wta_backward(ctx: &mut PassCtx, node: &mut ProcNode) {
    let Some(slot) = ctx.slot else {
        return;
    };
    for (i, unit) in ctx.units.iter_mut().enumerate() {
        let cached = node.unit_history.row(slot)[i];
        if !cached.is_nan() {
            unit.output = cached;
        }
    }
}

/// Self-organizing response: the minimum-input unit wins and excites a
/// 2-D neighborhood with linear falloff, optionally wrapping at the grid
/// edges. The fired mask is the backward gate.
pub(crate) fn kohonen_forward(ctx: &mut PassCtx, node: &mut ProcNode) {
    let n = ctx.units.len();
    let rows = ctx.p.kohonen_rows.max(1).min(n);
    let cols = n.div_ceil(rows);
    let radius = ctx.p.kohonen_radius;
    let periodic = ctx.p.kohonen_periodic;
    let slot = ctx.slot;

    let mut winner = 0usize;
    let mut best = f32::INFINITY;
    for (i, unit) in ctx.units.iter().enumerate() {
        if unit.input < best {
            best = unit.input;
            winner = i;
        }
    }
    let (wr, wc) = (winner / cols, winner % cols);

    for (i, unit) in ctx.units.iter_mut().enumerate() {
        let (r, c) = (i / cols, i % cols);
        let mut dr = (r as f32 - wr as f32).abs();
        let mut dc = (c as f32 - wc as f32).abs();
        if periodic {
            dr = dr.min(rows as f32 - dr);
            dc = dc.min(cols as f32 - dc);
        }
        let dist = (dr * dr + dc * dc).sqrt();
        let fired = dist <= radius;
        unit.output = if fired {
            1.0 - dist / (radius + 1.0)
        } else {
            0.0
        };
        if let Some(slot) = slot {
            node.unit_history.row_mut(slot)[i] = if fired { 1.0 } else { 0.0 };
        }
    }
}

pub(crate) fn kohonen_backward(ctx: &mut PassCtx, node: &mut ProcNode) {
    let Some(slot) = ctx.slot else {
        return;
    };
    for (i, unit) in ctx.units.iter_mut().enumerate() {
        unit.input_deriv = if node.unit_history.row(slot)[i] == 1.0 {
            unit.output_deriv
        } else {
            0.0
        };
    }
}

/// Grossberg-style shunting update. The effective rate flips with the
/// sign of the input relative to the ceiling/floor levels; output decays
/// toward rest and is clipped to `[0, ceiling]`. Forward only.
pub(crate) fn iac_forward(ctx: &mut PassCtx) {
    let p = ctx.p;
    let rate = p.dt * p.dt_scale;
    for unit in ctx.units.iter_mut() {
        let net = unit.input;
        let mut delta = if net > 0.0 {
            net * (p.ceiling - unit.output)
        } else {
            net * (unit.output - p.floor)
        };
        delta -= p.iac_decay * (unit.output - p.rest_level);
        unit.output = (unit.output + rate * delta).clamp(0.0, p.ceiling);
    }
}

pub(crate) fn noise_output_forward(ctx: &mut PassCtx, node: &mut ProcNode) {
    let range = ctx.p.noise_range;
    let multiplicative = ctx.p.noise_multiplicative;
    let slot = ctx.slot;
    for (i, unit) in ctx.units.iter_mut().enumerate() {
        if let Some(slot) = slot {
            node.unit_history.row_mut(slot)[i] = unit.output;
        }
        let n = ctx.prng.gen_noise(range);
        if multiplicative {
            unit.output *= 1.0 + n;
        } else {
            unit.output += n;
        }
    }
}

pub(crate) fn noise_output_backward(ctx: &mut PassCtx, node: &mut ProcNode) {
    let Some(slot) = ctx.slot else {
        return;
    };
    for (i, unit) in ctx.units.iter_mut().enumerate() {
        let clean = node.unit_history.row(slot)[i];
        if !clean.is_nan() {
            unit.output = clean;
        }
    }
}

pub(crate) fn copy_outputs_forward(ctx: &mut PassCtx, source: usize) {
    for (i, unit) in ctx.units.iter_mut().enumerate() {
        unit.output = ctx.caches[source].output[i];
    }
}

/// Logistic under the annealed temperature, skipped while a clamp (or a
/// grace-period target) pins the unit.
pub(crate) fn boltzmann_logistic_forward(ctx: &mut PassCtx) {
    let gain = ctx.act_gain();
    let in_grace = ctx.in_grace;
    for unit in ctx.units.iter_mut() {
        if unit.is_clamped(in_grace) {
            continue;
        }
        unit.output = sigmoid(gain * unit.input);
    }
}

pub(crate) fn boltzmann_logistic_backward(ctx: &mut PassCtx) {
    let gain = ctx.act_gain();
    let in_grace = ctx.in_grace;
    for unit in ctx.units.iter_mut() {
        if unit.is_clamped(in_grace) {
            unit.input_deriv = 0.0;
            continue;
        }
        let out = unit.output;
        unit.input_deriv = unit.output_deriv * gain * out * (1.0 - out);
    }
}
