// Input-chain kernels: weighted aggregation over link blocks and the
// stateful input transforms.
//
// Forward kernels accumulate into or transform `unit.input`; backward
// kernels consume `unit.input_deriv` as produced by the output chain and
// route credit into `link.deriv` and the source groups' derivative caches.

use crate::activate::PassCtx;
use crate::chain::ProcNode;

const CLAMP_EPS: f32 = 1e-6;

pub(crate) fn clear_forward(ctx: &mut PassCtx) {
    for unit in ctx.units.iter_mut() {
        unit.input = 0.0;
    }
}

pub(crate) fn dot_forward(ctx: &mut PassCtx) {
    for unit in ctx.units.iter_mut() {
        let mut sum = 0.0;
        for block in &unit.blocks {
            let src = &ctx.caches[block.source].output;
            for link in &block.links {
                sum += src[link.src_unit] * link.weight;
            }
        }
        unit.input += sum;
    }
}

pub(crate) fn dot_backward(ctx: &mut PassCtx) {
    for unit in ctx.units.iter_mut() {
        let id = unit.input_deriv;
        for block in unit.blocks.iter_mut() {
            let cache = &mut ctx.caches[block.source];
            for link in block.links.iter_mut() {
                cache.output_deriv[link.src_unit] += id * link.weight;
                link.deriv += id * cache.output[link.src_unit];
            }
        }
    }
}

pub(crate) fn distance_forward(ctx: &mut PassCtx) {
    for unit in ctx.units.iter_mut() {
        let mut sum = 0.0;
        for block in &unit.blocks {
            let src = &ctx.caches[block.source].output;
            for link in &block.links {
                let d = link.weight - src[link.src_unit];
                sum += d * d;
            }
        }
        unit.input += sum;
    }
}

pub(crate) fn distance_backward(ctx: &mut PassCtx) {
    for unit in ctx.units.iter_mut() {
        let id = unit.input_deriv;
        for block in unit.blocks.iter_mut() {
            let cache = &mut ctx.caches[block.source];
            for link in block.links.iter_mut() {
                let d = 2.0 * id * (link.weight - cache.output[link.src_unit]);
                link.deriv += d;
                cache.output_deriv[link.src_unit] -= d;
            }
        }
    }
}

/// The per-tick product is cached so backward can divide factors back
/// out. Division near zero is as unstable as it sounds; exact zeros are
/// skipped rather than allowed to poison the derivative with infinities.
pub(crate) fn product_forward(ctx: &mut PassCtx, node: &mut ProcNode) {
    let slot = ctx.slot;
    for (i, unit) in ctx.units.iter_mut().enumerate() {
        let mut prod = 1.0;
        for block in &unit.blocks {
            let src = &ctx.caches[block.source].output;
            for link in &block.links {
                prod *= src[link.src_unit] * link.weight;
            }
        }
        unit.input += prod;
        if let Some(slot) = slot {
            node.unit_history.row_mut(slot)[i] = prod;
        }
    }
}

pub(crate) fn product_backward(ctx: &mut PassCtx, node: &mut ProcNode) {
    let Some(slot) = ctx.slot else {
        return;
    };
    for (i, unit) in ctx.units.iter_mut().enumerate() {
        let prod = node.unit_history.row(slot)[i];
        if prod.is_nan() {
            continue;
        }
        let id = unit.input_deriv;
        for block in unit.blocks.iter_mut() {
            let cache = &mut ctx.caches[block.source];
            for link in block.links.iter_mut() {
                let s = cache.output[link.src_unit];
                let denom = s * link.weight;
                if denom == 0.0 {
                    continue;
                }
                let rest = prod / denom;
                cache.output_deriv[link.src_unit] += id * rest * link.weight;
                link.deriv += id * rest * s;
            }
        }
    }
}

/// Mean-field input: the weighted sum, skipped outright for units whose
/// output is currently pinned by a clamp (or by a target during grace).
pub(crate) fn boltzmann_dot_forward(ctx: &mut PassCtx) {
    let in_grace = ctx.in_grace;
    for unit in ctx.units.iter_mut() {
        if unit.is_clamped(in_grace) {
            continue;
        }
        let mut sum = 0.0;
        for block in &unit.blocks {
            let src = &ctx.caches[block.source].output;
            for link in &block.links {
                sum += src[link.src_unit] * link.weight;
            }
        }
        unit.input += sum;
    }
}

pub(crate) fn boltzmann_dot_backward(ctx: &mut PassCtx) {
    let in_grace = ctx.in_grace;
    for unit in ctx.units.iter_mut() {
        if unit.is_clamped(in_grace) {
            continue;
        }
        let id = unit.input_deriv;
        for block in unit.blocks.iter_mut() {
            let cache = &mut ctx.caches[block.source];
            for link in block.links.iter_mut() {
                cache.output_deriv[link.src_unit] += id * link.weight;
                link.deriv += id * cache.output[link.src_unit];
            }
        }
    }
}

/// Inverse-activation bias toward the clamp value; forward only.
pub(crate) fn soft_clamp_forward(ctx: &mut PassCtx) {
    let strength = ctx.p.clamp_strength;
    let gain = ctx.p.gain;
    for unit in ctx.units.iter_mut() {
        let Some(ext) = unit.external_input else {
            continue;
        };
        let e = ext.clamp(CLAMP_EPS, 1.0 - CLAMP_EPS);
        unit.input += strength * (e / (1.0 - e)).ln() / gain;
    }
}

pub(crate) fn integrate_forward(ctx: &mut PassCtx, node: &mut ProcNode) {
    let rate = ctx.p.dt * ctx.p.dt_scale * ctx.p.integration_rate;
    for (i, unit) in ctx.units.iter_mut().enumerate() {
        let last = node.unit_data[i];
        let v = last + rate * (unit.input - last);
        node.unit_data[i] = v;
        unit.input = v;
    }
}

/// The same leak recurrence, run on the derivative stream. The driver
/// resets `back_data` before each fresh backward sweep, so the initial
/// value and decay mirror the forward pass.
pub(crate) fn integrate_backward(ctx: &mut PassCtx, node: &mut ProcNode) {
    let rate = ctx.p.dt * ctx.p.dt_scale * ctx.p.integration_rate;
    for (i, unit) in ctx.units.iter_mut().enumerate() {
        let last = node.back_data[i];
        let v = last + rate * (unit.input_deriv - last);
        node.back_data[i] = v;
        unit.input_deriv = v;
    }
}

pub(crate) fn normalize_forward(ctx: &mut PassCtx, node: &mut ProcNode) {
    let sum: f32 = ctx.units.iter().map(|u| u.input).sum();
    // A zero sum skips scaling rather than dividing.
    let scale = if sum == 0.0 { 1.0 } else { 1.0 / sum };
    if sum != 0.0 {
        for unit in ctx.units.iter_mut() {
            unit.input *= scale;
        }
    }
    if let Some(slot) = ctx.slot {
        node.group_history.store(slot, scale);
    }
}

pub(crate) fn normalize_backward(ctx: &mut PassCtx, node: &mut ProcNode) {
    let Some(slot) = ctx.slot else {
        return;
    };
    let scale = node.group_history.restore(slot);
    if scale.is_nan() {
        return;
    }
    // Inputs hold the normalized values, both same-tick and on replay.
    let dot: f32 = ctx.units.iter().map(|u| u.input_deriv * u.input).sum();
    for unit in ctx.units.iter_mut() {
        unit.input_deriv = scale * (unit.input_deriv - dot);
    }
}

pub(crate) fn noise_input_forward(ctx: &mut PassCtx) {
    let range = ctx.p.noise_range;
    let multiplicative = ctx.p.noise_multiplicative;
    for unit in ctx.units.iter_mut() {
        let n = ctx.prng.gen_noise(range);
        if multiplicative {
            unit.input *= 1.0 + n;
        } else {
            unit.input += n;
        }
    }
}

pub(crate) fn copy_inputs_forward(ctx: &mut PassCtx, source: usize) {
    for (i, unit) in ctx.units.iter_mut().enumerate() {
        unit.input = ctx.caches[source].output[i];
    }
}
