// Cost-chain kernels: target-based error measures and target-free output
// penalties.
//
// Error forward kernels accumulate scaled error into the group and
// network totals; the matching backward kernels add the derivative onto
// `output_deriv` (which `compute_cost_back` has already zeroed). All
// divide-by-zero edges saturate to large finite values, never infinities.

use crate::activate::PassCtx;
use crate::chain::{ProcKind, ProcNode};

/// Outputs are kept this far away from {0, 1} inside logs and divisions,
/// which caps a cross-entropy term at a large finite cost.
const OUTPUT_MARGIN: f32 = 1e-7;

/// The radius adjustment shared by the pointwise error measures: inside
/// `zero_error_radius` the target collapses onto the output (no error);
/// beyond `target_radius` the target moves to the radius boundary.
fn adjust_target(output: f32, target: f32, zero_radius: f32, target_radius: f32) -> f32 {
    let gap = output - target;
    if gap.abs() < zero_radius {
        return output;
    }
    if target_radius > 0.0 && gap.abs() > target_radius {
        return if gap > 0.0 {
            output - target_radius
        } else {
            output + target_radius
        };
    }
    target
}

pub(crate) fn squared_error_forward(ctx: &mut PassCtx) {
    let p = ctx.p;
    for unit in ctx.units.iter_mut() {
        let Some(target) = unit.target else {
            unit.adjusted_target = None;
            continue;
        };
        let t = adjust_target(unit.output, target, p.zero_error_radius, p.target_radius);
        unit.adjusted_target = Some(t);
        let d = unit.output - t;
        let e = p.error_scale * d * d;
        *ctx.group_error += e;
        *ctx.error += e;
    }
}

pub(crate) fn squared_error_backward(ctx: &mut PassCtx) {
    let scale = ctx.p.error_scale;
    for unit in ctx.units.iter_mut() {
        let Some(t) = unit.adjusted_target else {
            continue;
        };
        unit.output_deriv += 2.0 * scale * (unit.output - t);
    }
}

pub(crate) fn cross_entropy_forward(ctx: &mut PassCtx) {
    let p = ctx.p;
    for unit in ctx.units.iter_mut() {
        let Some(target) = unit.target else {
            unit.adjusted_target = None;
            continue;
        };
        let t = adjust_target(unit.output, target, p.zero_error_radius, p.target_radius);
        unit.adjusted_target = Some(t);
        let o = unit.output.clamp(OUTPUT_MARGIN, 1.0 - OUTPUT_MARGIN);
        let mut e = 0.0;
        if t > 0.0 {
            e += t * (t / o).ln();
        }
        if t < 1.0 {
            e += (1.0 - t) * ((1.0 - t) / (1.0 - o)).ln();
        }
        let e = p.error_scale * e;
        *ctx.group_error += e;
        *ctx.error += e;
    }
}

pub(crate) fn cross_entropy_backward(ctx: &mut PassCtx) {
    let scale = ctx.p.error_scale;
    for unit in ctx.units.iter_mut() {
        let Some(t) = unit.adjusted_target else {
            continue;
        };
        let o = unit.output.clamp(OUTPUT_MARGIN, 1.0 - OUTPUT_MARGIN);
        unit.output_deriv += scale * (o - t) / (o * (1.0 - o));
    }
}

pub(crate) fn divergence_forward(ctx: &mut PassCtx) {
    let p = ctx.p;
    for unit in ctx.units.iter_mut() {
        let Some(target) = unit.target else {
            unit.adjusted_target = None;
            continue;
        };
        let t = adjust_target(unit.output, target, p.zero_error_radius, p.target_radius);
        unit.adjusted_target = Some(t);
        if t <= 0.0 {
            continue;
        }
        let o = unit.output.clamp(OUTPUT_MARGIN, 1.0 - OUTPUT_MARGIN);
        let e = p.error_scale * t * (t / o).ln();
        *ctx.group_error += e;
        *ctx.error += e;
    }
}

pub(crate) fn divergence_backward(ctx: &mut PassCtx) {
    let scale = ctx.p.error_scale;
    for unit in ctx.units.iter_mut() {
        let Some(t) = unit.adjusted_target else {
            continue;
        };
        if t <= 0.0 {
            continue;
        }
        let o = unit.output.clamp(OUTPUT_MARGIN, 1.0 - OUTPUT_MARGIN);
        unit.output_deriv += -scale * t / o;
    }
}

/// Computed once per group, not per unit. The backward pass reuses the
/// cached `1/dot` and `1/|output|^2` partials.
pub(crate) fn cosine_error_forward(ctx: &mut PassCtx, node: &mut ProcNode) {
    let mut dot = 0.0;
    let mut norm_o = 0.0;
    let mut norm_t = 0.0;
    let mut any = false;
    for unit in ctx.units.iter() {
        let Some(t) = unit.target else { continue };
        any = true;
        dot += unit.output * t;
        norm_o += unit.output * unit.output;
        norm_t += t * t;
    }
    if !any {
        node.group_data.fill(0.0);
        return;
    }
    let denom = (norm_o * norm_t).sqrt();
    let cos = if denom > 0.0 { dot / denom } else { 0.0 };
    let e = ctx.p.error_scale * (1.0 - cos);
    *ctx.group_error += e;
    *ctx.error += e;

    node.group_data[0] = cos;
    node.group_data[1] = if dot != 0.0 { 1.0 / dot } else { 0.0 };
    node.group_data[2] = if norm_o != 0.0 { 1.0 / norm_o } else { 0.0 };
}

pub(crate) fn cosine_error_backward(ctx: &mut PassCtx, node: &mut ProcNode) {
    let cos = node.group_data[0];
    let inv_dot = node.group_data[1];
    let inv_norm_o = node.group_data[2];
    if cos == 0.0 {
        return;
    }
    let scale = ctx.p.error_scale;
    for unit in ctx.units.iter_mut() {
        let Some(t) = unit.target else { continue };
        let d_cos = cos * (t * inv_dot - unit.output * inv_norm_o);
        unit.output_deriv += -scale * d_cos;
    }
}

/// Penalty shape around the peak, normalized so the cost lies in [0, 1]
/// over the unit interval. Highest exactly at the peak: these penalties
/// push outputs away from ambiguity, not toward a target.
fn penalty(kind: ProcKind, out: f32, peak: f32, gain: f32) -> (f32, f32) {
    let m = peak.max(1.0 - peak).max(OUTPUT_MARGIN);
    let d = out - peak;
    match kind {
        ProcKind::LinearCost => {
            let c = 1.0 - d.abs() / m;
            (c.max(0.0), if c > 0.0 { -d.signum() / m } else { 0.0 })
        }
        ProcKind::QuadraticCost => {
            let x = d / m;
            (1.0 - x * x, -2.0 * d / (m * m))
        }
        ProcKind::ConvexQuadraticCost => {
            let x = (1.0 - d.abs() / m).max(0.0);
            (x * x, if x > 0.0 { -2.0 * x * d.signum() / m } else { 0.0 })
        }
        ProcKind::LogisticCost => {
            let s = 1.0 / (1.0 + (-gain * d).exp());
            let c = 4.0 * s * (1.0 - s);
            let dc = 4.0 * gain * s * (1.0 - s) * (1.0 - 2.0 * s);
            (c, dc)
        }
        ProcKind::CosineCost => {
            let x = core::f32::consts::PI * d / m;
            if x.abs() >= core::f32::consts::PI {
                (0.0, 0.0)
            } else {
                (
                    0.5 * (1.0 + x.cos()),
                    -0.5 * core::f32::consts::PI / m * x.sin(),
                )
            }
        }
        _ => (0.0, 0.0),
    }
}

pub(crate) fn output_cost_forward(ctx: &mut PassCtx, kind: ProcKind) {
    let p = ctx.p;
    if p.output_cost_scale == 0.0 {
        return;
    }
    for unit in ctx.units.iter() {
        let (c, _) = penalty(kind, unit.output, p.output_cost_peak, p.gain);
        let e = p.output_cost_scale * c;
        *ctx.group_output_cost += e;
        *ctx.output_cost += e;
    }
}

pub(crate) fn output_cost_backward(ctx: &mut PassCtx, kind: ProcKind) {
    let p = ctx.p;
    if p.output_cost_scale == 0.0 {
        return;
    }
    for unit in ctx.units.iter_mut() {
        let (_, dc) = penalty(kind, unit.output, p.output_cost_peak, p.gain);
        unit.output_deriv += p.output_cost_scale * dc;
    }
}

/// Penalizes tick-to-tick output change. An unavailable or NaN previous
/// output is the reset marker: nothing is charged across it.
pub(crate) fn delta_cost_forward(ctx: &mut PassCtx) {
    let p = ctx.p;
    if p.output_cost_scale == 0.0 {
        return;
    }
    let Some(prev_slot) = ctx.prev_slot else {
        return;
    };
    for unit in ctx.units.iter() {
        let prev = unit.output_history.restore(prev_slot);
        if prev.is_nan() {
            continue;
        }
        let d = unit.output - prev;
        let e = p.output_cost_scale * d * d;
        *ctx.group_output_cost += e;
        *ctx.output_cost += e;
    }
}

pub(crate) fn delta_cost_backward(ctx: &mut PassCtx) {
    let p = ctx.p;
    if p.output_cost_scale == 0.0 {
        return;
    }
    let Some(prev_slot) = ctx.prev_slot else {
        return;
    };
    for unit in ctx.units.iter_mut() {
        let prev = unit.output_history.restore(prev_slot);
        if prev.is_nan() {
            continue;
        }
        unit.output_deriv += 2.0 * p.output_cost_scale * (unit.output - prev);
    }
}
