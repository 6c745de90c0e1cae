// Output-acceptance criteria.
//
// A group either checks every targeted unit against a tolerance, or only
// the identity of the winning unit. Groups without targets pass vacuously;
// a network with no criterion-bearing group is never "reached".

use crate::unit::Unit;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CriterionKind {
    /// Every unit with a target lies within the tolerance of it.
    Standard,
    /// The highest-target unit is also the highest-output unit, and their
    /// output/target gap is below the tolerance.
    Max,
}

pub fn group_reached(units: &[Unit], kind: CriterionKind, tolerance: f32) -> bool {
    match kind {
        CriterionKind::Standard => units.iter().all(|u| match u.target {
            Some(t) => (u.output - t).abs() < tolerance,
            None => true,
        }),
        CriterionKind::Max => {
            let mut best_target: Option<(usize, f32)> = None;
            let mut best_output: Option<(usize, f32)> = None;
            for (i, u) in units.iter().enumerate() {
                // The output winner counts every unit; only targeted units
                // compete for the target winner.
                if best_output.map(|(_, bo)| u.output > bo).unwrap_or(true) {
                    best_output = Some((i, u.output));
                }
                let Some(t) = u.target else { continue };
                if best_target.map(|(_, bt)| t > bt).unwrap_or(true) {
                    best_target = Some((i, t));
                }
            }
            match (best_target, best_output) {
                // Vacuously true when nothing carries a target.
                (None, _) => true,
                (Some((ti, t)), Some((oi, _))) => {
                    ti == oi && (units[ti].output - t).abs() < tolerance
                }
                (Some(_), None) => false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(output: f32, target: Option<f32>) -> Unit {
        let mut u = Unit::new(1.0);
        u.output = output;
        u.target = target;
        u
    }

    #[test]
    fn all_none_targets_is_vacuously_reached() {
        let units = vec![unit(0.9, None), unit(0.1, None)];
        assert!(group_reached(&units, CriterionKind::Standard, 0.2));
        assert!(group_reached(&units, CriterionKind::Max, 0.2));
    }

    #[test]
    fn standard_tolerance_is_exclusive_at_the_boundary() {
        let tol = 0.2;
        let at_boundary = vec![unit(0.5 + tol, Some(0.5))];
        assert!(!group_reached(&at_boundary, CriterionKind::Standard, tol));

        let just_inside = vec![unit(0.5 + tol - 1e-4, Some(0.5))];
        assert!(group_reached(&just_inside, CriterionKind::Standard, tol));
    }

    #[test]
    fn max_requires_matching_winners() {
        // Target winner is unit 1, output winner is unit 0.
        let units = vec![unit(0.9, Some(0.0)), unit(0.1, Some(1.0))];
        assert!(!group_reached(&units, CriterionKind::Max, 0.95));

        // Winners coincide and the gap is inside tolerance.
        let units = vec![unit(0.2, Some(0.0)), unit(0.85, Some(1.0))];
        assert!(group_reached(&units, CriterionKind::Max, 0.2));
        assert!(!group_reached(&units, CriterionKind::Max, 0.1));
    }
}
