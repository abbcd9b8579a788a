//! Cell-wise weighted sums.
//!
//! `aggregate_group` combines the normalized layers of one ecosystem state;
//! `aggregate_final` combines the per-state rasters into the composite. A
//! cell is valid in the output only if it is valid in every input.

use crate::alignment::AlignmentChecker;
use crate::error::{Error, Result};
use crate::grid::{RasterGrid, DEFAULT_NODATA};
use crate::state::EcosystemState;

/// Σ wᵢ·vᵢ over aligned grids.
pub fn aggregate_group(items: &[(&RasterGrid, f64)]) -> Result<RasterGrid> {
    aggregate_group_with(items, &AlignmentChecker::default())
}

pub fn aggregate_group_with(
    items: &[(&RasterGrid, f64)],
    checker: &AlignmentChecker,
) -> Result<RasterGrid> {
    let Some(&(first, _)) = items.first() else {
        return Err(Error::Validation("nothing to aggregate".into()));
    };
    checker.require_same_geometry(items.iter().map(|(g, _)| *g))?;

    let mut out = first.like(DEFAULT_NODATA);
    out.nodata = Some(DEFAULT_NODATA);

    for (idx, cell) in out.data.iter_mut().enumerate() {
        let mut sum = 0.0f64;
        let mut valid = true;
        for &(grid, w) in items {
            let v = grid.data[idx];
            if !grid.is_valid_value(v) {
                valid = false;
                break;
            }
            sum += w * v as f64;
        }
        *cell = if valid { sum as f32 } else { DEFAULT_NODATA };
    }

    Ok(out)
}

/// Σ wₛ·Sₛ over per-state rasters, listed in canonical state order.
pub fn aggregate_final(states: &[(EcosystemState, &RasterGrid, f64)]) -> Result<RasterGrid> {
    aggregate_final_with(states, &AlignmentChecker::default())
}

pub fn aggregate_final_with(
    states: &[(EcosystemState, &RasterGrid, f64)],
    checker: &AlignmentChecker,
) -> Result<RasterGrid> {
    let mut ordered: Vec<_> = states.to_vec();
    ordered.sort_by_key(|(s, _, _)| *s);
    for pair in ordered.windows(2) {
        if pair[0].0 == pair[1].0 {
            return Err(Error::Validation(format!("state '{}' listed twice", pair[0].0)));
        }
    }
    let items: Vec<(&RasterGrid, f64)> = ordered.iter().map(|&(_, g, w)| (g, w)).collect();
    aggregate_group_with(&items, checker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Extent;

    fn grid(values: &[f32]) -> RasterGrid {
        RasterGrid::from_vec(values.to_vec(), values.len(), 1, Extent::new(0.0, 3.0, 0.0, 1.0))
            .unwrap()
            .with_nodata(DEFAULT_NODATA)
    }

    #[test]
    fn weighted_sum_per_cell() {
        let a = grid(&[0.2, 0.4, 1.0]);
        let b = grid(&[0.6, 0.0, 1.0]);
        let out = aggregate_group(&[(&a, 0.25), (&b, 0.75)]).unwrap();
        let expected = [0.5, 0.1, 1.0];
        for (v, e) in out.data.iter().zip(expected) {
            assert!((v - e).abs() < 1e-6);
        }
        assert_eq!(out.nodata, Some(DEFAULT_NODATA));
    }

    #[test]
    fn constant_grids_give_a_constant_weighted_sum() {
        let a = grid(&[2.0; 3]);
        let b = grid(&[4.0; 3]);
        let out = aggregate_group(&[(&a, 0.3), (&b, 0.7)]).unwrap();
        // 0.3·2.0 + 0.7·4.0
        for v in &out.data {
            assert!((v - 3.4).abs() < 1e-6);
        }
    }

    #[test]
    fn identical_inputs_with_unit_weights_reproduce_the_input() {
        let a = grid(&[0.1, 0.5, 0.9]);
        let out = aggregate_group(&[(&a, 0.5), (&a, 0.5)]).unwrap();
        for (v, e) in out.data.iter().zip(&a.data) {
            assert!((v - e).abs() < 1e-6);
        }
    }

    #[test]
    fn any_invalid_input_invalidates_the_cell() {
        let a = grid(&[0.2, DEFAULT_NODATA, 0.3]);
        let b = grid(&[f32::NAN, 0.5, 0.3]);
        let out = aggregate_group(&[(&a, 0.5), (&b, 0.5)]).unwrap();
        assert!(!out.is_valid(0));
        assert!(!out.is_valid(1));
        assert!((out.data[2] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(matches!(aggregate_group(&[]), Err(Error::Validation(_))));
    }

    #[test]
    fn unaligned_inputs_are_rejected() {
        let a = grid(&[0.2, 0.4, 1.0]);
        let b = RasterGrid::new(2, 2, Extent::new(0.0, 3.0, 0.0, 1.0), 0.5);
        let r = aggregate_group(&[(&a, 0.5), (&b, 0.5)]);
        assert!(matches!(r, Err(Error::UnalignedInputs(_))));
    }

    #[test]
    fn final_composite_combines_states() {
        let phys = grid(&[1.0, 0.0, 0.5]);
        let func = grid(&[0.0, 1.0, 0.5]);
        let out = aggregate_final(&[
            (EcosystemState::Functional, &func, 0.4),
            (EcosystemState::Physical, &phys, 0.6),
        ])
        .unwrap();
        let expected = [0.6, 0.4, 0.5];
        for (v, e) in out.data.iter().zip(expected) {
            assert!((v - e).abs() < 1e-6);
        }
    }

    #[test]
    fn duplicate_states_are_rejected() {
        let a = grid(&[0.1, 0.2, 0.3]);
        let r = aggregate_final(&[
            (EcosystemState::Physical, &a, 0.5),
            (EcosystemState::Physical, &a, 0.5),
        ]);
        assert!(matches!(r, Err(Error::Validation(_))));
    }
}
