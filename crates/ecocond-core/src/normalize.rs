//! Min/max-mask normalization.
//!
//! The local minimum is taken over the valid cells inside the min-mask and
//! the local maximum over the valid cells inside the max-mask, where the
//! max-mask is first intersected with the min-mask. Every value is clamped
//! to [min, max] and rescaled:
//!
//!   v' = (clamp(v) - min) / (max - min)        (or 1 - v' when inverted)
//!
//! so the result lies in [0, 1] wherever the source is valid.

use crate::alignment::{AlignmentChecker, AlignmentKey};
use crate::error::{Error, Result};
use crate::grid::{RasterGrid, DEFAULT_NODATA};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizeOptions {
    /// Output `1 - v` so that high source values mean poor condition.
    pub invert: bool,
    /// Set cells outside the min-mask to the sentinel.
    pub clip_to_min_mask: bool,
}

/// A normalized layer with the statistics it was scaled by.
#[derive(Debug, Clone)]
pub struct Normalized {
    pub grid: RasterGrid,
    pub local_min: f32,
    pub local_max: f32,
}

/// Boolean region masks derived from a pair of mask grids, reusable across
/// a batch of layers.
#[derive(Debug, Clone)]
pub struct RegionMasks {
    key: AlignmentKey,
    /// Cells where the min-mask grid equals 1.
    pub min: Vec<bool>,
    /// Cells where both mask grids equal 1.
    pub max: Vec<bool>,
}

impl RegionMasks {
    pub fn new(min_mask: &RasterGrid, max_mask: &RasterGrid) -> Result<Self> {
        Self::with_checker(min_mask, max_mask, &AlignmentChecker::default())
    }

    pub fn with_checker(
        min_mask: &RasterGrid,
        max_mask: &RasterGrid,
        checker: &AlignmentChecker,
    ) -> Result<Self> {
        if !checker.is_aligned(min_mask, max_mask) {
            return Err(Error::UnalignedInputs(
                "min-mask and max-mask grids differ in geometry".into(),
            ));
        }
        let min = min_mask.ones_mask();
        let max = max_mask
            .ones_mask()
            .into_iter()
            .zip(&min)
            .map(|(mx, &mn)| mx && mn)
            .collect();
        Ok(Self {
            key: min_mask.alignment_key(),
            min,
            max,
        })
    }

    pub fn key(&self) -> &AlignmentKey {
        &self.key
    }
}

/// Normalize `source` against a min-mask and max-mask grid.
pub fn normalize(
    source: &RasterGrid,
    min_mask: &RasterGrid,
    max_mask: &RasterGrid,
    options: NormalizeOptions,
) -> Result<Normalized> {
    let masks = RegionMasks::new(min_mask, max_mask)?;
    normalize_with(source, &masks, options, &AlignmentChecker::default())
}

/// Normalize `source` against precomputed region masks.
pub fn normalize_with(
    source: &RasterGrid,
    masks: &RegionMasks,
    options: NormalizeOptions,
    checker: &AlignmentChecker,
) -> Result<Normalized> {
    if !checker.keys_match(masks.key(), &source.alignment_key()) {
        return Err(Error::UnalignedInputs(
            "source grid does not match the mask geometry".into(),
        ));
    }

    let valid = source.validity();

    let local_min = source
        .data
        .iter()
        .zip(valid.iter().zip(&masks.min))
        .filter(|(_, (&ok, &m))| ok && m)
        .map(|(&v, _)| v)
        .reduce(f32::min)
        .ok_or_else(|| Error::Validation("no valid cells inside the min-mask".into()))?;

    let local_max = source
        .data
        .iter()
        .zip(valid.iter().zip(&masks.max))
        .filter(|(_, (&ok, &m))| ok && m)
        .map(|(&v, _)| v)
        .reduce(f32::max)
        .ok_or_else(|| Error::Validation("no valid cells inside the max-mask".into()))?;

    if local_max == local_min {
        return Err(Error::DivisionDegenerate { value: local_min });
    }

    let sentinel = output_sentinel(source);
    let lo = local_min as f64;
    let hi = local_max as f64;
    let range = hi - lo;

    let data = source
        .data
        .iter()
        .zip(&valid)
        .zip(&masks.min)
        .map(|((&v, &ok), &in_min)| {
            if !ok || (options.clip_to_min_mask && !in_min) {
                return sentinel;
            }
            let scaled = ((v as f64).clamp(lo, hi) - lo) / range;
            let out = if options.invert { 1.0 - scaled } else { scaled };
            out as f32
        })
        .collect();

    let mut grid = source.like(sentinel);
    grid.data = data;
    grid.nodata = Some(sentinel);

    Ok(Normalized {
        grid,
        local_min,
        local_max,
    })
}

/// The source's sentinel, unless it could collide with a normalized value.
fn output_sentinel(source: &RasterGrid) -> f32 {
    match source.nodata {
        Some(nd) if !nd.is_nan() && !(0.0..=1.0).contains(&nd) => nd,
        _ => DEFAULT_NODATA,
    }
}
