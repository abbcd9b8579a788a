//! Missing-data standardisation.
//!
//! Rasters arrive with a mix of encodings for "no value": a declared
//! sentinel, NaN, or the Float32 lowest value written by some tools. Small
//! unsigned integer rasters with no declared sentinel use 0. Every such
//! cell is rewritten to one chosen sentinel, which the output declares.

use crate::grid::RasterGrid;
use crate::io::SampleFormat;

/// Values at or below this are treated as missing when no sentinel is
/// declared.
pub const FLOAT32_LOWEST: f32 = -3.4e38;

/// Sentinel implied by the storage format when none is declared.
pub fn implied_nodata(declared: Option<f32>, format: SampleFormat) -> Option<f32> {
    match (declared, format) {
        (Some(nd), _) => Some(nd),
        (None, SampleFormat::Byte | SampleFormat::UInt16) => Some(0.0),
        (None, _) => None,
    }
}

#[derive(Debug, Clone)]
pub struct Standardized {
    pub grid: RasterGrid,
    /// Number of cells rewritten to the new sentinel.
    pub replaced: usize,
}

/// Rewrite every missing encoding in `source` to `replacement`.
pub fn standardize(source: &RasterGrid, format: SampleFormat, replacement: f32) -> Standardized {
    let input_nodata = implied_nodata(source.nodata, format);
    let is_missing = |v: f32| match input_nodata {
        Some(nd) => v.is_nan() || v == nd,
        None => v.is_nan() || v <= FLOAT32_LOWEST,
    };

    let mut replaced = 0;
    let data = source
        .data
        .iter()
        .map(|&v| {
            if is_missing(v) {
                replaced += 1;
                replacement
            } else {
                v
            }
        })
        .collect();

    let mut grid = source.like(replacement);
    grid.data = data;
    grid.nodata = Some(replacement);
    Standardized { grid, replaced }
}
