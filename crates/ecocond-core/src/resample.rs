//! Resampling onto a reference grid.
//!
//! Every reference cell centre is looked up in the source grid with the
//! chosen method. Source and reference must share a CRS; reprojection is
//! not supported. After resampling, the reference grid acts as a mask: the
//! output is the cell-wise product `resampled × reference`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::grid::{RasterGrid, DEFAULT_NODATA};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResampleMethod {
    Nearest,
    Bilinear,
}

impl ResampleMethod {
    /// Nearest neighbour when the source is at least as fine as the
    /// reference, bilinear when it is coarser.
    pub fn default_for(source: &RasterGrid, reference: &RasterGrid) -> Self {
        let src = source.cell_size_x.abs().max(source.cell_size_y.abs());
        let dst = reference.cell_size_x.abs().max(reference.cell_size_y.abs());
        if src <= dst {
            ResampleMethod::Nearest
        } else {
            ResampleMethod::Bilinear
        }
    }
}

impl fmt::Display for ResampleMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResampleMethod::Nearest => f.write_str("nearest"),
            ResampleMethod::Bilinear => f.write_str("bilinear"),
        }
    }
}

impl FromStr for ResampleMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nearest" | "near" => Ok(ResampleMethod::Nearest),
            "bilinear" => Ok(ResampleMethod::Bilinear),
            other => Err(Error::Validation(format!("unknown resampling method '{other}'"))),
        }
    }
}

/// Resample `source` onto the geometry of `reference`.
pub fn resample_to(
    source: &RasterGrid,
    reference: &RasterGrid,
    method: ResampleMethod,
) -> Result<RasterGrid> {
    if source.crs != reference.crs {
        return Err(Error::Backend(format!(
            "source CRS {} differs from reference CRS {}; reprojection is not supported",
            source.crs.as_deref().unwrap_or("<none>"),
            reference.crs.as_deref().unwrap_or("<none>"),
        )));
    }

    let sentinel = source.nodata_or_default();
    let mut out = reference.like(sentinel);
    out.nodata = Some(sentinel);

    for row in 0..reference.height {
        for col in 0..reference.width {
            let (x, y) = reference.cell_center(row, col);
            let v = match method {
                ResampleMethod::Nearest => source.sample_nearest(x, y),
                ResampleMethod::Bilinear => source.sample_bilinear(x, y),
            };
            if let Some(v) = v {
                out.set(row, col, v);
            }
        }
    }

    Ok(out)
}

/// Cell-wise `resampled × reference`; invalid wherever either is invalid.
pub fn apply_reference_mask(resampled: &RasterGrid, reference: &RasterGrid) -> Result<RasterGrid> {
    if resampled.width != reference.width || resampled.height != reference.height {
        return Err(Error::UnalignedInputs(format!(
            "resampled grid is {}x{}, reference is {}x{}",
            resampled.width, resampled.height, reference.width, reference.height
        )));
    }

    let sentinel = resampled.nodata.unwrap_or(DEFAULT_NODATA);
    let mut out = reference.like(sentinel);
    out.nodata = Some(sentinel);
    for (idx, cell) in out.data.iter_mut().enumerate() {
        if resampled.is_valid(idx) && reference.is_valid(idx) {
            *cell = resampled.data[idx] * reference.data[idx];
        }
    }
    Ok(out)
}

/// Resample onto the reference grid, then mask by it.
pub fn align_to_reference(
    source: &RasterGrid,
    reference: &RasterGrid,
    method: ResampleMethod,
) -> Result<RasterGrid> {
    let resampled = resample_to(source, reference, method)?;
    apply_reference_mask(&resampled, reference)
}
