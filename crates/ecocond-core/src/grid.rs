use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Sentinel used for output cells without a valid value when no other
/// sentinel is available.
pub const DEFAULT_NODATA: f32 = -9999.0;

/// Bounding rectangle of a grid in CRS units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl Extent {
    pub fn new(min_x: f64, max_x: f64, min_y: f64, max_y: f64) -> Self {
        Self { min_x, max_x, min_y, max_y }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }
}

/// A single-band raster grid storing samples as f32, row-major.
/// Row 0 lies along the northern edge. Geometry math uses f64.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RasterGrid {
    /// Row-major samples; NaN is always treated as missing.
    #[serde(deserialize_with = "null_as_nan_vec")]
    pub data: Vec<f32>,
    pub width: usize,
    pub height: usize,
    /// Cell width in CRS units (always positive).
    pub cell_size_x: f64,
    /// Cell height in CRS units (always positive).
    pub cell_size_y: f64,
    pub extent: Extent,
    /// CRS identifier such as `EPSG:3035`.
    #[serde(default)]
    pub crs: Option<String>,
    /// Declared no-data sentinel.
    #[serde(default)]
    pub nodata: Option<f32>,
}

// serde_json writes non-finite floats as null.
fn null_as_nan_vec<'de, D: serde::Deserializer<'de>>(
    d: D,
) -> std::result::Result<Vec<f32>, D::Error> {
    let v: Vec<Option<f32>> = Vec::deserialize(d)?;
    Ok(v.into_iter().map(|x| x.unwrap_or(f32::NAN)).collect())
}

impl RasterGrid {
    /// Create a new grid over `extent` filled with the given value.
    /// Cell sizes are derived from the extent and dimensions.
    pub fn new(width: usize, height: usize, extent: Extent, fill: f32) -> Self {
        Self {
            data: vec![fill; width * height],
            width,
            height,
            cell_size_x: extent.width() / width.max(1) as f64,
            cell_size_y: extent.height() / height.max(1) as f64,
            extent,
            crs: None,
            nodata: None,
        }
    }

    /// Wrap existing samples. Fails when the sample count does not match the
    /// dimensions or the grid is empty.
    pub fn from_vec(data: Vec<f32>, width: usize, height: usize, extent: Extent) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::Validation(format!(
                "grid dimensions must be non-zero, got {width}x{height}"
            )));
        }
        if data.len() != width * height {
            return Err(Error::Validation(format!(
                "expected {} samples for a {width}x{height} grid, got {}",
                width * height,
                data.len()
            )));
        }
        Ok(Self {
            data,
            width,
            height,
            cell_size_x: extent.width() / width as f64,
            cell_size_y: extent.height() / height as f64,
            extent,
            crs: None,
            nodata: None,
        })
    }

    pub fn with_crs(mut self, crs: impl Into<String>) -> Self {
        self.crs = Some(crs.into());
        self
    }

    pub fn with_nodata(mut self, nodata: f32) -> Self {
        self.nodata = Some(nodata);
        self
    }

    /// A grid with the same geometry, CRS and sentinel, filled with `fill`.
    pub fn like(&self, fill: f32) -> Self {
        Self {
            data: vec![fill; self.data.len()],
            width: self.width,
            height: self.height,
            cell_size_x: self.cell_size_x,
            cell_size_y: self.cell_size_y,
            extent: self.extent,
            crs: self.crs.clone(),
            nodata: self.nodata,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.width + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, val: f32) {
        self.data[row * self.width + col] = val;
    }

    /// True when `v` is neither NaN nor the declared sentinel.
    #[inline]
    pub fn is_valid_value(&self, v: f32) -> bool {
        !v.is_nan() && self.nodata.map_or(true, |nd| v != nd)
    }

    #[inline]
    pub fn is_valid(&self, idx: usize) -> bool {
        self.is_valid_value(self.data[idx])
    }

    /// Per-cell validity bitmap.
    pub fn validity(&self) -> Vec<bool> {
        self.data.iter().map(|&v| self.is_valid_value(v)).collect()
    }

    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|&&v| self.is_valid_value(v)).count()
    }

    /// Cells whose value is exactly 1, as used by region masks.
    pub fn ones_mask(&self) -> Vec<bool> {
        self.data.iter().map(|&v| v == 1.0).collect()
    }

    /// The declared sentinel, or [`DEFAULT_NODATA`].
    pub fn nodata_or_default(&self) -> f32 {
        self.nodata.unwrap_or(DEFAULT_NODATA)
    }

    pub fn min_valid(&self) -> Option<f32> {
        self.data
            .iter()
            .copied()
            .filter(|&v| self.is_valid_value(v))
            .reduce(f32::min)
    }

    pub fn max_valid(&self) -> Option<f32> {
        self.data
            .iter()
            .copied()
            .filter(|&v| self.is_valid_value(v))
            .reduce(f32::max)
    }

    /// Area of one cell in km², assuming metre units.
    pub fn cell_area_km2(&self) -> f64 {
        (self.cell_size_x * self.cell_size_y).abs() / 1e6
    }

    /// CRS coordinates of the centre of cell (row, col).
    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.extent.min_x + (col as f64 + 0.5) * self.cell_size_x,
            self.extent.max_y - (row as f64 + 0.5) * self.cell_size_y,
        )
    }

    /// Cell containing (x, y), or None when the point is outside the extent.
    pub fn cell_at(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        if !self.extent.contains(x, y) || self.width == 0 || self.height == 0 {
            return None;
        }
        let col = ((x - self.extent.min_x) / self.cell_size_x).floor() as usize;
        let row = ((self.extent.max_y - y) / self.cell_size_y).floor() as usize;
        Some((row.min(self.height - 1), col.min(self.width - 1)))
    }

    /// Value of the cell containing (x, y) if that cell is valid.
    pub fn sample_nearest(&self, x: f64, y: f64) -> Option<f32> {
        let (row, col) = self.cell_at(x, y)?;
        let v = self.get(row, col);
        self.is_valid_value(v).then_some(v)
    }

    /// Sample the grid at (x, y) using bilinear interpolation between cell
    /// centres. Invalid neighbours are left out and the remaining weights
    /// renormalised. Returns None outside the extent or when no neighbour
    /// is valid.
    pub fn sample_bilinear(&self, x: f64, y: f64) -> Option<f32> {
        if !self.extent.contains(x, y) || self.width == 0 || self.height == 0 {
            return None;
        }

        let max_fx = (self.width - 1) as f64;
        let max_fy = (self.height - 1) as f64;
        let fx = ((x - self.extent.min_x) / self.cell_size_x - 0.5).clamp(0.0, max_fx);
        let fy = ((self.extent.max_y - y) / self.cell_size_y - 0.5).clamp(0.0, max_fy);

        let x0 = fx.floor() as usize;
        let y0 = fy.floor() as usize;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);

        let tx = fx - x0 as f64;
        let ty = fy - y0 as f64;

        let corners = [
            (y0, x0, (1.0 - tx) * (1.0 - ty)),
            (y0, x1, tx * (1.0 - ty)),
            (y1, x0, (1.0 - tx) * ty),
            (y1, x1, tx * ty),
        ];

        let mut sum = 0.0f64;
        let mut weight = 0.0f64;
        for (row, col, w) in corners {
            let v = self.get(row, col);
            if w > 0.0 && self.is_valid_value(v) {
                sum += v as f64 * w;
                weight += w;
            }
        }

        if weight <= 1e-12 {
            // Exactly on a cell centre whose own value is invalid.
            return None;
        }
        Some((sum / weight) as f32)
    }
}
