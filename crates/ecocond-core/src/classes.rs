//! Area-by-class summary of the composite condition raster.
//!
//! Five equal bins over [0, 1]. Bins are half-open `[lo, hi)` except the
//! last, which also takes the value 1.0. Area per cell is
//! `|cell_x| × |cell_y| / 1e6`, i.e. km² for metre-based CRSs.

use std::io::Write;

use serde::Serialize;

use crate::error::Result;
use crate::grid::RasterGrid;

pub const CLASS_EDGES: [f64; 6] = [0.0, 0.2, 0.4, 0.6, 0.8, 1.0];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassArea {
    pub low: f64,
    pub high: f64,
    pub cells: u64,
    pub area_km2: f64,
}

impl ClassArea {
    /// Label such as `0.0-0.2`.
    pub fn range_label(&self) -> String {
        format!("{:.1}-{:.1}", self.low, self.high)
    }
}

/// Bin index for `v`, or None when `v` falls outside [0, 1].
pub fn class_of(v: f64) -> Option<usize> {
    let last = CLASS_EDGES.len() - 2;
    if v == CLASS_EDGES[last + 1] {
        return Some(last);
    }
    (0..=last).find(|&i| v >= CLASS_EDGES[i] && v < CLASS_EDGES[i + 1])
}

/// Count valid cells per class and convert to area.
pub fn summarize(composite: &RasterGrid) -> Vec<ClassArea> {
    let mut counts = [0u64; CLASS_EDGES.len() - 1];
    for &v in composite.data.iter().filter(|&&v| composite.is_valid_value(v)) {
        if let Some(i) = class_of(v as f64) {
            counts[i] += 1;
        }
    }

    let km2_per_cell = composite.cell_area_km2();
    counts
        .iter()
        .enumerate()
        .map(|(i, &cells)| ClassArea {
            low: CLASS_EDGES[i],
            high: CLASS_EDGES[i + 1],
            cells,
            area_km2: cells as f64 * km2_per_cell,
        })
        .collect()
}

/// Write `range,area_km2` rows with areas to two decimals.
pub fn write_class_areas_csv<W: Write>(writer: W, classes: &[ClassArea]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(["range", "area_km2"])?;
    for class in classes {
        wtr.write_record([class.range_label(), format!("{:.2}", class.area_km2)])?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{Extent, DEFAULT_NODATA};

    #[test]
    fn edges_fall_into_the_upper_bin_except_one() {
        assert_eq!(class_of(0.0), Some(0));
        assert_eq!(class_of(0.19), Some(0));
        assert_eq!(class_of(0.2), Some(1));
        assert_eq!(class_of(0.8), Some(4));
        assert_eq!(class_of(1.0), Some(4));
        assert_eq!(class_of(1.01), None);
        assert_eq!(class_of(-0.1), None);
    }

    #[test]
    fn areas_scale_with_cell_size_and_skip_invalid_cells() {
        // 100 m cells -> 0.01 km² each.
        let data = vec![0.1, 0.1, 0.5, 1.0, DEFAULT_NODATA, f32::NAN];
        let grid = RasterGrid::from_vec(data, 3, 2, Extent::new(0.0, 300.0, 0.0, 200.0))
            .unwrap()
            .with_nodata(DEFAULT_NODATA);
        let classes = summarize(&grid);
        let counts: Vec<u64> = classes.iter().map(|c| c.cells).collect();
        assert_eq!(counts, vec![2, 0, 1, 0, 1]);
        assert!((classes[0].area_km2 - 0.02).abs() < 1e-12);
        assert!((classes[4].area_km2 - 0.01).abs() < 1e-12);
    }

    #[test]
    fn uniform_low_grid_fills_the_first_bin() {
        // 1000 m cells -> 1 km² each.
        let n = 12;
        let grid = RasterGrid::new(4, 3, Extent::new(0.0, 4000.0, 0.0, 3000.0), 0.1);
        let classes = summarize(&grid);
        assert!((classes[0].area_km2 - n as f64).abs() < 1e-9);
        assert_eq!(classes[0].cells, n);
        for class in &classes[1..] {
            assert_eq!(class.cells, 0);
            assert_eq!(class.area_km2, 0.0);
        }
    }

    #[test]
    fn total_area_equals_valid_cells_in_range() {
        let data: Vec<f32> = (0..=10).map(|i| i as f32 / 10.0).collect();
        let grid = RasterGrid::from_vec(data, 11, 1, Extent::new(0.0, 1100.0, 0.0, 100.0)).unwrap();
        let total: f64 = summarize(&grid).iter().map(|c| c.area_km2).sum();
        assert!((total - 11.0 * grid.cell_area_km2()).abs() < 1e-12);
    }

    #[test]
    fn csv_has_range_labels_and_two_decimals() {
        let grid = RasterGrid::from_vec(vec![0.3; 4], 2, 2, Extent::new(0.0, 2000.0, 0.0, 2000.0))
            .unwrap();
        let mut buf = Vec::new();
        write_class_areas_csv(&mut buf, &summarize(&grid)).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "range,area_km2");
        assert_eq!(lines[1], "0.0-0.2,0.00");
        assert_eq!(lines[2], "0.2-0.4,4.00");
        assert_eq!(lines.len(), 6);
    }
}
