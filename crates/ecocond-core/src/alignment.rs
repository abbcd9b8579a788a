//! Grid alignment checks.
//!
//! Two grids are aligned when width, height, per-axis cell size, extent and
//! CRS identifier agree. Integer fields and the CRS compare exactly; cell
//! sizes and extent edges compare under a [`Tolerance`] expressed as a
//! fraction of the reference cell size.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::grid::{Extent, RasterGrid};

/// Default tolerance as a fraction of the reference cell size.
pub const DEFAULT_CELL_FRACTION: f64 = 1e-6;

/// Floating-point comparison policy for cell size and extent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Tolerance {
    /// Bit-for-bit equality.
    Exact,
    /// Accept differences below `f × min(|cell_x|, |cell_y|)` of the reference.
    CellFraction(f64),
}

impl Default for Tolerance {
    fn default() -> Self {
        Tolerance::CellFraction(DEFAULT_CELL_FRACTION)
    }
}

/// The geometry of a grid that alignment is decided on.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentKey {
    pub width: usize,
    pub height: usize,
    pub cell_size_x: f64,
    pub cell_size_y: f64,
    pub extent: Extent,
    pub crs: Option<String>,
}

impl RasterGrid {
    pub fn alignment_key(&self) -> AlignmentKey {
        AlignmentKey {
            width: self.width,
            height: self.height,
            cell_size_x: self.cell_size_x,
            cell_size_y: self.cell_size_y,
            extent: self.extent,
            crs: self.crs.clone(),
        }
    }
}

/// Outcome of checking a set of named grids against the first one.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentReport {
    pub reference: String,
    pub checked: usize,
    pub mismatched: Vec<String>,
}

impl AlignmentReport {
    pub fn ok(&self) -> bool {
        self.mismatched.is_empty()
    }

    /// Turn a failed report into [`Error::Alignment`].
    pub fn into_result(self) -> Result<()> {
        if self.ok() {
            Ok(())
        } else {
            Err(Error::Alignment {
                reference: self.reference,
                mismatched: self.mismatched,
            })
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AlignmentChecker {
    pub tolerance: Tolerance,
}

impl AlignmentChecker {
    pub fn new(tolerance: Tolerance) -> Self {
        Self { tolerance }
    }

    pub fn exact() -> Self {
        Self::new(Tolerance::Exact)
    }

    /// Compare `other` against `reference`; the reference supplies the cell
    /// size the tolerance is scaled by.
    pub fn keys_match(&self, reference: &AlignmentKey, other: &AlignmentKey) -> bool {
        if reference.width != other.width
            || reference.height != other.height
            || reference.crs != other.crs
        {
            return false;
        }

        let eps = match self.tolerance {
            Tolerance::Exact => 0.0,
            Tolerance::CellFraction(f) => {
                f * reference.cell_size_x.abs().min(reference.cell_size_y.abs())
            }
        };
        let close = |a: f64, b: f64| match self.tolerance {
            Tolerance::Exact => a == b,
            Tolerance::CellFraction(_) => (a - b).abs() <= eps,
        };

        close(reference.cell_size_x, other.cell_size_x)
            && close(reference.cell_size_y, other.cell_size_y)
            && close(reference.extent.min_x, other.extent.min_x)
            && close(reference.extent.max_x, other.extent.max_x)
            && close(reference.extent.min_y, other.extent.min_y)
            && close(reference.extent.max_y, other.extent.max_y)
    }

    pub fn is_aligned(&self, a: &RasterGrid, b: &RasterGrid) -> bool {
        self.keys_match(&a.alignment_key(), &b.alignment_key())
    }

    /// Check every named grid against the first. All failures are reported,
    /// not only the first one.
    pub fn check_all<'a, I>(&self, grids: I) -> Result<AlignmentReport>
    where
        I: IntoIterator<Item = (&'a str, &'a RasterGrid)>,
    {
        let grids: Vec<(&str, &RasterGrid)> = grids.into_iter().collect();
        if grids.len() < 2 {
            return Err(Error::Validation(
                "at least two layers are needed to verify alignment".into(),
            ));
        }

        let (ref_name, ref_grid) = grids[0];
        let ref_key = ref_grid.alignment_key();
        let mismatched = grids[1..]
            .iter()
            .filter(|(_, g)| !self.keys_match(&ref_key, &g.alignment_key()))
            .map(|(name, _)| name.to_string())
            .collect();

        Ok(AlignmentReport {
            reference: ref_name.to_string(),
            checked: grids.len(),
            mismatched,
        })
    }

    /// Fail with [`Error::UnalignedInputs`] unless all grids share the
    /// geometry of the first. Used by the cell-wise engines.
    pub fn require_same_geometry<'a, I>(&self, grids: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a RasterGrid>,
    {
        let mut iter = grids.into_iter();
        let Some(first) = iter.next() else {
            return Ok(());
        };
        let key = first.alignment_key();
        for (i, g) in iter.enumerate() {
            if !self.keys_match(&key, &g.alignment_key()) {
                return Err(Error::UnalignedInputs(format!(
                    "input {} ({}x{}) does not match input 0 ({}x{})",
                    i + 1,
                    g.width,
                    g.height,
                    first.width,
                    first.height
                )));
            }
        }
        Ok(())
    }
}

/// [`AlignmentChecker::is_aligned`] under the default tolerance.
pub fn is_aligned(a: &RasterGrid, b: &RasterGrid) -> bool {
    AlignmentChecker::default().is_aligned(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> RasterGrid {
        RasterGrid::new(10, 8, Extent::new(1000.0, 2000.0, 500.0, 1300.0), 0.0)
            .with_crs("EPSG:3035")
    }

    #[test]
    fn identical_geometry_is_aligned_under_both_policies() {
        let a = base();
        let b = base();
        assert!(is_aligned(&a, &b));
        assert!(AlignmentChecker::exact().is_aligned(&a, &b));
    }

    #[test]
    fn any_single_field_change_breaks_alignment() {
        let a = base();
        let mut variants = Vec::new();

        let mut g = base();
        g.width = 11;
        variants.push(g);

        let mut g = base();
        g.height = 9;
        variants.push(g);

        let mut g = base();
        g.cell_size_x += 1.0;
        variants.push(g);

        let mut g = base();
        g.cell_size_y += 1.0;
        variants.push(g);

        let mut g = base();
        g.extent.min_x += 50.0;
        variants.push(g);

        let mut g = base();
        g.crs = Some("EPSG:4326".into());
        variants.push(g);

        for checker in [AlignmentChecker::default(), AlignmentChecker::exact()] {
            for v in &variants {
                assert!(!checker.is_aligned(&a, v));
            }
        }
    }

    #[test]
    fn tiny_extent_jitter_depends_on_policy() {
        let a = base();
        let mut b = base();
        b.extent.max_x += 1e-9;
        assert!(is_aligned(&a, &b));
        assert!(!AlignmentChecker::exact().is_aligned(&a, &b));
    }

    #[test]
    fn check_all_reports_every_mismatch() {
        let a = base();
        let b = base();
        let mut c = base();
        c.width = 3;
        let mut d = base();
        d.crs = None;

        let report = AlignmentChecker::default()
            .check_all([("a", &a), ("b", &b), ("c", &c), ("d", &d)])
            .unwrap();
        assert_eq!(report.reference, "a");
        assert_eq!(report.checked, 4);
        assert_eq!(report.mismatched, vec!["c".to_string(), "d".to_string()]);
        assert!(matches!(report.into_result(), Err(Error::Alignment { .. })));
    }

    #[test]
    fn check_all_needs_two_grids() {
        let a = base();
        let r = AlignmentChecker::default().check_all([("a", &a)]);
        assert!(matches!(r, Err(Error::Validation(_))));
    }

    #[test]
    fn require_same_geometry_flags_unaligned_inputs() {
        let a = base();
        let mut b = base();
        b.height = 2;
        let r = AlignmentChecker::default().require_same_geometry([&a, &b]);
        assert!(matches!(r, Err(Error::UnalignedInputs(_))));
    }
}
