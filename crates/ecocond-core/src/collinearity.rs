//! Multicollinearity diagnostics for candidate layers.
//!
//! Only cells valid in every layer (and valid in the optional mask) are
//! used. Spearman's ρ is the Pearson correlation of the per-column ranks,
//! with ties given their average rank. The variance inflation factor of
//! layer i is 1 / (1 - R²ᵢ), where R²ᵢ comes from regressing layer i on
//! the others with an intercept; it is computed from the Pearson
//! correlation matrix R as R²ᵢ = rᵢᵀ S⁻¹ rᵢ with S the correlations among
//! the other layers. A perfect fit gives an infinite VIF.

use std::io::Write;

use nalgebra::{DMatrix, DVector};
use tracing::{debug, info};

use crate::alignment::AlignmentChecker;
use crate::error::{Error, Result};
use crate::grid::RasterGrid;
use crate::jobs::CancelToken;
use crate::maybe_rayon::*;

/// |ρ| at or above this marks a strongly correlated pair.
pub const STRONG_CORRELATION: f64 = 0.8;
/// VIF at or above this is reported as a collinearity risk.
pub const VIF_RISK: f64 = 10.0;

const SINGULAR_EPS: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollinearityOptions {
    pub compute_vif: bool,
}

impl Default for CollinearityOptions {
    fn default() -> Self {
        Self { compute_vif: true }
    }
}

#[derive(Debug, Clone)]
pub struct CollinearityReport {
    pub names: Vec<String>,
    /// Spearman ρ, row-major `names.len()²`.
    pub correlation: Vec<Vec<f64>>,
    /// One VIF per layer when requested; infinite or NaN for perfect
    /// collinearity.
    pub vif: Option<Vec<f64>>,
    /// Cells that entered the statistics.
    pub valid_cells: usize,
    /// Invalid cells per layer, before masking.
    pub missing: Vec<usize>,
}

impl CollinearityReport {
    /// Pairs (i < j) with |ρ| ≥ `threshold`.
    pub fn strong_pairs(&self, threshold: f64) -> Vec<(usize, usize, f64)> {
        let n = self.names.len();
        let mut pairs = Vec::new();
        for i in 0..n {
            for j in (i + 1)..n {
                let rho = self.correlation[i][j];
                if rho.abs() >= threshold {
                    pairs.push((i, j, rho));
                }
            }
        }
        pairs
    }

    /// Indices of layers whose VIF is at least [`VIF_RISK`].
    pub fn vif_risks(&self) -> Vec<usize> {
        self.vif
            .as_ref()
            .map(|v| {
                v.iter()
                    .enumerate()
                    .filter(|(_, &x)| x.is_nan() || x >= VIF_RISK)
                    .map(|(i, _)| i)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Blank leading header cell, layer names, values to four decimals.
    pub fn write_correlation_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        let header: Vec<&str> = std::iter::once("")
            .chain(self.names.iter().map(String::as_str))
            .collect();
        wtr.write_record(&header)?;
        for (name, row) in self.names.iter().zip(&self.correlation) {
            let record: Vec<String> = std::iter::once(name.clone())
                .chain(row.iter().map(|v| format!("{v:.4}")))
                .collect();
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// `layer,VIF` rows; fails when VIF was not computed.
    pub fn write_vif_csv<W: Write>(&self, writer: W) -> Result<()> {
        let vif = self
            .vif
            .as_ref()
            .ok_or_else(|| Error::Validation("VIF was not computed for this run".into()))?;
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(["layer", "VIF"])?;
        for (name, &v) in self.names.iter().zip(vif) {
            wtr.write_record([name.clone(), format_vif(v)])?;
        }
        wtr.flush()?;
        Ok(())
    }
}

pub fn format_vif(v: f64) -> String {
    if v.is_finite() {
        format!("{v:.2}")
    } else {
        "Perfect collinearity".to_string()
    }
}

/// Run the diagnostics over named, aligned layers.
pub fn analyze(
    layers: &[(&str, &RasterGrid)],
    mask: Option<&RasterGrid>,
    options: CollinearityOptions,
    token: &CancelToken,
) -> Result<CollinearityReport> {
    if layers.len() < 2 {
        return Err(Error::Validation(
            "at least two layers are needed for a collinearity check".into(),
        ));
    }

    let checker = AlignmentChecker::default();
    checker
        .check_all(layers.iter().copied().chain(mask.map(|m| ("mask", m))))?
        .into_result()?;
    token.check()?;

    let missing: Vec<usize> = layers
        .iter()
        .map(|(_, g)| g.len() - g.valid_count())
        .collect();

    let cells = layers[0].1.len();
    let rows: Vec<usize> = (0..cells)
        .filter(|&i| layers.iter().all(|(_, g)| g.is_valid(i)))
        .filter(|&i| mask.map_or(true, |m| m.is_valid(i)))
        .collect();
    if rows.len() < 2 {
        return Err(Error::Validation(
            "Too few valid pixels to compute correlation.".into(),
        ));
    }
    debug!(cells, valid = rows.len(), "collinearity sample selected");

    let columns: Vec<Vec<f64>> = (0..layers.len())
        .into_par_iter()
        .map(|j| rows.iter().map(|&i| layers[j].1.data[i] as f64).collect::<Vec<f64>>())
        .collect();
    token.check()?;

    let ranks: Vec<Vec<f64>> = (0..columns.len())
        .into_par_iter()
        .map(|j| {
            token.check()?;
            Ok(average_ranks(&columns[j]))
        })
        .collect::<Result<Vec<_>>>()?;

    let correlation = pearson_matrix(&ranks);
    token.check()?;

    let vif = if options.compute_vif {
        let pearson = pearson_matrix(&columns);
        Some(vif_from_correlation(&pearson))
    } else {
        None
    };

    info!(layers = layers.len(), valid_cells = rows.len(), "collinearity check complete");

    Ok(CollinearityReport {
        names: layers.iter().map(|(n, _)| n.to_string()).collect(),
        correlation,
        vif,
        valid_cells: rows.len(),
        missing,
    })
}

/// 1-based ranks with ties sharing their average rank.
pub fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]] == values[order[start]] {
            end += 1;
        }
        // Positions start..end hold ranks start+1..=end.
        let avg = (start + 1 + end) as f64 / 2.0;
        for &idx in &order[start..end] {
            ranks[idx] = avg;
        }
        start = end;
    }
    ranks
}

/// Pearson correlation matrix of equally long columns. Constant columns
/// yield NaN in their row and column.
pub fn pearson_matrix(columns: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let k = columns.len();
    let centered: Vec<Vec<f64>> = columns
        .iter()
        .map(|c| {
            let mean = c.iter().sum::<f64>() / c.len().max(1) as f64;
            c.iter().map(|v| v - mean).collect()
        })
        .collect();
    let ss: Vec<f64> = centered.iter().map(|c| c.iter().map(|v| v * v).sum()).collect();

    let mut r = vec![vec![0.0; k]; k];
    for i in 0..k {
        for j in i..k {
            let value = if ss[i] == 0.0 || ss[j] == 0.0 {
                f64::NAN
            } else if i == j {
                1.0
            } else {
                let dot: f64 = centered[i].iter().zip(&centered[j]).map(|(a, b)| a * b).sum();
                (dot / (ss[i] * ss[j]).sqrt()).clamp(-1.0, 1.0)
            };
            r[i][j] = value;
            r[j][i] = value;
        }
    }
    r
}

/// VIF per variable from a correlation matrix.
pub fn vif_from_correlation(r: &[Vec<f64>]) -> Vec<f64> {
    let k = r.len();
    let usable: Vec<bool> = (0..k).map(|i| !r[i][i].is_nan()).collect();

    (0..k)
        .map(|i| {
            if !usable[i] {
                return f64::NAN;
            }
            let others: Vec<usize> = (0..k).filter(|&j| j != i && usable[j]).collect();
            if others.is_empty() {
                return 1.0;
            }
            let s = DMatrix::from_fn(others.len(), others.len(), |a, b| r[others[a]][others[b]]);
            let rhs = DVector::from_fn(others.len(), |a, _| r[others[a]][i]);
            let r2 = match s.svd(true, true).solve(&rhs, SINGULAR_EPS) {
                Ok(beta) => rhs.dot(&beta),
                Err(_) => return f64::NAN,
            };
            let tolerance = 1.0 - r2;
            if tolerance <= 1e-10 {
                f64::INFINITY
            } else {
                1.0 / tolerance
            }
        })
        .collect()
}
