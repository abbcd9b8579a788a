//! Pipeline orchestrator: normalization batch and condition run.
//!
//! Everything a run needs is carried in an explicit [`PipelineConfig`];
//! the normalized grids flow straight from the normalization stage into the
//! aggregation stage. Preconditions (configuration, alignment, weights) are
//! checked before the first output file is written.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::aggregate::{aggregate_final_with, aggregate_group_with};
use crate::alignment::{AlignmentChecker, Tolerance};
use crate::classes::{summarize, write_class_areas_csv, ClassArea};
use crate::error::{Error, Result};
use crate::grid::RasterGrid;
use crate::io;
use crate::names::{
    default_short_name, output_file_name, validate_file_name, validate_layer_name,
    validate_short_name,
};
use crate::normalize::{normalize_with, NormalizeOptions, RegionMasks};
use crate::state::EcosystemState;
use crate::weights::{WeightOverrides, WeightTree};

// ── Output names ──────────────────────────────────────────────────────────────

pub const COMPOSITE_FILE: &str = "EcoCondition.tif";
pub const DEFAULT_SUMMARY_CSV: &str = "normalization_summary.csv";
pub const DEFAULT_CLASS_CSV: &str = "class_areas.csv";

// ── Run configuration ─────────────────────────────────────────────────────────

/// One input layer of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerTask {
    pub name: String,
    pub path: PathBuf,
    pub state: EcosystemState,
    /// High source values mean poor condition.
    #[serde(default)]
    pub invert: bool,
    /// Label in weight tables; derived from `name` when absent.
    #[serde(default)]
    pub short_name: Option<String>,
}

impl LayerTask {
    pub fn short(&self) -> String {
        self.short_name
            .clone()
            .unwrap_or_else(|| default_short_name(&self.name))
    }
}

/// Explicit configuration of a normalize or condition run, usually read
/// from a JSON run file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub output_dir: PathBuf,
    pub layers: Vec<LayerTask>,
    /// Region whose minimum anchors 0; also the clip region.
    #[serde(default)]
    pub min_mask: Option<PathBuf>,
    /// Region whose maximum anchors 1, intersected with the min-mask.
    #[serde(default)]
    pub max_mask: Option<PathBuf>,
    #[serde(default)]
    pub clip_to_min_mask: bool,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub suffix: String,
    #[serde(default = "default_summary_csv")]
    pub summary_csv: String,
    #[serde(default = "default_class_csv")]
    pub class_csv: String,
    #[serde(default)]
    pub weights: WeightOverrides,
    #[serde(default)]
    pub tolerance: Tolerance,
}

fn default_summary_csv() -> String {
    DEFAULT_SUMMARY_CSV.to_string()
}

fn default_class_csv() -> String {
    DEFAULT_CLASS_CSV.to_string()
}

impl PipelineConfig {
    pub fn new(output_dir: impl Into<PathBuf>, layers: Vec<LayerTask>) -> Self {
        Self {
            output_dir: output_dir.into(),
            layers,
            min_mask: None,
            max_mask: None,
            clip_to_min_mask: false,
            prefix: String::new(),
            suffix: String::new(),
            summary_csv: default_summary_csv(),
            class_csv: default_class_csv(),
            weights: WeightOverrides::default(),
            tolerance: Tolerance::default(),
        }
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.output_dir.as_os_str().is_empty() {
            return Err(Error::Validation("output folder is not set".into()));
        }
        if self.layers.is_empty() {
            return Err(Error::Validation("no layers selected".into()));
        }
        if self.min_mask.is_some() != self.max_mask.is_some() {
            return Err(Error::Validation(
                "min-mask and max-mask must be given together".into(),
            ));
        }

        let mut names = Vec::with_capacity(self.layers.len());
        let mut shorts = Vec::with_capacity(self.layers.len());
        validate_file_name(&self.summary_csv)?;
        validate_file_name(&self.class_csv)?;
        for task in &self.layers {
            validate_layer_name(&task.name)?;
            validate_file_name(&output_file_name(&self.prefix, &task.name, &self.suffix))?;
            if names.contains(&task.name) {
                return Err(Error::Validation(format!("layer '{}' listed twice", task.name)));
            }
            names.push(task.name.clone());

            let short = task.short();
            validate_short_name(&short)?;
            if shorts.contains(&short) {
                return Err(Error::Validation(format!("short name '{short}' is not unique")));
            }
            shorts.push(short);
        }

        for label in self.weights.layers.keys() {
            if !shorts.contains(label) {
                return Err(Error::Validation(format!(
                    "weight override for unknown layer '{label}'"
                )));
            }
        }
        for state in self.weights.states.keys() {
            if !self.layers.iter().any(|t| t.state == *state) {
                return Err(Error::Validation(format!(
                    "weight override for state '{state}', which has no layers"
                )));
            }
        }
        Ok(())
    }

    pub fn checker(&self) -> AlignmentChecker {
        AlignmentChecker::new(self.tolerance)
    }

    pub fn normalized_path(&self, task: &LayerTask) -> PathBuf {
        self.output_dir
            .join(output_file_name(&self.prefix, &task.name, &self.suffix))
    }
}

// ── Results ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LoadedLayer {
    pub task: LayerTask,
    pub grid: RasterGrid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedLayer {
    pub name: String,
    pub reason: String,
}

/// One row of the normalization summary CSV.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizationRecord {
    pub layer: String,
    pub ec_state: EcosystemState,
    pub min: f32,
    pub max: f32,
    pub inverted: bool,
}

#[derive(Debug, Clone, Default)]
pub struct NormalizationRun {
    /// Normalized layers, in input order.
    pub layers: Vec<LoadedLayer>,
    pub records: Vec<NormalizationRecord>,
    pub skipped: Vec<SkippedLayer>,
}

impl NormalizationRun {
    pub fn write_summary_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(File::create(path.as_ref())?);
        for record in &self.records {
            wtr.serialize(record)?;
        }
        if self.records.is_empty() {
            wtr.write_record(["layer", "ec_state", "min", "max", "inverted"])?;
        }
        wtr.flush()?;
        Ok(())
    }
}

/// Full output of the condition run.
#[derive(Debug, Clone)]
pub struct AggregationResult {
    /// Per-state rasters in canonical order, present states only.
    pub states: Vec<(EcosystemState, RasterGrid)>,
    pub composite: RasterGrid,
    pub classes: Vec<ClassArea>,
    pub weights: WeightTree,
}

impl AggregationResult {
    /// Write `NN_<State>.tif`, the composite and the class-area CSV.
    pub fn write(&self, dir: &Path, class_csv: &str) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(dir)?;
        let mut written = Vec::with_capacity(self.states.len() + 2);

        for (state, grid) in &self.states {
            let path = dir.join(format!("{}.tif", state.output_stem()));
            io::write_grid(grid, &path)?;
            written.push(path);
        }

        let path = dir.join(COMPOSITE_FILE);
        io::write_grid(&self.composite, &path)?;
        written.push(path);

        let path = dir.join(class_csv);
        write_class_areas_csv(File::create(&path)?, &self.classes)?;
        written.push(path);

        Ok(written)
    }
}

// ── Orchestrator ──────────────────────────────────────────────────────────────

pub struct ConditionPipeline {
    config: PipelineConfig,
    checker: AlignmentChecker,
}

impl ConditionPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let checker = config.checker();
        Ok(Self { config, checker })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Read every layer. A layer that cannot be read is skipped with a
    /// warning.
    pub fn load_layers(&self) -> (Vec<LoadedLayer>, Vec<SkippedLayer>) {
        let mut loaded = Vec::with_capacity(self.config.layers.len());
        let mut skipped = Vec::new();
        for task in &self.config.layers {
            match io::read_grid(&task.path) {
                Ok(grid) => loaded.push(LoadedLayer {
                    task: task.clone(),
                    grid,
                }),
                Err(e) => {
                    warn!(layer = %task.name, error = %e, "skipping unreadable layer");
                    skipped.push(SkippedLayer {
                        name: task.name.clone(),
                        reason: Error::Backend(e.to_string()).to_string(),
                    });
                }
            }
        }
        (loaded, skipped)
    }

    fn load_masks(&self) -> Result<Option<(RasterGrid, RasterGrid)>> {
        match (&self.config.min_mask, &self.config.max_mask) {
            (Some(min), Some(max)) => {
                let read = |p: &PathBuf| {
                    io::read_grid(p)
                        .map_err(|e| Error::Backend(format!("mask {}: {e}", p.display())))
                };
                Ok(Some((read(min)?, read(max)?)))
            }
            _ => Ok(None),
        }
    }

    fn require_aligned(&self, layers: &[LoadedLayer], extra: &[(&str, &RasterGrid)]) -> Result<()> {
        let grids: Vec<(&str, &RasterGrid)> = layers
            .iter()
            .map(|l| (l.task.name.as_str(), &l.grid))
            .chain(extra.iter().copied())
            .collect();
        if grids.len() < 2 {
            return Ok(());
        }
        self.checker.check_all(grids)?.into_result()
    }

    /// Normalize loaded layers against the masks. Misalignment aborts the
    /// batch; a layer that cannot be rescaled is skipped.
    pub fn normalize(
        &self,
        layers: Vec<LoadedLayer>,
        min_mask: &RasterGrid,
        max_mask: &RasterGrid,
    ) -> Result<NormalizationRun> {
        self.require_aligned(&layers, &[("min-mask", min_mask), ("max-mask", max_mask)])?;
        let masks = RegionMasks::with_checker(min_mask, max_mask, &self.checker)?;

        let mut run = NormalizationRun::default();
        for layer in layers {
            let task = layer.task;
            info!(layer = %task.name, state = %task.state, invert = task.invert, "normalizing");
            let options = NormalizeOptions {
                invert: task.invert,
                clip_to_min_mask: self.config.clip_to_min_mask,
            };
            match normalize_with(&layer.grid, &masks, options, &self.checker) {
                Ok(n) => {
                    run.records.push(NormalizationRecord {
                        layer: task.name.clone(),
                        ec_state: task.state,
                        min: n.local_min,
                        max: n.local_max,
                        inverted: task.invert,
                    });
                    run.layers.push(LoadedLayer { task, grid: n.grid });
                }
                Err(e) => {
                    warn!(layer = %task.name, error = %e, "skipping layer");
                    run.skipped.push(SkippedLayer {
                        name: task.name,
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(run)
    }

    /// Weighted sums per state and across states.
    pub fn aggregate(&self, layers: &[LoadedLayer]) -> Result<AggregationResult> {
        if layers.is_empty() {
            return Err(Error::Validation("no layers to aggregate".into()));
        }
        self.require_aligned(layers, &[])?;

        let shorts: Vec<String> = layers.iter().map(|l| l.task.short()).collect();
        let mut weights = WeightTree::from_assignments(
            layers
                .iter()
                .zip(&shorts)
                .map(|(l, s)| (l.task.state, s.as_str())),
        )?;
        weights.apply(&self.present_overrides(&weights))?;

        let mut states = Vec::new();
        for state in weights.states().collect::<Vec<_>>() {
            let group = weights
                .layer_weights(state)
                .ok_or_else(|| Error::Validation(format!("no weights for state '{state}'")))?;
            let items: Vec<(&RasterGrid, f64)> = layers
                .iter()
                .zip(&shorts)
                .filter(|(l, _)| l.task.state == state)
                .map(|(l, s)| (&l.grid, group.weight(s).unwrap_or(0.0)))
                .collect();
            let grid = aggregate_group_with(&items, &self.checker)?;
            info!(%state, layers = items.len(), "state aggregated");
            states.push((state, grid));
        }

        let weighted: Vec<(EcosystemState, &RasterGrid, f64)> = states
            .iter()
            .map(|(s, g)| (*s, g, weights.state_weight(*s).unwrap_or(0.0)))
            .collect();
        let composite = aggregate_final_with(&weighted, &self.checker)?;
        let classes = summarize(&composite);

        Ok(AggregationResult {
            states,
            composite,
            classes,
            weights,
        })
    }

    /// Overrides restricted to layers and states still in the run; the rest
    /// belong to skipped layers.
    fn present_overrides(&self, weights: &WeightTree) -> WeightOverrides {
        let mut present = WeightOverrides::default();
        for (label, &value) in &self.config.weights.layers {
            if weights.state_of(label).is_some() {
                present.layers.insert(label.clone(), value);
            } else {
                warn!(layer = %label, "ignoring weight override of a skipped layer");
            }
        }
        for (&state, &value) in &self.config.weights.states {
            if weights.layer_weights(state).is_some() {
                present.states.insert(state, value);
            } else {
                warn!(%state, "ignoring weight override of a state with no remaining layers");
            }
        }
        present
    }

    /// Load, normalize, then write normalized rasters and the summary CSV.
    pub fn run_normalization(&self) -> Result<NormalizationRun> {
        let (min_mask, max_mask) = self
            .load_masks()?
            .ok_or_else(|| Error::Validation("normalization needs a min-mask and a max-mask".into()))?;
        let (loaded, mut skipped) = self.load_layers();
        if loaded.is_empty() {
            return Err(Error::Validation("none of the layers could be read".into()));
        }

        let mut run = self.normalize(loaded, &min_mask, &max_mask)?;
        skipped.append(&mut run.skipped);
        run.skipped = skipped;

        self.write_normalized(&mut run)?;
        Ok(run)
    }

    /// A layer that cannot be written is moved to the skipped list.
    fn write_normalized(&self, run: &mut NormalizationRun) -> Result<()> {
        fs::create_dir_all(&self.config.output_dir)?;
        let mut written = Vec::with_capacity(run.layers.len());
        for layer in std::mem::take(&mut run.layers) {
            let path = self.config.normalized_path(&layer.task);
            match io::write_grid(&layer.grid, &path) {
                Ok(()) => written.push(layer),
                Err(e) => {
                    warn!(layer = %layer.task.name, path = %path.display(), error = %e, "cannot write normalized layer");
                    run.records.retain(|r| r.layer != layer.task.name);
                    run.skipped.push(SkippedLayer {
                        name: layer.task.name,
                        reason: e.to_string(),
                    });
                }
            }
        }
        run.layers = written;
        let csv_path = self.config.output_dir.join(&self.config.summary_csv);
        run.write_summary_csv(&csv_path)?;
        info!(
            processed = run.records.len(),
            skipped = run.skipped.len(),
            summary = %csv_path.display(),
            "normalization complete"
        );
        Ok(())
    }

    /// Full condition run. With masks configured the inputs are normalized
    /// first; otherwise they are taken as already normalized.
    pub fn run_condition(&self) -> Result<AggregationResult> {
        let (loaded, skipped) = self.load_layers();
        if loaded.is_empty() {
            return Err(Error::Validation("none of the layers could be read".into()));
        }
        if !skipped.is_empty() {
            warn!(skipped = skipped.len(), "some layers were not read");
        }

        match self.load_masks()? {
            Some((min_mask, max_mask)) => {
                let mut run = self.normalize(loaded, &min_mask, &max_mask)?;
                if run.layers.is_empty() {
                    return Err(Error::Validation("no layer could be normalized".into()));
                }
                run.skipped.extend(skipped);
                let layers = std::mem::take(&mut run.layers);
                self.finish_condition(layers, Some(run))
            }
            None => self.finish_condition(loaded, None),
        }
    }

    fn finish_condition(
        &self,
        layers: Vec<LoadedLayer>,
        normalized: Option<NormalizationRun>,
    ) -> Result<AggregationResult> {
        let result = self.aggregate(&layers)?;

        if let Some(mut run) = normalized {
            run.layers = layers;
            self.write_normalized(&mut run)?;
        }
        let written = result.write(&self.config.output_dir, &self.config.class_csv)?;
        for class in &result.classes {
            info!(range = %class.range_label(), area_km2 = %format!("{:.2}", class.area_km2), "class area");
        }
        info!(files = written.len(), dir = %self.config.output_dir.display(), "condition outputs written");
        Ok(result)
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
