/// Ecosystem condition tool: aggregates normalized indicator layers into
/// per-state rasters and the composite condition index, then reports the
/// area per condition class.
///
/// When the run file names a min-mask and a max-mask the layers are
/// normalized first; otherwise they are taken as already normalized.
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ecocond_core::pipeline::{AggregationResult, ConditionPipeline, PipelineConfig};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "condition",
    about = "Weighted aggregation of indicator layers into an ecosystem condition index"
)]
struct Args {
    /// JSON run file
    #[arg(short, long)]
    config: PathBuf,

    /// Output directory, overriding the run file
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn log_result(result: &AggregationResult) {
    for state in result.weights.states() {
        let Some(weight) = result.weights.state_weight(state) else {
            continue;
        };
        info!(%state, weight = %format!("{weight:.3}"), "state weight");
        if let Some(group) = result.weights.layer_weights(state) {
            for item in group.items() {
                info!(%state, layer = %item.label, weight = %format!("{:.3}", item.weight), "layer weight");
            }
        }
    }

    let total: f64 = result.classes.iter().map(|c| c.area_km2).sum();
    for class in &result.classes {
        let share = if total > 0.0 { 100.0 * class.area_km2 / total } else { 0.0 };
        info!(
            range = %class.range_label(),
            area_km2 = %format!("{:.2}", class.area_km2),
            share = %format!("{share:.1}%"),
            "condition class"
        );
    }
}

// ── Main ─────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(ecocond_core::DEFAULT_LOG_FILTER)),
        )
        .init();

    let args = Args::parse();
    let mut config = PipelineConfig::from_json_file(&args.config)
        .with_context(|| format!("reading run file {}", args.config.display()))?;
    if let Some(dir) = args.output {
        config.output_dir = dir;
    }

    let pipeline = ConditionPipeline::new(config).context("invalid run file")?;
    let result = pipeline.run_condition().context("condition run failed")?;
    log_result(&result);
    Ok(())
}

// ── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use ecocond_core::{read_grid, write_grid, Extent, RasterGrid};
    use std::fs;

    #[test]
    fn run_file_drives_a_full_condition_run() {
        let dir = tempfile::tempdir().unwrap();
        let extent = Extent::new(0.0, 2000.0, 0.0, 1000.0);
        let soil = RasterGrid::from_vec(vec![0.0, 1.0], 2, 1, extent).unwrap();
        let npp = RasterGrid::from_vec(vec![1.0, 1.0], 2, 1, extent).unwrap();
        write_grid(&soil, dir.path().join("soil.json")).unwrap();
        write_grid(&npp, dir.path().join("npp.json")).unwrap();

        let out = dir.path().join("out");
        let body = format!(
            r#"{{
                "output_dir": {out:?},
                "layers": [
                    {{"name": "soil", "path": {soil:?}, "state": "Physical"}},
                    {{"name": "npp", "path": {npp:?}, "state": "Functional"}}
                ],
                "weights": {{"states": {{"Physical": 0.25}}}}
            }}"#,
            out = out.display().to_string(),
            soil = dir.path().join("soil.json").display().to_string(),
            npp = dir.path().join("npp.json").display().to_string(),
        );
        let run_file = dir.path().join("run.json");
        fs::write(&run_file, body).unwrap();

        let config = PipelineConfig::from_json_file(&run_file).unwrap();
        let result = ConditionPipeline::new(config).unwrap().run_condition().unwrap();
        log_result(&result);

        // 0.25·soil + 0.75·npp
        let composite = read_grid(out.join("EcoCondition.tif")).unwrap();
        assert!((composite.data[0] - 0.75).abs() < 1e-6);
        assert!((composite.data[1] - 1.0).abs() < 1e-6);
        assert!(out.join("01_Physical.tif").exists());
        assert!(out.join("05_Functional.tif").exists());
        assert_eq!(result.classes[3].cells, 1);
        assert_eq!(result.classes[4].cells, 1);
    }
}
