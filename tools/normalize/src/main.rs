/// Normalization tool: rescales each layer of a run file to [0, 1] using a
/// min-mask and a max-mask, writing `<prefix><name><suffix>.tif` and a
/// summary CSV.
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ecocond_core::pipeline::{ConditionPipeline, NormalizationRun, PipelineConfig};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "normalize",
    about = "Rescale indicator layers to [0, 1] between region minima and maxima"
)]
struct Args {
    /// JSON run file
    #[arg(short, long)]
    config: PathBuf,

    /// Output directory, overriding the run file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Set values outside the min-mask to no-data
    #[arg(long)]
    clip: bool,
}

fn load_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = PipelineConfig::from_json_file(&args.config)
        .with_context(|| format!("reading run file {}", args.config.display()))?;
    if let Some(dir) = &args.output {
        config.output_dir = dir.clone();
    }
    config.clip_to_min_mask |= args.clip;
    if config.min_mask.is_none() || config.max_mask.is_none() {
        bail!("the run file must name both a min_mask and a max_mask");
    }
    Ok(config)
}

fn log_run(run: &NormalizationRun) {
    for r in &run.records {
        info!(
            layer = %r.layer,
            state = %r.ec_state,
            min = r.min,
            max = r.max,
            inverted = r.inverted,
            "normalized"
        );
    }
    for s in &run.skipped {
        warn!(layer = %s.name, reason = %s.reason, "not normalized");
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
    let config = load_config(&args)?;
    let pipeline = ConditionPipeline::new(config).context("invalid run file")?;
    let run = pipeline.run_normalization().context("normalization failed")?;
    log_run(&run);

    if run.records.is_empty() {
        bail!("no layer could be normalized");
    }
    Ok(())
}

// ── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_config(dir: &std::path::Path, body: &str) -> PathBuf {
        let path = dir.join("run.json");
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn cli_overrides_the_run_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_config(
            dir.path(),
            r#"{"output_dir": "out", "layers": [], "min_mask": "a.tif", "max_mask": "b.tif"}"#,
        );
        let args = Args {
            config,
            output: Some(PathBuf::from("elsewhere")),
            clip: true,
        };
        let config = load_config(&args).unwrap();
        assert_eq!(config.output_dir, PathBuf::from("elsewhere"));
        assert!(config.clip_to_min_mask);
    }

    #[test]
    fn masks_are_required() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_config(dir.path(), r#"{"output_dir": "out", "layers": []}"#);
        let args = Args {
            config,
            output: None,
            clip: false,
        };
        assert!(load_config(&args).is_err());
    }
}
