/// Collinearity screening tool: Spearman correlation matrix and variance
/// inflation factors over aligned indicator layers.
///
/// The analysis runs on a background worker so the main thread can report
/// progress and enforce the optional deadline.
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ecocond_core::collinearity::{
    analyze, format_vif, CollinearityOptions, CollinearityReport, STRONG_CORRELATION,
};
use ecocond_core::jobs::{CancelToken, JobSlot};
use ecocond_core::registry::LayerRegistry;
use ecocond_core::{read_grid, RasterGrid};

const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "collinearity",
    about = "Spearman correlation and VIF diagnostics for aligned raster layers"
)]
struct Args {
    /// Layer raster (repeatable); the file stem is the layer name
    #[arg(short, long = "layer")]
    layers: Vec<PathBuf>,

    /// Directory whose .tif/.json rasters are all used as layers
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// Mask raster; cells where it is no-data are excluded
    #[arg(short, long)]
    mask: Option<PathBuf>,

    /// Skip the VIF computation
    #[arg(long)]
    no_vif: bool,

    /// Abort the analysis after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Correlation matrix CSV output
    #[arg(long)]
    csv: Option<PathBuf>,

    /// VIF table CSV output
    #[arg(long)]
    vif_csv: Option<PathBuf>,
}

fn build_registry(args: &Args) -> Result<LayerRegistry> {
    let mut registry = match &args.dir {
        Some(dir) => LayerRegistry::scan_dir(dir)
            .with_context(|| format!("scanning {}", dir.display()))?,
        None => LayerRegistry::new(),
    };
    let explicit = LayerRegistry::from_paths(args.layers.iter().cloned())?;
    for name in explicit.names() {
        registry.insert(name, explicit.path(name)?)?;
    }
    if registry.len() < 2 {
        bail!("at least two layers are needed, got {}", registry.len());
    }
    Ok(registry)
}

// ── Analysis ─────────────────────────────────────────────────────────────────

fn run_analysis(
    registry: &LayerRegistry,
    mask: Option<&Path>,
    options: CollinearityOptions,
    token: &CancelToken,
) -> ecocond_core::Result<CollinearityReport> {
    let mut grids: Vec<(String, RasterGrid)> = Vec::with_capacity(registry.len());
    for name in registry.names() {
        token.check()?;
        grids.push((name.to_string(), registry.load(name)?));
    }
    let mask = mask.map(read_grid).transpose()?;

    let layers: Vec<(&str, &RasterGrid)> = grids.iter().map(|(n, g)| (n.as_str(), g)).collect();
    analyze(&layers, mask.as_ref(), options, token)
}

fn log_report(report: &CollinearityReport) {
    for (name, missing) in report.names.iter().zip(&report.missing) {
        info!(layer = %name, missing, "no-data cells");
    }
    for (i, j, rho) in report.strong_pairs(STRONG_CORRELATION) {
        warn!(
            a = %report.names[i],
            b = %report.names[j],
            rho = %format!("{rho:.4}"),
            "strong correlation"
        );
    }
    if let Some(vif) = &report.vif {
        for (name, &v) in report.names.iter().zip(vif) {
            info!(layer = %name, vif = %format_vif(v), "variance inflation");
        }
        for i in report.vif_risks() {
            warn!(layer = %report.names[i], "VIF indicates multicollinearity risk");
        }
    }
}

fn export(report: &CollinearityReport, args: &Args) -> Result<()> {
    if let Some(path) = &args.csv {
        let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        report.write_correlation_csv(file)?;
        info!(path = %path.display(), "correlation matrix written");
    }
    if let Some(path) = &args.vif_csv {
        let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        report.write_vif_csv(file)?;
        info!(path = %path.display(), "VIF table written");
    }
    Ok(())
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
    if args.no_vif && args.vif_csv.is_some() {
        bail!("--vif-csv cannot be combined with --no-vif");
    }
    let registry = build_registry(&args)?;
    info!(layers = registry.len(), "starting collinearity check");

    let options = CollinearityOptions {
        compute_vif: !args.no_vif,
    };
    let mask = args.mask.clone();
    let timeout = args.timeout_secs.map(Duration::from_secs);

    let slot = JobSlot::new();
    let mut handle = slot.start(timeout, move |token| {
        run_analysis(&registry, mask.as_deref(), options, token)
    })?;

    let started = Instant::now();
    let report = loop {
        match handle.wait_timeout(PROGRESS_INTERVAL) {
            Some(result) => break result.context("collinearity check failed")?,
            None => info!(elapsed_secs = started.elapsed().as_secs(), "still running"),
        }
    };

    log_report(&report);
    export(&report, &args)
}

// ── Unit tests ───────────────────────────────────────────────────────────────
