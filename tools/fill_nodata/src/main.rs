/// No-data standardization tool: rewrites every missing encoding (declared
/// sentinel, NaN, float lowest) to one chosen value, which becomes the
/// declared sentinel of the output.
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ecocond_core::io::read_grid_with_format;
use ecocond_core::names::{layer_name_from_path, output_file_name};
use ecocond_core::nodata::standardize;
use ecocond_core::{write_grid, DEFAULT_NODATA};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "fill_nodata",
    about = "Replace every no-data encoding in rasters with a single value"
)]
struct Args {
    /// Input rasters
    #[arg(short, long = "input", required = true)]
    inputs: Vec<PathBuf>,

    /// Replacement value, written as the output sentinel
    #[arg(short, long, default_value_t = DEFAULT_NODATA, allow_hyphen_values = true)]
    value: f32,

    /// Output directory (created if absent)
    #[arg(short, long)]
    output: PathBuf,

    /// Prefix added to each output name
    #[arg(long, default_value = "")]
    prefix: String,

    /// Suffix added to each output name, before the extension
    #[arg(long, default_value = "")]
    suffix: String,

    /// Replace outputs that already exist
    #[arg(long)]
    overwrite: bool,
}

// ── Processing ───────────────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
enum Outcome {
    Written { path: PathBuf, replaced: usize },
    Exists(PathBuf),
}

fn fill_one(input: &Path, args: &Args) -> Result<Outcome> {
    let name = layer_name_from_path(input)
        .with_context(|| format!("cannot derive a name from {}", input.display()))?;
    let path = args
        .output
        .join(output_file_name(&args.prefix, &name, &args.suffix));
    if path.exists() && !args.overwrite {
        return Ok(Outcome::Exists(path));
    }

    let (grid, format) =
        read_grid_with_format(input).with_context(|| format!("reading {}", input.display()))?;
    let filled = standardize(&grid, format, args.value);
    write_grid(&filled.grid, &path).with_context(|| format!("writing {}", path.display()))?;
    Ok(Outcome::Written {
        path,
        replaced: filled.replaced,
    })
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
    if args.value.is_nan() {
        bail!("the replacement value must be a number");
    }
    fs::create_dir_all(&args.output)
        .with_context(|| format!("creating {}", args.output.display()))?;

    let mut failed = 0usize;
    for input in &args.inputs {
        match fill_one(input, &args) {
            Ok(Outcome::Written { path, replaced }) => {
                info!(input = %input.display(), output = %path.display(), replaced, "no-data filled");
            }
            Ok(Outcome::Exists(path)) => {
                warn!(output = %path.display(), "output exists, skipped (use --overwrite)");
            }
            Err(e) => {
                warn!(input = %input.display(), error = %format!("{e:#}"), "layer skipped");
                failed += 1;
            }
        }
    }

    info!(inputs = args.inputs.len(), failed, "fill finished");
    Ok(())
}

// ── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use ecocond_core::{read_grid, Extent, RasterGrid};

    fn args(output: &Path, overwrite: bool) -> Args {
        Args {
            inputs: Vec::new(),
            value: -1.0,
            output: output.to_path_buf(),
            prefix: "filled_".into(),
            suffix: String::new(),
            overwrite,
        }
    }

    #[test]
    fn every_missing_encoding_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("soil.json");
        let grid = RasterGrid::from_vec(
            vec![f32::NAN, -32768.0, 3.0, 4.0],
            2,
            2,
            Extent::new(0.0, 2.0, 0.0, 2.0),
        )
        .unwrap()
        .with_nodata(-32768.0);
        write_grid(&grid, &input).unwrap();

        let outcome = fill_one(&input, &args(dir.path(), false)).unwrap();
        let path = dir.path().join("filled_soil.tif");
        assert_eq!(
            outcome,
            Outcome::Written {
                path: path.clone(),
                replaced: 2
            }
        );

        let out = read_grid(&path).unwrap();
        assert_eq!(out.data, vec![-1.0, -1.0, 3.0, 4.0]);
        assert_eq!(out.nodata, Some(-1.0));
    }

    #[test]
    fn existing_output_needs_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("ndvi.json");
        write_grid(&RasterGrid::new(1, 1, Extent::new(0.0, 1.0, 0.0, 1.0), 0.5), &input).unwrap();
        let existing = dir.path().join("filled_ndvi.tif");
        fs::write(&existing, b"old").unwrap();

        assert_eq!(
            fill_one(&input, &args(dir.path(), false)).unwrap(),
            Outcome::Exists(existing.clone())
        );
        assert!(matches!(
            fill_one(&input, &args(dir.path(), true)).unwrap(),
            Outcome::Written { replaced: 0, .. }
        ));
        assert_eq!(read_grid(&existing).unwrap().data, vec![0.5]);
    }
}
