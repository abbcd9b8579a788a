/// Raster alignment tool: resamples each input onto a reference grid and
/// masks it by the reference, writing `<output>/<name>.tif`.
///
/// A layer that fails (unreadable, different CRS) is skipped with a warning;
/// the run fails only when no layer could be aligned.
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ecocond_core::names::{layer_name_from_path, validate_layer_name};
use ecocond_core::resample::{align_to_reference, ResampleMethod};
use ecocond_core::{read_grid, write_grid, RasterGrid};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "align_layers",
    about = "Resample rasters onto a reference grid and mask them by it"
)]
struct Args {
    /// Reference raster defining extent, cell size and CRS
    #[arg(short, long)]
    reference: PathBuf,

    /// Output directory (created if absent)
    #[arg(short, long)]
    output: PathBuf,

    /// Input layer as PATH or PATH=NAME (NAME defaults to the file stem)
    #[arg(short, long = "input", required = true, value_parser = parse_input)]
    inputs: Vec<InputLayer>,

    /// Resampling method: auto, nearest or bilinear
    #[arg(short, long, default_value = "auto")]
    method: String,
}

#[derive(Debug, Clone, PartialEq)]
struct InputLayer {
    path: PathBuf,
    name: String,
}

fn parse_input(s: &str) -> std::result::Result<InputLayer, String> {
    let (path, name) = match s.rsplit_once('=') {
        Some((p, n)) => (PathBuf::from(p), n.to_string()),
        None => {
            let p = PathBuf::from(s);
            let n = layer_name_from_path(&p)
                .ok_or_else(|| format!("cannot derive a layer name from '{s}'"))?;
            (p, n)
        }
    };
    let name = validate_layer_name(&name).map_err(|e| e.to_string())?;
    Ok(InputLayer {
        path,
        name: name.to_string(),
    })
}

/// `None` means pick per layer from the relative cell sizes.
fn parse_method(s: &str) -> Result<Option<ResampleMethod>> {
    if s.trim().eq_ignore_ascii_case("auto") {
        return Ok(None);
    }
    Ok(Some(s.parse()?))
}

// ── Alignment ────────────────────────────────────────────────────────────────

fn align_one(
    input: &InputLayer,
    reference: &RasterGrid,
    method: Option<ResampleMethod>,
    out_dir: &Path,
) -> Result<PathBuf> {
    let source = read_grid(&input.path)
        .with_context(|| format!("reading {}", input.path.display()))?;
    let method = method.unwrap_or_else(|| ResampleMethod::default_for(&source, reference));
    let aligned = align_to_reference(&source, reference, method)
        .with_context(|| format!("aligning '{}' with {method}", input.name))?;

    let path = out_dir.join(format!("{}.tif", input.name));
    write_grid(&aligned, &path).with_context(|| format!("writing {}", path.display()))?;
    info!(layer = %input.name, %method, output = %path.display(), "layer aligned");
    Ok(path)
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
    let method = parse_method(&args.method)?;

    let mut seen = BTreeSet::new();
    for input in &args.inputs {
        if !seen.insert(input.name.as_str()) {
            bail!("output name '{}' is used more than once", input.name);
        }
    }

    let reference = read_grid(&args.reference)
        .with_context(|| format!("reading reference {}", args.reference.display()))?;
    fs::create_dir_all(&args.output)
        .with_context(|| format!("creating {}", args.output.display()))?;

    let mut aligned = 0usize;
    let mut skipped = Vec::new();
    for input in &args.inputs {
        match align_one(input, &reference, method, &args.output) {
            Ok(_) => aligned += 1,
            Err(e) => {
                warn!(layer = %input.name, error = %format!("{e:#}"), "layer skipped");
                skipped.push(input.name.clone());
            }
        }
    }

    info!(aligned, skipped = skipped.len(), "alignment finished");
    if aligned == 0 {
        bail!("no layer could be aligned");
    }
    Ok(())
}

// ── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use ecocond_core::Extent;

    #[test]
    fn input_argument_parsing() {
        let named = parse_input("data/ndvi_2020.tif=ndvi").unwrap();
        assert_eq!(named.path, PathBuf::from("data/ndvi_2020.tif"));
        assert_eq!(named.name, "ndvi");

        let stem = parse_input("data/soil.tif").unwrap();
        assert_eq!(stem.name, "soil");

        assert!(parse_input("a.tif=bad/name").is_err());
        assert!(parse_input("a.tif=").is_err());
    }

    #[test]
    fn method_parsing() {
        assert_eq!(parse_method("auto").unwrap(), None);
        assert_eq!(parse_method("near").unwrap(), Some(ResampleMethod::Nearest));
        assert_eq!(parse_method("Bilinear").unwrap(), Some(ResampleMethod::Bilinear));
        assert!(parse_method("cubic").is_err());
    }

    #[test]
    fn aligned_output_is_masked_by_the_reference() {
        let dir = tempfile::tempdir().unwrap();
        let extent = Extent::new(0.0, 40.0, 0.0, 40.0);
        let mut reference = RasterGrid::new(2, 2, extent, 1.0).with_crs("EPSG:3035");
        reference.set(0, 0, 0.0);
        let source = RasterGrid::new(4, 4, extent, 5.0).with_crs("EPSG:3035");
        let src_path = dir.path().join("src.json");
        write_grid(&source, &src_path).unwrap();

        let input = InputLayer {
            path: src_path,
            name: "layer".into(),
        };
        let out = align_one(&input, &reference, None, dir.path()).unwrap();
        assert_eq!(out, dir.path().join("layer.tif"));

        let written = read_grid(&out).unwrap();
        assert_eq!((written.width, written.height), (2, 2));
        assert_eq!(written.data, vec![0.0, 5.0, 5.0, 5.0]);
    }

    #[test]
    fn crs_mismatch_fails_the_layer() {
        let dir = tempfile::tempdir().unwrap();
        let extent = Extent::new(0.0, 4.0, 0.0, 4.0);
        let reference = RasterGrid::new(2, 2, extent, 1.0).with_crs("EPSG:3035");
        let src_path = dir.path().join("src.json");
        write_grid(&RasterGrid::new(2, 2, extent, 1.0).with_crs("EPSG:4326"), &src_path).unwrap();

        let input = InputLayer {
            path: src_path,
            name: "other".into(),
        };
        assert!(align_one(&input, &reference, None, dir.path()).is_err());
        assert!(!dir.path().join("other.tif").exists());
    }
}
