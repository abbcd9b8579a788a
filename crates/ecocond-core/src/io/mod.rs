//! Grid input/output.
//!
//! Paths ending in `.json` are read and written with serde; everything else
//! is treated as a single-band GeoTIFF.

pub mod geotiff;

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::grid::RasterGrid;

pub use geotiff::{read_geotiff, read_geotiff_from_buffer, write_geotiff, write_geotiff_to_buffer};

/// Storage type of the source samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    Byte,
    UInt16,
    UInt32,
    UInt64,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

/// Read a grid together with the storage type of its samples.
pub fn read_grid_with_format<P: AsRef<Path>>(path: P) -> Result<(RasterGrid, SampleFormat)> {
    let path = path.as_ref();
    if is_json(path) {
        let grid: RasterGrid = serde_json::from_reader(BufReader::new(File::open(path)?))?;
        Ok((grid, SampleFormat::Float32))
    } else {
        read_geotiff(path)
    }
}

pub fn read_grid<P: AsRef<Path>>(path: P) -> Result<RasterGrid> {
    read_grid_with_format(path).map(|(grid, _)| grid)
}

/// Write a grid; GeoTIFF output is always Float32.
pub fn write_grid<P: AsRef<Path>>(grid: &RasterGrid, path: P) -> Result<()> {
    let path = path.as_ref();
    if is_json(path) {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, grid)?;
        Ok(())
    } else {
        write_geotiff(grid, path)
    }
}
