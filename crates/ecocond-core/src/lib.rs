//! Ecosystem condition toolkit.
//!
//! Raster alignment and resampling, NoData standardization, collinearity
//! screening, region-anchored normalization and the weighted aggregation of
//! indicator layers into per-state and composite condition rasters.

pub mod aggregate;
pub mod alignment;
pub mod classes;
pub mod collinearity;
pub mod error;
pub mod grid;
pub mod io;
pub mod jobs;
mod maybe_rayon;
pub mod names;
pub mod nodata;
pub mod normalize;
pub mod pipeline;
pub mod registry;
pub mod resample;
pub mod state;
pub mod weights;

pub use alignment::{is_aligned, AlignmentChecker, AlignmentReport, Tolerance};
pub use error::{Error, Result};
pub use grid::{Extent, RasterGrid, DEFAULT_NODATA};
pub use io::{read_grid, write_grid, SampleFormat};
pub use pipeline::{ConditionPipeline, LayerTask, PipelineConfig};
pub use state::EcosystemState;
pub use weights::{WeightAllocator, WeightOverrides, WeightTree};

/// Default `tracing` filter for the tools, overridable through `RUST_LOG`.
pub const DEFAULT_LOG_FILTER: &str = "ecocond_core=info,info";
