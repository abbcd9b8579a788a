use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};
use crate::grid::RasterGrid;
use crate::io::{self, SampleFormat};
use crate::names::layer_name_from_path;

const RASTER_EXTENSIONS: &[&str] = &["tif", "tiff", "json"];

/// Named raster layers, loaded from disk on demand.
#[derive(Debug, Clone, Default)]
pub struct LayerRegistry {
    layers: BTreeMap<String, PathBuf>,
}

impl LayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `path` under `name`. Re-registering a name is an error.
    pub fn insert(&mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Result<()> {
        let name = name.into();
        if self.layers.contains_key(&name) {
            return Err(Error::Validation(format!("layer '{name}' registered twice")));
        }
        self.layers.insert(name, path.into());
        Ok(())
    }

    /// Register each path under its file stem.
    pub fn from_paths<I, P>(paths: I) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut registry = Self::new();
        for path in paths {
            let path = path.into();
            let name = layer_name_from_path(&path).ok_or_else(|| {
                Error::Validation(format!("cannot derive a layer name from {}", path.display()))
            })?;
            registry.insert(name, path)?;
        }
        Ok(registry)
    }

    /// Register every raster file directly inside `dir`.
    pub fn scan_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let mut paths: Vec<PathBuf> = fs::read_dir(dir.as_ref())?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| RASTER_EXTENSIONS.iter().any(|x| x.eq_ignore_ascii_case(e)))
            })
            .collect();
        paths.sort();
        debug!(dir = %dir.as_ref().display(), count = paths.len(), "scanned layer directory");
        Self::from_paths(paths)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.layers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn path(&self, name: &str) -> Result<&Path> {
        self.layers
            .get(name)
            .map(PathBuf::as_path)
            .ok_or_else(|| Error::Validation(format!("unknown layer '{name}'")))
    }

    /// Load a layer. Read failures are reported as backend errors naming
    /// the layer.
    pub fn load(&self, name: &str) -> Result<RasterGrid> {
        self.load_with_format(name).map(|(grid, _)| grid)
    }

    pub fn load_with_format(&self, name: &str) -> Result<(RasterGrid, SampleFormat)> {
        let path = self.path(name)?;
        io::read_grid_with_format(path)
            .map_err(|e| Error::Backend(format!("layer '{name}' ({}): {e}", path.display())))
    }
}
