//! Error types for ecocond operations

use thiserror::Error;

/// Main error type for ecocond operations
#[derive(Error, Debug)]
pub enum Error {
    /// Bad user input: empty masks, weights out of range, unknown labels,
    /// malformed names, missing output folder.
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("layers not aligned with '{reference}': {}", .mismatched.join(", "))]
    Alignment {
        reference: String,
        mismatched: Vec<String>,
    },

    #[error("local minimum equals local maximum ({value}); layer cannot be rescaled")]
    DivisionDegenerate { value: f32 },

    #[error("inputs are not aligned: {0}")]
    UnalignedInputs(String),

    /// Raster read/write/resample failure, usually scoped to one layer.
    #[error("raster backend error: {0}")]
    Backend(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("a background job is already running")]
    Busy,

    #[error("job cancelled")]
    Cancelled,

    #[error("job exceeded its deadline")]
    TimedOut,
}

/// Result type alias for ecocond operations
pub type Result<T> = std::result::Result<T, Error>;
