use std::path::PathBuf;

use gdal::errors::GdalError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TilesError>;

#[derive(Debug, Error)]
pub enum TilesError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Invalid zoom range {min}..={max}")]
    InvalidZoomRange { min: u32, max: u32 },
    #[error("Tile number components must be non-negative, got ({x}, {y}, {z})")]
    NegativeNumber { x: i64, y: i64, z: i64 },
    #[error("Tile number ({x}, {y}, {z}) is out of the valid range for zoom {z}")]
    NumberOutOfRange { x: i64, y: i64, z: i64 },
    #[error("Unsupported coordinate system: {0}")]
    UnsupportedCoordinateSystem(String),
    #[error("Unsupported tile extension: '{0}'")]
    UnsupportedExtension(String),
    #[error("Unsupported raster: {0}")]
    UnsupportedRaster(String),
    #[error("Degenerate area: {0}")]
    DegenerateArea(String),
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Gdal(#[from] GdalError),
    #[error("Unable to start the worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("Tile set metadata error: {0}")]
    Xml(String),
    #[error("Generation was cancelled")]
    Cancelled,
}

impl TilesError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TilesError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error is the outcome of a cooperative cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TilesError::Cancelled)
    }
}

impl From<std::ffi::NulError> for TilesError {
    fn from(err: std::ffi::NulError) -> Self {
        TilesError::InvalidArgument(err.to_string())
    }
}
