//! Error types for the rasterization pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while dissolving, rasterizing or assembling features.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Rank attribute value not present in the rank table.
    #[error("unknown rank value '{value}' for feature [{feature}]")]
    UnknownRank { value: String, feature: String },

    /// A required attribute column is absent from a feature.
    #[error("missing required column '{column}' for feature [{feature}]")]
    MissingColumn { column: String, feature: String },

    /// Null, empty or otherwise unusable geometry.
    #[error("invalid geometry for feature [{feature}]: {reason}")]
    InvalidGeometry { feature: String, reason: String },

    /// Two features resolve to the same output path.
    #[error("output path collision: {path:?} is claimed by [{first}] and [{second}]")]
    PathCollision {
        path: PathBuf,
        first: String,
        second: String,
    },

    /// Some features failed and partial output was not allowed.
    #[error("{failed} of {total} features failed; first failure: {first}")]
    IncompleteBatch {
        failed: usize,
        total: usize,
        first: String,
    },

    /// The reference grid description is inconsistent.
    #[error("invalid reference grid: {0}")]
    InvalidGrid(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Zarr format error.
    #[error("Zarr format error: {0}")]
    ZarrError(String),

    /// Storage/IO error.
    #[error("storage error: {0}")]
    StorageError(String),

    /// Serialized artifact could not be decoded.
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),
}

impl PipelineError {
    /// Create an UnknownRank error.
    pub fn unknown_rank(value: impl Into<String>, feature: impl Into<String>) -> Self {
        Self::UnknownRank {
            value: value.into(),
            feature: feature.into(),
        }
    }

    /// Create a MissingColumn error.
    pub fn missing_column(column: impl Into<String>, feature: impl Into<String>) -> Self {
        Self::MissingColumn {
            column: column.into(),
            feature: feature.into(),
        }
    }

    /// Create an InvalidGeometry error.
    pub fn invalid_geometry(feature: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidGeometry {
            feature: feature.into(),
            reason: reason.into(),
        }
    }

    /// Create a ConfigError.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Create a ZarrError.
    pub fn zarr_error(msg: impl Into<String>) -> Self {
        Self::ZarrError(msg.into())
    }

    /// Create a StorageError.
    pub fn storage_error(msg: impl Into<String>) -> Self {
        Self::StorageError(msg.into())
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        Self::StorageError(err.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidMetadata(err.to_string())
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
