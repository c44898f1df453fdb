use std::path::PathBuf;

use thiserror::Error;

/// Low-level failure while reading or writing a container or record file.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Parquet(#[from] parquet::errors::ParquetError),
    #[error(transparent)]
    Arrow(#[from] arrow::error::ArrowError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Schema(String),
}

impl StoreError {
    pub fn schema(msg: impl Into<String>) -> Self {
        StoreError::Schema(msg.into())
    }
}

/// Everything that can end a dF/F run.
///
/// Only the zero-unit case is recovered locally; every variant here propagates
/// to the process boundary.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("no artifact matching `{pattern}` under {}", root.display())]
    ArtifactNotFound { root: PathBuf, pattern: String },

    #[error("{count} artifacts match `{pattern}` under {}", root.display())]
    AmbiguousArtifact {
        root: PathBuf,
        pattern: String,
        count: usize,
    },

    #[error("invalid glob pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("cannot derive an experiment id from {}", path.display())]
    InvalidExperimentId { path: PathBuf },

    #[error("dataset `{field}` missing from {}", path.display())]
    MissingField { path: PathBuf, field: String },

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("processing record not found at {}", path.display())]
    ProvenanceMissing { path: PathBuf },

    #[error("malformed processing record at {}: {reason}", path.display())]
    ProvenanceInvalid { path: PathBuf, reason: String },

    #[error("dF/F transform failed: {0}")]
    TransformFailure(String),

    #[error("failed to read {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: StoreError,
    },

    #[error("failed to write {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: StoreError,
    },
}

impl StageError {
    pub fn read(path: impl Into<PathBuf>, source: impl Into<StoreError>) -> Self {
        StageError::Read {
            path: path.into(),
            source: source.into(),
        }
    }

    pub fn write(path: impl Into<PathBuf>, source: impl Into<StoreError>) -> Self {
        StageError::Write {
            path: path.into(),
            source: source.into(),
        }
    }
}

pub type Result<T, E = StageError> = std::result::Result<T, E>;
