use std::path::PathBuf;

use thiserror::Error;

use crate::data::hooks::HookStage;

/// Everything that can go wrong while building or reading the dataset.
#[derive(Debug, Error)]
pub enum DatasetError {
    /// Neither the processed splits nor the raw archive are present.
    #[error(
        "Dataset not found. Please download {archive} from {url} and move it to {}",
        raw_dir.display()
    )]
    MissingRawInput {
        archive: String,
        url: &'static str,
        raw_dir: PathBuf,
    },

    #[error("failed to extract archive {}", path.display())]
    CorruptArchive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("mesh file {} is missing", path.display())]
    MissingMesh { path: PathBuf },

    #[error("failed to read mesh {}: {reason}", path.display())]
    CorruptMesh { path: PathBuf, reason: String },

    #[error("diameter table {} is missing", path.display())]
    MissingDiameters { path: PathBuf },

    #[error("failed to decode diameter table {}: {reason}", path.display())]
    CorruptDiameters { path: PathBuf, reason: String },

    /// A user hook returned an error. The original error is kept as the source.
    #[error("{stage} hook failed on record {index}")]
    Hook {
        stage: HookStage,
        index: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to write artifact {}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: parquet::errors::ParquetError,
    },

    #[error("failed to read artifact {}", path.display())]
    Artifact {
        path: PathBuf,
        #[source]
        source: parquet::errors::ParquetError,
    },

    #[error("artifact content is malformed: {0}")]
    CorruptArtifact(String),

    #[error(transparent)]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("records disagree on attribute schema: {0}")]
    SchemaMismatch(String),

    #[error("index {index} is out of range for a split of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("invalid dataset configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to parse configuration {}", path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error on {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, DatasetError>;

impl DatasetError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DatasetError::Io {
            path: path.into(),
            source,
        }
    }
}
