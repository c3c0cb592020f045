// Typed errors for the catalog engine
//
// Recoverable conditions (acquisition timeouts, ordering repairs) are not
// errors: they are recorded on the scrape report and logged.

use std::path::PathBuf;
use thiserror::Error;

/// Failures converting between timestamps and human-readable text.
#[derive(Debug, Error)]
pub enum TimeError {
    #[error("invalid time format string: {0:?}")]
    InvalidFormat(String),

    #[error("could not parse {input:?} with format {format:?}: {source}")]
    Parse {
        input: String,
        format: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("{0:?} does not exist in the local timezone")]
    NonExistentLocalTime(String),

    #[error("{0:?} is outside the representable timestamp range")]
    OutOfRange(String),
}

/// Failures querying a single recording's index.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("no frames in {filename}")]
    NoFrames { filename: String },

    #[error("lookup table for {filename} is not loaded")]
    LookupNotLoaded { filename: String },
}

/// Failures raised by a frame source adapter.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source is not open")]
    NotOpen,

    #[error("malformed frame log {path}:{line}: {reason}")]
    Malformed {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failures building, loading or persisting a catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("could not open {path} for scraping: {reason}")]
    OpenFailure { path: PathBuf, reason: String },

    #[error("no frames could be captured from {path}")]
    EmptyRecording { path: PathBuf },

    #[error("no catalog entry named {filename}")]
    UnknownEntry { filename: String },

    #[error("a scrape worker panicked")]
    WorkerPanicked,

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl CatalogError {
    /// Errors that concern a single recording rather than the store.
    pub fn is_per_file(&self) -> bool {
        matches!(
            self,
            CatalogError::OpenFailure { .. }
                | CatalogError::EmptyRecording { .. }
                | CatalogError::Source(_)
        )
    }
}

pub type Result<T, E = CatalogError> = std::result::Result<T, E>;
