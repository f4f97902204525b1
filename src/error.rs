//! Typed failure taxonomy.
//!
//! Library functions return `anyhow::Result`; failures that callers need to
//! tell apart are raised as a `LabelError` inside the `anyhow::Error`, so they
//! can be recovered with `err.downcast_ref::<LabelError>()` even after context
//! has been attached.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LabelError {
    /// Video unreadable, undecodable or empty, or the corpus could not be written.
    #[error("ingest failed: {0}")]
    Ingest(String),
    /// Capture metadata missing or malformed.
    #[error("capture metadata invalid: {0}")]
    Metadata(String),
    /// No eligible video or frame in the corpus.
    #[error("no frame data available: {0}")]
    NoData(String),
    /// Degenerate or self-intersecting polygon.
    #[error("invalid polygon: {0}")]
    Geometry(String),
    #[error("path not found: {}", .0.display())]
    NotFound(PathBuf),
    /// Malformed annotation document.
    #[error("malformed annotation document {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl LabelError {
    /// Stable code for logs and for the network layer.
    pub fn code(&self) -> &'static str {
        match self {
            LabelError::Ingest(_) => "INGEST_ERROR",
            LabelError::Metadata(_) => "METADATA_ERROR",
            LabelError::NoData(_) => "NO_DATA",
            LabelError::Geometry(_) => "GEOMETRY_ERROR",
            LabelError::NotFound(_) => "NOT_FOUND",
            LabelError::Parse { .. } => "PARSE_ERROR",
            LabelError::InvalidInput(_) => "INVALID_INPUT",
        }
    }

    /// Returns the typed error carried by `err`, if any.
    pub fn classify(err: &anyhow::Error) -> Option<&LabelError> {
        err.downcast_ref::<LabelError>()
    }
}
