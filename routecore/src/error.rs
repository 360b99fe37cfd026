//! Error types for route ingestion.

use thiserror::Error;

/// Why one input file could not become a route.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("unsupported file extension: '{0}'")]
    UnsupportedExtension(String),

    #[error("file is not valid UTF-8 text: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),

    #[error("invalid GPX: {0}")]
    Gpx(#[from] gpx::errors::GpxError),

    #[error("invalid GeoJSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cannot read FIT file: {0}")]
    Fit(String),

    #[error("no route features found")]
    NoFeatures,

    #[error("invalid route: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

pub type Result<T> = std::result::Result<T, IngestError>;
