//! Error types for the storage and application layer.

use routecore::ExportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("cannot (de)serialize stored record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid route entity: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("route {0} not found")]
    NotFound(i64),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error("cannot build archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No routes selected")]
    NoRoutesSelected,

    #[error("export worker stopped without a result")]
    WorkerCrashed,
}

impl AppError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Export(e) if e.is_cancelled())
    }
}

pub type AppResult<T> = std::result::Result<T, AppError>;
