//! The engine's small, stable error vocabulary.
//!
//! Every public operation in [`crate::store`], [`crate::vector`],
//! [`crate::ingest`], [`crate::search`], and [`crate::config_mutex`] returns
//! `Result<T, EngineError>`. Front-ends (`cli`, `http`, `rpc`) map each
//! variant to their own surface (exit code, HTTP status, JSON-RPC error)
//! through [`EngineError::code`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("path not found: {0}")]
    PathNotFound(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("collection still referenced by context(s): {0}")]
    HasReferences(String),

    #[error("failed to open store: {0}")]
    ConnectionFailed(String),

    #[error("failed to load extension: {0}")]
    ExtensionLoadFailed(String),

    #[error("query failed: {0}")]
    QueryFailed(String),

    #[error("transaction failed: {0}")]
    TransactionFailed(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("vector write failed: {0}")]
    VectorWriteFailed(String),

    #[error("vector delete failed: {0}")]
    VectorDeleteFailed(String),

    #[error("vector search unavailable: {0}")]
    VecSearchUnavailable(String),

    #[error("vector search failed: {0}")]
    VecSearchFailed(String),

    #[error("vector rebuild failed: {0}")]
    VecRebuildFailed(String),

    #[error("vector sync failed: {0}")]
    VecSyncFailed(String),

    #[error("failed to load config: {0}")]
    LoadError(String),

    #[error("failed to save config: {0}")]
    SaveError(String),

    #[error("failed to sync config into store: {0}")]
    SyncError(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("internal error: {0}")]
    Runtime(String),
}

impl EngineError {
    /// Stable machine-readable code shared by every external surface.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "VALIDATION",
            EngineError::NotFound(_) => "NOT_FOUND",
            EngineError::Conflict(_) => "CONFLICT",
            EngineError::PathNotFound(_) => "PATH_NOT_FOUND",
            EngineError::InvalidPath(_) => "INVALID_PATH",
            EngineError::HasReferences(_) => "HAS_REFERENCES",
            EngineError::ConnectionFailed(_) => "CONNECTION_FAILED",
            EngineError::ExtensionLoadFailed(_) => "EXTENSION_LOAD_FAILED",
            EngineError::QueryFailed(_) => "QUERY_FAILED",
            EngineError::TransactionFailed(_) => "TRANSACTION_FAILED",
            EngineError::InvalidInput(_) => "INVALID_INPUT",
            EngineError::VectorWriteFailed(_) => "VECTOR_WRITE_FAILED",
            EngineError::VectorDeleteFailed(_) => "VECTOR_DELETE_FAILED",
            EngineError::VecSearchUnavailable(_) => "VEC_SEARCH_UNAVAILABLE",
            EngineError::VecSearchFailed(_) => "VEC_SEARCH_FAILED",
            EngineError::VecRebuildFailed(_) => "VEC_REBUILD_FAILED",
            EngineError::VecSyncFailed(_) => "VEC_SYNC_FAILED",
            EngineError::LoadError(_) => "LOAD_ERROR",
            EngineError::SaveError(_) => "SAVE_ERROR",
            EngineError::SyncError(_) => "SYNC_ERROR",
            EngineError::Unavailable(_) => "UNAVAILABLE",
            EngineError::Forbidden(_) => "FORBIDDEN",
            EngineError::Runtime(_) => "RUNTIME",
        }
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::RowNotFound => EngineError::NotFound(e.to_string()),
            _ => EngineError::QueryFailed(e.to_string()),
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => EngineError::PathNotFound(e.to_string()),
            _ => EngineError::Runtime(e.to_string()),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
