use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("not a valid database: {path}")]
    Corrupted { path: String },

    #[error("migration {version} failed: {source}")]
    Migration {
        version: usize,
        #[source]
        source: rusqlite::Error,
    },

    #[error("application error: {0}")]
    Application(Box<dyn std::error::Error + Send + Sync>),

    #[error("core error: {0}")]
    Core(#[from] profiledb_core::CoreError),
}

impl StorageError {
    /// True when the bytes behind the handle are not a usable database, as
    /// opposed to a failing statement.
    pub fn is_corruption(&self) -> bool {
        match self {
            Self::Corrupted { .. } => true,
            Self::Sqlite(e) | Self::Migration { source: e, .. } => is_corruption_code(e),
            _ => false,
        }
    }
}

pub(crate) fn is_corruption_code(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(
                e.code,
                rusqlite::ErrorCode::NotADatabase | rusqlite::ErrorCode::DatabaseCorrupt
            )
    )
}

/// Failure to open a stream through the host's document layer.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("document not found: {0}")]
    NotFound(#[source] io::Error),

    #[error("permission denied: {0}")]
    PermissionDenied(#[source] io::Error),

    #[error("i/o error: {0}")]
    Io(#[source] io::Error),
}

impl From<io::Error> for HostError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound(err),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(err),
            _ => Self::Io(err),
        }
    }
}
