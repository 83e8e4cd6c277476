use std::fmt;
use std::io;

use profiledb_storage::{HostError, StorageError};
use thiserror::Error;

/// Which side of a copy a file failure happened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOp {
    Read,
    Write,
}

impl fmt::Display for FileOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => f.write_str("read"),
            Self::Write => f.write_str("write"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFailureReason {
    FileNotFound,
    Security,
}

#[derive(Debug, Error)]
pub enum FileError {
    #[error("host returned no stream for {op}")]
    ContentProviderFailure { op: FileOp },

    #[error("cannot open document for {op} ({reason:?}): {source}")]
    UriCannotBeOpened {
        #[source]
        source: io::Error,
        reason: OpenFailureReason,
        op: FileOp,
    },

    #[error("i/o error during {op}: {source}")]
    InputOutputError {
        #[source]
        source: io::Error,
        op: FileOp,
    },

    #[error("file is not a valid database")]
    InvalidDatabase,

    #[error("document was granted read-only access")]
    ReadOnly,
}

impl FileError {
    pub(crate) fn from_host(err: HostError, op: FileOp) -> Self {
        match err {
            HostError::NotFound(source) => Self::UriCannotBeOpened {
                source,
                reason: OpenFailureReason::FileNotFound,
                op,
            },
            HostError::PermissionDenied(source) => Self::UriCannotBeOpened {
                source,
                reason: OpenFailureReason::Security,
                op,
            },
            HostError::Io(source) => Self::InputOutputError { source, op },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The transaction body broke its contract. Never retried.
    CodeContract,
    /// Storage, host or metadata trouble. Retrying later may help.
    Environment,
    /// The bytes are not a usable database.
    DataIntegrity,
}

#[derive(Debug, Error)]
pub enum DbError {
    #[error("transaction failed: {0}")]
    Transaction(#[source] StorageError),

    #[error("profile metadata unavailable: {0}")]
    Metadata(#[source] StorageError),

    #[error(transparent)]
    File(#[from] FileError),

    #[error("external file kept changing, gave up after {attempts} attempts")]
    TooManyConflicts { attempts: u32 },

    #[error("cancelled before the transaction started")]
    Cancelled,
}

impl DbError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Transaction(_) => ErrorClass::CodeContract,
            Self::File(FileError::InvalidDatabase) => ErrorClass::DataIntegrity,
            Self::Metadata(_) | Self::File(_) | Self::TooManyConflicts { .. } | Self::Cancelled => {
                ErrorClass::Environment
            }
        }
    }

    pub fn is_invalid_database(&self) -> bool {
        matches!(self, Self::File(FileError::InvalidDatabase))
    }

    /// Text suitable for showing to the user. The technical cause stays
    /// reachable through `source()`.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Transaction(_) => "Something went wrong while updating your data.",
            Self::Metadata(_) => "The profile could not be found. It may have been removed.",
            Self::File(FileError::InvalidDatabase) => {
                "The selected file is not a valid database. Pick another file or restore a backup."
            }
            Self::File(FileError::UriCannotBeOpened {
                reason: OpenFailureReason::Security,
                ..
            }) => "Access to the database file was denied. Select the file again.",
            Self::File(FileError::UriCannotBeOpened {
                reason: OpenFailureReason::FileNotFound,
                ..
            }) => "The database file could not be found. It may have been moved or deleted.",
            Self::File(FileError::ReadOnly) => {
                "The database file can only be read. Select it again to allow changes."
            }
            Self::File(_) => "The database file could not be read or written. Try again later.",
            Self::TooManyConflicts { .. } => {
                "The database file is being changed by another app. Try again later."
            }
            Self::Cancelled => "The operation was cancelled.",
        }
    }
}
