use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::CoreError;

/// Capability URI handed out by the host's document picker.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentUri(Url);

impl DocumentUri {
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        let url = Url::parse(s).map_err(|e| CoreError::InvalidUri(format!("{s}: {e}")))?;
        if url.cannot_be_a_base() {
            return Err(CoreError::InvalidUri(format!("{s}: not a hierarchical uri")));
        }
        Ok(Self(url))
    }

    /// Builds a `file://` URI for an absolute local path.
    pub fn from_file_path(path: &Path) -> Result<Self, CoreError> {
        Url::from_file_path(path)
            .map(Self)
            .map_err(|_| CoreError::InvalidUri(format!("{} is not absolute", path.display())))
    }

    pub fn scheme(&self) -> &str {
        self.0.scheme()
    }

    /// Local path for `file://` URIs, `None` for any other scheme.
    pub fn to_file_path(&self) -> Option<PathBuf> {
        if self.0.scheme() != "file" {
            return None;
        }
        self.0.to_file_path().ok()
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl TryFrom<String> for DocumentUri {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<DocumentUri> for String {
    fn from(uri: DocumentUri) -> Self {
        uri.0.into()
    }
}

impl fmt::Debug for DocumentUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentUri({})", self.0)
    }
}

impl fmt::Display for DocumentUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permissions {
    pub read: bool,
    pub write: bool,
}

impl Permissions {
    pub const READ_WRITE: Self = Self { read: true, write: true };
}

/// A user-selected database file outside the application's private storage,
/// together with the access the host granted for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalRef {
    pub uri: DocumentUri,
    pub permissions: Permissions,
}

impl ExternalRef {
    pub fn new(uri: DocumentUri, permissions: Permissions) -> Self {
        Self { uri, permissions }
    }

    pub fn read_write(uri: DocumentUri) -> Self {
        Self::new(uri, Permissions::READ_WRITE)
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, CoreError> {
        rmp_serde::to_vec(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, CoreError> {
        rmp_serde::from_slice(bytes).map_err(|e| CoreError::Serialization(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageLocation {
    /// File owned by the application; nothing else writes it.
    Internal(PathBuf),
    /// File owned by the user; other actors may rewrite it at any time.
    External(ExternalRef),
}

impl StorageLocation {
    pub fn is_external(&self) -> bool {
        matches!(self, Self::External(_))
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal(path) => write!(f, "{}", path.display()),
            Self::External(external) => write!(f, "{}", external.uri),
        }
    }
}
