use std::collections::HashMap;
use std::fs::{self, File};
use std::io;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use tracing::debug;

use profiledb_core::{DocumentUri, ExternalRef, ModifiedAt};

use crate::error::HostError;
use crate::traits::{HostFiles, ReadStream, WriteStream};

/// `HostFiles` over the local filesystem, for `file://` documents.
///
/// Grants are tracked in memory only; any other URI scheme is reported as
/// not found.
#[derive(Default)]
pub struct LocalDocuments {
    grants: Mutex<HashMap<String, ExternalRef>>,
}

impl LocalDocuments {
    pub fn new() -> Self {
        Self::default()
    }

    fn resolve(uri: &DocumentUri) -> Result<PathBuf, HostError> {
        uri.to_file_path().ok_or_else(|| {
            HostError::NotFound(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no local file behind {uri}"),
            ))
        })
    }
}

impl HostFiles for LocalDocuments {
    fn open_read(&self, uri: &DocumentUri) -> Result<Option<ReadStream>, HostError> {
        let file = File::open(Self::resolve(uri)?)?;
        Ok(Some(Box::new(file)))
    }

    fn open_write(&self, uri: &DocumentUri) -> Result<Option<WriteStream>, HostError> {
        let file = File::create(Self::resolve(uri)?)?;
        Ok(Some(Box::new(file)))
    }

    fn last_modified(&self, uri: &DocumentUri) -> Option<ModifiedAt> {
        let path = uri.to_file_path()?;
        let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
        ModifiedAt::from_system_time(modified).ok()
    }

    fn size(&self, uri: &DocumentUri) -> Option<u64> {
        let path = uri.to_file_path()?;
        fs::metadata(path).ok().map(|m| m.len())
    }

    fn grant_persistent_access(&self, external: &ExternalRef) -> Result<(), HostError> {
        let path = Self::resolve(&external.uri)?;
        if let Some(parent) = path.parent() {
            if !parent.is_dir() {
                return Err(HostError::NotFound(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{} does not exist", parent.display()),
                )));
            }
        }
        debug!(uri = %external.uri, "granted persistent access");
        self.grants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(external.uri.as_str().to_owned(), external.clone());
        Ok(())
    }

    fn revoke_persistent_access(&self, uri: &DocumentUri) {
        let removed = self
            .grants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(uri.as_str());
        if removed.is_some() {
            debug!(%uri, "revoked persistent access");
        }
    }

    fn persisted_grants(&self) -> Vec<ExternalRef> {
        self.grants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}
