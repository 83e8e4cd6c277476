use std::io::{Read, Write};

use profiledb_core::{DocumentUri, ExternalRef, ModifiedAt, ProfileId};

use crate::error::{HostError, StorageError};

pub type ReadStream = Box<dyn Read + Send>;
pub type WriteStream = Box<dyn Write + Send>;

/// Scoped access to documents the host's picker handed out.
///
/// `Ok(None)` from an open call means the host produced no stream without
/// reporting why.
pub trait HostFiles: Send + Sync {
    fn open_read(&self, uri: &DocumentUri) -> Result<Option<ReadStream>, HostError>;

    /// Opens the document for writing, truncating its current content.
    fn open_write(&self, uri: &DocumentUri) -> Result<Option<WriteStream>, HostError>;

    fn last_modified(&self, uri: &DocumentUri) -> Option<ModifiedAt>;

    fn size(&self, uri: &DocumentUri) -> Option<u64>;

    fn grant_persistent_access(&self, external: &ExternalRef) -> Result<(), HostError>;

    fn revoke_persistent_access(&self, uri: &DocumentUri);

    fn persisted_grants(&self) -> Vec<ExternalRef>;
}

/// Per-profile bookkeeping that outlives any single database handle.
pub trait ProfileMetadata: Send + Sync {
    fn create_profile(&self, profile_id: ProfileId) -> Result<(), StorageError>;

    fn remove_profile(&self, profile_id: ProfileId) -> Result<(), StorageError>;

    fn profile_ids(&self) -> Result<Vec<ProfileId>, StorageError>;

    /// Fails with `NotFound` when the profile does not exist.
    fn cached_last_modified(
        &self,
        profile_id: ProfileId,
    ) -> Result<Option<ModifiedAt>, StorageError>;

    fn set_cached_last_modified(
        &self,
        profile_id: ProfileId,
        modified: Option<ModifiedAt>,
    ) -> Result<(), StorageError>;

    fn external_reference(
        &self,
        profile_id: ProfileId,
    ) -> Result<Option<ExternalRef>, StorageError>;

    /// Sets or clears the external reference and the cached timestamp together.
    fn set_external_reference(
        &self,
        profile_id: ProfileId,
        external: Option<&ExternalRef>,
        cached_last_modified: Option<ModifiedAt>,
    ) -> Result<(), StorageError>;
}
