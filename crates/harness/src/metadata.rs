use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use profiledb_core::{ExternalRef, ModifiedAt, ProfileId};
use profiledb_storage::{ProfileMetadata, SqliteMetadataStore, StorageError};

/// `SqliteMetadataStore` with switchable failures on the cache record.
pub struct FlakyMetadata {
    inner: SqliteMetadataStore,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    cache_writes: AtomicUsize,
}

impl FlakyMetadata {
    pub fn new(inner: SqliteMetadataStore) -> Self {
        Self {
            inner,
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            cache_writes: AtomicUsize::new(0),
        }
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful `set_cached_last_modified` calls.
    pub fn cache_writes(&self) -> usize {
        self.cache_writes.load(Ordering::SeqCst)
    }

    fn injected() -> StorageError {
        StorageError::Sqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_IOERR),
            Some("injected metadata failure".into()),
        ))
    }
}

impl ProfileMetadata for FlakyMetadata {
    fn create_profile(&self, profile_id: ProfileId) -> Result<(), StorageError> {
        self.inner.create_profile(profile_id)
    }

    fn remove_profile(&self, profile_id: ProfileId) -> Result<(), StorageError> {
        self.inner.remove_profile(profile_id)
    }

    fn profile_ids(&self) -> Result<Vec<ProfileId>, StorageError> {
        self.inner.profile_ids()
    }

    fn cached_last_modified(
        &self,
        profile_id: ProfileId,
    ) -> Result<Option<ModifiedAt>, StorageError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::injected());
        }
        self.inner.cached_last_modified(profile_id)
    }

    fn set_cached_last_modified(
        &self,
        profile_id: ProfileId,
        modified: Option<ModifiedAt>,
    ) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Self::injected());
        }
        self.inner.set_cached_last_modified(profile_id, modified)?;
        self.cache_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn external_reference(
        &self,
        profile_id: ProfileId,
    ) -> Result<Option<ExternalRef>, StorageError> {
        self.inner.external_reference(profile_id)
    }

    fn set_external_reference(
        &self,
        profile_id: ProfileId,
        external: Option<&ExternalRef>,
        cached_last_modified: Option<ModifiedAt>,
    ) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Self::injected());
        }
        self.inner
            .set_external_reference(profile_id, external, cached_last_modified)
    }
}
