use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};

use profiledb_core::{ExternalRef, ModifiedAt, ProfileId, StorageLocation};
use profiledb_storage::StorageError;

use crate::context::DbContext;
use crate::error::{DbError, FileError, FileOp};
use crate::managed::{remove_database, run_body};
use crate::transaction::Transaction;

enum Attempt<T> {
    Done(T),
    /// The external file moved on while the body ran; nothing was published.
    Conflict,
}

/// A profile whose database is a user-owned file outside the app.
///
/// Work runs against a private mirror (the cache). The mirror is refreshed
/// whenever its recorded timestamp no longer matches the external file, and
/// published back after every edit unless the external file changed in the
/// meantime, in which case the whole attempt is re-run on the newer bytes.
pub struct ExternalProfileDb {
    profile_id: ProfileId,
    external: ExternalRef,
    cache_path: PathBuf,
    ctx: Arc<DbContext>,
}

impl ExternalProfileDb {
    pub fn new(ctx: Arc<DbContext>, profile_id: ProfileId, external: ExternalRef) -> Self {
        let cache_path = ctx.config().cache_path(profile_id);
        Self {
            profile_id,
            external,
            cache_path,
            ctx,
        }
    }

    pub fn profile_id(&self) -> ProfileId {
        self.profile_id
    }

    pub fn external(&self) -> &ExternalRef {
        &self.external
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    pub fn location(&self) -> StorageLocation {
        StorageLocation::External(self.external.clone())
    }

    pub(crate) fn context(&self) -> &Arc<DbContext> {
        &self.ctx
    }

    /// Runs `body` against a fresh mirror and publishes the result if the
    /// body reports an edit.
    ///
    /// `body` may run more than once when the external file changes
    /// concurrently, so it must not have side effects outside the database.
    pub fn transaction<T, F>(&self, body: F) -> Result<T, DbError>
    where
        F: FnMut(&rusqlite::Transaction<'_>) -> Result<Transaction<T>, StorageError>,
    {
        self.transaction_cancellable(&AtomicBool::new(false), body)
    }

    /// Like [`transaction`](Self::transaction), but gives up with
    /// `DbError::Cancelled` if `cancel` is set before an attempt starts
    /// executing. Once the body runs, the attempt is finished and published.
    pub fn transaction_cancellable<T, F>(&self, cancel: &AtomicBool, mut body: F) -> Result<T, DbError>
    where
        F: FnMut(&rusqlite::Transaction<'_>) -> Result<Transaction<T>, StorageError>,
    {
        self.ctx
            .locks()
            .with_profile(self.profile_id, || self.reconcile(cancel, &mut body))
    }

    pub fn read<T, F>(&self, mut body: F) -> Result<T, DbError>
    where
        F: FnMut(&rusqlite::Transaction<'_>) -> Result<T, StorageError>,
    {
        self.transaction(|tx| body(tx).map(Transaction::unchanged))
    }

    pub fn write<T, F>(&self, mut body: F) -> Result<T, DbError>
    where
        F: FnMut(&rusqlite::Transaction<'_>) -> Result<T, StorageError>,
    {
        self.transaction(|tx| body(tx).map(Transaction::edited))
    }

    pub fn size(&self) -> Option<u64> {
        self.ctx.files().size(&self.location())
    }

    pub fn last_modified(&self) -> Option<ModifiedAt> {
        self.ctx.files().last_modified(&self.location())
    }

    /// Forgets the profile: drops the mirror and the host grant. The user's
    /// file is left alone.
    pub fn unlink(self) -> Result<(), DbError> {
        let ctx = Arc::clone(&self.ctx);
        ctx.locks().with_profile(self.profile_id, || {
            self.discard_cache();
            ctx.files().host().revoke_persistent_access(&self.external.uri);
            ctx.metadata()
                .remove_profile(self.profile_id)
                .map_err(DbError::Metadata)?;
            info!(profile_id = %self.profile_id, uri = %self.external.uri, "unlinked external profile");
            Ok::<_, DbError>(())
        })?;
        ctx.locks().forget(self.profile_id);
        Ok(())
    }

    fn reconcile<T, F>(&self, cancel: &AtomicBool, body: &mut F) -> Result<T, DbError>
    where
        F: FnMut(&rusqlite::Transaction<'_>) -> Result<Transaction<T>, StorageError>,
    {
        let max_attempts = self.ctx.config().max_conflict_retries.saturating_add(1);
        for attempt in 1..=max_attempts {
            match self.attempt(cancel, body)? {
                Attempt::Done(value) => return Ok(value),
                Attempt::Conflict => {
                    debug!(profile_id = %self.profile_id, attempt, "re-running transaction on newer external file");
                }
            }
        }
        warn!(profile_id = %self.profile_id, attempts = max_attempts, "external file kept changing");
        Err(DbError::TooManyConflicts {
            attempts: max_attempts,
        })
    }

    fn attempt<T, F>(&self, cancel: &AtomicBool, body: &mut F) -> Result<Attempt<T>, DbError>
    where
        F: FnMut(&rusqlite::Transaction<'_>) -> Result<Transaction<T>, StorageError>,
    {
        if cancel.load(Ordering::Acquire) {
            return Err(DbError::Cancelled);
        }

        let location = self.location();
        let files = self.ctx.files();

        let observed = files.last_modified(&location);
        let cached = self
            .ctx
            .metadata()
            .cached_last_modified(self.profile_id)
            .map_err(DbError::Metadata)?;

        if !self.cache_is_fresh(cached, observed) {
            self.refresh(&location, observed)?;
        }

        if cancel.load(Ordering::Acquire) {
            return Err(DbError::Cancelled);
        }

        let tx = match run_body(self.ctx.query(), &self.cache_path, |t| body(t)) {
            Ok(tx) => tx,
            Err(e) => {
                if e.is_invalid_database() {
                    // The mirror is disposable; the external file decides.
                    warn!(profile_id = %self.profile_id, uri = %self.external.uri, "external database is not readable");
                    self.discard_cache();
                }
                return Err(e);
            }
        };

        if !tx.edited {
            return Ok(Attempt::Done(tx.result));
        }

        let current = files.last_modified(&location);
        if current != observed {
            info!(
                profile_id = %self.profile_id,
                ?observed,
                ?current,
                "external file changed during transaction"
            );
            self.discard_cache();
            return Ok(Attempt::Conflict);
        }

        self.publish(&location)?;
        Ok(Attempt::Done(tx.result))
    }

    /// Unknown timestamps on either side always count as stale.
    fn cache_is_fresh(&self, cached: Option<ModifiedAt>, observed: Option<ModifiedAt>) -> bool {
        if !self.cache_path.is_file() {
            return false;
        }
        matches!((cached, observed), (Some(c), Some(o)) if c == o)
    }

    fn refresh(&self, location: &StorageLocation, observed: Option<ModifiedAt>) -> Result<(), DbError> {
        remove_database(&self.cache_path).map_err(|source| FileError::InputOutputError {
            source,
            op: FileOp::Write,
        })?;
        let cache = StorageLocation::Internal(self.cache_path.clone());
        let copied = match self.ctx.files().copy_bytes(location, &cache) {
            Ok(copied) => copied,
            Err(e) => {
                warn!(profile_id = %self.profile_id, error = %e, "refreshing local mirror failed");
                self.discard_cache();
                return Err(e.into());
            }
        };
        if let Err(e) = self
            .ctx
            .metadata()
            .set_cached_last_modified(self.profile_id, observed)
        {
            self.discard_cache();
            return Err(DbError::Metadata(e));
        }
        debug!(profile_id = %self.profile_id, bytes = copied, ?observed, "refreshed local mirror");
        Ok(())
    }

    fn publish(&self, location: &StorageLocation) -> Result<(), DbError> {
        let cache = StorageLocation::Internal(self.cache_path.clone());
        let metadata = self.ctx.metadata();

        let copied = if self.external.permissions.write {
            self.ctx.files().copy_bytes(&cache, location).map(drop)
        } else {
            Err(FileError::ReadOnly)
        };
        if let Err(e) = copied {
            warn!(profile_id = %self.profile_id, error = %e, "publishing to external file failed");
            // The mirror now holds changes nobody else has; never reuse it.
            self.discard_cache();
            if let Err(me) = metadata.set_cached_last_modified(self.profile_id, None) {
                warn!(profile_id = %self.profile_id, error = %me, "clearing cache record failed");
            }
            return Err(e.into());
        }

        let published = self.ctx.files().last_modified(location);
        if let Err(e) = metadata.set_cached_last_modified(self.profile_id, published) {
            warn!(profile_id = %self.profile_id, error = %e, "recording published timestamp failed");
            self.discard_cache();
        }
        debug!(profile_id = %self.profile_id, ?published, "published local mirror");
        Ok(())
    }

    pub(crate) fn discard_cache(&self) {
        if let Err(e) = remove_database(&self.cache_path) {
            warn!(profile_id = %self.profile_id, path = %self.cache_path.display(), error = %e, "removing local mirror failed");
        }
    }
}
