use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use profiledb_core::{ModifiedAt, ProfileId, StorageLocation};
use profiledb_storage::{SqliteQueryLayer, StorageError};

use crate::context::DbContext;
use crate::error::{DbError, FileError, FileOp};
use crate::location::remove_file_if_exists;
use crate::transaction::Transaction;

/// A profile whose database lives in the application's private storage.
pub struct ManagedProfileDb {
    profile_id: ProfileId,
    path: PathBuf,
    ctx: Arc<DbContext>,
}

impl ManagedProfileDb {
    pub fn new(ctx: Arc<DbContext>, profile_id: ProfileId) -> Self {
        let path = ctx.config().managed_path(profile_id);
        Self {
            profile_id,
            path,
            ctx,
        }
    }

    pub fn profile_id(&self) -> ProfileId {
        self.profile_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn location(&self) -> StorageLocation {
        StorageLocation::Internal(self.path.clone())
    }

    pub(crate) fn context(&self) -> &Arc<DbContext> {
        &self.ctx
    }

    pub fn transaction<T, F>(&self, body: F) -> Result<T, DbError>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<Transaction<T>, StorageError>,
    {
        self.ctx
            .locks()
            .with_profile(self.profile_id, || self.transaction_unlocked(body))
    }

    pub(crate) fn transaction_unlocked<T, F>(&self, body: F) -> Result<T, DbError>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<Transaction<T>, StorageError>,
    {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| FileError::InputOutputError {
                source,
                op: FileOp::Write,
            })?;
        }
        match run_body(self.ctx.query(), &self.path, body) {
            Ok(tx) => Ok(tx.result),
            Err(e) => {
                if e.is_invalid_database() {
                    // Only copy of the data: leave it for the user to salvage.
                    warn!(profile_id = %self.profile_id, path = %self.path.display(), "managed database is not readable");
                }
                Err(e)
            }
        }
    }

    pub fn read<T, F>(&self, body: F) -> Result<T, DbError>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<T, StorageError>,
    {
        self.transaction(|tx| body(tx).map(Transaction::unchanged))
    }

    pub fn write<T, F>(&self, body: F) -> Result<T, DbError>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<T, StorageError>,
    {
        self.transaction(|tx| body(tx).map(Transaction::edited))
    }

    pub fn size(&self) -> Option<u64> {
        self.ctx.files().size(&self.location())
    }

    pub fn last_modified(&self) -> Option<ModifiedAt> {
        self.ctx.files().last_modified(&self.location())
    }

    /// Deletes the database for good and forgets the profile.
    pub fn unlink(self) -> Result<(), DbError> {
        let ctx = Arc::clone(&self.ctx);
        ctx.locks().with_profile(self.profile_id, || {
            remove_database(&self.path).map_err(|source| FileError::InputOutputError {
                source,
                op: FileOp::Write,
            })?;
            ctx.metadata()
                .remove_profile(self.profile_id)
                .map_err(DbError::Metadata)?;
            info!(profile_id = %self.profile_id, "unlinked managed profile");
            Ok::<_, DbError>(())
        })?;
        ctx.locks().forget(self.profile_id);
        Ok(())
    }
}

pub(crate) fn journal_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push("-journal");
    PathBuf::from(name)
}

/// Deletes a database file together with its rollback journal.
///
/// The journal goes first: one left beside a replaced file would be rolled
/// back onto the new bytes the next time it is opened.
pub(crate) fn remove_database(path: &Path) -> io::Result<()> {
    remove_file_if_exists(&journal_path(path))?;
    remove_file_if_exists(path)
}

/// Opens `path`, runs `body` in one SQL transaction and closes the handle.
///
/// The query layer's corruption signal becomes `InvalidDatabase`; anything
/// else the body or the database raises becomes `DbError::Transaction`.
pub(crate) fn run_body<T, F>(
    query: &SqliteQueryLayer,
    path: &Path,
    body: F,
) -> Result<Transaction<T>, DbError>
where
    F: FnOnce(&rusqlite::Transaction<'_>) -> Result<Transaction<T>, StorageError>,
{
    let mut handle = query.open_handle(path).map_err(classify)?;
    let outcome = handle.execute(body);
    if let Err(e) = handle.close() {
        warn!(path = %path.display(), error = %e, "closing database handle failed");
    }
    outcome.map_err(classify)
}

fn classify(err: StorageError) -> DbError {
    if err.is_corruption() {
        FileError::InvalidDatabase.into()
    } else {
        DbError::Transaction(err)
    }
}
