//! Moving a profile's database between private storage and a user file.

use std::fmt;
use std::fs;
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};

use profiledb_core::{ExternalRef, StorageLocation};

use crate::error::{DbError, FileError, FileOp};
use crate::external::ExternalProfileDb;
use crate::location::remove_file_if_exists;
use crate::managed::{ManagedProfileDb, remove_database};
use crate::transaction::Transaction;

/// A failed `move_to_external`. The profile is still managed and usable
/// through `managed`.
#[derive(Error)]
#[error("moving profile to an external file failed")]
pub struct MoveToExternalError {
    pub managed: ManagedProfileDb,
    #[source]
    pub error: DbError,
}

impl fmt::Debug for MoveToExternalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MoveToExternalError")
            .field("profile_id", &self.managed.profile_id())
            .field("error", &self.error)
            .finish()
    }
}

impl From<MoveToExternalError> for DbError {
    fn from(err: MoveToExternalError) -> Self {
        err.error
    }
}

/// Hands a managed profile over to a user-selected file.
///
/// The managed database becomes the new profile's mirror, so no second copy
/// is made. On failure before that rename the profile stays managed, the
/// grant is released again and the handle comes back in the error.
pub fn move_to_external(
    managed: ManagedProfileDb,
    external: ExternalRef,
) -> Result<ExternalProfileDb, MoveToExternalError> {
    let ctx = Arc::clone(managed.context());
    let result = ctx.locks().with_profile(managed.profile_id(), || {
        if !external.permissions.write {
            return Err(DbError::from(FileError::ReadOnly));
        }
        let host = ctx.files().host();
        host.grant_persistent_access(&external)
            .map_err(|e| FileError::from_host(e, FileOp::Write))?;

        let result = adopt(&managed, &external);
        if result.is_err() {
            host.revoke_persistent_access(&external.uri);
        }
        result
    });
    result.map_err(|error| MoveToExternalError { managed, error })
}

fn adopt(managed: &ManagedProfileDb, external: &ExternalRef) -> Result<ExternalProfileDb, DbError> {
    let ctx = managed.context();
    let profile_id = managed.profile_id();

    // Makes sure the managed file exists and has a schema worth copying.
    managed.transaction_unlocked(|_| Ok(Transaction::edited(())))?;

    let target = StorageLocation::External(external.clone());
    ctx.files().copy_bytes(&managed.location(), &target)?;

    let cache_path = ctx.config().cache_path(profile_id);
    let io_err = |source| FileError::InputOutputError {
        source,
        op: FileOp::Write,
    };
    if let Some(parent) = cache_path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    // Leftovers of an earlier mirror must not be replayed onto this one.
    remove_database(&cache_path).map_err(io_err)?;
    fs::rename(managed.path(), &cache_path).map_err(io_err)?;

    let modified = ctx.files().last_modified(&target);
    if let Err(e) = ctx
        .metadata()
        .set_external_reference(profile_id, Some(external), modified)
    {
        if let Err(undo) = fs::rename(&cache_path, managed.path()) {
            error!(%profile_id, error = %undo, "restoring managed database failed");
        }
        return Err(DbError::Metadata(e));
    }

    info!(%profile_id, uri = %external.uri, ?modified, "profile moved to external file");
    Ok(ExternalProfileDb::new(Arc::clone(ctx), profile_id, external.clone()))
}

/// Brings an external profile back into private storage.
///
/// Consumes `external`: its mirror is gone afterwards. On failure the
/// profile is still external and can be reopened with `ProfileDb::open`.
pub fn move_to_managed(external: ExternalProfileDb) -> Result<ManagedProfileDb, DbError> {
    let ctx = Arc::clone(external.context());
    let profile_id = external.profile_id();
    ctx.locks().with_profile(profile_id, || {
        let managed = ManagedProfileDb::new(Arc::clone(&ctx), profile_id);

        if let Err(e) = ctx.files().copy_bytes(&external.location(), &managed.location()) {
            discard_partial(&managed);
            return Err(e.into());
        }
        if let Err(e) = ctx.metadata().set_external_reference(profile_id, None, None) {
            discard_partial(&managed);
            return Err(DbError::Metadata(e));
        }

        external.discard_cache();
        ctx.files().host().revoke_persistent_access(&external.external().uri);
        info!(%profile_id, uri = %external.external().uri, "profile moved to managed storage");
        Ok(managed)
    })
}

fn discard_partial(managed: &ManagedProfileDb) {
    if let Err(e) = remove_file_if_exists(managed.path()) {
        warn!(profile_id = %managed.profile_id(), error = %e, "removing partial managed copy failed");
    }
}
