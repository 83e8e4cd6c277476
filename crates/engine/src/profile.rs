use std::sync::Arc;

use tracing::info;

use profiledb_core::{ModifiedAt, ProfileId};
use profiledb_storage::StorageError;

use crate::context::DbContext;
use crate::error::DbError;
use crate::external::ExternalProfileDb;
use crate::managed::ManagedProfileDb;
use crate::transaction::Transaction;

/// A profile's database in whichever mode is currently active.
pub enum ProfileDb {
    Managed(ManagedProfileDb),
    External(ExternalProfileDb),
}

impl ProfileDb {
    /// Registers a new, managed profile.
    pub fn create(ctx: &Arc<DbContext>) -> Result<Self, DbError> {
        let profile_id = ProfileId::new();
        ctx.metadata()
            .create_profile(profile_id)
            .map_err(DbError::Metadata)?;
        info!(%profile_id, "created profile");
        Ok(Self::Managed(ManagedProfileDb::new(Arc::clone(ctx), profile_id)))
    }

    /// Opens an existing profile in the mode its metadata records.
    pub fn open(ctx: &Arc<DbContext>, profile_id: ProfileId) -> Result<Self, DbError> {
        let external = ctx
            .metadata()
            .external_reference(profile_id)
            .map_err(DbError::Metadata)?;
        Ok(match external {
            Some(external) => Self::External(ExternalProfileDb::new(Arc::clone(ctx), profile_id, external)),
            None => Self::Managed(ManagedProfileDb::new(Arc::clone(ctx), profile_id)),
        })
    }

    pub fn profile_id(&self) -> ProfileId {
        match self {
            Self::Managed(db) => db.profile_id(),
            Self::External(db) => db.profile_id(),
        }
    }

    pub fn is_external(&self) -> bool {
        matches!(self, Self::External(_))
    }

    pub fn transaction<T, F>(&self, body: F) -> Result<T, DbError>
    where
        F: FnMut(&rusqlite::Transaction<'_>) -> Result<Transaction<T>, StorageError>,
    {
        match self {
            Self::Managed(db) => db.transaction(body),
            Self::External(db) => db.transaction(body),
        }
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
        match self {
            Self::Managed(db) => db.size(),
            Self::External(db) => db.size(),
        }
    }

    pub fn last_modified(&self) -> Option<ModifiedAt> {
        match self {
            Self::Managed(db) => db.last_modified(),
            Self::External(db) => db.last_modified(),
        }
    }

    pub fn unlink(self) -> Result<(), DbError> {
        match self {
            Self::Managed(db) => db.unlink(),
            Self::External(db) => db.unlink(),
        }
    }
}

impl From<ManagedProfileDb> for ProfileDb {
    fn from(db: ManagedProfileDb) -> Self {
        Self::Managed(db)
    }
}

impl From<ExternalProfileDb> for ProfileDb {
    fn from(db: ExternalProfileDb) -> Self {
        Self::External(db)
    }
}
