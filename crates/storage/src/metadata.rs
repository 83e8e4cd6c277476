use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::{Connection, OptionalExtension};

use profiledb_core::{ExternalRef, ModifiedAt, ProfileId};

use crate::error::StorageError;
use crate::traits::ProfileMetadata;

fn to_array<const N: usize>(v: Vec<u8>, label: &str) -> Result<[u8; N], StorageError> {
    v.try_into()
        .map_err(|_| StorageError::Serialization(format!("invalid {label} length")))
}

fn not_found(profile_id: ProfileId) -> StorageError {
    StorageError::NotFound(format!("profile {profile_id}"))
}

/// Profile registry and cache bookkeeping backed by a small SQLite file.
pub struct SqliteMetadataStore {
    conn: Mutex<Connection>,
}

impl SqliteMetadataStore {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ProfileMetadata for SqliteMetadataStore {
    fn create_profile(&self, profile_id: ProfileId) -> Result<(), StorageError> {
        self.conn().execute(
            "INSERT OR IGNORE INTO profiles (profile_id) VALUES (?1)",
            [profile_id.as_bytes().as_slice()],
        )?;
        Ok(())
    }

    fn remove_profile(&self, profile_id: ProfileId) -> Result<(), StorageError> {
        self.conn().execute(
            "DELETE FROM profiles WHERE profile_id = ?1",
            [profile_id.as_bytes().as_slice()],
        )?;
        Ok(())
    }

    fn profile_ids(&self) -> Result<Vec<ProfileId>, StorageError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT profile_id FROM profiles ORDER BY created_at, profile_id")?;
        let rows = stmt.query_map([], |row| row.get::<_, Vec<u8>>(0))?;
        let mut ids = Vec::new();
        for bytes in rows {
            ids.push(ProfileId::from_bytes(to_array::<16>(bytes?, "profile_id")?));
        }
        Ok(ids)
    }

    fn cached_last_modified(
        &self,
        profile_id: ProfileId,
    ) -> Result<Option<ModifiedAt>, StorageError> {
        let row: Option<Option<i64>> = self
            .conn()
            .query_row(
                "SELECT cached_last_modified FROM profiles WHERE profile_id = ?1",
                [profile_id.as_bytes().as_slice()],
                |r| r.get(0),
            )
            .optional()?;
        match row {
            Some(ms) => Ok(ms.map(ModifiedAt::from_millis)),
            None => Err(not_found(profile_id)),
        }
    }

    fn set_cached_last_modified(
        &self,
        profile_id: ProfileId,
        modified: Option<ModifiedAt>,
    ) -> Result<(), StorageError> {
        let changed = self.conn().execute(
            "UPDATE profiles SET cached_last_modified = ?1 WHERE profile_id = ?2",
            rusqlite::params![
                modified.map(|m| m.as_millis()),
                profile_id.as_bytes().as_slice(),
            ],
        )?;
        if changed == 0 {
            return Err(not_found(profile_id));
        }
        Ok(())
    }

    fn external_reference(
        &self,
        profile_id: ProfileId,
    ) -> Result<Option<ExternalRef>, StorageError> {
        let row: Option<Option<Vec<u8>>> = self
            .conn()
            .query_row(
                "SELECT external_ref FROM profiles WHERE profile_id = ?1",
                [profile_id.as_bytes().as_slice()],
                |r| r.get(0),
            )
            .optional()?;
        match row {
            Some(Some(bytes)) => Ok(Some(ExternalRef::from_msgpack(&bytes)?)),
            Some(None) => Ok(None),
            None => Err(not_found(profile_id)),
        }
    }

    fn set_external_reference(
        &self,
        profile_id: ProfileId,
        external: Option<&ExternalRef>,
        cached_last_modified: Option<ModifiedAt>,
    ) -> Result<(), StorageError> {
        let blob = external.map(ExternalRef::to_msgpack).transpose()?;
        let changed = self.conn().execute(
            "UPDATE profiles SET external_ref = ?1, cached_last_modified = ?2 WHERE profile_id = ?3",
            rusqlite::params![
                blob,
                cached_last_modified.map(|m| m.as_millis()),
                profile_id.as_bytes().as_slice(),
            ],
        )?;
        if changed == 0 {
            return Err(not_found(profile_id));
        }
        Ok(())
    }
}
