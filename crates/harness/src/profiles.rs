use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use profiledb_core::{ExternalRef, Permissions, ProfileId};
use profiledb_engine::{DbContext, DbError, EngineConfig, ExternalProfileDb, ManagedProfileDb};
use profiledb_storage::{ProfileMetadata, SqliteMetadataStore, SqliteQueryLayer, StorageError};

use crate::documents::FakeDocuments;
use crate::metadata::FlakyMetadata;

pub const TEST_MIGRATIONS: &[&str] = &[
    "CREATE TABLE titles (id INTEGER PRIMARY KEY, name TEXT NOT NULL UNIQUE);",
];

/// A complete engine wired to fakes, rooted in a temporary directory.
pub struct TestProfiles {
    pub dir: TempDir,
    pub documents: Arc<FakeDocuments>,
    pub metadata: Arc<FlakyMetadata>,
    pub ctx: Arc<DbContext>,
}

impl TestProfiles {
    pub fn new() -> Result<Self, Box<dyn Error>> {
        Self::with_config(|_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut EngineConfig)) -> Result<Self, Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let mut config = EngineConfig::new(dir.path());
        adjust(&mut config);

        let documents = Arc::new(FakeDocuments::new());
        let metadata = Arc::new(FlakyMetadata::new(SqliteMetadataStore::open(
            &dir.path().join("metadata.db"),
        )?));
        let ctx = Arc::new(DbContext::new(
            config,
            SqliteQueryLayer::new(TEST_MIGRATIONS),
            documents.clone(),
            metadata.clone(),
        ));
        Ok(Self {
            dir,
            documents,
            metadata,
            ctx,
        })
    }

    pub fn managed(&self) -> Result<ManagedProfileDb, DbError> {
        let profile_id = ProfileId::new();
        self.metadata
            .create_profile(profile_id)
            .map_err(DbError::Metadata)?;
        Ok(ManagedProfileDb::new(Arc::clone(&self.ctx), profile_id))
    }

    /// Bytes of a valid profile database holding `names`.
    pub fn database_bytes(&self, names: &[&str]) -> Result<Vec<u8>, Box<dyn Error>> {
        let path = self.dir.path().join(format!("seed-{}.db", ProfileId::new()));
        let mut handle = self.ctx.query().open_handle(&path)?;
        handle.execute(|tx| {
            for name in names {
                add_title(tx, name)?;
            }
            Ok(())
        })?;
        handle.close()?;
        let bytes = fs::read(&path)?;
        fs::remove_file(&path)?;
        Ok(bytes)
    }

    /// Registers an external profile whose user file already holds `names`.
    /// Nothing is cached yet.
    pub fn external(&self, document: &str, names: &[&str]) -> Result<ExternalProfileDb, Box<dyn Error>> {
        self.external_with(document, names, Permissions::READ_WRITE)
    }

    pub fn external_with(
        &self,
        document: &str,
        names: &[&str],
        permissions: Permissions,
    ) -> Result<ExternalProfileDb, Box<dyn Error>> {
        let uri = FakeDocuments::uri(document);
        self.documents.put(&uri, self.database_bytes(names)?);

        let profile_id = ProfileId::new();
        self.metadata.create_profile(profile_id)?;
        let external = ExternalRef::new(uri, permissions);
        self.metadata
            .set_external_reference(profile_id, Some(&external), None)?;
        Ok(ExternalProfileDb::new(Arc::clone(&self.ctx), profile_id, external))
    }

    /// Rollback journal of a write that never committed, as a crash leaves
    /// it. The journal holds the pages of a database with `names`.
    pub fn interrupted_journal(&self, names: &[&str]) -> Result<Vec<u8>, Box<dyn Error>> {
        let path = self.dir.path().join(format!("crashed-{}.db", ProfileId::new()));
        fs::write(&path, self.database_bytes(names)?)?;

        let conn = rusqlite::Connection::open(&path)?;
        // Small cache so the write spills and the journal header is synced.
        conn.pragma_update(None, "cache_size", 10)?;
        let tx = conn.unchecked_transaction()?;
        let filler = "x".repeat(500);
        for i in 0..200 {
            add_title(&tx, &format!("{i}{filler}"))?;
        }
        let journal = fs::read(journal_beside(&path))?;
        drop(tx);
        drop(conn);
        fs::remove_file(&path)?;
        Ok(journal)
    }
}

/// Where SQLite keeps the rollback journal of the database at `path`.
pub fn journal_beside(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push("-journal");
    PathBuf::from(name)
}

pub fn add_title(conn: &rusqlite::Connection, name: &str) -> Result<(), StorageError> {
    conn.execute("INSERT INTO titles (name) VALUES (?1)", [name])?;
    Ok(())
}

pub fn titles(conn: &rusqlite::Connection) -> Result<Vec<String>, StorageError> {
    let mut stmt = conn.prepare("SELECT name FROM titles ORDER BY id")?;
    let names = stmt
        .query_map([], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}
