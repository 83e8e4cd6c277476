use std::path::Path;

use rusqlite::Connection;
use tracing::debug;

use crate::error::StorageError;

/// Opens profile databases and brings them up to the application schema.
///
/// Migrations are applied in order and tracked with `PRAGMA user_version`;
/// the business schema itself is opaque to this crate.
#[derive(Debug, Clone, Copy)]
pub struct SqliteQueryLayer {
    migrations: &'static [&'static str],
}

impl Default for SqliteQueryLayer {
    fn default() -> Self {
        Self::new(&[])
    }
}

impl SqliteQueryLayer {
    pub fn new(migrations: &'static [&'static str]) -> Self {
        Self { migrations }
    }

    pub fn schema_version(&self) -> usize {
        self.migrations.len()
    }

    /// Opens (creating if missing) the database at `path`.
    ///
    /// Returns `StorageError::Corrupted` when the file exists but is not a
    /// database SQLite can read.
    pub fn open_handle(&self, path: &Path) -> Result<SqliteHandle, StorageError> {
        let conn = Connection::open(path)?;
        prepare(&conn, self.migrations).map_err(|e| {
            if e.is_corruption() {
                StorageError::Corrupted {
                    path: path.display().to_string(),
                }
            } else {
                e
            }
        })?;
        Ok(SqliteHandle { conn })
    }
}

fn prepare(conn: &Connection, migrations: &[&str]) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        PRAGMA busy_timeout = 5000;
        PRAGMA foreign_keys = ON;
    ",
    )?;
    // First read of the header: foreign bytes fail here with NOTADB.
    let _tables: i64 = conn.query_row("SELECT count(*) FROM sqlite_master", [], |r| r.get(0))?;
    // Profile databases are copied as a single file, so no WAL sidecar.
    conn.execute_batch("PRAGMA journal_mode = DELETE;")?;
    run_migrations(conn, migrations)
}

fn run_migrations(conn: &Connection, migrations: &[&str]) -> Result<(), StorageError> {
    let current: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    let current = usize::try_from(current)
        .map_err(|_| StorageError::Serialization(format!("negative user_version {current}")))?;

    for (index, sql) in migrations.iter().enumerate().skip(current) {
        let version = index + 1;
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(sql)
            .map_err(|source| StorageError::Migration { version, source })?;
        tx.pragma_update(None, "user_version", version as i64)?;
        tx.commit()?;
        debug!(version, "applied profile schema migration");
    }
    Ok(())
}

/// An open database, scoped to a single unit of work.
pub struct SqliteHandle {
    conn: Connection,
}

impl SqliteHandle {
    /// Runs `body` inside a transaction: committed when it returns `Ok`,
    /// rolled back otherwise.
    pub fn execute<T, F>(&mut self, body: F) -> Result<T, StorageError>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<T, StorageError>,
    {
        let tx = self.conn.transaction()?;
        let value = body(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn close(self) -> Result<(), StorageError> {
        self.conn.close().map_err(|(_, e)| StorageError::Sqlite(e))
    }
}
