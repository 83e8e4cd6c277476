use rusqlite::Connection;
use tracing::debug;

use crate::error::StorageError;

/// Metadata schema steps. Entry `n` brings `user_version` from `n` to `n + 1`.
const MIGRATIONS: &[&str] = &["
CREATE TABLE profiles (
    profile_id BLOB PRIMARY KEY CHECK (length(profile_id) = 16),
    created_at INTEGER NOT NULL DEFAULT (CAST(unixepoch('now','subsec') * 1000 AS INTEGER)),
    external_ref BLOB,
    cached_last_modified INTEGER
);
"];

pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA busy_timeout = 5000;
    ",
    )?;

    let current: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    let current = usize::try_from(current)
        .map_err(|_| StorageError::Serialization(format!("negative user_version {current}")))?;
    if current > MIGRATIONS.len() {
        return Err(StorageError::Serialization(format!(
            "metadata schema version {current} is newer than this build supports"
        )));
    }

    for (index, sql) in MIGRATIONS.iter().enumerate().skip(current) {
        let version = index + 1;
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(sql)
            .map_err(|source| StorageError::Migration { version, source })?;
        tx.pragma_update(None, "user_version", version as i64)?;
        tx.commit()?;
        debug!(version, "applied metadata schema migration");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_version(conn: &Connection) -> i64 {
        conn.query_row("PRAGMA user_version", [], |r| r.get(0)).unwrap()
    }

    #[test]
    fn init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
        assert_eq!(user_version(&conn), MIGRATIONS.len() as i64);
    }

    #[test]
    fn applied_steps_are_not_rerun() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn.execute(
            "INSERT INTO profiles (profile_id) VALUES (?1)",
            [[7u8; 16].as_slice()],
        )
        .unwrap();

        init_schema(&conn).unwrap();
        let rows: i64 = conn
            .query_row("SELECT count(*) FROM profiles", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn newer_schema_is_refused() {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", 99i64).unwrap();
        assert!(init_schema(&conn).is_err());
    }
}
