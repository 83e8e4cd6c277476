use std::fs;
use std::sync::atomic::AtomicBool;
use std::thread;

use profiledb_core::{ModifiedAt, Permissions};
use profiledb_engine::{DbError, FileError, FileOp, OpenFailureReason, Transaction};
use profiledb_harness::{Fault, TestProfiles, add_title, journal_beside, titles};
use profiledb_storage::{ProfileMetadata, StorageError};

// ============================================================================
// Freshness
// ============================================================================

#[test]
fn repeated_read_is_idempotent() -> Result<(), Box<dyn std::error::Error>> {
    let env = TestProfiles::new()?;
    let db = env.external("watchlist.db", &["Alien", "Heat"])?;

    let first = db.read(|tx| titles(tx))?;
    let cached = env.metadata.cached_last_modified(db.profile_id())?;
    let second = db.read(|tx| titles(tx))?;

    assert_eq!(first, vec!["Alien", "Heat"]);
    assert_eq!(first, second);
    assert!(cached.is_some());
    assert_eq!(env.metadata.cached_last_modified(db.profile_id())?, cached);
    assert_eq!(env.documents.writes_opened(), 0, "reads never publish");

    Ok(())
}

#[test]
fn matching_timestamp_skips_copy_in() -> Result<(), Box<dyn std::error::Error>> {
    let env = TestProfiles::new()?;
    let db = env.external("watchlist.db", &["Alien"])?;

    db.read(|tx| titles(tx))?;
    assert_eq!(env.documents.reads_opened(), 1);

    for _ in 0..3 {
        db.read(|tx| titles(tx))?;
    }
    assert_eq!(env.documents.reads_opened(), 1, "fresh mirror must be reused");

    Ok(())
}

#[test]
fn missing_cache_file_forces_copy_in() -> Result<(), Box<dyn std::error::Error>> {
    let env = TestProfiles::new()?;
    let db = env.external("watchlist.db", &["Alien"])?;

    db.read(|tx| titles(tx))?;
    std::fs::remove_file(db.cache_path())?;

    // The record still matches the external file, but there is nothing to reuse.
    let names = db.read(|tx| titles(tx))?;
    assert_eq!(names, vec!["Alien"]);
    assert_eq!(env.documents.reads_opened(), 2);

    Ok(())
}

#[test]
fn external_change_between_calls_is_picked_up() -> Result<(), Box<dyn std::error::Error>> {
    let env = TestProfiles::new()?;
    let db = env.external("watchlist.db", &["Alien"])?;
    db.read(|tx| titles(tx))?;

    let replacement = env.database_bytes(&["Ran", "Ikiru"])?;
    env.documents.put(&db.external().uri, replacement);

    assert_eq!(db.read(|tx| titles(tx))?, vec!["Ran", "Ikiru"]);
    assert_eq!(env.documents.reads_opened(), 2);

    Ok(())
}

#[test]
fn refresh_ignores_journal_left_by_a_crash() -> Result<(), Box<dyn std::error::Error>> {
    let env = TestProfiles::new()?;
    let db = env.external("watchlist.db", &["Alien"])?;
    let uri = db.external().uri.clone();
    assert_eq!(db.read(|tx| titles(tx))?, vec!["Alien"]);

    let journal = journal_beside(db.cache_path());
    fs::write(&journal, env.interrupted_journal(&["Alien"])?)?;
    env.documents.put(&uri, env.database_bytes(&["Ran", "Ikiru"])?);

    assert_eq!(db.read(|tx| titles(tx))?, vec!["Ran", "Ikiru"]);
    assert!(!journal.exists());
    db.write(|tx| add_title(tx, "Heat"))?;

    // Copy in again so the user file itself is checked.
    fs::remove_file(db.cache_path())?;
    assert_eq!(db.read(|tx| titles(tx))?, vec!["Ran", "Ikiru", "Heat"]);

    Ok(())
}

#[test]
fn unknown_timestamps_always_copy() -> Result<(), Box<dyn std::error::Error>> {
    let env = TestProfiles::new()?;
    let db = env.external("watchlist.db", &["Alien"])?;
    env.documents.set_timestamps_unknown(true);

    db.read(|tx| titles(tx))?;
    db.read(|tx| titles(tx))?;
    assert_eq!(env.documents.reads_opened(), 2);
    assert_eq!(env.metadata.cached_last_modified(db.profile_id())?, None);

    // With no timestamps a conflict cannot be seen, so the write goes out.
    db.write(|tx| add_title(tx, "Heat"))?;
    assert_eq!(env.documents.writes_opened(), 1);
    assert_eq!(db.read(|tx| titles(tx))?, vec!["Alien", "Heat"]);

    Ok(())
}

// ============================================================================
// Publishing
// ============================================================================

#[test]
fn write_is_visible_to_later_reads() -> Result<(), Box<dyn std::error::Error>> {
    let env = TestProfiles::new()?;
    let db = env.external("watchlist.db", &["Alien"])?;
    let uri = db.external().uri.clone();

    db.write(|tx| add_title(tx, "Brazil"))?;

    assert_eq!(env.documents.writes_opened(), 1);
    assert_eq!(
        env.metadata.cached_last_modified(db.profile_id())?,
        env.documents.actual_modified(&uri),
    );
    assert_eq!(
        env.documents.contents(&uri),
        Some(std::fs::read(db.cache_path())?),
        "external file must be a byte copy of the mirror"
    );

    let reads_before = env.documents.reads_opened();
    assert_eq!(db.read(|tx| titles(tx))?, vec!["Alien", "Brazil"]);
    assert_eq!(env.documents.reads_opened(), reads_before, "own publish must not look stale");

    Ok(())
}

#[test]
fn unedited_transaction_is_not_published() -> Result<(), Box<dyn std::error::Error>> {
    let env = TestProfiles::new()?;
    let db = env.external("watchlist.db", &["Alien"])?;

    let count = db.transaction(|tx| {
        let n: i64 = tx.query_row("SELECT count(*) FROM titles", [], |r| r.get(0))?;
        Ok(Transaction::unchanged(n))
    })?;
    assert_eq!(count, 1);
    assert_eq!(env.documents.writes_opened(), 0);

    Ok(())
}

#[test]
fn failed_publish_leaves_nothing_that_looks_saved() -> Result<(), Box<dyn std::error::Error>> {
    let env = TestProfiles::new()?;
    let db = env.external("watchlist.db", &["Alien"])?;
    db.read(|tx| titles(tx))?;

    env.documents.fail_next_write(Fault::MidStream);
    let err = db.write(|tx| add_title(tx, "Lost")).unwrap_err();

    assert!(
        matches!(err, DbError::File(FileError::InputOutputError { op: FileOp::Write, .. })),
        "got {err:?}"
    );
    assert!(!db.cache_path().exists());
    assert_eq!(env.metadata.cached_last_modified(db.profile_id())?, None);

    let reads_before = env.documents.reads_opened();
    assert_eq!(db.read(|tx| titles(tx))?, vec!["Alien"]);
    assert_eq!(env.documents.reads_opened(), reads_before + 1, "next call must re-copy");

    Ok(())
}

#[test]
fn publish_without_stream_is_a_content_provider_failure() -> Result<(), Box<dyn std::error::Error>> {
    let env = TestProfiles::new()?;
    let db = env.external("watchlist.db", &[])?;

    env.documents.fail_next_write(Fault::NoStream);
    let err = db.write(|tx| add_title(tx, "Lost")).unwrap_err();
    assert!(matches!(
        err,
        DbError::File(FileError::ContentProviderFailure { op: FileOp::Write })
    ));
    assert!(!db.cache_path().exists());

    Ok(())
}

#[test]
fn publish_denied_is_a_security_failure() -> Result<(), Box<dyn std::error::Error>> {
    let env = TestProfiles::new()?;
    let db = env.external("watchlist.db", &[])?;

    env.documents.fail_next_write(Fault::PermissionDenied);
    let err = db.write(|tx| add_title(tx, "Lost")).unwrap_err();
    assert!(matches!(
        err,
        DbError::File(FileError::UriCannotBeOpened {
            reason: OpenFailureReason::Security,
            op: FileOp::Write,
            ..
        })
    ));

    Ok(())
}

#[test]
fn read_only_grant_refuses_to_publish() -> Result<(), Box<dyn std::error::Error>> {
    let env = TestProfiles::new()?;
    let read_only = Permissions {
        read: true,
        write: false,
    };
    let db = env.external_with("watchlist.db", &["Alien"], read_only)?;
    assert_eq!(db.read(|tx| titles(tx))?, vec!["Alien"]);
    let before = env.documents.contents(&db.external().uri);

    let err = db.write(|tx| add_title(tx, "Heat")).unwrap_err();
    assert!(matches!(err, DbError::File(FileError::ReadOnly)), "got {err:?}");
    assert_eq!(env.documents.writes_opened(), 0);
    assert_eq!(env.documents.contents(&db.external().uri), before);
    assert!(!db.cache_path().exists());
    assert_eq!(db.read(|tx| titles(tx))?, vec!["Alien"]);

    Ok(())
}

#[test]
fn published_timestamp_record_failure_still_succeeds() -> Result<(), Box<dyn std::error::Error>> {
    let env = TestProfiles::new()?;
    let db = env.external("watchlist.db", &[])?;
    db.read(|tx| titles(tx))?;

    // Only the post-publish record write can fail here; the mirror is fresh.
    env.metadata.fail_writes(true);
    db.write(|tx| add_title(tx, "Heat"))?;
    env.metadata.fail_writes(false);

    assert!(!db.cache_path().exists(), "unrecorded mirror must not be trusted");
    assert_eq!(db.read(|tx| titles(tx))?, vec!["Heat"]);

    Ok(())
}

// ============================================================================
// Conflicts
// ============================================================================

#[test]
fn timestamp_change_during_write_reruns_body() -> Result<(), Box<dyn std::error::Error>> {
    let env = TestProfiles::new()?;
    let db = env.external("watchlist.db", &[])?;
    let uri = db.external().uri.clone();
    let real = env.documents.actual_modified(&uri).unwrap();

    env.documents.script_last_modified(
        &uri,
        vec![Some(real), Some(ModifiedAt::from_millis(real.as_millis() + 1_000))],
    );

    let mut runs = 0;
    db.write(|tx| {
        runs += 1;
        add_title(tx, "Ran")
    })?;

    assert_eq!(runs, 2);
    assert_eq!(env.documents.writes_opened(), 1, "first result must not be published");
    assert_eq!(db.read(|tx| titles(tx))?, vec!["Ran"]);

    Ok(())
}

#[test]
fn concurrent_external_edit_is_kept_and_write_reapplied() -> Result<(), Box<dyn std::error::Error>> {
    let env = TestProfiles::new()?;
    let db = env.external("watchlist.db", &["Alien"])?;
    let uri = db.external().uri.clone();
    let from_phone = env.database_bytes(&["Alien", "Stalker"])?;
    let documents = env.documents.clone();

    let mut runs = 0;
    db.write(|tx| {
        runs += 1;
        if runs == 1 {
            documents.put(&uri, from_phone.clone());
        }
        add_title(tx, "Heat")
    })?;

    assert_eq!(runs, 2);
    assert_eq!(db.read(|tx| titles(tx))?, vec!["Alien", "Stalker", "Heat"]);

    Ok(())
}

#[test]
fn endless_external_churn_gives_up() -> Result<(), Box<dyn std::error::Error>> {
    let env = TestProfiles::with_config(|c| c.max_conflict_retries = 2)?;
    let db = env.external("watchlist.db", &["Alien"])?;
    let uri = db.external().uri.clone();
    let documents = env.documents.clone();
    let before = documents.contents(&uri);

    let mut runs = 0;
    let err = db
        .write(|tx| {
            runs += 1;
            documents.touch(&uri);
            add_title(tx, "Never")
        })
        .unwrap_err();

    assert!(matches!(err, DbError::TooManyConflicts { attempts: 3 }), "got {err:?}");
    assert_eq!(runs, 3);
    assert_eq!(documents.writes_opened(), 0);
    assert_eq!(documents.contents(&uri), before);

    Ok(())
}

// ============================================================================
// Failures before execution
// ============================================================================

#[test]
fn missing_external_file_fails_copy_in() -> Result<(), Box<dyn std::error::Error>> {
    let env = TestProfiles::new()?;
    let db = env.external("watchlist.db", &["Alien"])?;

    env.documents.fail_next_read(Fault::NotFound);
    let mut runs = 0;
    let err = db
        .read(|tx| {
            runs += 1;
            titles(tx)
        })
        .unwrap_err();

    assert!(matches!(
        err,
        DbError::File(FileError::UriCannotBeOpened {
            reason: OpenFailureReason::FileNotFound,
            op: FileOp::Read,
            ..
        })
    ));
    assert_eq!(runs, 0);
    assert_eq!(env.metadata.cached_last_modified(db.profile_id())?, None);

    Ok(())
}

#[test]
fn broken_read_stream_discards_partial_mirror() -> Result<(), Box<dyn std::error::Error>> {
    let env = TestProfiles::new()?;
    let db = env.external("watchlist.db", &["Alien"])?;

    env.documents.fail_next_read(Fault::MidStream);
    let err = db.read(|tx| titles(tx)).unwrap_err();
    assert!(matches!(
        err,
        DbError::File(FileError::InputOutputError { op: FileOp::Read, .. })
    ));
    assert!(!db.cache_path().exists());

    Ok(())
}

#[test]
fn unreadable_metadata_stops_before_anything_runs() -> Result<(), Box<dyn std::error::Error>> {
    let env = TestProfiles::new()?;
    let db = env.external("watchlist.db", &["Alien"])?;

    env.metadata.fail_reads(true);
    let mut runs = 0;
    let err = db
        .read(|tx| {
            runs += 1;
            titles(tx)
        })
        .unwrap_err();

    assert!(matches!(err, DbError::Metadata(_)));
    assert_eq!(runs, 0);
    assert_eq!(env.documents.reads_opened(), 0);

    Ok(())
}

#[test]
fn unrecordable_refresh_is_discarded() -> Result<(), Box<dyn std::error::Error>> {
    let env = TestProfiles::new()?;
    let db = env.external("watchlist.db", &["Alien"])?;

    env.metadata.fail_writes(true);
    let err = db.read(|tx| titles(tx)).unwrap_err();
    assert!(matches!(err, DbError::Metadata(_)));
    assert!(!db.cache_path().exists());

    Ok(())
}

#[test]
fn cancelled_before_start_does_nothing() -> Result<(), Box<dyn std::error::Error>> {
    let env = TestProfiles::new()?;
    let db = env.external("watchlist.db", &["Alien"])?;

    let cancel = AtomicBool::new(true);
    let mut runs = 0;
    let err = db
        .transaction_cancellable(&cancel, |tx| {
            runs += 1;
            add_title(tx, "Heat").map(Transaction::edited)
        })
        .unwrap_err();

    assert!(matches!(err, DbError::Cancelled));
    assert_eq!(runs, 0);
    assert_eq!(env.documents.reads_opened(), 0);

    Ok(())
}

// ============================================================================
// Execution errors
// ============================================================================

#[test]
fn corrupted_external_file_drops_mirror() -> Result<(), Box<dyn std::error::Error>> {
    let env = TestProfiles::new()?;
    let db = env.external("watchlist.db", &[])?;
    let uri = db.external().uri.clone();
    let garbage = b"this is a spreadsheet, not a database ".repeat(200);
    env.documents.put(&uri, garbage.clone());

    let err = db.read(|tx| titles(tx)).unwrap_err();
    assert!(err.is_invalid_database(), "got {err:?}");
    assert!(!db.cache_path().exists());
    assert_eq!(env.documents.contents(&uri), Some(garbage));

    // Once the user restores a good file everything works again.
    env.documents.put(&uri, env.database_bytes(&["Restored"])?);
    assert_eq!(db.read(|tx| titles(tx))?, vec!["Restored"]);

    Ok(())
}

#[test]
fn body_error_keeps_fresh_mirror() -> Result<(), Box<dyn std::error::Error>> {
    let env = TestProfiles::new()?;
    let db = env.external("watchlist.db", &["Alien"])?;
    db.read(|tx| titles(tx))?;

    let err = db
        .write(|tx| {
            add_title(tx, "Half done")?;
            Err::<(), _>(StorageError::Application("rating out of range".into()))
        })
        .unwrap_err();
    assert!(matches!(err, DbError::Transaction(StorageError::Application(_))));

    assert!(db.cache_path().exists());
    assert_eq!(env.documents.writes_opened(), 0);
    assert_eq!(db.read(|tx| titles(tx))?, vec!["Alien"]);
    assert_eq!(env.documents.reads_opened(), 1);

    Ok(())
}

// ============================================================================
// Single flight
// ============================================================================

#[test]
fn parallel_writes_to_one_profile_all_land() -> Result<(), Box<dyn std::error::Error>> {
    let env = TestProfiles::new()?;
    let db = env.external("watchlist.db", &[])?;

    thread::scope(|s| {
        for worker in 0..4 {
            let db = &db;
            s.spawn(move || {
                for i in 0..5 {
                    db.write(|tx| add_title(tx, &format!("w{worker}-{i}")))
                        .unwrap();
                }
            });
        }
    });

    let names = db.read(|tx| titles(tx))?;
    assert_eq!(names.len(), 20);
    assert_eq!(env.documents.writes_opened(), 20);

    Ok(())
}
