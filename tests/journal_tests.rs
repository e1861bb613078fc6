//! Integration tests for the journal and rollback engine.
//!
//! Tests cover:
//! - JSONL persistence across managers
//! - Automatic rollback of a failed transaction
//! - Explicit transaction rollback and dry runs
//! - Archiving rotated journal files
//! - Cleanup evictions surviving a reload
//! - Crash-recovery reporting

use media_guard::core::commands::{Command, CommandContext, CopyFileCommand, MoveFileCommand};
use media_guard::core::journal::{CommitOutcome, EntryCompletion, JournalManager};
use media_guard::core::notify::RecordingNotifier;
use media_guard::core::rollback::RollbackStrategy;
use media_guard::models::config::JournalConfig;
use media_guard::models::journal::{
    FileOperationDetails, JournalEntry, JournalEntryStatus, JournalEntryType,
};
use media_guard::models::transaction::TransactionStatus;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

// ========== TEST FIXTURES ==========

fn config(dir: &Path) -> JournalConfig {
    JournalConfig::in_dir(&dir.join("journal"))
}

fn open(dir: &Path) -> Arc<JournalManager> {
    Arc::new(JournalManager::new(config(dir)).unwrap())
}

// ========== PERSISTENCE TESTS ==========

#[test]
fn test_jsonl_round_trip() {
    let temp = TempDir::new().unwrap();
    let journal = open(temp.path());

    let mut details = FileOperationDetails::new("move", "/library/a.mkv").with_destination("/library/Movies/a.mkv");
    details.file_size = Some(42);
    details.file_hash = Some("abc123".to_string());
    let entry_id = journal
        .add_entry(JournalEntry::new(JournalEntryType::FileMove), None)
        .unwrap();
    journal.start_entry(entry_id).unwrap();
    journal
        .complete_entry(
            entry_id,
            EntryCompletion {
                success: true,
                operation_details: Some(details.clone()),
                ..Default::default()
            },
        )
        .unwrap();
    drop(journal);

    let reloaded = open(temp.path());
    let entry = reloaded.get_entry(entry_id).unwrap();
    assert_eq!(entry.entry_id, entry_id);
    assert_eq!(entry.status, JournalEntryStatus::Completed);
    assert_eq!(entry.operation_details, Some(details));
    assert!(reloaded.pending_recovery().is_empty());
}

#[test]
fn test_unfinished_entry_reported_not_rolled_back() {
    let temp = TempDir::new().unwrap();
    let journal = open(temp.path());
    let entry_id = journal
        .add_entry(
            JournalEntry::new(JournalEntryType::FileCopy)
                .with_details(FileOperationDetails::new("copy", "/x")),
            None,
        )
        .unwrap();
    journal.start_entry(entry_id).unwrap();
    drop(journal);

    let reloaded = open(temp.path());
    let pending = reloaded.pending_recovery();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].entry_id, entry_id);
    assert_eq!(pending[0].status, JournalEntryStatus::InProgress);
}

// ========== TRANSACTION TESTS ==========

#[test]
fn test_failed_transaction_rolls_back_completed_entries() {
    let temp = TempDir::new().unwrap();
    let journal = open(temp.path());
    let recorder = Arc::new(RecordingNotifier::new());
    let ctx = CommandContext::new()
        .with_journal(Arc::clone(&journal))
        .with_notifier(recorder.clone());

    let lib = temp.path().join("library");
    fs::create_dir_all(&lib).unwrap();
    let a = lib.join("a.mkv");
    let b = lib.join("b.mkv");
    fs::write(&a, b"a").unwrap();
    fs::write(&b, b"b").unwrap();

    let txn = journal.create_transaction("organize", "two moves and a bad copy").unwrap();
    let mut first = MoveFileCommand::new(&a, lib.join("out/a.mkv"), ctx.clone());
    let mut second = CopyFileCommand::new(&b, lib.join("out/b.mkv"), ctx.clone());
    let mut broken = MoveFileCommand::new(lib.join("ghost.mkv"), lib.join("out/g.mkv"), ctx.clone());
    assert!(first.execute().is_success());
    assert!(second.execute().is_success());
    assert!(!broken.execute().is_success());

    let outcome = journal.commit_transaction(txn).unwrap();
    assert!(!outcome.is_committed());
    match outcome {
        CommitOutcome::RolledBack(result) => assert_eq!(result.successful_operations, 2),
        other => panic!("expected rollback, got {:?}", other),
    }

    let stored = journal.get_transaction(txn).unwrap();
    assert_eq!(stored.status, TransactionStatus::RolledBack);
    let statuses: Vec<JournalEntryStatus> = stored.entries.iter().map(|e| e.status).collect();
    assert_eq!(
        statuses,
        vec![
            JournalEntryStatus::RolledBack,
            JournalEntryStatus::RolledBack,
            JournalEntryStatus::Failed
        ]
    );
    assert!(a.exists());
    assert!(!lib.join("out/b.mkv").exists());
    assert_eq!(recorder.count("transaction_rolled_back"), 1);
}

#[test]
fn test_dry_run_touches_nothing() {
    let temp = TempDir::new().unwrap();
    let journal = open(temp.path());
    let ctx = CommandContext::new().with_journal(Arc::clone(&journal));

    let src = temp.path().join("a.mkv");
    let dest = temp.path().join("b.mkv");
    fs::write(&src, b"a").unwrap();

    let txn = journal.create_transaction("single", "").unwrap();
    MoveFileCommand::new(&src, &dest, ctx).execute();
    assert!(journal.commit_transaction(txn).unwrap().is_committed());

    let result = journal
        .rollback_transaction(txn, "preview", RollbackStrategy::DryRun)
        .unwrap();
    assert_eq!(result.successful_operations, 1);
    assert!(dest.exists());
    assert_eq!(journal.get_transaction(txn).unwrap().status, TransactionStatus::Committed);

    let result = journal
        .rollback_transaction(txn, "operator", RollbackStrategy::Conservative)
        .unwrap();
    assert!(result.is_success());
    assert!(src.exists());
}

#[test]
fn test_conservative_rollback_stops_at_first_failure() {
    let temp = TempDir::new().unwrap();
    let journal = open(temp.path());
    let ctx = CommandContext::new().with_journal(Arc::clone(&journal));

    let a = temp.path().join("a.mkv");
    let b = temp.path().join("b.mkv");
    fs::write(&a, b"a").unwrap();
    fs::write(&b, b"b").unwrap();

    let txn = journal.create_transaction("moves", "").unwrap();
    MoveFileCommand::new(&a, temp.path().join("a2.mkv"), ctx.clone()).execute();
    MoveFileCommand::new(&b, temp.path().join("b2.mkv"), ctx.clone()).execute();
    assert!(journal.commit_transaction(txn).unwrap().is_committed());

    // The newest move is inverted first; its file is gone.
    fs::remove_file(temp.path().join("b2.mkv")).unwrap();

    let result = journal
        .rollback_transaction(txn, "operator", RollbackStrategy::Conservative)
        .unwrap();
    assert_eq!(result.failed_operations, 1);
    assert_eq!(result.successful_operations, 0);
    assert!(!result.recovery_instructions.is_empty());
    assert!(temp.path().join("a2.mkv").exists());
}

// ========== CLEANUP TESTS ==========

#[test]
fn test_cleanup_eviction_survives_reload() {
    let temp = TempDir::new().unwrap();
    let mut cfg = config(temp.path());
    cfg.keep_successful_entries_days = 0;
    let journal = JournalManager::new(cfg.clone()).unwrap();

    let done = journal
        .add_entry(
            JournalEntry::new(JournalEntryType::FileMove)
                .with_details(FileOperationDetails::new("move", "/a").with_destination("/b")),
            None,
        )
        .unwrap();
    journal
        .complete_entry(done, EntryCompletion { success: true, ..Default::default() })
        .unwrap();

    let txn = journal.create_transaction("organize", "").unwrap();
    let inner = journal
        .add_entry(JournalEntry::new(JournalEntryType::DirectoryCreate), None)
        .unwrap();
    journal
        .complete_entry(inner, EntryCompletion { success: true, ..Default::default() })
        .unwrap();
    assert!(journal.commit_transaction(txn).unwrap().is_committed());

    assert_eq!(journal.cleanup_old_entries(true).unwrap(), 2);
    journal.save_journal().unwrap();
    drop(journal);

    let reloaded = JournalManager::new(cfg).unwrap();
    assert!(reloaded.get_entry(done).is_none());
    assert!(reloaded.get_entry(inner).is_none());
    assert!(reloaded.get_transaction(txn).is_none());
    assert_eq!(reloaded.load_journal().unwrap().entries, 0);
}

#[test]
fn test_cleanup_keeps_recent_entries_on_reload() {
    let temp = TempDir::new().unwrap();
    let journal = open(temp.path());
    let id = journal
        .add_entry(JournalEntry::new(JournalEntryType::FileCopy), None)
        .unwrap();
    journal
        .complete_entry(id, EntryCompletion { success: true, ..Default::default() })
        .unwrap();

    assert_eq!(journal.cleanup_old_entries(true).unwrap(), 0);
    drop(journal);
    assert!(open(temp.path()).get_entry(id).is_some());
}

// ========== ARCHIVE TESTS ==========

#[test]
fn test_archive_rotated_files() {
    let temp = TempDir::new().unwrap();
    let mut cfg = config(temp.path());
    cfg.jsonl_max_entries_per_file = 1;
    cfg.archive_after_days = 0;
    let journal = JournalManager::new(cfg).unwrap();

    for i in 0..3 {
        journal
            .add_entry(
                JournalEntry::new(JournalEntryType::DirectoryCreate)
                    .with_details(FileOperationDetails::new("mkdir", format!("/d{}", i))),
                None,
            )
            .unwrap();
    }
    let before = journal.journal_files().unwrap().len();
    assert!(before >= 3);

    let archive = journal.archive_old_journals().unwrap().unwrap();
    assert!(archive.exists());
    assert!(archive.starts_with(temp.path().join("journal").join("archive")));
    assert_eq!(journal.journal_files().unwrap().len(), 1);

    let reader = zip::ZipArchive::new(fs::File::open(&archive).unwrap()).unwrap();
    assert_eq!(reader.len(), before - 1);
}
