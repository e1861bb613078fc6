//! Integration tests for the command pipeline.
//!
//! Tests cover:
//! - Undo/redo round trips through preflight, staging and journal
//! - Undo availability before and after execution
//! - Irreversible deletes
//! - Destination conflicts and copy undo
//! - Overwriting copies restoring the replaced destination
//! - Batches with partial failure
//! - Recovery of a journaled move after a restart
//! - Journal rollback removing directories the operation created

use media_guard::core::commands::{
    BatchFileOperationCommand, BatchOperation, Command, CommandContext, CopyFileCommand,
    CreateDirectoryCommand, DeleteFileCommand, MoveFileCommand, RenameFileCommand,
};
use media_guard::core::journal::JournalManager;
use media_guard::core::rollback::RollbackStrategy;
use media_guard::core::staging::StagingManager;
use media_guard::error::ErrorKind;
use media_guard::models::command::CommandStatus;
use media_guard::models::config::{JournalConfig, StagingConfig};
use media_guard::models::journal::{JournalEntryStatus, JournalEntryType};
use media_guard::preflight::PreflightCoordinator;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

// ========== TEST FIXTURES ==========

struct Fixture {
    temp: TempDir,
    journal: Arc<JournalManager>,
    ctx: CommandContext,
}

impl Fixture {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let journal = Arc::new(
            JournalManager::new(JournalConfig::in_dir(&temp.path().join("journal"))).unwrap(),
        );
        let staging = Arc::new(
            StagingManager::new(StagingConfig::in_dir(&temp.path().join("staging"))).unwrap(),
        );
        let ctx = CommandContext::new()
            .with_preflight(Arc::new(PreflightCoordinator::new()))
            .with_staging(staging)
            .with_journal(Arc::clone(&journal));
        Self { temp, journal, ctx }
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.temp.path().join("library").join(rel)
    }

    fn write(&self, rel: &str, content: &[u8]) -> PathBuf {
        let path = self.path(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }
}

fn affected(cmd: &dyn Command) -> BTreeSet<PathBuf> {
    cmd.result().unwrap().affected_files.iter().cloned().collect()
}

fn tree(root: &Path) -> BTreeSet<PathBuf> {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.path().strip_prefix(root).unwrap().to_path_buf())
        .collect()
}

// ========== ROUND TRIP TESTS ==========

#[test]
fn test_move_undo_redo_round_trip() {
    let fx = Fixture::new();
    let src = fx.write("incoming/A.mkv", b"movie");
    fx.write("incoming/A.srt", b"subs");
    let dest = fx.path("Movies/A (2020)/A (2020).mkv");

    let mut cmd = MoveFileCommand::new(&src, &dest, fx.ctx.clone());
    assert!(cmd.execute().is_success());
    let after_execute = tree(&fx.path(""));
    let first = affected(&cmd);
    assert!(fx.path("Movies/A (2020)/A (2020).srt").exists());

    assert!(cmd.undo().is_success());
    assert!(src.exists());
    assert!(fx.path("incoming/A.srt").exists());
    assert!(!fx.path("Movies").exists());

    assert!(cmd.redo().is_success());
    assert_eq!(tree(&fx.path("")), after_execute);
    assert_eq!(affected(&cmd), first);
}

#[test]
fn test_rename_and_mkdir_round_trip() {
    let fx = Fixture::new();
    let file = fx.write("show/ep1.mkv", b"x");

    let mut rename = RenameFileCommand::new(&file, "S01E01.mkv", fx.ctx.clone());
    let mut mkdir = CreateDirectoryCommand::new(fx.path("show/Season 01/extras"), fx.ctx.clone());

    for cmd in [&mut rename as &mut dyn Command, &mut mkdir] {
        assert!(cmd.execute().is_success());
        let before = tree(&fx.path(""));
        let first = affected(cmd);
        assert!(cmd.undo().is_success());
        assert!(cmd.redo().is_success());
        assert_eq!(tree(&fx.path("")), before);
        assert_eq!(affected(cmd), first);
    }
}

#[test]
fn test_can_undo_lifecycle() {
    let fx = Fixture::new();
    let src = fx.write("a.mkv", b"a");

    let mut ok = CopyFileCommand::new(&src, fx.path("b.mkv"), fx.ctx.clone());
    assert!(!ok.can_undo());
    ok.execute();
    assert!(ok.can_undo());

    let mut failing = CopyFileCommand::new(fx.path("missing.mkv"), fx.path("c.mkv"), fx.ctx.clone());
    assert!(!failing.can_undo());
    assert_eq!(failing.execute().status, CommandStatus::Failed);
    assert!(!failing.can_undo());
}

#[test]
fn test_permanent_delete_cannot_be_undone() {
    let fx = Fixture::new();
    let file = fx.write("junk.nfo", b"x");

    let mut cmd = DeleteFileCommand::permanent(&file, fx.ctx.clone());
    assert!(!cmd.supports_undo());
    assert!(cmd.execute().is_success());
    assert!(!file.exists());

    let result = cmd.undo();
    assert_eq!(result.status, CommandStatus::Failed);
    assert_eq!(result.error.unwrap().kind, ErrorKind::Rollback);
}

// ========== SCENARIO TESTS ==========

#[test]
fn test_move_onto_existing_destination_is_refused() {
    let fx = Fixture::new();
    let src = fx.write("A.mkv", b"new");
    let dest = fx.write("dest/A.mkv", b"old");

    let mut cmd = MoveFileCommand::new(&src, &dest, fx.ctx.clone());
    assert!(!cmd.validate());

    let result = cmd.execute();
    assert_eq!(result.status, CommandStatus::Failed);
    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::Validation);
    assert!(!error.suggestions.is_empty() || error.detail.is_some());

    assert_eq!(fs::read(&src).unwrap(), b"new");
    assert_eq!(fs::read(&dest).unwrap(), b"old");
}

#[test]
fn test_copy_then_undo() {
    let fx = Fixture::new();
    let src = fx.write("a.mkv", b"content");
    let dest = fx.path("dest/a.mkv");

    let mut cmd = CopyFileCommand::new(&src, &dest, fx.ctx.clone());
    assert!(cmd.execute().is_success());
    assert!(dest.exists());

    assert!(cmd.undo().is_success());
    assert!(!dest.exists());
    assert_eq!(fs::read(&src).unwrap(), b"content");
}

#[test]
fn test_copy_undo_redo_round_trip() {
    let fx = Fixture::new();
    let src = fx.write("incoming/A.mkv", b"movie");
    fx.write("incoming/A.srt", b"subs");
    let dest = fx.path("Movies/A (2020)/A (2020).mkv");
    let original = tree(&fx.path(""));

    let mut cmd = CopyFileCommand::new(&src, &dest, fx.ctx.clone());
    assert!(cmd.execute().is_success());
    let after_execute = tree(&fx.path(""));
    let first = affected(&cmd);
    assert!(first.contains(&dest));
    assert!(first.contains(&fx.path("Movies/A (2020)/A (2020).srt")));

    assert!(cmd.undo().is_success());
    assert_eq!(tree(&fx.path("")), original);
    assert_eq!(fs::read(&src).unwrap(), b"movie");

    assert!(cmd.redo().is_success());
    assert_eq!(tree(&fx.path("")), after_execute);
    assert_eq!(affected(&cmd), first);
}

#[test]
fn test_overwrite_copy_undo_restores_destination() {
    let fx = Fixture::new();
    let src = fx.write("a.mkv", b"new");
    let dest = fx.write("dest/a.mkv", b"old");
    let original = tree(&fx.path(""));

    let mut cmd = CopyFileCommand::new(&src, &dest, fx.ctx.clone()).overwrite(true);
    assert!(cmd.execute().is_success());
    assert_eq!(fs::read(&dest).unwrap(), b"new");
    let after_execute = tree(&fx.path(""));
    let first = affected(&cmd);

    let entry_id = cmd.result().unwrap().journal_entry_id.unwrap();
    let backup = fx
        .journal
        .get_entry(entry_id)
        .unwrap()
        .operation_details
        .unwrap()
        .backup_path
        .unwrap();
    assert_eq!(fs::read(&backup).unwrap(), b"old");

    assert!(cmd.undo().is_success());
    assert_eq!(fs::read(&dest).unwrap(), b"old");
    assert!(!backup.exists());
    assert_eq!(tree(&fx.path("")), original);

    assert!(cmd.redo().is_success());
    assert_eq!(fs::read(&dest).unwrap(), b"new");
    assert_eq!(tree(&fx.path("")), after_execute);
    assert_eq!(affected(&cmd), first);
}

#[test]
fn test_batch_partial_failure_counts() {
    let fx = Fixture::new();
    let a = fx.write("a.mkv", b"a");
    let b = fx.write("b.mkv", b"b");

    let ops = vec![
        BatchOperation::Move { source: a, destination: fx.path("out/a.mkv"), overwrite: false },
        BatchOperation::Move { source: fx.path("ghost.mkv"), destination: fx.path("out/g.mkv"), overwrite: false },
        BatchOperation::Copy { source: b, destination: fx.path("out/b.mkv"), overwrite: false },
        BatchOperation::Rename { path: fx.path("nope.mkv"), new_name: "x.mkv".to_string() },
    ];
    let mut batch = BatchFileOperationCommand::new("organize", ops, fx.ctx.clone());
    let result = batch.execute();

    assert!(result.is_success());
    assert_eq!(batch.success_count() + batch.error_count(), 4);
    assert_eq!(result.metadata_u64("error_count"), Some(2));

    let batch_entries = fx.journal.entries_by_type(JournalEntryType::BatchOperation);
    assert_eq!(batch_entries.len(), 1);
    assert!(!batch_entries[0].can_rollback());

    assert!(batch.undo().is_success());
    assert!(fx.path("a.mkv").exists());
    assert!(!fx.path("out/b.mkv").exists());
}

// ========== JOURNAL RECOVERY TESTS ==========

#[test]
fn test_journaled_move_recovered_after_restart() {
    let fx = Fixture::new();
    let src = fx.write("film.mkv", b"frames");
    let dest = fx.path("Movies/Film (2020)/film.mkv");

    let mut cmd = MoveFileCommand::new(&src, &dest, fx.ctx.clone());
    let entry_id = cmd.execute().journal_entry_id.unwrap();
    drop(cmd);

    // A fresh process only has the journal on disk.
    let reopened = JournalManager::new(JournalConfig::in_dir(&fx.temp.path().join("journal"))).unwrap();
    let entry = reopened.get_entry(entry_id).unwrap();
    assert_eq!(entry.status, JournalEntryStatus::Completed);
    assert!(entry.operation_details.as_ref().unwrap().file_hash.is_some());

    let result = reopened.rollback_entry(entry_id, RollbackStrategy::Conservative).unwrap();
    assert!(result.is_success());
    assert!(src.exists());
    assert!(!dest.exists());
    assert!(!fx.path("Movies").exists());
    assert_eq!(reopened.get_entry(entry_id).unwrap().status, JournalEntryStatus::RolledBack);
}

#[test]
fn test_journal_rollback_keeps_directories_still_in_use() {
    let fx = Fixture::new();
    let src = fx.write("film.mkv", b"frames");
    let extra = fx.write("extra.mkv", b"extra");
    let dest = fx.path("Movies/Film (2020)/film.mkv");

    let copy_id = CopyFileCommand::new(&extra, fx.path("Movies/extra.mkv"), fx.ctx.clone())
        .execute()
        .journal_entry_id
        .unwrap();
    let entry_id = MoveFileCommand::new(&src, &dest, fx.ctx.clone())
        .execute()
        .journal_entry_id
        .unwrap();

    let result = fx.journal.rollback_entry(entry_id, RollbackStrategy::Conservative).unwrap();
    assert!(result.is_success());
    assert!(src.exists());
    assert!(!fx.path("Movies/Film (2020)").exists());
    assert!(fx.path("Movies/extra.mkv").exists());

    let result = fx.journal.rollback_entry(copy_id, RollbackStrategy::Conservative).unwrap();
    assert!(result.is_success());
    assert!(!fx.path("Movies").exists());
    assert!(extra.exists());
}

#[test]
fn test_undo_marks_journal_entry_rolled_back() {
    let fx = Fixture::new();
    let dir = fx.path("New Folder");

    let mut cmd = CreateDirectoryCommand::new(&dir, fx.ctx.clone());
    let entry_id = cmd.execute().journal_entry_id.unwrap();
    assert!(cmd.undo().is_success());

    assert_eq!(
        fx.journal.get_entry(entry_id).unwrap().status,
        JournalEntryStatus::RolledBack
    );
}
