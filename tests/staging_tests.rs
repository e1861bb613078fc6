//! Integration tests for the staging area.
//!
//! Tests cover:
//! - Staged copies with backups and checksums
//! - Restoring originals from staging
//! - Commit, removal and garbage collection
//! - Directory staging

use chrono::Duration;
use media_guard::core::staging::StagingManager;
use media_guard::models::config::StagingConfig;
use media_guard::models::staging::{StagingMethod, StagingStatus};
use media_guard::utils::hash::md5_file;
use std::fs;
use tempfile::TempDir;

fn manager(temp: &TempDir) -> StagingManager {
    StagingManager::new(StagingConfig::in_dir(&temp.path().join("staging"))).unwrap()
}

// ========== STAGING TESTS ==========

#[test]
fn test_stage_file_with_backup_and_checksum() {
    let temp = TempDir::new().unwrap();
    let staging = manager(&temp);
    let src = temp.path().join("movie.mkv");
    fs::write(&src, b"frames").unwrap();

    let staged = staging.stage_file(&src, "move").unwrap();
    assert_eq!(staged.status, StagingStatus::Staged);
    assert_eq!(staged.size, 6);
    assert_eq!(staged.metadata.staging_method, StagingMethod::Copy);
    assert!(staged.staging_path.starts_with(staging.staging_directory()));
    assert_eq!(fs::read(&staged.staging_path).unwrap(), b"frames");

    let backup = staged.backup_path.clone().unwrap();
    assert!(backup.exists());
    assert_eq!(staged.checksum, Some(md5_file(&src).unwrap()));
    assert_eq!(md5_file(&backup).unwrap(), md5_file(&src).unwrap());

    assert_eq!(staging.find_by_original_path(&src), Some(staged));
}

#[test]
fn test_stage_directory_counts_files() {
    let temp = TempDir::new().unwrap();
    let staging = manager(&temp);
    let show = temp.path().join("Show");
    fs::create_dir_all(show.join("Season 01")).unwrap();
    fs::write(show.join("Season 01/e1.mkv"), b"1").unwrap();
    fs::write(show.join("Season 01/e2.mkv"), b"22").unwrap();

    let staged = staging.stage_path(&show, "delete").unwrap();
    assert!(staged.is_directory());
    assert_eq!(staged.metadata.file_count, Some(2));
    assert_eq!(staged.size, 3);
    assert!(staged.staging_path.join("Season 01/e2.mkv").exists());
}

#[test]
fn test_stage_missing_file_fails() {
    let temp = TempDir::new().unwrap();
    let staging = manager(&temp);
    assert!(staging.stage_file(&temp.path().join("ghost.mkv"), "move").is_err());
    assert!(staging.staged_files().is_empty());
}

// ========== RESTORE TESTS ==========

#[test]
fn test_rollback_restores_original() {
    let temp = TempDir::new().unwrap();
    let staging = manager(&temp);
    let src = temp.path().join("movie.mkv");
    fs::write(&src, b"original").unwrap();

    let staged = staging.stage_file(&src, "delete").unwrap();
    fs::remove_file(&src).unwrap();

    staging.rollback_staged_file(staged.staging_id).unwrap();
    assert_eq!(fs::read(&src).unwrap(), b"original");
    assert_eq!(
        staging.get(staged.staging_id).unwrap().status,
        StagingStatus::Failed
    );
}

#[test]
fn test_rollback_overwrites_modified_original() {
    let temp = TempDir::new().unwrap();
    let staging = manager(&temp);
    let src = temp.path().join("movie.mkv");
    fs::write(&src, b"original").unwrap();

    let staged = staging.stage_file(&src, "move").unwrap();
    fs::write(&src, b"clobbered").unwrap();

    staging.rollback_staged_file(staged.staging_id).unwrap();
    assert_eq!(fs::read(&src).unwrap(), b"original");
}

// ========== LIFECYCLE TESTS ==========

#[test]
fn test_commit_then_cleanup() {
    let temp = TempDir::new().unwrap();
    let staging = manager(&temp);
    let src = temp.path().join("movie.mkv");
    fs::write(&src, b"x").unwrap();

    let staged = staging.stage_file(&src, "move").unwrap();
    let backup = staged.backup_path.clone().unwrap();

    staging.commit_staged_file(staged.staging_id).unwrap();
    assert!(!backup.exists());
    assert_eq!(
        staging.get(staged.staging_id).unwrap().status,
        StagingStatus::Completed
    );

    assert_eq!(staging.cleanup_older_than(Duration::zero()), 1);
    assert!(!staged.staging_path.exists());
    assert!(staging.get(staged.staging_id).is_none());
    assert!(staging.summary().last_cleanup.is_some());
}

#[test]
fn test_cleanup_keeps_uncommitted_entries() {
    let temp = TempDir::new().unwrap();
    let staging = manager(&temp);
    let src = temp.path().join("movie.mkv");
    fs::write(&src, b"x").unwrap();

    let staged = staging.stage_file(&src, "move").unwrap();
    assert_eq!(staging.cleanup_older_than(Duration::zero()), 0);
    assert!(staged.staging_path.exists());
    assert_eq!(staging.summary().total_staged_files, 1);
}

#[test]
fn test_remove_staged_file() {
    let temp = TempDir::new().unwrap();
    let staging = manager(&temp);
    let src = temp.path().join("movie.mkv");
    fs::write(&src, b"x").unwrap();

    let staged = staging.stage_file(&src, "copy").unwrap();
    assert!(staging.remove_staged_file(staged.staging_id).unwrap());
    assert!(!staged.staging_path.exists());
    assert!(!staged.backup_path.unwrap().exists());
    assert!(staging.find_by_original_path(&src).is_none());
    assert!(!staging.remove_staged_file(staged.staging_id).unwrap());
}
