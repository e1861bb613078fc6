//! Staging area manager.
//!
//! Before a command mutates or removes a path, a safety copy is placed under
//! the staging root:
//!
//! ```text
//! <staging>/files/        staged copies of files
//! <staging>/directories/  staged copies of directory trees
//! <staging>/backups/      optional snapshot taken before staging
//! <staging>/processing/   staged copies currently being worked on
//! ```
//!
//! Entries are named `<timestamp>_<shortid>_<original-name>`. The manager is
//! the only writer below the staging root.

use crate::core::notify::{emit, SharedNotifier};
use crate::models::config::StagingConfig;
use crate::models::notification::Notification;
use crate::models::staging::{
    StagedFile, StagingMetadata, StagingMethod, StagingStatus, StagingSummary,
};
use crate::utils::fs::{copy_dir_all, copy_path, ensure_parent, path_size, remove_path};
use crate::utils::hash;
use crate::{Error, Result};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use walkdir::WalkDir;
use uuid::Uuid;

const FILES_DIR: &str = "files";
const DIRECTORIES_DIR: &str = "directories";
const BACKUPS_DIR: &str = "backups";
const PROCESSING_DIR: &str = "processing";

#[derive(Default)]
struct StagingIndex {
    by_id: HashMap<Uuid, StagedFile>,
    by_path: HashMap<PathBuf, Uuid>,
    last_cleanup: Option<DateTime<Utc>>,
}

/// Owns the staging tree and the index of staged copies.
pub struct StagingManager {
    config: StagingConfig,
    index: Mutex<StagingIndex>,
    cleanup_running: AtomicBool,
    notifier: Option<SharedNotifier>,
}

impl StagingManager {
    /// Create the manager and its directory layout.
    pub fn new(config: StagingConfig) -> Result<Self> {
        for sub in [FILES_DIR, DIRECTORIES_DIR, BACKUPS_DIR, PROCESSING_DIR] {
            fs::create_dir_all(config.staging_directory.join(sub))?;
        }
        tracing::debug!("Staging area ready at {:?}", config.staging_directory);

        Ok(Self {
            config,
            index: Mutex::new(StagingIndex::default()),
            cleanup_running: AtomicBool::new(false),
            notifier: None,
        })
    }

    /// Attach a notification sink.
    pub fn with_notifier(mut self, notifier: SharedNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn config(&self) -> &StagingConfig {
        &self.config
    }

    pub fn staging_directory(&self) -> &Path {
        &self.config.staging_directory
    }

    fn lock(&self) -> Result<MutexGuard<'_, StagingIndex>> {
        self.index
            .lock()
            .map_err(|_| Error::Staging("staging index lock poisoned".to_string()))
    }

    fn entry_name(id: Uuid, original: &Path) -> String {
        let short = id.simple().to_string();
        let name = original
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_string());
        format!(
            "{}_{}_{}",
            Utc::now().format("%Y%m%d_%H%M%S"),
            &short[..8],
            name
        )
    }

    /// Stage a file or a directory, whichever `source` is.
    pub fn stage_path(&self, source: &Path, operation_type: &str) -> Result<StagedFile> {
        if source.is_dir() {
            self.stage_directory(source, operation_type)
        } else {
            self.stage_file(source, operation_type)
        }
    }

    /// Copy (or hard-link) a file into the staging area.
    pub fn stage_file(&self, source: &Path, operation_type: &str) -> Result<StagedFile> {
        if !source.is_file() {
            return Err(Error::Staging(format!("not a file: {}", source.display())));
        }
        emit(
            &self.notifier,
            Notification::StagingStarted {
                source_path: source.to_path_buf(),
                operation_type: operation_type.to_string(),
            },
        );

        let staging_id = Uuid::new_v4();
        let name = Self::entry_name(staging_id, source);
        let staging_path = self.config.staging_directory.join(FILES_DIR).join(&name);

        let backup_path = if self.config.create_backup_before_staging {
            let backup = self.backup_location(&name);
            fs::copy(source, &backup).map_err(|e| stage_error(source, e))?;
            Some(backup)
        } else {
            None
        };

        let method = if self.config.use_hard_links && fs::hard_link(source, &staging_path).is_ok() {
            StagingMethod::HardLink
        } else {
            if let Err(e) = fs::copy(source, &staging_path) {
                discard(backup_path.as_deref());
                return Err(stage_error(source, e));
            }
            StagingMethod::Copy
        };

        let checksum = if self.config.validate_file_integrity {
            match hash::md5_file(source) {
                Ok(sum) => Some(sum),
                Err(e) => {
                    discard(Some(&staging_path));
                    discard(backup_path.as_deref());
                    return Err(Error::Staging(format!(
                        "checksum of {} failed: {}",
                        source.display(),
                        e
                    )));
                }
            }
        } else {
            None
        };

        let metadata = fs::metadata(source)?;
        let staged = StagedFile {
            staging_id,
            original_path: source.to_path_buf(),
            staging_path,
            operation_type: operation_type.to_string(),
            staged_at: Utc::now(),
            size: metadata.len(),
            checksum,
            status: StagingStatus::Staged,
            backup_path,
            metadata: StagingMetadata {
                staging_method: method,
                original_mode: mode_of(&metadata),
                file_count: None,
            },
        };

        self.register(staged)
    }

    /// Copy a directory tree into the staging area.
    pub fn stage_directory(&self, source: &Path, operation_type: &str) -> Result<StagedFile> {
        if !source.is_dir() {
            return Err(Error::Staging(format!("not a directory: {}", source.display())));
        }
        emit(
            &self.notifier,
            Notification::StagingStarted {
                source_path: source.to_path_buf(),
                operation_type: operation_type.to_string(),
            },
        );

        let staging_id = Uuid::new_v4();
        let name = Self::entry_name(staging_id, source);
        let staging_path = self.config.staging_directory.join(DIRECTORIES_DIR).join(&name);

        let backup_path = if self.config.create_backup_before_staging {
            let backup = self.backup_location(&name);
            copy_dir_all(source, &backup).map_err(|e| {
                discard(Some(&backup));
                Error::Staging(format!("backup of {} failed: {}", source.display(), e))
            })?;
            Some(backup)
        } else {
            None
        };

        if let Err(e) = copy_dir_all(source, &staging_path) {
            discard(Some(&staging_path));
            discard(backup_path.as_deref());
            return Err(Error::Staging(format!(
                "copy of {} failed: {}",
                source.display(),
                e
            )));
        }

        let file_count = WalkDir::new(source)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .count();

        let staged = StagedFile {
            staging_id,
            original_path: source.to_path_buf(),
            staging_path,
            operation_type: operation_type.to_string(),
            staged_at: Utc::now(),
            size: path_size(source),
            checksum: None,
            status: StagingStatus::Staged,
            backup_path,
            metadata: StagingMetadata {
                staging_method: StagingMethod::DirectoryCopy,
                original_mode: fs::metadata(source).ok().and_then(|m| mode_of(&m)),
                file_count: Some(file_count),
            },
        };

        self.register(staged)
    }

    fn backup_location(&self, name: &str) -> PathBuf {
        self.config
            .staging_directory
            .join(BACKUPS_DIR)
            .join(format!("backup_{}", name))
    }

    fn register(&self, staged: StagedFile) -> Result<StagedFile> {
        {
            let mut index = self.lock()?;
            index
                .by_path
                .insert(staged.original_path.clone(), staged.staging_id);
            index.by_id.insert(staged.staging_id, staged.clone());
        }

        tracing::debug!(
            "Staged {:?} -> {:?} ({} bytes)",
            staged.original_path,
            staged.staging_path,
            staged.size
        );
        emit(
            &self.notifier,
            Notification::StagingCompleted {
                staging_id: staged.staging_id,
                original_path: staged.original_path.clone(),
                staging_path: staged.staging_path.clone(),
                size: staged.size,
                checksum: staged.checksum.clone(),
            },
        );
        Ok(staged)
    }

    /// Move a staged copy into `processing/` while the operation runs.
    pub fn mark_processing(&self, staging_id: Uuid) -> Result<StagedFile> {
        let mut index = self.lock()?;
        let staged = index
            .by_id
            .get_mut(&staging_id)
            .ok_or(Error::StagedFileNotFound(staging_id))?;

        if let Some(name) = staged.staging_path.file_name() {
            let target = self.config.staging_directory.join(PROCESSING_DIR).join(name);
            fs::rename(&staged.staging_path, &target)?;
            staged.staging_path = target;
        }
        staged.status = StagingStatus::Processing;
        Ok(staged.clone())
    }

    /// Mark a staged copy as no longer needed and drop its backup.
    pub fn commit_staged_file(&self, staging_id: Uuid) -> Result<()> {
        let backup = {
            let mut index = self.lock()?;
            let staged = index
                .by_id
                .get_mut(&staging_id)
                .ok_or(Error::StagedFileNotFound(staging_id))?;
            staged.status = StagingStatus::Completed;
            staged.backup_path.take()
        };

        if let Some(backup) = backup {
            if let Err(e) = remove_path(&backup) {
                tracing::warn!("Failed to delete staging backup {:?}: {}", backup, e);
            }
        }
        tracing::debug!("Committed staged file {}", staging_id);
        Ok(())
    }

    /// Restore the original path from the backup (or the staged copy).
    pub fn rollback_staged_file(&self, staging_id: Uuid) -> Result<()> {
        let staged = self.get(staging_id).ok_or(Error::StagedFileNotFound(staging_id))?;

        let source = staged
            .backup_path
            .as_ref()
            .filter(|p| p.exists())
            .or_else(|| Some(&staged.staging_path).filter(|p| p.exists()))
            .ok_or_else(|| {
                Error::Staging(format!(
                    "no backup left to restore {}",
                    staged.original_path.display()
                ))
            })?;

        let original = &staged.original_path;
        if original.exists() {
            remove_path(original)?;
        }
        ensure_parent(original)?;
        copy_path(source, original)?;
        tracing::info!("Restored {:?} from staging", original);

        let mut index = self.lock()?;
        if let Some(entry) = index.by_id.get_mut(&staging_id) {
            entry.status = StagingStatus::Failed;
        }
        Ok(())
    }

    /// Delete a staged copy and its backup and forget it.
    pub fn remove_staged_file(&self, staging_id: Uuid) -> Result<bool> {
        let removed = {
            let mut index = self.lock()?;
            let removed = index.by_id.remove(&staging_id);
            if let Some(ref staged) = removed {
                if index.by_path.get(&staged.original_path) == Some(&staging_id) {
                    index.by_path.remove(&staged.original_path);
                }
            }
            removed
        };

        match removed {
            Some(staged) => {
                discard(Some(&staged.staging_path));
                discard(staged.backup_path.as_deref());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn get(&self, staging_id: Uuid) -> Option<StagedFile> {
        self.index
            .lock()
            .ok()
            .and_then(|i| i.by_id.get(&staging_id).cloned())
    }

    /// Most recent staged copy of `original_path`.
    pub fn find_by_original_path(&self, original_path: &Path) -> Option<StagedFile> {
        let index = self.index.lock().ok()?;
        let id = index.by_path.get(original_path)?;
        index.by_id.get(id).cloned()
    }

    pub fn staged_files(&self) -> Vec<StagedFile> {
        let mut files: Vec<StagedFile> = self
            .index
            .lock()
            .map(|i| i.by_id.values().cloned().collect())
            .unwrap_or_default();
        files.sort_by_key(|f| f.staged_at);
        files
    }

    /// Garbage-collect completed entries older than the configured TTL.
    pub fn cleanup_old_staging(&self) -> usize {
        let max_age = Duration::hours(self.config.max_staging_age_hours as i64);
        self.cleanup_older_than(max_age)
    }

    /// Garbage-collect completed entries older than `max_age`.
    ///
    /// Returns 0 immediately if another cleanup is already running.
    pub fn cleanup_older_than(&self, max_age: Duration) -> usize {
        if self
            .cleanup_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Staging cleanup already running, skipping");
            return 0;
        }

        let cutoff = Utc::now() - max_age;
        let expired: Vec<StagedFile> = match self.index.lock() {
            Ok(mut index) => {
                let ids: Vec<Uuid> = index
                    .by_id
                    .values()
                    .filter(|f| f.status == StagingStatus::Completed && f.staged_at <= cutoff)
                    .map(|f| f.staging_id)
                    .collect();
                let mut expired = Vec::with_capacity(ids.len());
                for id in ids {
                    if let Some(mut staged) = index.by_id.remove(&id) {
                        if index.by_path.get(&staged.original_path) == Some(&id) {
                            index.by_path.remove(&staged.original_path);
                        }
                        staged.status = StagingStatus::Cleaned;
                        expired.push(staged);
                    }
                }
                index.last_cleanup = Some(Utc::now());
                expired
            }
            Err(_) => Vec::new(),
        };

        for staged in &expired {
            discard(Some(&staged.staging_path));
            discard(staged.backup_path.as_deref());
        }

        if !expired.is_empty() {
            tracing::info!("Cleaned {} expired staging entries", expired.len());
        }
        self.cleanup_running.store(false, Ordering::Release);
        expired.len()
    }

    /// Staged copies present on disk, including those left by earlier processes.
    pub fn disk_entries(&self) -> Result<Vec<StagedArtifact>> {
        let mut artifacts = Vec::new();
        for sub in [FILES_DIR, DIRECTORIES_DIR] {
            let root = self.config.staging_directory.join(sub);
            if !root.is_dir() {
                continue;
            }
            for entry in WalkDir::new(&root).min_depth(1).max_depth(1) {
                let entry = entry.map_err(|e| Error::Staging(e.to_string()))?;
                let name = entry.file_name().to_string_lossy().into_owned();
                artifacts.push(StagedArtifact {
                    staged_at: staged_at_from_name(&name),
                    size: path_size(entry.path()),
                    is_directory: entry.file_type().is_dir(),
                    path: entry.into_path(),
                });
            }
        }
        artifacts.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(artifacts)
    }

    /// Delete on-disk staged copies older than `max_age` that this manager
    /// does not track. Entries whose name carries no timestamp are kept.
    pub fn purge_disk_entries(&self, max_age: Duration) -> Result<usize> {
        let cutoff = Utc::now() - max_age;
        let tracked: Vec<PathBuf> = self
            .lock()?
            .by_id
            .values()
            .map(|f| f.staging_path.clone())
            .collect();

        let mut removed = 0;
        for artifact in self.disk_entries()? {
            let expired = artifact.staged_at.map(|t| t <= cutoff).unwrap_or(false);
            if !expired || tracked.contains(&artifact.path) {
                continue;
            }
            remove_path(&artifact.path)?;
            tracing::debug!("Purged staged copy {:?}", artifact.path);
            removed += 1;
        }
        if let Ok(mut index) = self.index.lock() {
            index.last_cleanup = Some(Utc::now());
        }
        if removed > 0 {
            tracing::info!("Purged {} staged copies from disk", removed);
        }
        Ok(removed)
    }

    pub fn summary(&self) -> StagingSummary {
        let index = self.index.lock().ok();
        let mut distribution = BTreeMap::new();
        let mut total_size = 0;
        let mut total = 0;
        let mut last_cleanup = None;

        if let Some(index) = index {
            for staged in index.by_id.values() {
                *distribution.entry(staged.status.to_string()).or_insert(0) += 1;
                total_size += staged.size;
            }
            total = index.by_id.len();
            last_cleanup = index.last_cleanup;
        }

        StagingSummary {
            total_staged_files: total,
            status_distribution: distribution,
            total_size_bytes: total_size,
            staging_directory: self.config.staging_directory.clone(),
            last_cleanup,
            auto_cleanup_enabled: self.config.auto_cleanup,
        }
    }
}

/// A staged copy found on disk.
#[derive(Debug, Clone)]
pub struct StagedArtifact {
    pub path: PathBuf,
    pub size: u64,
    pub is_directory: bool,
    /// Parsed from the `<timestamp>_` name prefix.
    pub staged_at: Option<DateTime<Utc>>,
}

fn staged_at_from_name(name: &str) -> Option<DateTime<Utc>> {
    let stamp = name.get(..15)?;
    NaiveDateTime::parse_from_str(stamp, "%Y%m%d_%H%M%S")
        .ok()
        .map(|t| t.and_utc())
}

fn stage_error(source: &Path, err: std::io::Error) -> Error {
    Error::Staging(format!("{}: {}", source.display(), err))
}

/// Best-effort removal of a staging artifact.
fn discard(path: Option<&Path>) {
    if let Some(path) = path.filter(|p| p.exists()) {
        if let Err(e) = remove_path(path) {
            tracing::warn!("Failed to remove staging artifact {:?}: {}", path, e);
        }
    }
}

#[cfg(unix)]
fn mode_of(metadata: &fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    Some(metadata.permissions().mode())
}

#[cfg(not(unix))]
fn mode_of(_metadata: &fs::Metadata) -> Option<u32> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(temp: &TempDir) -> StagingManager {
        StagingManager::new(StagingConfig::in_dir(&temp.path().join("staging"))).unwrap()
    }

    #[test]
    fn test_layout_created() {
        let temp = TempDir::new().unwrap();
        let mgr = manager(&temp);
        for sub in ["files", "directories", "backups", "processing"] {
            assert!(mgr.staging_directory().join(sub).is_dir());
        }
    }

    #[test]
    fn test_staged_at_parsed_from_name() {
        let parsed = staged_at_from_name("20240102_030405_abcdef12_video.mkv").unwrap();
        assert_eq!(parsed.format("%Y-%m-%d %H:%M:%S").to_string(), "2024-01-02 03:04:05");
        assert!(staged_at_from_name("video.mkv").is_none());
    }

    #[test]
    fn test_purge_disk_entries_skips_tracked_and_fresh() {
        let temp = TempDir::new().unwrap();
        let mgr = manager(&temp);
        let files = mgr.staging_directory().join("files");
        fs::write(files.join("20000101_000000_deadbeef_old.mkv"), b"old").unwrap();
        fs::write(files.join("no_timestamp.mkv"), b"keep").unwrap();

        let src = temp.path().join("live.mkv");
        fs::write(&src, b"live").unwrap();
        let staged = mgr.stage_file(&src, "move").unwrap();

        assert_eq!(mgr.disk_entries().unwrap().len(), 3);
        assert_eq!(mgr.purge_disk_entries(Duration::zero()).unwrap(), 1);
        assert!(staged.staging_path.exists());
        assert!(files.join("no_timestamp.mkv").exists());
    }

    #[test]
    fn test_entry_name_format() {
        let id = Uuid::new_v4();
        let name = StagingManager::entry_name(id, Path::new("/x/video.mkv"));
        let parts: Vec<&str> = name.splitn(4, '_').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[2].len(), 8);
        assert_eq!(parts[3], "video.mkv");
    }

    #[test]
    fn test_commit_removes_backup() {
        let temp = TempDir::new().unwrap();
        let mgr = manager(&temp);
        let src = temp.path().join("a.mkv");
        fs::write(&src, b"data").unwrap();

        let staged = mgr.stage_file(&src, "move").unwrap();
        let backup = staged.backup_path.clone().unwrap();
        assert!(backup.exists());

        mgr.commit_staged_file(staged.staging_id).unwrap();
        assert!(!backup.exists());
        assert_eq!(
            mgr.get(staged.staging_id).unwrap().status,
            StagingStatus::Completed
        );
    }

    #[test]
    fn test_rollback_restores_original() {
        let temp = TempDir::new().unwrap();
        let mgr = manager(&temp);
        let src = temp.path().join("a.mkv");
        fs::write(&src, b"original").unwrap();

        let staged = mgr.stage_file(&src, "delete").unwrap();
        fs::remove_file(&src).unwrap();

        mgr.rollback_staged_file(staged.staging_id).unwrap();
        assert_eq!(fs::read(&src).unwrap(), b"original");
    }

    #[test]
    fn test_stage_directory_counts_files() {
        let temp = TempDir::new().unwrap();
        let mgr = manager(&temp);
        let dir = temp.path().join("Show");
        fs::create_dir_all(dir.join("Season01")).unwrap();
        fs::write(dir.join("Season01/e1.mkv"), b"1").unwrap();
        fs::write(dir.join("Season01/e2.mkv"), b"22").unwrap();

        let staged = mgr.stage_path(&dir, "move").unwrap();
        assert!(staged.is_directory());
        assert_eq!(staged.metadata.file_count, Some(2));
        assert_eq!(staged.size, 3);
        assert!(staged.staging_path.join("Season01/e2.mkv").exists());
    }

    #[test]
    fn test_cleanup_only_completed() {
        let temp = TempDir::new().unwrap();
        let mgr = manager(&temp);
        let a = temp.path().join("a");
        let b = temp.path().join("b");
        fs::write(&a, b"a").unwrap();
        fs::write(&b, b"b").unwrap();

        let done = mgr.stage_file(&a, "move").unwrap();
        let open = mgr.stage_file(&b, "move").unwrap();
        mgr.commit_staged_file(done.staging_id).unwrap();

        assert_eq!(mgr.cleanup_older_than(Duration::zero()), 1);
        assert!(mgr.get(done.staging_id).is_none());
        assert!(!done.staging_path.exists());
        assert!(mgr.get(open.staging_id).is_some());
        assert!(mgr.summary().last_cleanup.is_some());
    }

    #[test]
    fn test_find_by_original_path_and_summary() {
        let temp = TempDir::new().unwrap();
        let mgr = manager(&temp);
        let src = temp.path().join("a.mkv");
        fs::write(&src, b"12345").unwrap();

        let staged = mgr.stage_file(&src, "copy").unwrap();
        let found = mgr.find_by_original_path(&src).unwrap();
        assert_eq!(found.staging_id, staged.staging_id);

        let summary = mgr.summary();
        assert_eq!(summary.total_staged_files, 1);
        assert_eq!(summary.total_size_bytes, 5);
        assert_eq!(summary.status_distribution.get("staged"), Some(&1));
    }
}
