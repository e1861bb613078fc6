//! Configuration model.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Staging area configuration.
    pub staging: StagingConfig,
    /// Journal configuration.
    pub journal: JournalConfig,
    /// Undo/redo history configuration.
    pub undo_redo: UndoRedoConfig,
    /// Worker pool configuration.
    pub scheduler: SchedulerConfig,
    /// Defaults applied to newly constructed commands.
    pub commands: CommandDefaults,
}

/// Staging area configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StagingConfig {
    /// Root of the staging tree.
    pub staging_directory: PathBuf,
    /// Completed entries older than this are garbage collected.
    pub max_staging_age_hours: u64,
    /// Snapshot a backup before creating the staged copy.
    pub create_backup_before_staging: bool,
    /// Compute an MD5 checksum for staged files.
    pub validate_file_integrity: bool,
    /// Hard-link instead of copying when the filesystem allows it.
    pub use_hard_links: bool,
    /// Run periodic garbage collection.
    pub auto_cleanup: bool,
    /// Interval between garbage collection runs.
    pub cleanup_interval_minutes: u64,
}

/// Journal configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    /// Root of the journal tree.
    pub journal_directory: PathBuf,
    /// Append-only JSONL files instead of a single `journal.json` snapshot.
    pub use_jsonl_format: bool,
    /// Lines per JSONL file before rotating.
    pub jsonl_max_entries_per_file: usize,
    /// Retention for successful entries in the in-memory index.
    pub keep_successful_entries_days: i64,
    /// Retention for failed entries in the in-memory index.
    pub keep_failed_entries_days: i64,
    /// Allow `cleanup_old_entries` to run without `force`.
    pub auto_cleanup: bool,
    /// Persist on a dedicated writer thread.
    pub async_processing: bool,
    /// Rotated JSONL files older than this are zipped into `archive/`.
    pub archive_after_days: i64,
    /// Soft limit on the journal directory size, reported by statistics.
    pub max_journal_size_mb: u64,
}

/// Undo/redo history configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UndoRedoConfig {
    /// Maximum number of history slots.
    pub max_undo_count: usize,
    /// Merge consecutive batch commands.
    pub merge_commands: bool,
    /// Window in which consecutive batch commands merge.
    pub merge_window_secs: i64,
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Upper bound on concurrently running tasks.
    pub max_concurrent_tasks: usize,
}

/// Defaults applied to newly constructed commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandDefaults {
    /// Trash used by `DeleteFileCommand::recoverable`.
    pub trash_directory: PathBuf,
    /// Carry subtitle files along with videos.
    pub move_subtitles: bool,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            staging_directory: data_path().join("staging"),
            max_staging_age_hours: 72,
            create_backup_before_staging: true,
            validate_file_integrity: true,
            use_hard_links: false,
            auto_cleanup: true,
            cleanup_interval_minutes: 60,
        }
    }
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            journal_directory: data_path().join("journal"),
            use_jsonl_format: true,
            jsonl_max_entries_per_file: 1000,
            keep_successful_entries_days: 7,
            keep_failed_entries_days: 30,
            auto_cleanup: true,
            async_processing: false,
            archive_after_days: 30,
            max_journal_size_mb: 100,
        }
    }
}

impl Default for UndoRedoConfig {
    fn default() -> Self {
        Self {
            max_undo_count: 100,
            merge_commands: true,
            merge_window_secs: 5,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 4,
        }
    }
}

impl Default for CommandDefaults {
    fn default() -> Self {
        Self {
            trash_directory: data_path().join("trash"),
            move_subtitles: true,
        }
    }
}

impl StagingConfig {
    /// Staging config rooted at `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            staging_directory: dir.to_path_buf(),
            ..Self::default()
        }
    }
}

impl JournalConfig {
    /// Journal config rooted at `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            journal_directory: dir.to_path_buf(),
            ..Self::default()
        }
    }
}

impl Config {
    /// Strictly parse a TOML config file.
    pub fn from_file(path: &Path) -> crate::Result<Config> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("media_guard")
}

/// Get the data directory holding staging, journal and trash.
pub fn data_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("media_guard")
}

/// Load configuration from file.
pub fn load_config() -> Config {
    let config_path = config_dir().join("config.toml");

    if config_path.exists() {
        match Config::from_file(&config_path) {
            Ok(config) => return config,
            Err(e) => tracing::warn!("Ignoring invalid config {:?}: {}", config_path, e),
        }
    }

    Config::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [journal]
            jsonl_max_entries_per_file = 10

            [undo_redo]
            max_undo_count = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.journal.jsonl_max_entries_per_file, 10);
        assert_eq!(config.journal.keep_failed_entries_days, 30);
        assert_eq!(config.undo_redo.max_undo_count, 5);
        assert_eq!(config.undo_redo.merge_window_secs, 5);
        assert_eq!(config.staging.max_staging_age_hours, 72);
        assert_eq!(config.scheduler.max_concurrent_tasks, 4);
    }

    #[test]
    fn test_from_file_rejects_bad_toml() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "journal = [").unwrap();
        assert!(Config::from_file(&path).is_err());
    }
}
