//! Staging area data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

/// State of a staged copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StagingStatus {
    Staged,
    Processing,
    Completed,
    Failed,
    Cleaned,
}

impl std::fmt::Display for StagingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StagingStatus::Staged => "staged",
            StagingStatus::Processing => "processing",
            StagingStatus::Completed => "completed",
            StagingStatus::Failed => "failed",
            StagingStatus::Cleaned => "cleaned",
        };
        f.write_str(s)
    }
}

/// How the staged copy was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StagingMethod {
    Copy,
    HardLink,
    DirectoryCopy,
}

/// Extra facts recorded at staging time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagingMetadata {
    pub staging_method: StagingMethod,
    /// Unix permission bits of the original, when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_mode: Option<u32>,
    /// Number of files inside a staged directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_count: Option<usize>,
}

/// A path copied into the staging area before the real operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedFile {
    pub staging_id: Uuid,
    pub original_path: PathBuf,
    pub staging_path: PathBuf,
    /// Operation the copy protects ("move", "delete", ...).
    pub operation_type: String,
    pub staged_at: DateTime<Utc>,
    /// Size in bytes (recursive for directories).
    pub size: u64,
    /// MD5 of the original file, when integrity validation is on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    pub status: StagingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<PathBuf>,
    pub metadata: StagingMetadata,
}

impl StagedFile {
    /// Hours elapsed since staging.
    pub fn age_hours(&self) -> f64 {
        (Utc::now() - self.staged_at).num_seconds() as f64 / 3600.0
    }

    pub fn is_directory(&self) -> bool {
        self.metadata.staging_method == StagingMethod::DirectoryCopy
    }
}

/// Snapshot of the staging area.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingSummary {
    pub total_staged_files: usize,
    pub status_distribution: BTreeMap<String, usize>,
    pub total_size_bytes: u64,
    pub staging_directory: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_cleanup: Option<DateTime<Utc>>,
    pub auto_cleanup_enabled: bool,
}
