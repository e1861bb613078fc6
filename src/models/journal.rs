//! Journal entry data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

/// Kind of operation an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalEntryType {
    FileMove,
    FileCopy,
    FileDelete,
    FileRename,
    DirectoryCreate,
    DirectoryDelete,
    BatchOperation,
    RollbackOperation,
}

impl std::fmt::Display for JournalEntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JournalEntryType::FileMove => "file_move",
            JournalEntryType::FileCopy => "file_copy",
            JournalEntryType::FileDelete => "file_delete",
            JournalEntryType::FileRename => "file_rename",
            JournalEntryType::DirectoryCreate => "directory_create",
            JournalEntryType::DirectoryDelete => "directory_delete",
            JournalEntryType::BatchOperation => "batch_operation",
            JournalEntryType::RollbackOperation => "rollback_operation",
        };
        f.write_str(s)
    }
}

/// Lifecycle state of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalEntryStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    RolledBack,
    Skipped,
}

impl std::fmt::Display for JournalEntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JournalEntryStatus::Pending => "pending",
            JournalEntryStatus::InProgress => "in_progress",
            JournalEntryStatus::Completed => "completed",
            JournalEntryStatus::Failed => "failed",
            JournalEntryStatus::RolledBack => "rolled_back",
            JournalEntryStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Everything needed to invert a file operation without the command object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileOperationDetails {
    pub operation_type: String,
    pub source_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    /// SHA-256 of the file as it was written by the operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_hash: Option<String>,
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default)]
    pub create_dirs: bool,
    #[serde(default)]
    pub use_trash: bool,
    /// Where a displaced or deleted original was parked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl FileOperationDetails {
    pub fn new(operation_type: impl Into<String>, source_path: impl Into<PathBuf>) -> Self {
        Self {
            operation_type: operation_type.into(),
            source_path: source_path.into(),
            destination_path: None,
            file_size: None,
            file_hash: None,
            overwrite: false,
            create_dirs: false,
            use_trash: false,
            backup_path: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_destination(mut self, destination: impl Into<PathBuf>) -> Self {
        self.destination_path = Some(destination.into());
        self
    }
}

/// Host facts recorded with each entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub platform: String,
    pub user: String,
    pub hostname: String,
}

impl SystemInfo {
    pub fn current() -> Self {
        Self {
            platform: whoami::platform().to_string(),
            user: whoami::username(),
            hostname: whoami::fallible::hostname().unwrap_or_else(|_| "unknown".to_string()),
        }
    }
}

/// One attempted operation in the journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub entry_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_id: Option<Uuid>,
    pub entry_type: JournalEntryType,
    pub status: JournalEntryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_details: Option<FileOperationDetails>,
    #[serde(default)]
    pub rollback_data: BTreeMap<String, Value>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub execution_time_ms: u64,
    #[serde(default)]
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Cleared for entries that must never be inverted automatically.
    pub can_rollback_flag: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rolled_back_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_info: Option<SystemInfo>,
}

impl JournalEntry {
    pub fn new(entry_type: JournalEntryType) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            transaction_id: None,
            command_id: None,
            entry_type,
            status: JournalEntryStatus::Pending,
            operation_details: None,
            rollback_data: BTreeMap::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            execution_time_ms: 0,
            success: false,
            error_message: None,
            can_rollback_flag: true,
            rolled_back_at: None,
            system_info: Some(SystemInfo::current()),
        }
    }

    pub fn with_details(mut self, details: FileOperationDetails) -> Self {
        self.operation_details = Some(details);
        self
    }

    pub fn with_command(mut self, command_id: Uuid) -> Self {
        self.command_id = Some(command_id);
        self
    }

    pub fn start(&mut self) {
        self.status = JournalEntryStatus::InProgress;
        self.started_at = Some(Utc::now());
    }

    pub fn complete(&mut self, success: bool, error_message: Option<String>) {
        let now = Utc::now();
        self.status = if success {
            JournalEntryStatus::Completed
        } else {
            JournalEntryStatus::Failed
        };
        self.success = success;
        self.error_message = error_message;
        self.completed_at = Some(now);
        let started = self.started_at.unwrap_or(self.created_at);
        self.execution_time_ms = (now - started).num_milliseconds().max(0) as u64;
    }

    pub fn mark_rolled_back(&mut self) {
        self.status = JournalEntryStatus::RolledBack;
        self.rolled_back_at = Some(Utc::now());
    }

    pub fn mark_skipped(&mut self, reason: impl Into<String>) {
        self.status = JournalEntryStatus::Skipped;
        self.error_message = Some(reason.into());
        self.completed_at = Some(Utc::now());
    }

    /// An entry is invertible only once it finished successfully and is flagged for it.
    pub fn can_rollback(&self) -> bool {
        self.can_rollback_flag && self.status == JournalEntryStatus::Completed && self.success
    }

    pub fn is_finished(&self) -> bool {
        !matches!(
            self.status,
            JournalEntryStatus::Pending | JournalEntryStatus::InProgress
        )
    }

    /// Timestamp used for retention decisions.
    pub fn reference_time(&self) -> DateTime<Utc> {
        self.completed_at.unwrap_or(self.created_at)
    }

    /// Short human label: `file_move /a -> /b`.
    pub fn describe(&self) -> String {
        match &self.operation_details {
            Some(d) => match &d.destination_path {
                Some(dest) => format!(
                    "{} {} -> {}",
                    self.entry_type,
                    d.source_path.display(),
                    dest.display()
                ),
                None => format!("{} {}", self.entry_type, d.source_path.display()),
            },
            None => self.entry_type.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_rollback_requires_success_and_flag() {
        let mut entry = JournalEntry::new(JournalEntryType::FileMove);
        assert!(!entry.can_rollback());

        entry.start();
        assert!(!entry.can_rollback());

        entry.complete(true, None);
        assert!(entry.can_rollback());

        entry.can_rollback_flag = false;
        assert!(!entry.can_rollback());
    }

    #[test]
    fn test_failed_entry_cannot_rollback() {
        let mut entry = JournalEntry::new(JournalEntryType::FileCopy);
        entry.start();
        entry.complete(false, Some("disk full".to_string()));
        assert_eq!(entry.status, JournalEntryStatus::Failed);
        assert!(!entry.can_rollback());
    }

    #[test]
    fn test_entry_type_serializes_snake_case() {
        let json = serde_json::to_string(&JournalEntryType::DirectoryCreate).unwrap();
        assert_eq!(json, "\"directory_create\"");
        let status = serde_json::to_string(&JournalEntryStatus::InProgress).unwrap();
        assert_eq!(status, "\"in_progress\"");
    }
}
