//! Command execution data model.

use crate::error::ErrorKind;
use crate::models::preflight::PreflightCheckResult;
use crate::models::staging::StagedFile;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

/// Lifecycle state of a command or of one of its results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Pending,
    Executing,
    Completed,
    Failed,
    Undone,
    Cancelled,
}

/// Which concrete command produced a result. Used for merging and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    MoveFile,
    CopyFile,
    DeleteFile,
    RenameFile,
    CreateDirectory,
    Composite,
    BatchFileOperation,
    Conditional,
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CommandKind::MoveFile => "MoveFileCommand",
            CommandKind::CopyFile => "CopyFileCommand",
            CommandKind::DeleteFile => "DeleteFileCommand",
            CommandKind::RenameFile => "RenameFileCommand",
            CommandKind::CreateDirectory => "CreateDirectoryCommand",
            CommandKind::Composite => "CompositeCommand",
            CommandKind::BatchFileOperation => "BatchFileOperationCommand",
            CommandKind::Conditional => "ConditionalCommand",
        };
        f.write_str(s)
    }
}

/// Failure attached to a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl CommandError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: None,
            suggestions: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.suggestions = suggestions;
        self
    }
}

impl From<&crate::Error> for CommandError {
    fn from(err: &crate::Error) -> Self {
        CommandError::new(err.kind(), err.to_string())
    }
}

/// Outcome snapshot of one execute, undo or redo run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub command_id: Uuid,
    pub status: CommandStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub execution_time_ms: u64,
    pub affected_files: Vec<PathBuf>,
    pub created_files: Vec<PathBuf>,
    pub deleted_files: Vec<PathBuf>,
    pub modified_files: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preflight: Option<PreflightCheckResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub staged_files: Vec<StagedFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staging_directory: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub journal_entry_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CommandError>,
    /// Free-form counters (batch success/error counts, branch taken, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl CommandResult {
    pub fn new(command_id: Uuid) -> Self {
        Self {
            command_id,
            status: CommandStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            execution_time_ms: 0,
            affected_files: Vec::new(),
            created_files: Vec::new(),
            deleted_files: Vec::new(),
            modified_files: Vec::new(),
            preflight: None,
            staged_files: Vec::new(),
            staging_directory: None,
            journal_entry_id: None,
            error: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Result for a request that was refused before anything ran.
    pub fn rejected(command_id: Uuid, error: CommandError) -> Self {
        let mut result = Self::new(command_id);
        result.fail(error);
        result
    }

    pub fn is_success(&self) -> bool {
        self.status == CommandStatus::Completed
    }

    pub fn mark_completed(&mut self) {
        self.status = CommandStatus::Completed;
        self.stamp();
    }

    pub fn fail(&mut self, error: CommandError) {
        self.status = CommandStatus::Failed;
        self.error = Some(error);
        self.stamp();
    }

    pub fn mark_cancelled(&mut self) {
        self.status = CommandStatus::Cancelled;
        self.stamp();
    }

    fn stamp(&mut self) {
        let now = Utc::now();
        self.execution_time_ms = (now - self.started_at).num_milliseconds().max(0) as u64;
        self.completed_at = Some(now);
    }

    pub fn add_affected(&mut self, path: impl Into<PathBuf>) {
        push_unique(&mut self.affected_files, path.into());
    }

    pub fn add_created(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        push_unique(&mut self.affected_files, path.clone());
        push_unique(&mut self.created_files, path);
    }

    pub fn add_deleted(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        push_unique(&mut self.affected_files, path.clone());
        push_unique(&mut self.deleted_files, path);
    }

    pub fn add_modified(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        push_unique(&mut self.affected_files, path.clone());
        push_unique(&mut self.modified_files, path);
    }

    /// Fold a child result's file lists into this one.
    pub fn absorb_files(&mut self, child: &CommandResult) {
        for p in &child.affected_files {
            push_unique(&mut self.affected_files, p.clone());
        }
        for p in &child.created_files {
            push_unique(&mut self.created_files, p.clone());
        }
        for p in &child.deleted_files {
            push_unique(&mut self.deleted_files, p.clone());
        }
        for p in &child.modified_files {
            push_unique(&mut self.modified_files, p.clone());
        }
    }

    pub fn set_metadata(&mut self, key: &str, value: impl Into<Value>) {
        self.metadata.insert(key.to_string(), value.into());
    }

    pub fn metadata_u64(&self, key: &str) -> Option<u64> {
        self.metadata.get(key).and_then(Value::as_u64)
    }
}

fn push_unique(list: &mut Vec<PathBuf>, path: PathBuf) {
    if !list.contains(&path) {
        list.push(path);
    }
}

/// Key/value data a command keeps to invert itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UndoData(BTreeMap<String, Value>);

impl UndoData {
    pub fn store<T: Serialize>(&mut self, key: &str, value: &T) -> crate::Result<()> {
        self.0.insert(key.to_string(), serde_json::to_value(value)?);
        Ok(())
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.0
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn path(&self, key: &str) -> Option<PathBuf> {
        self.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &BTreeMap<String, Value> {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undo_data_typed_access() {
        let mut data = UndoData::default();
        data.store("original_source", &PathBuf::from("/a/b.mkv")).unwrap();
        data.store("overwrite", &true).unwrap();

        assert_eq!(data.path("original_source"), Some(PathBuf::from("/a/b.mkv")));
        assert_eq!(data.get::<bool>("overwrite"), Some(true));
        assert_eq!(data.get::<bool>("missing"), None);
    }

    #[test]
    fn test_result_file_lists_are_unique() {
        let mut result = CommandResult::new(Uuid::new_v4());
        result.add_created("/x");
        result.add_created("/x");
        result.add_deleted("/y");
        assert_eq!(result.affected_files.len(), 2);
        assert_eq!(result.created_files, vec![PathBuf::from("/x")]);
    }

    #[test]
    fn test_fail_stamps_completion() {
        let mut result = CommandResult::new(Uuid::new_v4());
        result.fail(CommandError::new(ErrorKind::Execution, "boom"));
        assert_eq!(result.status, CommandStatus::Failed);
        assert!(result.completed_at.is_some());
        assert!(!result.is_success());
    }
}
