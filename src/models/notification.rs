//! Notification payloads emitted by the pipeline.
//!
//! Every payload is flat and serializable so a UI layer can render progress
//! without holding references into the core.

use crate::error::ErrorKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    // Commands
    CommandExecuted {
        command_id: Uuid,
        command_type: String,
        description: String,
        affected_files: Vec<PathBuf>,
        execution_time_ms: u64,
    },
    CommandUndone {
        command_id: Uuid,
        command_type: String,
        description: String,
        affected_files: Vec<PathBuf>,
        undo_time_ms: u64,
    },
    CommandRedone {
        command_id: Uuid,
        command_type: String,
        description: String,
        affected_files: Vec<PathBuf>,
        execution_time_ms: u64,
    },
    CommandFailed {
        command_id: Uuid,
        command_type: String,
        description: String,
        error_kind: ErrorKind,
        error_message: String,
        suggestions: Vec<String>,
    },
    HistoryChanged {
        stack_size: usize,
        undo_index: Option<usize>,
        can_undo: bool,
        can_redo: bool,
    },

    // Batches
    BatchStarted {
        batch_id: Uuid,
        description: String,
        command_count: usize,
    },
    BatchProgress {
        batch_id: Uuid,
        completed_count: usize,
        total_count: usize,
        current_description: String,
        progress_percentage: f64,
    },
    BatchCompleted {
        batch_id: Uuid,
        success_count: usize,
        failed_count: usize,
        total_execution_time_ms: u64,
        failed_descriptions: Vec<String>,
    },

    // Staging
    StagingStarted {
        source_path: PathBuf,
        operation_type: String,
    },
    StagingCompleted {
        staging_id: Uuid,
        original_path: PathBuf,
        staging_path: PathBuf,
        size: u64,
        checksum: Option<String>,
    },

    // Journal
    JournalEntryCreated {
        entry_id: Uuid,
        transaction_id: Option<Uuid>,
        command_id: Option<Uuid>,
        entry_type: String,
        source_path: Option<PathBuf>,
        destination_path: Option<PathBuf>,
    },
    JournalEntryUpdated {
        entry_id: Uuid,
        transaction_id: Option<Uuid>,
        old_status: String,
        new_status: String,
        success: bool,
        error_message: Option<String>,
        execution_time_ms: u64,
    },
    TransactionStarted {
        transaction_id: Uuid,
        name: String,
        description: String,
        auto_rollback_on_failure: bool,
    },
    TransactionCommitted {
        transaction_id: Uuid,
        name: String,
        total_entries: usize,
        successful_entries: usize,
        failed_entries: usize,
    },
    TransactionRolledBack {
        transaction_id: Uuid,
        name: String,
        reason: String,
        strategy: String,
        successful_rollbacks: usize,
        failed_rollbacks: usize,
        rollback_time_ms: u64,
        recovery_instructions: Vec<String>,
    },

    // Rollback
    RollbackStarted {
        rollback_id: Uuid,
        target_transaction_id: Option<Uuid>,
        target_entry_ids: Vec<Uuid>,
        strategy: String,
        total_operations: usize,
    },
    RollbackProgress {
        rollback_id: Uuid,
        entry_id: Uuid,
        completed_count: usize,
        total_count: usize,
        current_description: String,
    },
    RollbackCompleted {
        rollback_id: Uuid,
        success: bool,
        total_operations: usize,
        successful_operations: usize,
        failed_operations: usize,
        skipped_operations: usize,
        rollback_time_ms: u64,
        recovery_instructions: Vec<String>,
    },

    // Scheduler
    TaskStarted {
        task_id: Uuid,
        name: String,
    },
    TaskProgress {
        task_id: Uuid,
        name: String,
        percentage: f64,
        message: String,
    },
    TaskCompleted {
        task_id: Uuid,
        name: String,
        duration_ms: u64,
    },
    TaskFailed {
        task_id: Uuid,
        name: String,
        error_message: String,
    },
    TaskCancelled {
        task_id: Uuid,
        name: String,
    },
}

impl Notification {
    /// Event name as it appears in the serialized `event` field.
    pub fn name(&self) -> &'static str {
        match self {
            Notification::CommandExecuted { .. } => "command_executed",
            Notification::CommandUndone { .. } => "command_undone",
            Notification::CommandRedone { .. } => "command_redone",
            Notification::CommandFailed { .. } => "command_failed",
            Notification::HistoryChanged { .. } => "history_changed",
            Notification::BatchStarted { .. } => "batch_started",
            Notification::BatchProgress { .. } => "batch_progress",
            Notification::BatchCompleted { .. } => "batch_completed",
            Notification::StagingStarted { .. } => "staging_started",
            Notification::StagingCompleted { .. } => "staging_completed",
            Notification::JournalEntryCreated { .. } => "journal_entry_created",
            Notification::JournalEntryUpdated { .. } => "journal_entry_updated",
            Notification::TransactionStarted { .. } => "transaction_started",
            Notification::TransactionCommitted { .. } => "transaction_committed",
            Notification::TransactionRolledBack { .. } => "transaction_rolled_back",
            Notification::RollbackStarted { .. } => "rollback_started",
            Notification::RollbackProgress { .. } => "rollback_progress",
            Notification::RollbackCompleted { .. } => "rollback_completed",
            Notification::TaskStarted { .. } => "task_started",
            Notification::TaskProgress { .. } => "task_progress",
            Notification::TaskCompleted { .. } => "task_completed",
            Notification::TaskFailed { .. } => "task_failed",
            Notification::TaskCancelled { .. } => "task_cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialized_event_tag_matches_name() {
        let n = Notification::TaskCancelled {
            task_id: Uuid::nil(),
            name: "scan".to_string(),
        };
        let value = serde_json::to_value(&n).unwrap();
        assert_eq!(value["event"], n.name());
        assert_eq!(value["name"], "scan");
    }
}
