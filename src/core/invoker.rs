//! Undo/redo history over executed commands.
//!
//! History is a `Vec` of command slots plus a cursor: slots before the cursor
//! can be undone, slots from the cursor on can be redone. Executing a new
//! command drops the redo tail.

use crate::core::commands::Command;
use crate::core::notify::{emit, SharedNotifier};
use crate::models::command::{CommandKind, CommandResult, CommandStatus};
use crate::models::config::UndoRedoConfig;
use crate::models::notification::Notification;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// A command owned by the history. Shared so it can run without the history lock.
pub type CommandSlot = Arc<Mutex<Box<dyn Command>>>;

/// Counters over the invoker's lifetime.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InvokerStatistics {
    pub executed_count: usize,
    pub undone_count: usize,
    pub redone_count: usize,
    pub failed_count: usize,
    pub merged_count: usize,
    pub history_size: usize,
    pub undo_index: Option<usize>,
    pub last_execute: Option<DateTime<Utc>>,
    pub last_undo: Option<DateTime<Utc>>,
    pub last_redo: Option<DateTime<Utc>>,
}

/// One row of [`CommandInvoker::history`].
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub command_id: Uuid,
    pub kind: CommandKind,
    pub description: String,
    pub status: CommandStatus,
    pub executed_at: Option<DateTime<Utc>>,
    /// Next slot `undo()` would invert.
    pub is_current: bool,
}

#[derive(Default)]
struct History {
    slots: Vec<CommandSlot>,
    cursor: usize,
    stats: InvokerStatistics,
    last_push: Option<Instant>,
}

impl History {
    fn undo_index(&self) -> Option<usize> {
        self.cursor.checked_sub(1)
    }

    fn changed(&self) -> Notification {
        Notification::HistoryChanged {
            stack_size: self.slots.len(),
            undo_index: self.undo_index(),
            can_undo: self.cursor > 0,
            can_redo: self.cursor < self.slots.len(),
        }
    }
}

pub struct CommandInvoker {
    config: UndoRedoConfig,
    history: Mutex<History>,
    notifier: Option<SharedNotifier>,
}

impl CommandInvoker {
    pub fn new(config: UndoRedoConfig) -> Self {
        Self {
            config,
            history: Mutex::new(History::default()),
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: SharedNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, History>> {
        self.history
            .lock()
            .map_err(|_| Error::Other("history lock poisoned".to_string()))
    }

    fn merge_window(&self) -> Duration {
        Duration::from_secs(self.config.merge_window_secs.max(0) as u64)
    }

    /// Execute a command and record it on success.
    ///
    /// Failed commands are counted but never enter the history.
    pub fn execute(&self, command: Box<dyn Command>) -> CommandResult {
        let slot: CommandSlot = Arc::new(Mutex::new(command));
        let result = match slot.lock() {
            Ok(mut cmd) => cmd.execute(),
            Err(poisoned) => poisoned.into_inner().execute(),
        };

        let Ok(mut history) = self.lock() else {
            tracing::error!("Command history unavailable, {} not recorded", result.command_id);
            return result;
        };
        if !result.is_success() {
            history.stats.failed_count += 1;
            return result;
        }

        let cursor = history.cursor;
        history.slots.truncate(cursor);

        let merged = self.try_merge(&history, &slot);
        if merged {
            history.stats.merged_count += 1;
        } else {
            history.slots.push(slot);
            while history.slots.len() > self.config.max_undo_count.max(1) {
                history.slots.remove(0);
            }
            history.cursor = history.slots.len();
        }

        history.stats.executed_count += 1;
        history.stats.last_execute = Some(Utc::now());
        history.last_push = Some(Instant::now());
        let event = history.changed();
        drop(history);

        emit(&self.notifier, event);
        result
    }

    /// Fold a batch into the previous batch slot when both ran within the merge window.
    fn try_merge(&self, history: &History, slot: &CommandSlot) -> bool {
        if !self.config.merge_commands {
            return false;
        }
        let within_window = history
            .last_push
            .map(|at| at.elapsed() <= self.merge_window())
            .unwrap_or(false);
        let Some(previous) = history.undo_index().and_then(|i| history.slots.get(i)) else {
            return false;
        };
        if !within_window {
            return false;
        }

        // Busy slots are never merged into.
        let (Ok(mut last), Ok(mut next)) = (previous.try_lock(), slot.try_lock()) else {
            return false;
        };
        if last.kind() != CommandKind::BatchFileOperation || next.kind() != CommandKind::BatchFileOperation {
            return false;
        }
        let merged = last.merge_with(&mut **next);
        if merged {
            tracing::debug!("Merged '{}' into previous batch", next.description());
        }
        merged
    }

    /// Undo the command before the cursor.
    ///
    /// `Err(NothingToUndo)` when the history has nothing to undo. A failed
    /// undo leaves the cursor where it was.
    pub fn undo(&self) -> Result<CommandResult> {
        let (index, slot) = {
            let mut history = self.lock()?;
            let index = history.undo_index().ok_or(Error::NothingToUndo)?;
            history.cursor = index;
            (index, Arc::clone(&history.slots[index]))
        };

        let result = match slot.lock() {
            Ok(mut cmd) => cmd.undo(),
            Err(_) => {
                self.restore_cursor(index, &slot, index + 1);
                return Err(Error::Undo("command lock poisoned".to_string()));
            }
        };

        if !result.is_success() {
            self.restore_cursor(index, &slot, index + 1);
            return Ok(result);
        }

        let event = {
            let mut history = self.lock()?;
            history.stats.undone_count += 1;
            history.stats.last_undo = Some(Utc::now());
            history.changed()
        };
        emit(&self.notifier, event);
        Ok(result)
    }

    /// Re-execute the command at the cursor.
    pub fn redo(&self) -> Result<CommandResult> {
        let (index, slot) = {
            let mut history = self.lock()?;
            let index = history.cursor;
            let slot = history.slots.get(index).cloned().ok_or(Error::NothingToRedo)?;
            history.cursor = index + 1;
            (index, slot)
        };

        let result = match slot.lock() {
            Ok(mut cmd) => cmd.redo(),
            Err(_) => {
                self.restore_cursor(index + 1, &slot, index);
                return Err(Error::Undo("command lock poisoned".to_string()));
            }
        };

        if !result.is_success() {
            self.restore_cursor(index + 1, &slot, index);
            return Ok(result);
        }

        let event = {
            let mut history = self.lock()?;
            history.stats.redone_count += 1;
            history.stats.last_redo = Some(Utc::now());
            history.changed()
        };
        emit(&self.notifier, event);
        Ok(result)
    }

    /// Put the cursor back after a failed undo or redo, unless the history moved on.
    fn restore_cursor(&self, reserved: usize, slot: &CommandSlot, original: usize) {
        let Ok(mut history) = self.lock() else {
            return;
        };
        let slot_index = reserved.min(original);
        let unchanged = history.cursor == reserved
            && history
                .slots
                .get(slot_index)
                .map(|s| Arc::ptr_eq(s, slot))
                .unwrap_or(false);
        if unchanged {
            history.cursor = original;
        }
    }

    /// False while another thread holds the history.
    pub fn can_undo(&self) -> bool {
        match self.history.try_lock() {
            Ok(history) => history.cursor > 0,
            Err(_) => false,
        }
    }

    pub fn can_redo(&self) -> bool {
        match self.history.try_lock() {
            Ok(history) => history.cursor < history.slots.len(),
            Err(_) => false,
        }
    }

    /// Description of the command `undo()` would invert.
    pub fn undo_text(&self) -> Option<String> {
        let history = self.history.lock().ok()?;
        let slot = history.slots.get(history.undo_index()?)?;
        let cmd = slot.try_lock().ok()?;
        Some(cmd.description().to_string())
    }

    /// Description of the command `redo()` would re-execute.
    pub fn redo_text(&self) -> Option<String> {
        let history = self.history.lock().ok()?;
        let slot = history.slots.get(history.cursor)?;
        let cmd = slot.try_lock().ok()?;
        Some(cmd.description().to_string())
    }

    /// Snapshot of every slot, oldest first. Busy slots are skipped.
    pub fn history(&self) -> Vec<HistoryEntry> {
        let Ok(history) = self.history.lock() else {
            return Vec::new();
        };
        let current = history.undo_index();
        history
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| {
                let cmd = slot.try_lock().ok()?;
                Some(HistoryEntry {
                    command_id: cmd.id(),
                    kind: cmd.kind(),
                    description: cmd.description().to_string(),
                    status: cmd.status(),
                    executed_at: cmd.core().executed_at,
                    is_current: current == Some(i),
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.history.lock().map(|h| h.slots.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every slot. Counters are kept.
    pub fn clear(&self) {
        let event = {
            let Ok(mut history) = self.history.lock() else {
                return;
            };
            history.slots.clear();
            history.cursor = 0;
            history.last_push = None;
            history.changed()
        };
        tracing::debug!("Command history cleared");
        emit(&self.notifier, event);
    }

    pub fn statistics(&self) -> InvokerStatistics {
        let Ok(history) = self.history.lock() else {
            return InvokerStatistics::default();
        };
        let mut stats = history.stats.clone();
        stats.history_size = history.slots.len();
        stats.undo_index = history.undo_index();
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::commands::{
        BatchFileOperationCommand, BatchOperation, CommandContext, CreateDirectoryCommand,
        DeleteFileCommand, MoveFileCommand,
    };
    use crate::core::notify::RecordingNotifier;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn config(max: usize, merge: bool) -> UndoRedoConfig {
        UndoRedoConfig {
            max_undo_count: max,
            merge_commands: merge,
            merge_window_secs: 5,
        }
    }

    fn mkdir(path: &Path) -> Box<dyn Command> {
        Box::new(CreateDirectoryCommand::new(path, CommandContext::new()))
    }

    #[test]
    fn test_empty_history() {
        let invoker = CommandInvoker::new(config(10, false));
        assert!(!invoker.can_undo());
        assert!(!invoker.can_redo());
        assert!(matches!(invoker.undo(), Err(Error::NothingToUndo)));
        assert!(matches!(invoker.redo(), Err(Error::NothingToRedo)));
    }

    #[test]
    fn test_undo_redo_walks_history() {
        let temp = TempDir::new().unwrap();
        let invoker = CommandInvoker::new(config(10, false));
        let a = temp.path().join("a");
        let b = temp.path().join("b");

        assert!(invoker.execute(mkdir(&a)).is_success());
        assert!(invoker.execute(mkdir(&b)).is_success());
        let expected = format!("Create directory {}", b.display());
        assert_eq!(invoker.undo_text(), Some(expected));

        assert!(invoker.undo().unwrap().is_success());
        assert!(!b.exists());
        assert!(invoker.can_redo());

        assert!(invoker.redo().unwrap().is_success());
        assert!(b.exists());
        assert!(!invoker.can_redo());

        let stats = invoker.statistics();
        assert_eq!(stats.executed_count, 2);
        assert_eq!(stats.undone_count, 1);
        assert_eq!(stats.redone_count, 1);
        assert_eq!(stats.undo_index, Some(1));
    }

    #[test]
    fn test_new_command_truncates_redo_tail() {
        let temp = TempDir::new().unwrap();
        let invoker = CommandInvoker::new(config(10, false));

        invoker.execute(mkdir(&temp.path().join("a")));
        invoker.execute(mkdir(&temp.path().join("b")));
        invoker.undo().unwrap();
        invoker.execute(mkdir(&temp.path().join("c")));

        assert_eq!(invoker.len(), 2);
        assert!(!invoker.can_redo());
        let names: Vec<String> = invoker.history().into_iter().map(|h| h.description).collect();
        assert!(names[0].ends_with("a"));
        assert!(names[1].ends_with("c"));
    }

    #[test]
    fn test_failed_command_not_recorded() {
        let temp = TempDir::new().unwrap();
        let recorder = Arc::new(RecordingNotifier::new());
        let invoker = CommandInvoker::new(config(10, false)).with_notifier(recorder.clone());

        let missing = MoveFileCommand::new(
            temp.path().join("missing.mkv"),
            temp.path().join("x.mkv"),
            CommandContext::new(),
        );
        assert!(!invoker.execute(Box::new(missing)).is_success());

        assert!(invoker.is_empty());
        assert_eq!(invoker.statistics().failed_count, 1);
        assert_eq!(recorder.count("history_changed"), 0);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let temp = TempDir::new().unwrap();
        let invoker = CommandInvoker::new(config(2, false));
        for name in ["a", "b", "c"] {
            invoker.execute(mkdir(&temp.path().join(name)));
        }
        assert_eq!(invoker.len(), 2);
        assert!(invoker.history()[0].description.ends_with("b"));

        invoker.undo().unwrap();
        invoker.undo().unwrap();
        assert!(matches!(invoker.undo(), Err(Error::NothingToUndo)));
        assert!(temp.path().join("a").exists());
    }

    #[test]
    fn test_failed_undo_keeps_cursor() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("gone.mkv");
        fs::write(&file, b"x").unwrap();
        let invoker = CommandInvoker::new(config(10, false));

        let delete = DeleteFileCommand::permanent(&file, CommandContext::new());
        assert!(invoker.execute(Box::new(delete)).is_success());

        let result = invoker.undo().unwrap();
        assert!(!result.is_success());
        assert!(invoker.can_undo());
        assert!(!invoker.can_redo());
        assert_eq!(invoker.statistics().undone_count, 0);
    }

    #[test]
    fn test_batches_merge_within_window() {
        let temp = TempDir::new().unwrap();
        let invoker = CommandInvoker::new(config(10, true));
        let batch = |name: &str| -> Box<dyn Command> {
            Box::new(BatchFileOperationCommand::new(
                name,
                vec![BatchOperation::CreateDirectory { path: temp.path().join(name) }],
                CommandContext::new(),
            ))
        };

        invoker.execute(batch("one"));
        invoker.execute(batch("two"));
        assert_eq!(invoker.len(), 1);
        assert_eq!(invoker.statistics().merged_count, 1);

        invoker.undo().unwrap();
        assert!(!temp.path().join("one").exists());
        assert!(!temp.path().join("two").exists());
    }

    #[test]
    fn test_clear_notifies() {
        let temp = TempDir::new().unwrap();
        let recorder = Arc::new(RecordingNotifier::new());
        let invoker = CommandInvoker::new(config(10, false)).with_notifier(recorder.clone());
        invoker.execute(mkdir(&temp.path().join("a")));
        invoker.clear();

        assert!(invoker.is_empty());
        assert!(!invoker.can_undo());
        assert_eq!(recorder.count("history_changed"), 2);
    }
}
