//! Commands made of other commands.

use super::{
    Command, CommandContext, CommandCore, CommandOptions, CopyFileCommand, CreateDirectoryCommand,
    DeleteFileCommand, ExecutionScope, MoveFileCommand, RenameFileCommand,
};
use crate::core::notify::emit;
use crate::models::command::{CommandKind, CommandResult, CommandStatus};
use crate::models::journal::{FileOperationDetails, JournalEntry, JournalEntryType};
use crate::models::notification::Notification;
use crate::utils::fs::path_size;
use crate::{Error, Result};
use std::any::Any;
use std::path::PathBuf;
use std::time::Instant;

/// Undo one child, recording a failure instead of stopping.
fn undo_child(child: &mut dyn Command, scope: &mut ExecutionScope, failures: &mut Vec<String>) {
    if !child.can_undo() {
        return;
    }
    let result = child.undo();
    scope.result.absorb_files(&result);
    if !result.is_success() {
        let message = result
            .error
            .map(|e| e.message)
            .unwrap_or_else(|| "unknown error".to_string());
        tracing::warn!("Undo of '{}' failed: {}", child.description(), message);
        failures.push(format!("{}: {}", child.description(), message));
    }
}

fn undo_outcome(failures: Vec<String>) -> Result<()> {
    if failures.is_empty() {
        Ok(())
    } else {
        Err(Error::Undo(failures.join("; ")))
    }
}

/// Undo children newest first. Every child is attempted.
fn undo_children(children: &mut [Box<dyn Command>], scope: &mut ExecutionScope) -> Result<()> {
    let mut failures = Vec::new();
    for child in children.iter_mut().rev() {
        undo_child(&mut **child, scope, &mut failures);
    }
    undo_outcome(failures)
}

/// Run one child. Children already completed (after a partial undo) count as done.
fn run_child(child: &mut Box<dyn Command>) -> CommandResult {
    if child.status() == CommandStatus::Completed {
        if let Some(result) = child.result() {
            return result.clone();
        }
    }
    if child.status() == CommandStatus::Undone {
        child.redo()
    } else {
        child.execute()
    }
}

fn failure_message(child: &dyn Command, result: &CommandResult) -> String {
    let reason = result
        .error
        .as_ref()
        .map(|e| e.message.clone())
        .unwrap_or_else(|| "unknown error".to_string());
    format!("'{}' failed: {}", child.description(), reason)
}

// ========== COMPOSITE ==========

/// Ordered children that stop at the first failure.
pub struct CompositeCommand {
    core: CommandCore,
    children: Vec<Box<dyn Command>>,
}

impl CompositeCommand {
    pub fn new(description: impl Into<String>, context: CommandContext) -> Self {
        Self {
            core: CommandCore::new(CommandKind::Composite, description, context),
            children: Vec::new(),
        }
    }

    pub fn add(mut self, command: impl Command + 'static) -> Self {
        self.children.push(Box::new(command));
        self
    }

    pub fn push(&mut self, command: Box<dyn Command>) {
        self.children.push(command);
    }

    pub fn with_options(mut self, options: CommandOptions) -> Self {
        self.core.set_options(options);
        self
    }

    pub fn children(&self) -> &[Box<dyn Command>] {
        &self.children
    }
}

impl Command for CompositeCommand {
    fn core(&self) -> &CommandCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut CommandCore {
        &mut self.core
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn validation_problem(&self) -> Option<String> {
        if self.children.is_empty() {
            return Some("Composite command has no children".to_string());
        }
        None
    }

    fn supports_undo(&self) -> bool {
        self.children.iter().any(|c| c.supports_undo())
    }

    fn execute_impl(&mut self, scope: &mut ExecutionScope) -> Result<()> {
        for child in self.children.iter_mut() {
            let result = run_child(child);
            scope.result.absorb_files(&result);
            if !result.is_success() {
                return Err(Error::Execution(failure_message(&**child, &result)));
            }
        }
        Ok(())
    }

    fn undo_impl(&mut self, scope: &mut ExecutionScope) -> Result<()> {
        undo_children(&mut self.children, scope)
    }
}

// ========== BATCH ==========

/// One operation of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOperation {
    Move { source: PathBuf, destination: PathBuf, overwrite: bool },
    Copy { source: PathBuf, destination: PathBuf, overwrite: bool },
    Delete { path: PathBuf, trash_directory: Option<PathBuf> },
    Rename { path: PathBuf, new_name: String },
    CreateDirectory { path: PathBuf },
}

impl BatchOperation {
    fn source(&self) -> &PathBuf {
        match self {
            BatchOperation::Move { source, .. } | BatchOperation::Copy { source, .. } => source,
            BatchOperation::Delete { path, .. }
            | BatchOperation::Rename { path, .. }
            | BatchOperation::CreateDirectory { path } => path,
        }
    }

    fn into_command(self, context: CommandContext, options: CommandOptions) -> Box<dyn Command> {
        match self {
            BatchOperation::Move { source, destination, overwrite } => Box::new(
                MoveFileCommand::new(source, destination, context)
                    .overwrite(overwrite)
                    .with_options(options),
            ),
            BatchOperation::Copy { source, destination, overwrite } => Box::new(
                CopyFileCommand::new(source, destination, context)
                    .overwrite(overwrite)
                    .with_options(options),
            ),
            BatchOperation::Delete { path, trash_directory: Some(trash) } => {
                Box::new(DeleteFileCommand::to_trash(path, trash, context).with_options(options))
            }
            BatchOperation::Delete { path, trash_directory: None } => {
                Box::new(DeleteFileCommand::permanent(path, context).with_options(options))
            }
            BatchOperation::Rename { path, new_name } => {
                Box::new(RenameFileCommand::new(path, new_name, context).with_options(options))
            }
            BatchOperation::CreateDirectory { path } => {
                Box::new(CreateDirectoryCommand::new(path, context).with_options(options))
            }
        }
    }
}

/// Failure policy of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    /// Keep going after a failed operation and count partial success.
    pub continue_on_error: bool,
    /// Drop the staged copies of failed operations.
    pub cleanup_staging_on_failure: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            continue_on_error: true,
            cleanup_staging_on_failure: true,
        }
    }
}

/// Many file operations executed as one undoable unit.
///
/// Fails only when every operation failed (or, without
/// `continue_on_error`, at the first failure).
pub struct BatchFileOperationCommand {
    core: CommandCore,
    config: BatchConfig,
    operations: Vec<BatchOperation>,
    children: Vec<Box<dyn Command>>,
    results: Vec<CommandResult>,
    completed: usize,
}

impl BatchFileOperationCommand {
    pub fn new(
        description: impl Into<String>,
        operations: Vec<BatchOperation>,
        context: CommandContext,
    ) -> Self {
        Self::with_config(description, operations, BatchConfig::default(), context)
    }

    pub fn with_config(
        description: impl Into<String>,
        operations: Vec<BatchOperation>,
        config: BatchConfig,
        context: CommandContext,
    ) -> Self {
        let core = CommandCore::new(CommandKind::BatchFileOperation, description, context);
        let children = operations
            .iter()
            .cloned()
            .map(|op| op.into_command(core.context.clone(), core.options))
            .collect();
        Self {
            core,
            config,
            operations,
            children,
            results: Vec::new(),
            completed: 0,
        }
    }

    /// Replace the pipeline options of the batch and of every child.
    pub fn with_options(mut self, options: CommandOptions) -> Self {
        self.core.set_options(options);
        for child in self.children.iter_mut() {
            child.core_mut().set_options(options);
        }
        self
    }

    pub fn operations(&self) -> &[BatchOperation] {
        &self.operations
    }

    /// Per-operation results of the last run, in execution order.
    pub fn operation_results(&self) -> &[CommandResult] {
        &self.results
    }

    /// `(completed, total)` of the last run.
    pub fn progress(&self) -> (usize, usize) {
        (self.completed, self.children.len())
    }

    pub fn success_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn error_count(&self) -> usize {
        self.results.iter().filter(|r| !r.is_success()).count()
    }

    fn cleanup_failed_staging(&self, results: &[CommandResult]) {
        let Some(staging) = &self.core.context.staging else {
            return;
        };
        for staged in results.iter().filter(|r| !r.is_success()).flat_map(|r| &r.staged_files) {
            if let Err(e) = staging.remove_staged_file(staged.staging_id) {
                tracing::warn!("Could not drop staged copy {}: {}", staged.staging_id, e);
            }
        }
    }
}

impl Command for BatchFileOperationCommand {
    fn core(&self) -> &CommandCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut CommandCore {
        &mut self.core
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn journal_entry(&self) -> Option<JournalEntry> {
        let first = self.operations.first().map(|op| op.source().clone()).unwrap_or_default();
        let mut details = FileOperationDetails::new("batch", first);
        details
            .metadata
            .insert("operation_count".to_string(), self.operations.len().into());
        details.file_size = Some(self.operations.iter().map(|op| path_size(op.source())).sum());

        let mut entry = JournalEntry::new(JournalEntryType::BatchOperation).with_details(details);
        // Children carry their own invertible entries.
        entry.can_rollback_flag = false;
        Some(entry)
    }

    fn validation_problem(&self) -> Option<String> {
        if self.children.is_empty() {
            return Some("Batch has no operations".to_string());
        }
        None
    }

    fn supports_undo(&self) -> bool {
        self.children.iter().any(|c| c.supports_undo())
    }

    fn execute_impl(&mut self, scope: &mut ExecutionScope) -> Result<()> {
        let started = Instant::now();
        let total = self.children.len();
        let batch_id = self.core.id;
        let notifier = self.core.context.notifier.clone();

        emit(
            &notifier,
            Notification::BatchStarted {
                batch_id,
                description: self.core.description.clone(),
                command_count: total,
            },
        );

        let mut results = Vec::with_capacity(total);
        let mut failed_descriptions = Vec::new();
        let mut first_failure = None;
        self.completed = 0;

        for child in self.children.iter_mut() {
            let result = run_child(child);
            scope.result.absorb_files(&result);
            self.completed += 1;

            if !result.is_success() {
                failed_descriptions.push(child.description().to_string());
                if first_failure.is_none() {
                    first_failure = Some(failure_message(&**child, &result));
                }
            }
            let stop = !result.is_success() && !self.config.continue_on_error;
            results.push(result);

            emit(
                &notifier,
                Notification::BatchProgress {
                    batch_id,
                    completed_count: self.completed,
                    total_count: total,
                    current_description: child.description().to_string(),
                    progress_percentage: self.completed as f64 * 100.0 / total as f64,
                },
            );
            if stop {
                break;
            }
        }

        let success_count = results.iter().filter(|r| r.is_success()).count();
        let error_count = results.len() - success_count;
        scope.result.set_metadata("success_count", success_count);
        scope.result.set_metadata("error_count", error_count);
        scope.result.set_metadata("total_count", total);

        emit(
            &notifier,
            Notification::BatchCompleted {
                batch_id,
                success_count,
                failed_count: error_count,
                total_execution_time_ms: started.elapsed().as_millis() as u64,
                failed_descriptions,
            },
        );
        tracing::info!(
            "Batch '{}': {} succeeded, {} failed",
            self.core.description,
            success_count,
            error_count
        );

        if error_count > 0 && self.config.cleanup_staging_on_failure {
            self.cleanup_failed_staging(&results);
        }
        self.results = results;

        if error_count > 0 && (success_count == 0 || !self.config.continue_on_error) {
            let reason = first_failure.unwrap_or_default();
            return Err(Error::Execution(format!(
                "{} of {} operations failed; first: {}",
                error_count, total, reason
            )));
        }
        Ok(())
    }

    fn undo_impl(&mut self, scope: &mut ExecutionScope) -> Result<()> {
        undo_children(&mut self.children, scope)
    }

    /// Absorb a later batch so both undo as one history slot.
    fn merge_with(&mut self, other: &mut dyn Command) -> bool {
        let Some(other) = other.as_any_mut().downcast_mut::<BatchFileOperationCommand>() else {
            return false;
        };
        if self.core.status != CommandStatus::Completed || other.core.status != CommandStatus::Completed {
            return false;
        }

        self.operations.append(&mut other.operations);
        self.children.append(&mut other.children);
        self.results.append(&mut other.results);
        self.completed += other.completed;

        if let (Some(mine), Some(theirs)) = (self.core.result.as_mut(), other.core.result.as_ref()) {
            mine.absorb_files(theirs);
            let success = self.results.iter().filter(|r| r.is_success()).count();
            mine.set_metadata("success_count", success);
            mine.set_metadata("error_count", self.results.len() - success);
            mine.set_metadata("total_count", self.children.len());
        }
        self.core.description = format!("{} + {}", self.core.description, other.core.description);
        true
    }
}

// ========== CONDITIONAL ==========

/// Predicate over the condition command's result.
pub enum Condition {
    /// The condition command succeeded.
    Succeeded,
    /// The condition command touched at least this many paths.
    AffectedAtLeast(usize),
    /// The paths the condition command touched total more than this many bytes.
    SourceLargerThan(u64),
    Custom(Box<dyn Fn(&CommandResult) -> bool + Send>),
}

impl Condition {
    fn evaluate(&self, result: &CommandResult) -> bool {
        match self {
            Condition::Succeeded => result.is_success(),
            Condition::AffectedAtLeast(n) => result.is_success() && result.affected_files.len() >= *n,
            Condition::SourceLargerThan(bytes) => {
                let total: u64 = result
                    .affected_files
                    .iter()
                    .filter(|p| p.exists())
                    .map(|p| path_size(p))
                    .sum();
                result.is_success() && total > *bytes
            }
            Condition::Custom(predicate) => predicate(result),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Branch {
    Success,
    Failure,
}

/// Runs a condition command, then one of two branches.
pub struct ConditionalCommand {
    core: CommandCore,
    condition_command: Box<dyn Command>,
    condition: Condition,
    on_success: Option<Box<dyn Command>>,
    on_failure: Option<Box<dyn Command>>,
    taken: Option<Branch>,
}

impl ConditionalCommand {
    pub fn new(
        description: impl Into<String>,
        condition_command: impl Command + 'static,
        condition: Condition,
        context: CommandContext,
    ) -> Self {
        Self {
            core: CommandCore::new(CommandKind::Conditional, description, context),
            condition_command: Box::new(condition_command),
            condition,
            on_success: None,
            on_failure: None,
            taken: None,
        }
    }

    pub fn on_success(mut self, command: impl Command + 'static) -> Self {
        self.on_success = Some(Box::new(command));
        self
    }

    pub fn on_failure(mut self, command: impl Command + 'static) -> Self {
        self.on_failure = Some(Box::new(command));
        self
    }

    pub fn with_options(mut self, options: CommandOptions) -> Self {
        self.core.set_options(options);
        self
    }

    /// `Some(true)` when the success branch was selected on the last run.
    pub fn condition_met(&self) -> Option<bool> {
        self.taken.map(|b| b == Branch::Success)
    }
}

impl Command for ConditionalCommand {
    fn core(&self) -> &CommandCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut CommandCore {
        &mut self.core
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn execute_impl(&mut self, scope: &mut ExecutionScope) -> Result<()> {
        let condition_result = run_child(&mut self.condition_command);
        scope.result.absorb_files(&condition_result);

        let met = self.condition.evaluate(&condition_result);
        let branch = if met { Branch::Success } else { Branch::Failure };
        self.taken = Some(branch);
        scope.result.set_metadata("condition_met", met);

        let selected = match branch {
            Branch::Success => self.on_success.as_mut(),
            Branch::Failure => self.on_failure.as_mut(),
        };
        let Some(command) = selected else {
            scope.result.set_metadata("branch", "none");
            return Ok(());
        };
        scope.result.set_metadata(
            "branch",
            if met { "success" } else { "failure" },
        );

        let result = run_child(command);
        scope.result.absorb_files(&result);
        if !result.is_success() {
            return Err(Error::Execution(failure_message(&**command, &result)));
        }
        Ok(())
    }

    /// Invert the branch, then the condition command.
    fn undo_impl(&mut self, scope: &mut ExecutionScope) -> Result<()> {
        let mut failures = Vec::new();
        let branch = match self.taken {
            Some(Branch::Success) => self.on_success.as_mut(),
            Some(Branch::Failure) => self.on_failure.as_mut(),
            None => None,
        };
        if let Some(command) = branch {
            undo_child(&mut **command, scope, &mut failures);
        }
        undo_child(&mut *self.condition_command, scope, &mut failures);
        undo_outcome(failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::notify::RecordingNotifier;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_composite_stops_on_first_failure() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a.mkv");
        fs::write(&a, b"a").unwrap();

        let mut cmd = CompositeCommand::new("two moves", CommandContext::new())
            .add(MoveFileCommand::new(&a, temp.path().join("b.mkv"), CommandContext::new()))
            .add(MoveFileCommand::new(temp.path().join("missing.mkv"), temp.path().join("c.mkv"), CommandContext::new()))
            .add(CreateDirectoryCommand::new(temp.path().join("never"), CommandContext::new()));

        let result = cmd.execute();
        assert_eq!(result.status, CommandStatus::Failed);
        assert!(temp.path().join("b.mkv").exists());
        assert!(!temp.path().join("never").exists());
    }

    #[test]
    fn test_composite_undo_in_reverse() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("Show");
        let file = temp.path().join("ep1.mkv");
        fs::write(&file, b"x").unwrap();

        let mut cmd = CompositeCommand::new("organize", CommandContext::new())
            .add(CreateDirectoryCommand::new(&dir, CommandContext::new()))
            .add(MoveFileCommand::new(&file, dir.join("ep1.mkv"), CommandContext::new()));

        assert!(cmd.execute().is_success());
        assert!(dir.join("ep1.mkv").exists());

        // The move must be undone before the directory can be removed.
        assert!(cmd.undo().is_success());
        assert!(file.exists());
        assert!(!dir.exists());
    }

    #[test]
    fn test_batch_partial_success_counts() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a.mkv");
        fs::write(&a, b"a").unwrap();
        let recorder = Arc::new(RecordingNotifier::new());
        let ctx = CommandContext::new().with_notifier(recorder.clone());

        let ops = vec![
            BatchOperation::Copy { source: a.clone(), destination: temp.path().join("a2.mkv"), overwrite: false },
            BatchOperation::Move { source: temp.path().join("nope.mkv"), destination: temp.path().join("x.mkv"), overwrite: false },
            BatchOperation::CreateDirectory { path: temp.path().join("dir") },
        ];
        let mut batch = BatchFileOperationCommand::new("batch", ops, ctx);
        let result = batch.execute();

        assert!(result.is_success());
        assert_eq!(result.metadata_u64("success_count"), Some(2));
        assert_eq!(result.metadata_u64("error_count"), Some(1));
        assert_eq!(batch.success_count() + batch.error_count(), 3);
        assert_eq!(batch.progress(), (3, 3));
        assert_eq!(recorder.count("batch_progress"), 3);
        assert_eq!(recorder.count("batch_completed"), 1);
    }

    #[test]
    fn test_batch_fails_when_all_fail() {
        let temp = TempDir::new().unwrap();
        let ops = vec![
            BatchOperation::Delete { path: temp.path().join("x"), trash_directory: None },
            BatchOperation::Delete { path: temp.path().join("y"), trash_directory: None },
        ];
        let mut batch = BatchFileOperationCommand::new("deletes", ops, CommandContext::new());
        let result = batch.execute();
        assert_eq!(result.status, CommandStatus::Failed);
        assert_eq!(result.metadata_u64("error_count"), Some(2));
    }

    #[test]
    fn test_batch_stops_without_continue_on_error() {
        let temp = TempDir::new().unwrap();
        let config = BatchConfig {
            continue_on_error: false,
            cleanup_staging_on_failure: false,
        };
        let ops = vec![
            BatchOperation::CreateDirectory { path: temp.path().join("one") },
            BatchOperation::Rename { path: temp.path().join("missing"), new_name: "m2".to_string() },
            BatchOperation::CreateDirectory { path: temp.path().join("three") },
        ];
        let mut batch = BatchFileOperationCommand::with_config("strict", ops, config, CommandContext::new());
        let result = batch.execute();

        assert_eq!(result.status, CommandStatus::Failed);
        assert!(temp.path().join("one").exists());
        assert!(!temp.path().join("three").exists());
        assert_eq!(batch.progress(), (2, 3));
    }

    #[test]
    fn test_batch_merge() {
        let temp = TempDir::new().unwrap();
        let mut first = BatchFileOperationCommand::new(
            "first",
            vec![BatchOperation::CreateDirectory { path: temp.path().join("a") }],
            CommandContext::new(),
        );
        let mut second = BatchFileOperationCommand::new(
            "second",
            vec![BatchOperation::CreateDirectory { path: temp.path().join("b") }],
            CommandContext::new(),
        );
        assert!(first.execute().is_success());
        assert!(second.execute().is_success());

        assert!(first.merge_with(&mut second));
        assert_eq!(first.operations().len(), 2);

        assert!(first.undo().is_success());
        assert!(!temp.path().join("a").exists());
        assert!(!temp.path().join("b").exists());
    }

    #[test]
    fn test_conditional_branches() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("a.mkv");
        fs::write(&src, vec![0u8; 100]).unwrap();
        let copy = temp.path().join("copy.mkv");

        let mut cmd = ConditionalCommand::new(
            "copy then tidy",
            CopyFileCommand::new(&src, &copy, CommandContext::new()),
            Condition::SourceLargerThan(1_000),
            CommandContext::new(),
        )
        .on_success(DeleteFileCommand::permanent(&src, CommandContext::new()))
        .on_failure(CreateDirectoryCommand::new(temp.path().join("small"), CommandContext::new()));

        let result = cmd.execute();
        assert!(result.is_success());
        assert_eq!(cmd.condition_met(), Some(false));
        assert!(temp.path().join("small").exists());
        assert!(src.exists());

        assert!(cmd.undo().is_success());
        assert!(!temp.path().join("small").exists());
        assert!(!copy.exists());
    }
}
