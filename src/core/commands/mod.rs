//! Reversible file commands.
//!
//! Every command runs through the same pipeline:
//!
//! 1. create a pending [`CommandResult`]
//! 2. record a pending journal entry
//! 3. preflight the command's `(source, destination)` pair
//! 4. `validate()`
//! 5. stage the paths the command will touch (best-effort)
//! 6. run the operation body
//! 7. complete or fail the result and finalize the journal entry
//!
//! Failures never escape as errors; they are captured on the returned
//! result. Steps already taken are not reversed automatically.

mod composite;
mod file_ops;

pub use composite::{
    BatchConfig, BatchFileOperationCommand, BatchOperation, CompositeCommand, Condition,
    ConditionalCommand,
};
pub use file_ops::{
    CopyFileCommand, CreateDirectoryCommand, DeleteFileCommand, MoveFileCommand,
    RenameFileCommand,
};

use crate::core::journal::{EntryCompletion, JournalManager};
use crate::core::notify::{emit, SharedNotifier};
use crate::core::scheduler::CancellationToken;
use crate::core::staging::StagingManager;
use crate::error::ErrorKind;
use crate::models::command::{CommandError, CommandKind, CommandResult, CommandStatus, UndoData};
use crate::models::config::{CommandDefaults, Config};
use crate::models::journal::{FileOperationDetails, JournalEntry};
use crate::models::notification::Notification;
use crate::models::preflight::PreflightIssue;
use crate::preflight::PreflightCoordinator;
use crate::Result;
use chrono::{DateTime, Utc};
use std::any::Any;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// Collaborators injected into commands at construction.
#[derive(Clone, Default)]
pub struct CommandContext {
    pub preflight: Option<Arc<PreflightCoordinator>>,
    pub staging: Option<Arc<StagingManager>>,
    pub journal: Option<Arc<JournalManager>>,
    pub notifier: Option<SharedNotifier>,
    pub defaults: CommandDefaults,
}

impl CommandContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full context built from configuration: preflight, staging and journal.
    pub fn from_config(config: &Config) -> Result<Self> {
        let staging = StagingManager::new(config.staging.clone())?;
        let journal = JournalManager::new(config.journal.clone())?;
        Ok(Self::new()
            .with_preflight(Arc::new(PreflightCoordinator::new()))
            .with_staging(Arc::new(staging))
            .with_journal(Arc::new(journal))
            .with_defaults(config.commands.clone()))
    }

    pub fn with_preflight(mut self, preflight: Arc<PreflightCoordinator>) -> Self {
        self.preflight = Some(preflight);
        self
    }

    pub fn with_staging(mut self, staging: Arc<StagingManager>) -> Self {
        self.staging = Some(staging);
        self
    }

    pub fn with_journal(mut self, journal: Arc<JournalManager>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn with_notifier(mut self, notifier: SharedNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_defaults(mut self, defaults: CommandDefaults) -> Self {
        self.defaults = defaults;
        self
    }
}

/// Per-command pipeline switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandOptions {
    pub skip_preflight: bool,
    pub enable_staging: bool,
    pub enable_journaling: bool,
    /// Panic at construction if no staging manager is available.
    pub require_staging: bool,
    /// Panic at construction if no journal manager is available.
    pub require_journal: bool,
}

impl Default for CommandOptions {
    fn default() -> Self {
        Self {
            skip_preflight: false,
            enable_staging: true,
            enable_journaling: true,
            require_staging: false,
            require_journal: false,
        }
    }
}

/// State shared by every command implementation.
pub struct CommandCore {
    pub id: Uuid,
    pub kind: CommandKind,
    pub description: String,
    pub status: CommandStatus,
    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub undo_data: UndoData,
    /// Result of the last execute or redo.
    pub result: Option<CommandResult>,
    pub context: CommandContext,
    pub options: CommandOptions,
    pub cancel: CancellationToken,
}

impl CommandCore {
    pub fn new(kind: CommandKind, description: impl Into<String>, context: CommandContext) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            description: description.into(),
            status: CommandStatus::Pending,
            created_at: Utc::now(),
            executed_at: None,
            undo_data: UndoData::default(),
            result: None,
            context,
            options: CommandOptions::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Replace the options.
    ///
    /// # Panics
    ///
    /// When a required manager is missing from the context.
    pub fn set_options(&mut self, options: CommandOptions) {
        if options.require_staging && self.context.staging.is_none() {
            panic!("{} requires a staging manager", self.kind);
        }
        if options.require_journal && self.context.journal.is_none() {
            panic!("{} requires a journal manager", self.kind);
        }
        self.options = options;
    }
}

/// Mutable state handed to an operation body.
pub struct ExecutionScope {
    pub result: CommandResult,
    pub undo_data: UndoData,
    /// Details of the journal entry, finalized after the body returns.
    pub details: Option<FileOperationDetails>,
}

impl ExecutionScope {
    fn new(command_id: Uuid, undo_data: UndoData) -> Self {
        Self {
            result: CommandResult::new(command_id),
            undo_data,
            details: None,
        }
    }

    pub fn details_mut(&mut self) -> Option<&mut FileOperationDetails> {
        self.details.as_mut()
    }
}

/// A reversible operation.
pub trait Command: Send {
    fn core(&self) -> &CommandCore;

    fn core_mut(&mut self) -> &mut CommandCore;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Pair submitted to the preflight coordinator.
    fn preflight_target(&self) -> Option<(PathBuf, Option<PathBuf>)> {
        None
    }

    /// Paths copied into the staging area before the body runs.
    fn staging_targets(&self) -> Vec<(PathBuf, &'static str)> {
        Vec::new()
    }

    /// Entry recorded in the journal before the body runs.
    fn journal_entry(&self) -> Option<JournalEntry> {
        None
    }

    /// Why the command cannot run right now, if it cannot.
    fn validation_problem(&self) -> Option<String> {
        None
    }

    /// Blocking preflight issue the command explicitly accepts (an overwrite it was asked for).
    fn tolerates(&self, _issue: &PreflightIssue) -> bool {
        false
    }

    fn validate(&self) -> bool {
        self.validation_problem().is_none()
    }

    fn supports_undo(&self) -> bool {
        true
    }

    fn execute_impl(&mut self, scope: &mut ExecutionScope) -> Result<()>;

    fn undo_impl(&mut self, scope: &mut ExecutionScope) -> Result<()>;

    /// Absorb a later command into this one. Only batches merge.
    fn merge_with(&mut self, _other: &mut dyn Command) -> bool {
        false
    }

    fn id(&self) -> Uuid {
        self.core().id
    }

    fn kind(&self) -> CommandKind {
        self.core().kind
    }

    fn description(&self) -> &str {
        &self.core().description
    }

    fn status(&self) -> CommandStatus {
        self.core().status
    }

    fn result(&self) -> Option<&CommandResult> {
        self.core().result.as_ref()
    }

    fn cancellation_token(&self) -> CancellationToken {
        self.core().cancel.clone()
    }

    fn can_undo(&self) -> bool {
        self.status() == CommandStatus::Completed && self.supports_undo()
    }

    fn execute(&mut self) -> CommandResult {
        run_execute(self, false)
    }

    fn undo(&mut self) -> CommandResult {
        run_undo(self)
    }

    /// Re-run the operation after an undo.
    fn redo(&mut self) -> CommandResult {
        run_execute(self, true)
    }
}

enum Interrupt {
    Failed(CommandError),
    Cancelled,
}

/// Map a body error onto the taxonomy; generic failures take the stage's kind.
fn error_from(err: &crate::Error, stage: ErrorKind) -> CommandError {
    let mut error = CommandError::from(err);
    if error.kind == ErrorKind::Execution {
        error.kind = stage;
    }
    error
}

fn run_execute<C: Command + ?Sized>(cmd: &mut C, is_redo: bool) -> CommandResult {
    let id = cmd.id();
    let ctx = cmd.core().context.clone();
    let options = cmd.core().options;

    if matches!(cmd.status(), CommandStatus::Executing | CommandStatus::Completed) {
        return CommandResult::rejected(
            id,
            CommandError::new(
                ErrorKind::Validation,
                format!("{} has already been executed", cmd.description()),
            ),
        );
    }

    let mut scope = ExecutionScope::new(id, std::mem::take(&mut cmd.core_mut().undo_data));
    scope.undo_data.clear();

    if cmd.core().cancel.is_cancelled() {
        return finish_cancelled(cmd, scope);
    }
    cmd.core_mut().status = CommandStatus::Executing;

    if options.enable_journaling {
        if let (Some(journal), Some(entry)) = (&ctx.journal, cmd.journal_entry()) {
            let entry = entry.with_command(id);
            scope.details = entry.operation_details.clone();
            match journal.add_entry(entry, None) {
                Ok(entry_id) => scope.result.journal_entry_id = Some(entry_id),
                Err(e) => {
                    tracing::error!("Journal write failed for {}: {}", cmd.description(), e);
                    let error = CommandError::new(
                        ErrorKind::Execution,
                        format!("Could not record the operation in the journal: {}", e),
                    );
                    return finish_failed(cmd, scope, error);
                }
            }
        }
    }

    match run_stages(cmd, &ctx, options, &mut scope) {
        Ok(()) => finish_completed(cmd, scope, is_redo),
        Err(Interrupt::Failed(error)) => finish_failed(cmd, scope, error),
        Err(Interrupt::Cancelled) => finish_cancelled(cmd, scope),
    }
}

fn run_stages<C: Command + ?Sized>(
    cmd: &mut C,
    ctx: &CommandContext,
    options: CommandOptions,
    scope: &mut ExecutionScope,
) -> std::result::Result<(), Interrupt> {
    if !options.skip_preflight {
        if let (Some(coordinator), Some((source, destination))) =
            (&ctx.preflight, cmd.preflight_target())
        {
            let check = coordinator.check_operation(&source, destination.as_deref());
            let issues: Vec<&PreflightIssue> = check
                .blocking_issues()
                .into_iter()
                .filter(|i| !cmd.tolerates(i))
                .collect();
            let blocking: Vec<String> = issues
                .iter()
                .map(|i| format!("{}: {}", i.title, i.description))
                .collect();
            let suggestions: Vec<String> = issues
                .iter()
                .flat_map(|i| i.suggestions.iter().cloned())
                .collect();
            scope.result.preflight = Some(check);

            if !blocking.is_empty() {
                return Err(Interrupt::Failed(
                    CommandError::new(ErrorKind::Validation, "Preflight checks failed")
                        .with_detail(blocking.join("; "))
                        .with_suggestions(suggestions),
                ));
            }
        }
    }

    if let Some(problem) = cmd.validation_problem() {
        return Err(Interrupt::Failed(CommandError::new(
            ErrorKind::Validation,
            problem,
        )));
    }

    if options.enable_staging {
        if let Some(staging) = &ctx.staging {
            for (path, operation_type) in cmd.staging_targets() {
                if !path.exists() {
                    continue;
                }
                match staging.stage_path(&path, operation_type) {
                    Ok(staged) => {
                        scope.result.staging_directory =
                            Some(staging.staging_directory().to_path_buf());
                        scope.result.staged_files.push(staged);
                    }
                    Err(e) => tracing::warn!("Staging skipped for {:?}: {}", path, e),
                }
            }
        }
    }

    if cmd.core().cancel.is_cancelled() {
        return Err(Interrupt::Cancelled);
    }

    if let (Some(journal), Some(entry_id)) = (&ctx.journal, scope.result.journal_entry_id) {
        if let Err(e) = journal.start_entry(entry_id) {
            tracing::warn!("Could not mark journal entry {} in progress: {}", entry_id, e);
        }
    }

    cmd.execute_impl(scope)
        .map_err(|e| Interrupt::Failed(error_from(&e, ErrorKind::Execution)))
}

fn finish_completed<C: Command + ?Sized>(
    cmd: &mut C,
    mut scope: ExecutionScope,
    is_redo: bool,
) -> CommandResult {
    scope.result.mark_completed();
    let ctx = cmd.core().context.clone();

    if let Some(staging) = &ctx.staging {
        for staged in &scope.result.staged_files {
            if let Err(e) = staging.commit_staged_file(staged.staging_id) {
                tracing::warn!("Could not commit staged copy {}: {}", staged.staging_id, e);
            }
        }
    }

    if let (Some(journal), Some(entry_id)) = (&ctx.journal, scope.result.journal_entry_id) {
        let completion = EntryCompletion {
            success: true,
            error_message: None,
            operation_details: scope.details.take(),
            rollback_data: scope.undo_data.as_map().clone(),
        };
        if let Err(e) = journal.complete_entry(entry_id, completion) {
            tracing::error!("Could not finalize journal entry {}: {}", entry_id, e);
        }
    }

    let result = scope.result;
    let core = cmd.core_mut();
    core.status = CommandStatus::Completed;
    core.executed_at = Some(Utc::now());
    core.undo_data = scope.undo_data;
    core.result = Some(result.clone());

    tracing::info!("{} ({} ms)", core.description, result.execution_time_ms);
    let notification = if is_redo {
        Notification::CommandRedone {
            command_id: core.id,
            command_type: core.kind.to_string(),
            description: core.description.clone(),
            affected_files: result.affected_files.clone(),
            execution_time_ms: result.execution_time_ms,
        }
    } else {
        Notification::CommandExecuted {
            command_id: core.id,
            command_type: core.kind.to_string(),
            description: core.description.clone(),
            affected_files: result.affected_files.clone(),
            execution_time_ms: result.execution_time_ms,
        }
    };
    emit(&ctx.notifier, notification);
    result
}

fn finish_failed<C: Command + ?Sized>(
    cmd: &mut C,
    mut scope: ExecutionScope,
    error: CommandError,
) -> CommandResult {
    let ctx = cmd.core().context.clone();
    tracing::error!("{} failed: {}", cmd.description(), error.message);

    if let (Some(journal), Some(entry_id)) = (&ctx.journal, scope.result.journal_entry_id) {
        let completion = EntryCompletion {
            success: false,
            error_message: Some(error.message.clone()),
            operation_details: scope.details.take(),
            rollback_data: scope.undo_data.as_map().clone(),
        };
        if let Err(e) = journal.complete_entry(entry_id, completion) {
            tracing::error!("Could not finalize journal entry {}: {}", entry_id, e);
        }
    }

    scope.result.fail(error.clone());
    let result = scope.result;
    let core = cmd.core_mut();
    core.status = CommandStatus::Failed;
    core.undo_data = scope.undo_data;
    core.result = Some(result.clone());

    emit(
        &ctx.notifier,
        Notification::CommandFailed {
            command_id: core.id,
            command_type: core.kind.to_string(),
            description: core.description.clone(),
            error_kind: error.kind,
            error_message: error.message,
            suggestions: error.suggestions,
        },
    );
    result
}

fn finish_cancelled<C: Command + ?Sized>(cmd: &mut C, mut scope: ExecutionScope) -> CommandResult {
    let ctx = cmd.core().context.clone();
    tracing::info!("{} cancelled before it started", cmd.description());

    if let (Some(journal), Some(entry_id)) = (&ctx.journal, scope.result.journal_entry_id) {
        if let Err(e) = journal.skip_entry(entry_id, "cancelled") {
            tracing::warn!("Could not mark journal entry {} skipped: {}", entry_id, e);
        }
    }

    scope.result.mark_cancelled();
    let core = cmd.core_mut();
    core.status = CommandStatus::Cancelled;
    core.result = Some(scope.result.clone());
    scope.result
}

fn run_undo<C: Command + ?Sized>(cmd: &mut C) -> CommandResult {
    let id = cmd.id();
    if !cmd.supports_undo() {
        return CommandResult::rejected(
            id,
            CommandError::new(
                ErrorKind::Rollback,
                format!("{} cannot be undone", cmd.description()),
            )
            .with_detail("The operation was not recoverable when it ran"),
        );
    }
    if cmd.status() != CommandStatus::Completed {
        return CommandResult::rejected(
            id,
            CommandError::new(
                ErrorKind::Undo,
                format!("{} has not completed, nothing to undo", cmd.description()),
            ),
        );
    }

    let ctx = cmd.core().context.clone();
    let mut scope = ExecutionScope::new(id, std::mem::take(&mut cmd.core_mut().undo_data));

    match cmd.undo_impl(&mut scope) {
        Ok(()) => {
            scope.result.mark_completed();
            let journal_entry = cmd.result().and_then(|r| r.journal_entry_id);
            if let (Some(journal), Some(entry_id)) = (&ctx.journal, journal_entry) {
                if let Err(e) = journal.update_entry(entry_id, JournalEntry::mark_rolled_back) {
                    tracing::warn!("Could not mark journal entry {} rolled back: {}", entry_id, e);
                }
            }

            let core = cmd.core_mut();
            core.status = CommandStatus::Undone;
            tracing::info!("Undone: {}", core.description);
            emit(
                &ctx.notifier,
                Notification::CommandUndone {
                    command_id: core.id,
                    command_type: core.kind.to_string(),
                    description: core.description.clone(),
                    affected_files: scope.result.affected_files.clone(),
                    undo_time_ms: scope.result.execution_time_ms,
                },
            );
            scope.result
        }
        Err(e) => {
            tracing::error!("Undo of {} failed: {}", cmd.description(), e);
            scope.result.fail(error_from(&e, ErrorKind::Undo));
            cmd.core_mut().undo_data = scope.undo_data;
            scope.result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::notify::RecordingNotifier;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_pipeline_notifies_and_stores_result() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("a.mkv");
        fs::write(&src, b"data").unwrap();

        let recorder = Arc::new(RecordingNotifier::new());
        let ctx = CommandContext::new().with_notifier(recorder.clone());
        let mut cmd = MoveFileCommand::new(&src, temp.path().join("b.mkv"), ctx);

        let result = cmd.execute();
        assert!(result.is_success());
        assert_eq!(cmd.status(), CommandStatus::Completed);
        assert_eq!(cmd.result().unwrap().command_id, cmd.id());
        assert_eq!(recorder.count("command_executed"), 1);

        cmd.undo();
        cmd.redo();
        assert_eq!(recorder.count("command_undone"), 1);
        assert_eq!(recorder.count("command_redone"), 1);
    }

    #[test]
    fn test_execute_twice_is_rejected() {
        let temp = TempDir::new().unwrap();
        let mut cmd = CreateDirectoryCommand::new(temp.path().join("new"), CommandContext::new());
        assert!(cmd.execute().is_success());

        let again = cmd.execute();
        assert!(!again.is_success());
        assert_eq!(cmd.status(), CommandStatus::Completed);
    }

    #[test]
    fn test_cancelled_before_start() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("a.mkv");
        fs::write(&src, b"data").unwrap();

        let mut cmd = MoveFileCommand::new(&src, temp.path().join("b.mkv"), CommandContext::new());
        cmd.cancellation_token().cancel();

        let result = cmd.execute();
        assert_eq!(result.status, CommandStatus::Cancelled);
        assert!(src.exists());
        assert!(!cmd.can_undo());
    }

    #[test]
    #[should_panic(expected = "requires a journal manager")]
    fn test_required_journal_panics() {
        let _ = MoveFileCommand::new("/a", "/b", CommandContext::new()).with_options(CommandOptions {
            require_journal: true,
            ..CommandOptions::default()
        });
    }
}
