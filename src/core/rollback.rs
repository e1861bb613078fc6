//! Rollback engine.
//!
//! Reverses completed journal entries using only what the journal recorded:
//! - Move files back to original locations (restoring displaced backups)
//! - Delete copies and restore what they replaced
//! - Restore deleted files from the trash
//! - Remove created directories
//!
//! Works without the original command object, so it can recover state after
//! a restart.

use crate::core::notify::{emit, SharedNotifier};
use crate::models::journal::{FileOperationDetails, JournalEntry, JournalEntryType};
use crate::models::notification::Notification;
use crate::models::transaction::{Transaction, TransactionStatus};
use crate::utils::fs::{
    backup_path_for, ensure_parent, is_dir_empty, move_path, remove_created_dirs, remove_path,
};
use crate::utils::hash;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use uuid::Uuid;

/// How to react when one inversion fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackStrategy {
    /// Stop at the first failure and refuse risky inversions.
    Conservative,
    /// Keep going past failures and push through conflicts.
    Aggressive,
    /// Touch nothing; report what could be rolled back.
    DryRun,
}

impl std::fmt::Display for RollbackStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RollbackStrategy::Conservative => "conservative",
            RollbackStrategy::Aggressive => "aggressive",
            RollbackStrategy::DryRun => "dry_run",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for RollbackStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "conservative" => Ok(RollbackStrategy::Conservative),
            "aggressive" => Ok(RollbackStrategy::Aggressive),
            "dry_run" | "dryrun" => Ok(RollbackStrategy::DryRun),
            other => Err(Error::other(format!("unknown rollback strategy: {}", other))),
        }
    }
}

/// Outcome of inverting one entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackOperationResult {
    pub entry_id: Uuid,
    pub entry_type: JournalEntryType,
    pub description: String,
    pub success: bool,
    pub skipped: bool,
    pub message: String,
    pub duration_ms: u64,
}

/// Result of a rollback run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackResult {
    pub rollback_id: Uuid,
    pub strategy: RollbackStrategy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<Uuid>,
    /// Number of entries considered.
    pub total_operations: usize,
    pub successful_operations: usize,
    pub failed_operations: usize,
    pub skipped_operations: usize,
    pub operation_results: Vec<RollbackOperationResult>,
    /// Manual steps for what could not be fixed automatically.
    pub recovery_instructions: Vec<String>,
    pub warnings: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub rollback_time_ms: u64,
}

impl RollbackResult {
    fn new(strategy: RollbackStrategy, transaction_id: Option<Uuid>) -> Self {
        Self {
            rollback_id: Uuid::new_v4(),
            strategy,
            transaction_id,
            total_operations: 0,
            successful_operations: 0,
            failed_operations: 0,
            skipped_operations: 0,
            operation_results: Vec::new(),
            recovery_instructions: Vec::new(),
            warnings: Vec::new(),
            started_at: Utc::now(),
            rollback_time_ms: 0,
        }
    }

    /// Check if rollback was successful.
    pub fn is_success(&self) -> bool {
        self.failed_operations == 0
    }

    pub fn needs_recovery(&self) -> bool {
        !self.recovery_instructions.is_empty()
    }

    /// Print summary.
    pub fn print_summary(&self) {
        println!("{}", "[SUMMARY] Rollback".bold().green());
        println!("  {} {}", "Strategy:".bold(), self.strategy);
        println!("  {} {}", "Successful:".bold(), self.successful_operations);
        println!("  {} {}", "Skipped:".bold(), self.skipped_operations);
        println!("  {} {}", "Failed:".bold(), self.failed_operations);

        if !self.warnings.is_empty() {
            println!();
            println!("{}", "[WARNING] Warnings:".bold().yellow());
            for warning in &self.warnings {
                println!("  - {}", warning);
            }
        }

        if !self.recovery_instructions.is_empty() {
            println!();
            println!("{}", "[ERROR] Manual recovery needed:".bold().red());
            for step in &self.recovery_instructions {
                println!("  - {}", step);
            }
        }
    }
}

/// What an inverter did.
enum Inversion {
    Done(String),
    Skipped(String),
}

/// Rollback engine.
pub struct RollbackEngine {
    /// Whether to verify checksums before moving files back.
    verify_checksum: bool,
    notifier: Option<SharedNotifier>,
}

impl RollbackEngine {
    /// Create a new rollback engine.
    pub fn new() -> Self {
        Self {
            verify_checksum: true,
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Option<SharedNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_checksum_verification(mut self, verify: bool) -> Self {
        self.verify_checksum = verify;
        self
    }

    /// Same rule as [`JournalEntry::can_rollback`], plus an inverter must exist.
    pub fn can_rollback_entry(&self, entry: &JournalEntry) -> bool {
        entry.can_rollback() && entry.operation_details.is_some() && Self::has_inverter(entry.entry_type)
    }

    fn has_inverter(entry_type: JournalEntryType) -> bool {
        !matches!(
            entry_type,
            JournalEntryType::BatchOperation | JournalEntryType::RollbackOperation
        )
    }

    /// Roll back the completed entries of a transaction, newest first.
    ///
    /// Entries that were inverted are marked rolled back. Unless this is a dry
    /// run, the transaction ends `RolledBack` when nothing failed and
    /// `Failed` otherwise.
    pub fn rollback_transaction(
        &self,
        txn: &mut Transaction,
        reason: &str,
        strategy: RollbackStrategy,
    ) -> RollbackResult {
        let transaction_id = txn.transaction_id;
        let entries: Vec<&mut JournalEntry> = txn
            .entries
            .iter_mut()
            .rev()
            .filter(|e| e.status == crate::models::journal::JournalEntryStatus::Completed)
            .collect();

        let result = self.run(entries, strategy, Some(transaction_id));

        if strategy != RollbackStrategy::DryRun {
            txn.rollback_reason = Some(reason.to_string());
            txn.update_statistics();
            txn.finish(if result.is_success() {
                TransactionStatus::RolledBack
            } else {
                TransactionStatus::Failed
            });
        }
        result
    }

    /// Roll back a single entry.
    pub fn rollback_entry(&self, entry: &mut JournalEntry, strategy: RollbackStrategy) -> RollbackResult {
        let transaction_id = entry.transaction_id;
        self.run(vec![entry], strategy, transaction_id)
    }

    fn run(
        &self,
        entries: Vec<&mut JournalEntry>,
        strategy: RollbackStrategy,
        transaction_id: Option<Uuid>,
    ) -> RollbackResult {
        let started = Instant::now();
        let mut result = RollbackResult::new(strategy, transaction_id);
        result.total_operations = entries.len();

        emit(
            &self.notifier,
            Notification::RollbackStarted {
                rollback_id: result.rollback_id,
                target_transaction_id: transaction_id,
                target_entry_ids: entries.iter().map(|e| e.entry_id).collect(),
                strategy: strategy.to_string(),
                total_operations: entries.len(),
            },
        );

        let total = entries.len();
        for (position, entry) in entries.into_iter().enumerate() {
            let op_started = Instant::now();
            let description = entry.describe();

            let outcome = if !self.can_rollback_entry(entry) {
                Ok(Inversion::Skipped("entry is not rollbackable".to_string()))
            } else if strategy == RollbackStrategy::DryRun {
                for conflict in self.conflicts_for(entry) {
                    result.warnings.push(conflict);
                }
                Ok(Inversion::Done("would be rolled back".to_string()))
            } else {
                self.invert(entry, strategy, &mut result.warnings)
            };

            let (success, skipped, message) = match outcome {
                Ok(Inversion::Done(msg)) => {
                    if strategy != RollbackStrategy::DryRun {
                        entry.mark_rolled_back();
                    }
                    result.successful_operations += 1;
                    (true, false, msg)
                }
                Ok(Inversion::Skipped(msg)) => {
                    tracing::debug!("Rollback skipped {}: {}", description, msg);
                    result.skipped_operations += 1;
                    (false, true, msg)
                }
                Err(e) => {
                    tracing::error!("Rollback operation failed: {}: {}", description, e);
                    result.failed_operations += 1;
                    result
                        .recovery_instructions
                        .push(recovery_instruction(entry, &e));
                    (false, false, e.to_string())
                }
            };

            result.operation_results.push(RollbackOperationResult {
                entry_id: entry.entry_id,
                entry_type: entry.entry_type,
                description: description.clone(),
                success,
                skipped,
                message,
                duration_ms: op_started.elapsed().as_millis() as u64,
            });

            emit(
                &self.notifier,
                Notification::RollbackProgress {
                    rollback_id: result.rollback_id,
                    entry_id: entry.entry_id,
                    completed_count: position + 1,
                    total_count: total,
                    current_description: description,
                },
            );

            if !success && !skipped && strategy == RollbackStrategy::Conservative {
                tracing::warn!("Conservative rollback stopped after a failure");
                break;
            }
        }

        result.rollback_time_ms = started.elapsed().as_millis() as u64;
        emit(
            &self.notifier,
            Notification::RollbackCompleted {
                rollback_id: result.rollback_id,
                success: result.is_success(),
                total_operations: result.total_operations,
                successful_operations: result.successful_operations,
                failed_operations: result.failed_operations,
                skipped_operations: result.skipped_operations,
                rollback_time_ms: result.rollback_time_ms,
                recovery_instructions: result.recovery_instructions.clone(),
            },
        );
        result
    }

    /// Conflicts that would affect rolling back `entries`, for reporting.
    pub fn check_conflicts<'a, I>(&self, entries: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a JournalEntry>,
    {
        entries
            .into_iter()
            .filter(|e| self.can_rollback_entry(e))
            .flat_map(|e| self.conflicts_for(e))
            .collect()
    }

    fn conflicts_for(&self, entry: &JournalEntry) -> Vec<String> {
        let mut conflicts = Vec::new();
        let Some(d) = entry.operation_details.as_ref() else {
            return conflicts;
        };

        match entry.entry_type {
            JournalEntryType::FileMove | JournalEntryType::FileRename => {
                if let Some(dest) = &d.destination_path {
                    if !dest.exists() {
                        conflicts.push(format!("File not found at target: {}", dest.display()));
                    } else if self.modified_since(d, dest) {
                        conflicts.push(format!(
                            "File modified since execution: {}",
                            dest.display()
                        ));
                    }
                }
                if d.source_path.exists() {
                    conflicts.push(format!(
                        "Original location occupied: {}",
                        d.source_path.display()
                    ));
                }
            }
            JournalEntryType::FileDelete | JournalEntryType::DirectoryDelete => {
                if !d.backup_path.as_ref().map(|b| b.exists()).unwrap_or(false) {
                    conflicts.push(format!(
                        "No backup for deleted path: {}",
                        d.source_path.display()
                    ));
                }
            }
            JournalEntryType::DirectoryCreate => {
                if d.source_path.exists() && !is_dir_empty(&d.source_path) {
                    conflicts.push(format!(
                        "Directory not empty: {}",
                        d.source_path.display()
                    ));
                }
            }
            _ => {}
        }
        conflicts
    }

    fn modified_since(&self, d: &FileOperationDetails, path: &Path) -> bool {
        if !self.verify_checksum || !path.is_file() {
            return false;
        }
        match (&d.file_hash, hash::sha256_file(path)) {
            (Some(expected), Ok(current)) => &current != expected,
            _ => false,
        }
    }

    fn invert(
        &self,
        entry: &JournalEntry,
        strategy: RollbackStrategy,
        warnings: &mut Vec<String>,
    ) -> Result<Inversion> {
        let d = entry
            .operation_details
            .as_ref()
            .ok_or_else(|| Error::Rollback("entry has no operation details".to_string()))?;

        match entry.entry_type {
            JournalEntryType::FileMove | JournalEntryType::FileRename => {
                self.invert_move(d, strategy, warnings)
            }
            JournalEntryType::FileCopy => self.invert_copy(d, strategy, warnings),
            JournalEntryType::FileDelete | JournalEntryType::DirectoryDelete => {
                invert_delete(d, strategy, warnings)
            }
            JournalEntryType::DirectoryCreate => invert_directory_create(d, strategy, warnings),
            other => Err(Error::Rollback(format!("no inverter for {}", other))),
        }
    }

    fn invert_move(
        &self,
        d: &FileOperationDetails,
        strategy: RollbackStrategy,
        warnings: &mut Vec<String>,
    ) -> Result<Inversion> {
        let source = &d.source_path;
        let dest = d
            .destination_path
            .as_ref()
            .ok_or_else(|| Error::Rollback("move entry missing destination".to_string()))?;

        if !dest.exists() {
            return Err(Error::Rollback(format!(
                "moved file no longer at {}",
                dest.display()
            )));
        }

        if self.modified_since(d, dest) {
            let msg = format!("{} was modified since the move", dest.display());
            if strategy == RollbackStrategy::Conservative {
                return Err(Error::Rollback(msg));
            }
            warnings.push(msg);
        }

        if source.exists() {
            clear_occupant(source, strategy, warnings)?;
        }

        ensure_parent(source)?;
        move_path(dest, source)?;
        tracing::debug!("Moved back: {:?} -> {:?}", dest, source);

        for (from, to) in companions(d) {
            if to.exists() && !from.exists() {
                move_path(&to, &from)?;
            }
        }

        if let Some(backup) = d.backup_path.as_ref().filter(|b| b.exists()) {
            move_path(backup, dest)?;
            tracing::debug!("Restored displaced file: {:?}", dest);
        }
        remove_created_dirs(&created_dirs(d));

        Ok(Inversion::Done(format!("moved back to {}", source.display())))
    }

    fn invert_copy(
        &self,
        d: &FileOperationDetails,
        strategy: RollbackStrategy,
        warnings: &mut Vec<String>,
    ) -> Result<Inversion> {
        let dest = d
            .destination_path
            .as_ref()
            .ok_or_else(|| Error::Rollback("copy entry missing destination".to_string()))?;

        for (_, to) in companions(d) {
            if to.exists() {
                remove_path(&to)?;
            }
        }

        if !dest.exists() {
            if let Some(backup) = d.backup_path.as_ref().filter(|b| b.exists()) {
                move_path(backup, dest)?;
            }
            return Ok(Inversion::Skipped(format!(
                "copy already removed: {}",
                dest.display()
            )));
        }

        if self.modified_since(d, dest) {
            let msg = format!("{} was modified since the copy", dest.display());
            if strategy == RollbackStrategy::Conservative {
                return Err(Error::Rollback(msg));
            }
            warnings.push(msg);
        }

        remove_path(dest)?;
        tracing::debug!("Deleted copy: {:?}", dest);

        if let Some(backup) = d.backup_path.as_ref().filter(|b| b.exists()) {
            move_path(backup, dest)?;
        }
        remove_created_dirs(&created_dirs(d));
        Ok(Inversion::Done(format!("removed copy {}", dest.display())))
    }
}

impl Default for RollbackEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn invert_delete(
    d: &FileOperationDetails,
    strategy: RollbackStrategy,
    warnings: &mut Vec<String>,
) -> Result<Inversion> {
    let source = &d.source_path;
    let Some(backup) = d.backup_path.as_ref().filter(|b| b.exists()) else {
        return Err(Error::Rollback(format!(
            "{} was deleted without a backup and cannot be auto-fixed",
            source.display()
        )));
    };

    if source.exists() {
        clear_occupant(source, strategy, warnings)?;
    }
    ensure_parent(source)?;
    move_path(backup, source)?;
    tracing::debug!("Restored deleted path: {:?}", source);
    Ok(Inversion::Done(format!("restored {}", source.display())))
}

fn invert_directory_create(
    d: &FileOperationDetails,
    strategy: RollbackStrategy,
    warnings: &mut Vec<String>,
) -> Result<Inversion> {
    let path = &d.source_path;
    if !path.exists() {
        return Ok(Inversion::Skipped(format!(
            "directory already removed: {}",
            path.display()
        )));
    }

    if !is_dir_empty(path) {
        if strategy == RollbackStrategy::Conservative {
            return Err(Error::Rollback(format!(
                "directory not empty: {}",
                path.display()
            )));
        }
        warnings.push(format!("Removed non-empty directory {}", path.display()));
        fs::remove_dir_all(path)?;
    } else {
        fs::remove_dir(path)?;
    }
    tracing::debug!("Removed directory: {:?}", path);
    Ok(Inversion::Done(format!("removed {}", path.display())))
}

/// Make room at `path`. Conservative refuses; aggressive parks the occupant.
fn clear_occupant(path: &Path, strategy: RollbackStrategy, warnings: &mut Vec<String>) -> Result<()> {
    if strategy == RollbackStrategy::Conservative {
        return Err(Error::Rollback(format!(
            "original location occupied: {}",
            path.display()
        )));
    }
    let parked = backup_path_for(path).with_extension("rollback_conflict");
    move_path(path, &parked)?;
    warnings.push(format!(
        "Moved occupant of {} to {}",
        path.display(),
        parked.display()
    ));
    Ok(())
}

/// Subtitle companions recorded as `[[from, to], ...]` in the details metadata.
fn companions(d: &FileOperationDetails) -> Vec<(PathBuf, PathBuf)> {
    d.metadata
        .get("companions")
        .and_then(|v| serde_json::from_value::<Vec<(PathBuf, PathBuf)>>(v.clone()).ok())
        .unwrap_or_default()
}

fn created_dirs(d: &FileOperationDetails) -> Vec<PathBuf> {
    d.metadata
        .get("created_dirs")
        .and_then(|v| serde_json::from_value::<Vec<PathBuf>>(v.clone()).ok())
        .unwrap_or_default()
}

fn recovery_instruction(entry: &JournalEntry, err: &Error) -> String {
    format!(
        "{} (entry {}): {}. Restore manually.",
        entry.describe(),
        entry.entry_id,
        err
    )
}
