//! Transaction data model.
//!
//! A transaction groups the journal entries of one logical multi-step
//! operation. Rollback of the filesystem is done by the rollback engine;
//! this type only keeps the bookkeeping.

use crate::models::journal::{JournalEntry, JournalEntryStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Active,
    Committed,
    RolledBack,
    Failed,
    Aborted,
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransactionStatus::Active => "active",
            TransactionStatus::Committed => "committed",
            TransactionStatus::RolledBack => "rolled_back",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// What `Transaction::commit` decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitDecision {
    /// Every entry succeeded.
    Committed,
    /// Some entries failed but the transaction tolerates errors.
    CommittedWithFailures,
    /// Some entries failed and the transaction must be rolled back.
    RollbackRequired,
    /// Some entries failed and no rollback was requested.
    Failed,
}

/// An ordered set of journal entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_transaction_id: Option<Uuid>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub entries: Vec<JournalEntry>,
    pub success: bool,
    pub total_entries: usize,
    pub successful_entries: usize,
    pub failed_entries: usize,
    /// Roll back automatically when a commit finds failed entries.
    pub auto_rollback_on_failure: bool,
    /// Accept partial success at commit time.
    pub continue_on_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_reason: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl Transaction {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            transaction_id: Uuid::new_v4(),
            parent_transaction_id: None,
            name: name.into(),
            description: description.into(),
            status: TransactionStatus::Active,
            created_at: Utc::now(),
            completed_at: None,
            entries: Vec::new(),
            success: false,
            total_entries: 0,
            successful_entries: 0,
            failed_entries: 0,
            auto_rollback_on_failure: true,
            continue_on_error: false,
            rollback_reason: None,
            metadata: BTreeMap::new(),
            tags: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == TransactionStatus::Active
    }

    /// Attach an entry. Entries can only join an active transaction.
    pub fn add_entry(&mut self, mut entry: JournalEntry) -> bool {
        if !self.is_active() {
            return false;
        }
        entry.transaction_id = Some(self.transaction_id);
        self.entries.push(entry);
        self.update_statistics();
        true
    }

    pub fn entry(&self, entry_id: Uuid) -> Option<&JournalEntry> {
        self.entries.iter().find(|e| e.entry_id == entry_id)
    }

    pub fn entry_mut(&mut self, entry_id: Uuid) -> Option<&mut JournalEntry> {
        self.entries.iter_mut().find(|e| e.entry_id == entry_id)
    }

    /// Recompute counters from the entries.
    ///
    /// Skipped entries count neither way; anything else that is not a
    /// successful completion counts as failed.
    pub fn update_statistics(&mut self) {
        self.total_entries = self.entries.len();
        self.successful_entries = self
            .entries
            .iter()
            .filter(|e| e.status == JournalEntryStatus::Completed && e.success)
            .count();
        let skipped = self
            .entries
            .iter()
            .filter(|e| e.status == JournalEntryStatus::Skipped)
            .count();
        self.failed_entries = self.total_entries - self.successful_entries - skipped;
        self.success = self.failed_entries == 0;
    }

    /// Decide the commit outcome and move to the matching status.
    ///
    /// `RollbackRequired` leaves the transaction active; the caller performs
    /// the rollback and sets the final status.
    pub fn commit(&mut self) -> CommitDecision {
        self.update_statistics();

        if self.success {
            self.finish(TransactionStatus::Committed);
            CommitDecision::Committed
        } else if self.continue_on_error {
            self.finish(TransactionStatus::Committed);
            CommitDecision::CommittedWithFailures
        } else if self.auto_rollback_on_failure {
            CommitDecision::RollbackRequired
        } else {
            self.finish(TransactionStatus::Failed);
            CommitDecision::Failed
        }
    }

    pub fn abort(&mut self, reason: impl Into<String>) {
        self.rollback_reason = Some(reason.into());
        self.finish(TransactionStatus::Aborted);
    }

    pub fn finish(&mut self, status: TransactionStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
    }

    /// Completed entries eligible for rollback, newest first.
    ///
    /// Entries are appended in the order they were created, so reverse
    /// insertion order is reverse chronological order.
    pub fn rollbackable_entries(&self) -> Vec<&JournalEntry> {
        self.entries.iter().rev().filter(|e| e.can_rollback()).collect()
    }

    pub fn failed(&self) -> Vec<&JournalEntry> {
        self.entries
            .iter()
            .filter(|e| e.status == JournalEntryStatus::Failed)
            .collect()
    }
}
