//! Durable operation journal.
//!
//! Every attempted file operation is recorded as a [`JournalEntry`], grouped
//! into [`Transaction`]s. Two on-disk formats are supported:
//!
//! - JSONL (default): `<journal>/jsonl/journal_<timestamp>.jsonl`, one record
//!   per line, append-only. A status change re-appends the record; the last
//!   line for an id wins on reload. Files rotate after
//!   `jsonl_max_entries_per_file` lines.
//! - Legacy snapshot: `<journal>/journal.json`, rewritten on every change with
//!   the previous version kept as `journal.backup.json`.
//!
//! On reload, entries that never finished are reported through
//! [`JournalManager::pending_recovery`] and left for the operator to decide.

use crate::core::notify::{emit, SharedNotifier};
use crate::core::rollback::{RollbackEngine, RollbackResult, RollbackStrategy};
use crate::models::config::JournalConfig;
use crate::models::journal::{
    FileOperationDetails, JournalEntry, JournalEntryStatus, JournalEntryType,
};
use crate::models::notification::Notification;
use crate::models::transaction::{CommitDecision, Transaction, TransactionStatus};
use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use uuid::Uuid;

const JOURNAL_VERSION: &str = "1.0";
const JSONL_DIR: &str = "jsonl";
const ARCHIVE_DIR: &str = "archive";
const SNAPSHOT_FILE: &str = "journal.json";
const SNAPSHOT_BACKUP_FILE: &str = "journal.backup.json";

/// One line of a JSONL journal file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
enum JournalRecord {
    Entry(JournalEntry),
    Transaction(Transaction),
    /// Entries dropped by `cleanup_old_entries`, plus transactions left empty.
    Evicted {
        entry_ids: Vec<Uuid>,
        #[serde(default)]
        transaction_ids: Vec<Uuid>,
    },
}

/// Full-state document of the legacy format.
#[derive(Debug, Serialize, Deserialize)]
struct JournalSnapshot {
    version: String,
    created_at: DateTime<Utc>,
    config: JournalConfig,
    transactions: Vec<Transaction>,
    standalone_entries: Vec<JournalEntry>,
    statistics: JournalStatistics,
}

/// Counters over the in-memory journal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JournalStatistics {
    pub total_transactions: usize,
    pub transactions_by_status: BTreeMap<String, usize>,
    pub total_entries: usize,
    pub entries_by_status: BTreeMap<String, usize>,
    pub standalone_entries: usize,
    pub journal_files: usize,
    pub journal_size_bytes: u64,
    /// True when the journal directory exceeds `max_journal_size_mb`.
    pub over_size_limit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_transaction: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_save: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_cleanup: Option<DateTime<Utc>>,
}

/// What a reload found.
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub transactions: usize,
    pub entries: usize,
    /// Entries left pending or in progress by a previous process.
    pub unfinished_entries: Vec<Uuid>,
    /// Lines that could not be parsed (typically a torn final write).
    pub corrupt_lines: usize,
}

/// Result of committing a transaction.
#[derive(Debug, Clone)]
pub enum CommitOutcome {
    /// Every entry succeeded.
    Committed { successful_entries: usize },
    /// Committed under `continue_on_error` despite failed entries.
    CommittedWithFailures { failed_entries: Vec<Uuid> },
    /// Failed entries triggered an automatic rollback instead of a commit.
    RolledBack(RollbackResult),
    /// Failed entries and no automatic rollback; the transaction is failed.
    Failed { failed_entries: Vec<Uuid> },
}

impl CommitOutcome {
    /// True only when the transaction ended committed.
    pub fn is_committed(&self) -> bool {
        matches!(
            self,
            CommitOutcome::Committed { .. } | CommitOutcome::CommittedWithFailures { .. }
        )
    }
}

/// Final state of an entry after its operation ran.
#[derive(Debug, Clone, Default)]
pub struct EntryCompletion {
    pub success: bool,
    pub error_message: Option<String>,
    /// Replaces the recorded details (backup paths and hashes are known only afterwards).
    pub operation_details: Option<FileOperationDetails>,
    pub rollback_data: BTreeMap<String, Value>,
}

enum WriteJob {
    Append { path: PathBuf, line: String },
    Flush(mpsc::Sender<()>),
}

/// Dedicated thread that appends journal lines.
struct AsyncWriter {
    sender: Mutex<Option<mpsc::Sender<WriteJob>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AsyncWriter {
    fn spawn() -> Result<Self> {
        let (tx, rx) = mpsc::channel::<WriteJob>();
        let worker = thread::Builder::new()
            .name("journal-writer".to_string())
            .spawn(move || {
                for job in rx {
                    match job {
                        WriteJob::Append { path, line } => {
                            if let Err(e) = append_line(&path, &line) {
                                tracing::error!("Journal write to {:?} failed: {}", path, e);
                            }
                        }
                        WriteJob::Flush(ack) => {
                            let _ = ack.send(());
                        }
                    }
                }
            })?;

        Ok(Self {
            sender: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        })
    }

    fn send(&self, job: WriteJob) -> Result<()> {
        let guard = self
            .sender
            .lock()
            .map_err(|_| Error::JournalIo("writer lock poisoned".to_string()))?;
        match guard.as_ref() {
            Some(tx) => tx
                .send(job)
                .map_err(|_| Error::JournalIo("journal writer stopped".to_string())),
            None => Err(Error::JournalIo("journal writer stopped".to_string())),
        }
    }

    fn flush(&self) {
        let (ack_tx, ack_rx) = mpsc::channel();
        if self.send(WriteJob::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }
    }

    fn shutdown(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        if let Some(worker) = self.worker.lock().ok().and_then(|mut w| w.take()) {
            let _ = worker.join();
        }
    }
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())?;
    file.write_all(b"\n")
}

#[derive(Default)]
struct JournalState {
    transactions: HashMap<Uuid, Transaction>,
    transaction_order: Vec<Uuid>,
    standalone: HashMap<Uuid, JournalEntry>,
    standalone_order: Vec<Uuid>,
    /// entry id -> owning transaction (None for standalone entries)
    entry_index: HashMap<Uuid, Option<Uuid>>,
    current_transaction: Option<Uuid>,
    current_file: Option<PathBuf>,
    lines_in_file: usize,
    unfinished: Vec<Uuid>,
    last_save: Option<DateTime<Utc>>,
    last_cleanup: Option<DateTime<Utc>>,
}

impl JournalState {
    fn entry(&self, entry_id: Uuid) -> Option<&JournalEntry> {
        match self.entry_index.get(&entry_id)? {
            Some(txn_id) => self.transactions.get(txn_id)?.entry(entry_id),
            None => self.standalone.get(&entry_id),
        }
    }

    fn entry_mut(&mut self, entry_id: Uuid) -> Option<&mut JournalEntry> {
        match *self.entry_index.get(&entry_id)? {
            Some(txn_id) => self.transactions.get_mut(&txn_id)?.entry_mut(entry_id),
            None => self.standalone.get_mut(&entry_id),
        }
    }

    fn all_entries(&self) -> impl Iterator<Item = &JournalEntry> {
        self.transaction_order
            .iter()
            .filter_map(|id| self.transactions.get(id))
            .flat_map(|t| t.entries.iter())
            .chain(
                self.standalone_order
                    .iter()
                    .filter_map(|id| self.standalone.get(id)),
            )
    }

    fn insert_standalone(&mut self, entry: JournalEntry) {
        let id = entry.entry_id;
        if self.standalone.insert(id, entry).is_none() {
            self.standalone_order.push(id);
        }
        self.entry_index.insert(id, None);
    }

    /// Fold one persisted record into the state. Later records win.
    fn apply(&mut self, record: JournalRecord) {
        match record {
            JournalRecord::Transaction(mut txn) => {
                let id = txn.transaction_id;
                if let Some(previous) = self.transactions.remove(&id) {
                    for entry in previous.entries {
                        if txn.entry(entry.entry_id).is_none() {
                            txn.entries.push(entry);
                        }
                    }
                } else {
                    self.transaction_order.push(id);
                }
                for entry in &txn.entries {
                    if self.standalone.remove(&entry.entry_id).is_some() {
                        self.standalone_order.retain(|e| *e != entry.entry_id);
                    }
                    self.entry_index.insert(entry.entry_id, Some(id));
                }
                self.transactions.insert(id, txn);
            }
            JournalRecord::Entry(entry) => {
                let owner = match entry.transaction_id {
                    Some(t) => self.transactions.get_mut(&t),
                    None => None,
                };
                match owner {
                    Some(txn) => {
                        let id = entry.entry_id;
                        match txn.entry_mut(id) {
                            Some(slot) => *slot = entry,
                            None => txn.entries.push(entry),
                        }
                        self.entry_index.insert(id, Some(txn.transaction_id));
                    }
                    None => self.insert_standalone(entry),
                }
            }
            JournalRecord::Evicted { entry_ids, transaction_ids } => {
                self.evict(&entry_ids, &transaction_ids);
            }
        }
    }

    fn evict(&mut self, entry_ids: &[Uuid], transaction_ids: &[Uuid]) {
        for id in entry_ids {
            match self.entry_index.remove(id) {
                Some(Some(txn_id)) => {
                    if let Some(txn) = self.transactions.get_mut(&txn_id) {
                        txn.entries.retain(|e| e.entry_id != *id);
                    }
                }
                Some(None) => {
                    self.standalone.remove(id);
                }
                None => {}
            }
        }
        let standalone = &self.standalone;
        self.standalone_order.retain(|id| standalone.contains_key(id));
        for id in transaction_ids {
            self.transactions.remove(id);
        }
        self.transaction_order.retain(|id| !transaction_ids.contains(id));
    }
}

/// Journal of transactions and entries with durable persistence.
pub struct JournalManager {
    config: JournalConfig,
    state: Mutex<JournalState>,
    writer: Option<AsyncWriter>,
    notifier: Option<SharedNotifier>,
}

impl JournalManager {
    /// Open (or create) the journal at `config.journal_directory` and reload it.
    pub fn new(config: JournalConfig) -> Result<Self> {
        fs::create_dir_all(&config.journal_directory)?;
        if config.use_jsonl_format {
            fs::create_dir_all(config.journal_directory.join(JSONL_DIR))?;
        }

        let writer = if config.async_processing {
            Some(AsyncWriter::spawn()?)
        } else {
            None
        };

        let manager = Self {
            config,
            state: Mutex::new(JournalState::default()),
            writer,
            notifier: None,
        };

        let report = manager.load_journal()?;
        if !report.unfinished_entries.is_empty() {
            tracing::warn!(
                "Journal has {} unfinished entries from a previous run; review them before rolling back",
                report.unfinished_entries.len()
            );
        }
        Ok(manager)
    }

    /// Attach a notification sink.
    pub fn with_notifier(mut self, notifier: SharedNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn config(&self) -> &JournalConfig {
        &self.config
    }

    pub fn jsonl_directory(&self) -> PathBuf {
        self.config.journal_directory.join(JSONL_DIR)
    }

    fn engine(&self) -> RollbackEngine {
        RollbackEngine::new().with_notifier(self.notifier.clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, JournalState>> {
        self.state
            .lock()
            .map_err(|_| Error::JournalIo("journal lock poisoned".to_string()))
    }

    fn publish(&self, events: Vec<Notification>) {
        for event in events {
            emit(&self.notifier, event);
        }
    }

    // ========== PERSISTENCE ==========

    fn persist(&self, state: &mut JournalState, records: Vec<JournalRecord>) -> Result<()> {
        if !self.config.use_jsonl_format {
            return self.write_snapshot(state);
        }

        for record in records {
            let line = serde_json::to_string(&record)?;
            let path = self.target_file(state)?;
            state.lines_in_file += 1;

            match &self.writer {
                Some(writer) => writer.send(WriteJob::Append { path, line })?,
                None => append_line(&path, &line).map_err(|e| {
                    Error::JournalIo(format!("append to {} failed: {}", path.display(), e))
                })?,
            }
        }
        state.last_save = Some(Utc::now());
        Ok(())
    }

    /// Current JSONL file, rotating when it is full.
    fn target_file(&self, state: &mut JournalState) -> Result<PathBuf> {
        let max = self.config.jsonl_max_entries_per_file.max(1);
        if let Some(current) = &state.current_file {
            if state.lines_in_file < max {
                return Ok(current.clone());
            }
        }

        let dir = self.jsonl_directory();
        let stamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let mut path = dir.join(format!("journal_{}.jsonl", stamp));
        let mut counter = 1;
        while path.exists() {
            path = dir.join(format!("journal_{}_{:03}.jsonl", stamp, counter));
            counter += 1;
        }
        File::create(&path)
            .map_err(|e| Error::JournalIo(format!("create {} failed: {}", path.display(), e)))?;

        if state.current_file.is_some() {
            tracing::info!("Rotated journal to {:?}", path);
        }
        state.current_file = Some(path.clone());
        state.lines_in_file = 0;
        Ok(path)
    }

    fn write_snapshot(&self, state: &mut JournalState) -> Result<()> {
        let snapshot = JournalSnapshot {
            version: JOURNAL_VERSION.to_string(),
            created_at: Utc::now(),
            config: self.config.clone(),
            transactions: state
                .transaction_order
                .iter()
                .filter_map(|id| state.transactions.get(id).cloned())
                .collect(),
            standalone_entries: state
                .standalone_order
                .iter()
                .filter_map(|id| state.standalone.get(id).cloned())
                .collect(),
            statistics: self.compute_statistics(state),
        };

        let path = self.config.journal_directory.join(SNAPSHOT_FILE);
        let backup = self.config.journal_directory.join(SNAPSHOT_BACKUP_FILE);
        let json = serde_json::to_string_pretty(&snapshot)?;

        let write = || -> std::io::Result<()> {
            if path.exists() {
                fs::copy(&path, &backup)?;
            }
            let tmp = path.with_extension("json.tmp");
            fs::write(&tmp, json.as_bytes())?;
            fs::rename(&tmp, &path)
        };
        write().map_err(|e| Error::JournalIo(format!("save {} failed: {}", path.display(), e)))?;

        state.last_save = Some(Utc::now());
        tracing::debug!("Journal saved to {:?}", path);
        Ok(())
    }

    /// Write a full `journal.json` snapshot (both formats).
    pub fn save_journal(&self) -> Result<()> {
        let mut state = self.lock()?;
        self.write_snapshot(&mut state)
    }

    /// Block until queued asynchronous writes reach disk.
    pub fn flush(&self) {
        if let Some(writer) = &self.writer {
            writer.flush();
        }
    }

    /// Replace the in-memory state with what is on disk.
    pub fn load_journal(&self) -> Result<LoadReport> {
        let mut fresh = JournalState::default();
        let mut report = LoadReport::default();

        if self.config.use_jsonl_format {
            for path in self.journal_files()? {
                let file = File::open(&path)?;
                for line in BufReader::new(file).lines() {
                    let line = line?;
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<JournalRecord>(&line) {
                        Ok(record) => fresh.apply(record),
                        Err(e) => {
                            tracing::warn!("Skipping corrupt journal line in {:?}: {}", path, e);
                            report.corrupt_lines += 1;
                        }
                    }
                }
            }
        } else {
            let path = self.config.journal_directory.join(SNAPSHOT_FILE);
            let backup = self.config.journal_directory.join(SNAPSHOT_BACKUP_FILE);
            let snapshot = match read_snapshot(&path) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!("Journal snapshot unreadable ({}), trying backup", e);
                    read_snapshot(&backup).ok().flatten()
                }
            };
            if let Some(snapshot) = snapshot {
                for txn in snapshot.transactions {
                    fresh.apply(JournalRecord::Transaction(txn));
                }
                for entry in snapshot.standalone_entries {
                    fresh.apply(JournalRecord::Entry(entry));
                }
            }
        }

        report.transactions = fresh.transactions.len();
        report.entries = fresh.entry_index.len();
        report.unfinished_entries = fresh
            .all_entries()
            .filter(|e| !e.is_finished())
            .map(|e| e.entry_id)
            .collect();
        fresh.unfinished = report.unfinished_entries.clone();
        // Transactions still active belonged to a process that is gone.
        fresh.current_transaction = None;

        let mut state = self.lock()?;
        *state = fresh;
        drop(state);

        tracing::debug!(
            "Journal loaded: {} transactions, {} entries",
            report.transactions,
            report.entries
        );
        Ok(report)
    }

    /// JSONL files in replay order.
    pub fn journal_files(&self) -> Result<Vec<PathBuf>> {
        let dir = self.jsonl_directory();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut files: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.extension().map(|x| x == "jsonl").unwrap_or(false)
                    && p.file_name()
                        .and_then(|n| n.to_str())
                        .map(|n| n.starts_with("journal_"))
                        .unwrap_or(false)
            })
            .collect();
        files.sort();
        Ok(files)
    }

    // ========== TRANSACTIONS ==========

    /// Open a new active transaction and make it current.
    pub fn create_transaction(&self, name: &str, description: &str) -> Result<Uuid> {
        self.begin_transaction(Transaction::new(name, description))
    }

    /// Register a caller-built transaction (custom policies) and make it current.
    pub fn begin_transaction(&self, mut txn: Transaction) -> Result<Uuid> {
        txn.status = TransactionStatus::Active;
        let id = txn.transaction_id;
        let event = Notification::TransactionStarted {
            transaction_id: id,
            name: txn.name.clone(),
            description: txn.description.clone(),
            auto_rollback_on_failure: txn.auto_rollback_on_failure,
        };

        {
            let mut state = self.lock()?;
            for entry in &txn.entries {
                state.entry_index.insert(entry.entry_id, Some(id));
            }
            state.transactions.insert(id, txn.clone());
            state.transaction_order.push(id);
            state.current_transaction = Some(id);
            self.persist(&mut state, vec![JournalRecord::Transaction(txn)])?;
        }

        tracing::info!("Transaction {} started", id);
        self.publish(vec![event]);
        Ok(id)
    }

    pub fn current_transaction(&self) -> Option<Uuid> {
        self.state.lock().ok().and_then(|s| s.current_transaction)
    }

    /// Make an active transaction current. Returns false otherwise.
    pub fn set_current_transaction(&self, transaction_id: Option<Uuid>) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        match transaction_id {
            None => {
                state.current_transaction = None;
                true
            }
            Some(id) => match state.transactions.get(&id) {
                Some(txn) if txn.is_active() => {
                    state.current_transaction = Some(id);
                    true
                }
                _ => false,
            },
        }
    }

    /// Commit a transaction; failed entries may turn this into a rollback.
    pub fn commit_transaction(&self, transaction_id: Uuid) -> Result<CommitOutcome> {
        let (decision, snapshot) = {
            let mut state = self.lock()?;
            let txn = state
                .transactions
                .get_mut(&transaction_id)
                .ok_or(Error::TransactionNotFound(transaction_id))?;
            if !txn.is_active() {
                return Err(Error::TransactionNotActive(transaction_id));
            }
            let decision = txn.commit();
            let snapshot = txn.clone();

            if decision != CommitDecision::RollbackRequired {
                if state.current_transaction == Some(transaction_id) {
                    state.current_transaction = None;
                }
                self.persist(&mut state, vec![JournalRecord::Transaction(snapshot.clone())])?;
            }
            (decision, snapshot)
        };

        let failed_ids = || snapshot.failed().iter().map(|e| e.entry_id).collect::<Vec<_>>();
        let committed_event = || Notification::TransactionCommitted {
            transaction_id,
            name: snapshot.name.clone(),
            total_entries: snapshot.total_entries,
            successful_entries: snapshot.successful_entries,
            failed_entries: snapshot.failed_entries,
        };

        match decision {
            CommitDecision::Committed => {
                tracing::info!("Transaction {} committed", transaction_id);
                self.publish(vec![committed_event()]);
                Ok(CommitOutcome::Committed {
                    successful_entries: snapshot.successful_entries,
                })
            }
            CommitDecision::CommittedWithFailures => {
                tracing::warn!(
                    "Transaction {} committed with {} failed entries",
                    transaction_id,
                    snapshot.failed_entries
                );
                self.publish(vec![committed_event()]);
                Ok(CommitOutcome::CommittedWithFailures {
                    failed_entries: failed_ids(),
                })
            }
            CommitDecision::Failed => {
                tracing::error!("Transaction {} failed", transaction_id);
                Ok(CommitOutcome::Failed {
                    failed_entries: failed_ids(),
                })
            }
            CommitDecision::RollbackRequired => {
                tracing::warn!(
                    "Transaction {} has {} failed entries, rolling back",
                    transaction_id,
                    snapshot.failed_entries
                );
                let reason = format!(
                    "automatic rollback: {} of {} entries failed",
                    snapshot.failed_entries, snapshot.total_entries
                );
                let result = self.rollback_transaction(
                    transaction_id,
                    &reason,
                    RollbackStrategy::Conservative,
                )?;
                Ok(CommitOutcome::RolledBack(result))
            }
        }
    }

    /// Invert the completed entries of a transaction, newest first.
    pub fn rollback_transaction(
        &self,
        transaction_id: Uuid,
        reason: &str,
        strategy: RollbackStrategy,
    ) -> Result<RollbackResult> {
        let mut working = {
            let state = self.lock()?;
            state
                .transactions
                .get(&transaction_id)
                .cloned()
                .ok_or(Error::TransactionNotFound(transaction_id))?
        };

        tracing::info!(
            "Rolling back transaction {} ({}): {}",
            transaction_id,
            strategy,
            reason
        );
        let result = self.engine().rollback_transaction(&mut working, reason, strategy);

        if strategy == RollbackStrategy::DryRun {
            return Ok(result);
        }

        let event = Notification::TransactionRolledBack {
            transaction_id,
            name: working.name.clone(),
            reason: reason.to_string(),
            strategy: strategy.to_string(),
            successful_rollbacks: result.successful_operations,
            failed_rollbacks: result.failed_operations,
            rollback_time_ms: result.rollback_time_ms,
            recovery_instructions: result.recovery_instructions.clone(),
        };

        {
            let mut state = self.lock()?;
            if let Some(stored) = state.transactions.get(&transaction_id) {
                for entry in &stored.entries {
                    if working.entry(entry.entry_id).is_none() {
                        working.entries.push(entry.clone());
                    }
                }
            }
            let touched: Vec<JournalRecord> = result
                .operation_results
                .iter()
                .filter(|r| r.success)
                .filter_map(|r| working.entry(r.entry_id).cloned())
                .map(JournalRecord::Entry)
                .collect();

            state.transactions.insert(transaction_id, working.clone());
            if state.current_transaction == Some(transaction_id) {
                state.current_transaction = None;
            }

            let mut records = touched;
            records.push(JournalRecord::Transaction(working));
            self.persist(&mut state, records)?;
        }

        self.publish(vec![event]);
        Ok(result)
    }

    /// Invert one entry, wherever it lives.
    pub fn rollback_entry(&self, entry_id: Uuid, strategy: RollbackStrategy) -> Result<RollbackResult> {
        let mut entry = {
            let state = self.lock()?;
            state
                .entry(entry_id)
                .cloned()
                .ok_or(Error::EntryNotFound(entry_id))?
        };

        let result = self.engine().rollback_entry(&mut entry, strategy);

        if strategy != RollbackStrategy::DryRun && result.successful_operations > 0 {
            let mut state = self.lock()?;
            let owner = state.entry_index.get(&entry_id).copied().flatten();
            if let Some(slot) = state.entry_mut(entry_id) {
                *slot = entry.clone();
            }
            let mut records = vec![JournalRecord::Entry(entry)];
            if let Some(txn) = owner {
                if let Some(txn) = state.transactions.get_mut(&txn) {
                    txn.update_statistics();
                    records.push(JournalRecord::Transaction(txn.clone()));
                }
            }
            self.persist(&mut state, records)?;
        }
        Ok(result)
    }

    /// Roll back every committed transaction, most recently committed first.
    ///
    /// Under the conservative strategy the walk stops at the first
    /// transaction whose rollback failed.
    pub fn rollback_committed(&self, strategy: RollbackStrategy) -> Result<Vec<RollbackResult>> {
        let mut committed: Vec<(Uuid, DateTime<Utc>)> = {
            let state = self.lock()?;
            state
                .transactions
                .values()
                .filter(|t| t.status == TransactionStatus::Committed)
                .map(|t| (t.transaction_id, t.completed_at.unwrap_or(t.created_at)))
                .collect()
        };
        committed.sort_by(|a, b| b.1.cmp(&a.1));

        let mut results = Vec::with_capacity(committed.len());
        for (id, _) in committed {
            let result = self.rollback_transaction(id, "rollback of committed history", strategy)?;
            let failed = !result.is_success();
            results.push(result);
            if failed && strategy == RollbackStrategy::Conservative {
                break;
            }
        }
        Ok(results)
    }

    /// Close an active transaction without committing it.
    pub fn abort_transaction(&self, transaction_id: Uuid, reason: &str) -> Result<()> {
        let mut state = self.lock()?;
        let txn = state
            .transactions
            .get_mut(&transaction_id)
            .ok_or(Error::TransactionNotFound(transaction_id))?;
        if !txn.is_active() {
            return Err(Error::TransactionNotActive(transaction_id));
        }
        txn.abort(reason);
        let snapshot = txn.clone();
        if state.current_transaction == Some(transaction_id) {
            state.current_transaction = None;
        }
        tracing::warn!("Transaction {} aborted: {}", transaction_id, reason);
        self.persist(&mut state, vec![JournalRecord::Transaction(snapshot)])
    }

    // ========== ENTRIES ==========

    /// Attach an entry to the given transaction, or to the current one, and persist it.
    pub fn add_entry(&self, mut entry: JournalEntry, transaction_id: Option<Uuid>) -> Result<Uuid> {
        let entry_id = entry.entry_id;
        {
            let mut state = self.lock()?;
            let target = match transaction_id {
                Some(id) => {
                    let txn = state
                        .transactions
                        .get(&id)
                        .ok_or(Error::TransactionNotFound(id))?;
                    if !txn.is_active() {
                        return Err(Error::TransactionNotActive(id));
                    }
                    Some(id)
                }
                None => state
                    .current_transaction
                    .filter(|id| state.transactions.get(id).map(|t| t.is_active()).unwrap_or(false)),
            };

            entry.transaction_id = target;
            let owner = match target {
                Some(id) => state.transactions.get_mut(&id),
                None => None,
            };
            match owner {
                Some(txn) => {
                    txn.add_entry(entry.clone());
                    state.entry_index.insert(entry_id, target);
                }
                None => state.insert_standalone(entry.clone()),
            }
            self.persist(&mut state, vec![JournalRecord::Entry(entry.clone())])?;
        }

        let details = entry.operation_details.as_ref();
        self.publish(vec![Notification::JournalEntryCreated {
            entry_id,
            transaction_id: entry.transaction_id,
            command_id: entry.command_id,
            entry_type: entry.entry_type.to_string(),
            source_path: details.map(|d| d.source_path.clone()),
            destination_path: details.and_then(|d| d.destination_path.clone()),
        }]);
        Ok(entry_id)
    }

    /// Apply `update` to an entry, re-append it and notify.
    pub fn update_entry<F>(&self, entry_id: Uuid, update: F) -> Result<JournalEntry>
    where
        F: FnOnce(&mut JournalEntry),
    {
        let (old_status, updated) = {
            let mut state = self.lock()?;
            let owner = state.entry_index.get(&entry_id).copied().flatten();
            let entry = state
                .entry_mut(entry_id)
                .ok_or(Error::EntryNotFound(entry_id))?;
            let old_status = entry.status;
            update(entry);
            let updated = entry.clone();

            let mut records = vec![JournalRecord::Entry(updated.clone())];
            if let Some(txn) = owner {
                if let Some(txn) = state.transactions.get_mut(&txn) {
                    txn.update_statistics();
                    if !txn.is_active() {
                        records.push(JournalRecord::Transaction(txn.clone()));
                    }
                }
            }
            state.unfinished.retain(|id| *id != entry_id || !updated.is_finished());
            self.persist(&mut state, records)?;
            (old_status, updated)
        };

        self.publish(vec![Notification::JournalEntryUpdated {
            entry_id,
            transaction_id: updated.transaction_id,
            old_status: old_status.to_string(),
            new_status: updated.status.to_string(),
            success: updated.success,
            error_message: updated.error_message.clone(),
            execution_time_ms: updated.execution_time_ms,
        }]);
        Ok(updated)
    }

    /// Mark an entry as running.
    pub fn start_entry(&self, entry_id: Uuid) -> Result<()> {
        self.update_entry(entry_id, JournalEntry::start).map(|_| ())
    }

    /// Finalize an entry with the outcome of its operation.
    pub fn complete_entry(&self, entry_id: Uuid, completion: EntryCompletion) -> Result<()> {
        self.update_entry(entry_id, move |entry| {
            if let Some(details) = completion.operation_details {
                entry.operation_details = Some(details);
            }
            entry.rollback_data = completion.rollback_data;
            entry.complete(completion.success, completion.error_message);
        })
        .map(|_| ())
    }

    pub fn skip_entry(&self, entry_id: Uuid, reason: &str) -> Result<()> {
        self.update_entry(entry_id, |entry| entry.mark_skipped(reason))
            .map(|_| ())
    }

    // ========== QUERIES ==========

    pub fn get_entry(&self, entry_id: Uuid) -> Option<JournalEntry> {
        self.state.lock().ok()?.entry(entry_id).cloned()
    }

    pub fn get_transaction(&self, transaction_id: Uuid) -> Option<Transaction> {
        self.state
            .lock()
            .ok()?
            .transactions
            .get(&transaction_id)
            .cloned()
    }

    /// All transactions in creation order.
    pub fn transactions(&self) -> Vec<Transaction> {
        self.state
            .lock()
            .map(|s| {
                s.transaction_order
                    .iter()
                    .filter_map(|id| s.transactions.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn transactions_by_status(&self, status: TransactionStatus) -> Vec<Transaction> {
        self.transactions()
            .into_iter()
            .filter(|t| t.status == status)
            .collect()
    }

    /// Every entry, transactional ones first.
    pub fn entries(&self) -> Vec<JournalEntry> {
        self.state
            .lock()
            .map(|s| s.all_entries().cloned().collect())
            .unwrap_or_default()
    }

    pub fn entries_by_status(&self, status: JournalEntryStatus) -> Vec<JournalEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.status == status)
            .collect()
    }

    pub fn entries_by_type(&self, entry_type: JournalEntryType) -> Vec<JournalEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.entry_type == entry_type)
            .collect()
    }

    /// Entries created within the last `hours` hours.
    pub fn recent_entries(&self, hours: i64) -> Vec<JournalEntry> {
        let cutoff = Utc::now() - Duration::hours(hours);
        self.entries()
            .into_iter()
            .filter(|e| e.created_at >= cutoff)
            .collect()
    }

    /// Entries a previous process left pending or in progress and that are still unfinished.
    pub fn pending_recovery(&self) -> Vec<JournalEntry> {
        let Ok(state) = self.state.lock() else {
            return Vec::new();
        };
        state
            .unfinished
            .iter()
            .filter_map(|id| state.entry(*id))
            .filter(|e| !e.is_finished())
            .cloned()
            .collect()
    }

    pub fn statistics(&self) -> JournalStatistics {
        match self.state.lock() {
            Ok(state) => self.compute_statistics(&state),
            Err(_) => JournalStatistics::default(),
        }
    }

    fn compute_statistics(&self, state: &JournalState) -> JournalStatistics {
        let mut stats = JournalStatistics {
            total_transactions: state.transactions.len(),
            standalone_entries: state.standalone.len(),
            current_transaction: state.current_transaction,
            last_save: state.last_save,
            last_cleanup: state.last_cleanup,
            ..Default::default()
        };
        for txn in state.transactions.values() {
            *stats
                .transactions_by_status
                .entry(txn.status.to_string())
                .or_insert(0) += 1;
        }
        for entry in state.all_entries() {
            stats.total_entries += 1;
            *stats
                .entries_by_status
                .entry(entry.status.to_string())
                .or_insert(0) += 1;
        }
        if let Ok(files) = self.journal_files() {
            stats.journal_files = files.len();
            stats.journal_size_bytes = files
                .iter()
                .filter_map(|f| fs::metadata(f).ok())
                .map(|m| m.len())
                .sum();
        }
        stats.over_size_limit =
            stats.journal_size_bytes > self.config.max_journal_size_mb * 1024 * 1024;
        stats
    }

    // ========== MAINTENANCE ==========

    /// Evict old finished entries from the journal index.
    ///
    /// Successful entries go after `keep_successful_entries_days`, failed
    /// ones after `keep_failed_entries_days`. Active transactions are left
    /// alone. Entry lines already on disk stay where they are; an eviction
    /// record is appended so the next load skips them. Without `force`, runs
    /// only when `auto_cleanup` is enabled.
    pub fn cleanup_old_entries(&self, force: bool) -> Result<usize> {
        if !force && !self.config.auto_cleanup {
            return Ok(0);
        }
        let now = Utc::now();
        let success_cutoff = now - Duration::days(self.config.keep_successful_entries_days);
        let failed_cutoff = now - Duration::days(self.config.keep_failed_entries_days);
        let expired = |e: &JournalEntry| match e.status {
            JournalEntryStatus::Failed => e.reference_time() <= failed_cutoff,
            JournalEntryStatus::Pending | JournalEntryStatus::InProgress => false,
            _ => e.reference_time() <= success_cutoff,
        };

        let mut state = self.lock()?;
        let mut entry_ids: Vec<Uuid> = state
            .standalone
            .values()
            .filter(|e| expired(*e))
            .map(|e| e.entry_id)
            .collect();
        let mut transaction_ids = Vec::new();
        for txn in state.transactions.values().filter(|t| !t.is_active()) {
            let before = entry_ids.len();
            entry_ids.extend(txn.entries.iter().filter(|e| expired(*e)).map(|e| e.entry_id));
            if !txn.entries.is_empty() && entry_ids.len() - before == txn.entries.len() {
                transaction_ids.push(txn.transaction_id);
            }
        }

        state.evict(&entry_ids, &transaction_ids);
        state.last_cleanup = Some(now);
        if entry_ids.is_empty() && transaction_ids.is_empty() {
            return Ok(0);
        }

        let removed = entry_ids.len();
        self.persist(
            &mut state,
            vec![JournalRecord::Evicted { entry_ids, transaction_ids }],
        )?;
        tracing::info!("Evicted {} old journal entries", removed);
        Ok(removed)
    }

    /// Zip rotated JSONL files older than `archive_after_days` into `archive/`.
    ///
    /// The file currently being appended to is never archived. Returns the
    /// archive path, or `None` when nothing qualified.
    pub fn archive_old_journals(&self) -> Result<Option<PathBuf>> {
        use zip::write::SimpleFileOptions;
        use zip::ZipWriter;

        self.flush();
        let current = self.lock()?.current_file.clone();
        let cutoff = std::time::SystemTime::now()
            - std::time::Duration::from_secs(self.config.archive_after_days.max(0) as u64 * 86_400);

        let candidates: Vec<PathBuf> = self
            .journal_files()?
            .into_iter()
            .filter(|p| Some(p) != current.as_ref())
            .filter(|p| {
                fs::metadata(p)
                    .and_then(|m| m.modified())
                    .map(|t| t <= cutoff)
                    .unwrap_or(false)
            })
            .collect();
        if candidates.is_empty() {
            return Ok(None);
        }

        let archive_dir = self.config.journal_directory.join(ARCHIVE_DIR);
        fs::create_dir_all(&archive_dir)?;
        let archive_path = archive_dir.join(format!(
            "journal_archive_{}.zip",
            Utc::now().format("%Y%m%d_%H%M%S_%3f")
        ));

        let mut zip = ZipWriter::new(File::create(&archive_path)?);
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        for path in &candidates {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            zip.start_file(name, options)?;
            zip.write_all(&fs::read(path)?)?;
        }
        zip.finish()?;

        for path in &candidates {
            fs::remove_file(path)?;
        }
        tracing::info!(
            "Archived {} journal files into {:?}",
            candidates.len(),
            archive_path
        );
        Ok(Some(archive_path))
    }

    /// Stop the writer thread after draining queued writes.
    pub fn shutdown(&self) {
        if let Some(writer) = &self.writer {
            writer.shutdown();
        }
    }
}

impl Drop for JournalManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn read_snapshot(path: &Path) -> Result<Option<JournalSnapshot>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&content)?))
}
