//! Journal command implementation.
//!
//! Reads the operation journal left by earlier runs and rolls back
//! transactions or single entries from it.

use crate::core::journal::JournalManager;
use crate::core::notify::EventBus;
use crate::core::rollback::{RollbackResult, RollbackStrategy};
use crate::models::config::Config;
use crate::models::journal::{JournalEntry, JournalEntryStatus};
use crate::models::notification::Notification;
use crate::utils::fs::format_bytes;
use crate::Result;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use uuid::Uuid;

fn open(config: &Config) -> Result<JournalManager> {
    JournalManager::new(config.journal.clone())
}

/// Progress bar fed by rollback notifications.
fn rollback_progress(bus: &EventBus) -> ProgressBar {
    let pb = ProgressBar::new(0);
    if let Ok(style) =
        ProgressStyle::default_bar().template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        pb.set_style(style.progress_chars("█▓░"));
    }

    let handle = pb.clone();
    bus.subscribe(move |event| match event {
        Notification::RollbackStarted { total_operations, .. } => {
            handle.set_length(*total_operations as u64);
        }
        Notification::RollbackProgress {
            completed_count,
            current_description,
            ..
        } => {
            handle.set_position(*completed_count as u64);
            handle.set_message(current_description.clone());
        }
        _ => {}
    });
    pb
}

fn status_label(status: JournalEntryStatus) -> colored::ColoredString {
    let text = status.to_string();
    match status {
        JournalEntryStatus::Completed => text.green(),
        JournalEntryStatus::Failed => text.red(),
        JournalEntryStatus::RolledBack => text.cyan(),
        JournalEntryStatus::Pending | JournalEntryStatus::InProgress => text.yellow(),
        JournalEntryStatus::Skipped => text.dimmed(),
    }
}

fn print_entry(entry: &JournalEntry) {
    println!(
        "  {} {:<12} {}",
        entry.entry_id.to_string()[..8].dimmed(),
        status_label(entry.status),
        entry.describe()
    );
    if let Some(err) = &entry.error_message {
        println!("           {} {}", "->".red(), err);
    }
}

/// List all transactions, newest first.
pub fn list(config: &Config) -> Result<()> {
    println!("{}", "[JOURNAL] Transactions".bold().cyan());
    println!();

    let journal = open(config)?;
    let mut transactions = journal.transactions();
    if transactions.is_empty() {
        println!("No transactions found.");
        return Ok(());
    }
    transactions.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    println!(
        "{:<38} {:<14} {:<8} {:<20} {}",
        "Transaction ID".bold(),
        "Status".bold(),
        "Entries".bold(),
        "Created".bold(),
        "Name".bold()
    );
    println!("{}", "-".repeat(100));

    for txn in &transactions {
        println!(
            "{:<38} {:<14} {:<8} {:<20} {}",
            txn.transaction_id,
            txn.status.to_string(),
            txn.entries.len(),
            txn.created_at.format("%Y-%m-%d %H:%M:%S"),
            txn.name
        );
    }

    println!();
    println!("Journal directory: {}", config.journal.journal_directory.display());
    Ok(())
}

/// Show one transaction with its entries.
pub fn show(config: &Config, transaction_id: Uuid) -> Result<()> {
    let journal = open(config)?;
    let txn = journal
        .get_transaction(transaction_id)
        .ok_or(crate::Error::TransactionNotFound(transaction_id))?;

    println!("{} {}", "[JOURNAL] Transaction:".bold().cyan(), txn.name);
    println!();
    println!("  {} {}", "ID:".bold(), txn.transaction_id);
    println!("  {} {}", "Status:".bold(), txn.status);
    println!("  {} {}", "Description:".bold(), txn.description);
    println!("  {} {}", "Created:".bold(), txn.created_at);
    if let Some(done) = txn.completed_at {
        println!("  {} {}", "Completed:".bold(), done);
    }
    println!(
        "  {} {} total, {} succeeded, {} failed",
        "Entries:".bold(),
        txn.total_entries,
        txn.successful_entries,
        txn.failed_entries
    );
    if let Some(reason) = &txn.rollback_reason {
        println!("  {} {}", "Rollback reason:".bold(), reason);
    }
    println!();

    for entry in &txn.entries {
        print_entry(entry);
    }
    Ok(())
}

/// List entries a previous run never finished.
pub fn pending(config: &Config) -> Result<()> {
    let journal = open(config)?;
    let pending = journal.pending_recovery();

    if pending.is_empty() {
        println!("{}", "[OK] No unfinished operations".green());
        return Ok(());
    }

    println!(
        "{}",
        format!("[WARNING] {} unfinished operations", pending.len())
            .bold()
            .yellow()
    );
    println!();
    for entry in &pending {
        print_entry(entry);
        if let Some(txn) = entry.transaction_id {
            println!("           transaction {}", txn);
        }
    }
    println!();
    println!("{}", "[Next Steps]".bold().cyan());
    println!("  Inspect the paths above, then roll back with:");
    println!("     {}", "media-guard journal rollback-entry <ENTRY_ID>".bold());
    Ok(())
}

fn finish(result: &RollbackResult, dry_run: bool) {
    println!();
    result.print_summary();
    println!();
    if dry_run {
        for op in &result.operation_results {
            println!("  {} {}", "->".cyan(), op.message);
        }
        println!();
        println!("{}", "[OK] Dry run complete - no changes were made".green());
    } else if result.is_success() {
        println!("{}", "[OK] Rollback completed successfully!".green());
    } else {
        println!("{}", "[WARNING] Rollback completed with errors".yellow());
    }
}

/// Roll back a whole transaction.
pub fn rollback(config: &Config, transaction_id: Uuid, strategy: &str, dry_run: bool) -> Result<()> {
    let strategy = if dry_run {
        RollbackStrategy::DryRun
    } else {
        strategy.parse::<RollbackStrategy>()?
    };

    println!("{}", "[ROLLBACK] Transaction rollback".bold().cyan());
    println!();
    if !dry_run {
        println!(
            "{}",
            "[WARNING] This will reverse the transaction's completed operations!"
                .bold()
                .yellow()
        );
        println!();
    }

    let bus = Arc::new(EventBus::new());
    let pb = rollback_progress(&bus);
    let journal = open(config)?.with_notifier(bus.clone());
    let result = journal.rollback_transaction(transaction_id, "Operator requested rollback", strategy)?;
    pb.finish_with_message("Done!");

    finish(&result, dry_run);
    Ok(())
}

/// Roll back a single journal entry.
pub fn rollback_entry(config: &Config, entry_id: Uuid, strategy: &str) -> Result<()> {
    let strategy = strategy.parse::<RollbackStrategy>()?;

    println!("{} {}", "[ROLLBACK] Entry".bold().cyan(), entry_id);
    let journal = open(config)?;
    let entry = journal
        .get_entry(entry_id)
        .ok_or(crate::Error::EntryNotFound(entry_id))?;
    println!("  {}", entry.describe());

    let result = journal.rollback_entry(entry_id, strategy)?;
    finish(&result, strategy == RollbackStrategy::DryRun);
    Ok(())
}

/// Drop expired entries; the eviction is recorded in the journal itself.
pub fn cleanup(config: &Config, force: bool) -> Result<()> {
    let journal = open(config)?;
    let removed = journal.cleanup_old_entries(force)?;
    if removed == 0 {
        if !force && !config.journal.auto_cleanup {
            println!("[INFO] Auto cleanup is disabled; pass --force to clean anyway");
        } else {
            println!("{}", "[OK] Nothing to clean".green());
        }
        return Ok(());
    }

    journal.flush();
    println!("{}", format!("[OK] Removed {} expired entries", removed).green());
    Ok(())
}

/// Archive rotated journal files.
pub fn archive(config: &Config) -> Result<()> {
    let journal = open(config)?;
    match journal.archive_old_journals()? {
        Some(path) => println!("{} {}", "[OK] Archived to".green(), path.display()),
        None => println!(
            "[INFO] No journal files older than {} days",
            config.journal.archive_after_days
        ),
    }
    Ok(())
}

/// Print journal statistics.
pub fn stats(config: &Config) -> Result<()> {
    let journal = open(config)?;
    let stats = journal.statistics();

    println!("{}", "[JOURNAL] Statistics".bold().cyan());
    println!();
    println!("  {:<25} {}", "Transactions:".bold(), stats.total_transactions);
    for (status, count) in &stats.transactions_by_status {
        println!("    {:<23} {}", status, count);
    }
    println!("  {:<25} {}", "Entries:".bold(), stats.total_entries);
    for (status, count) in &stats.entries_by_status {
        println!("    {:<23} {}", status, count);
    }
    println!("  {:<25} {}", "Standalone entries:".bold(), stats.standalone_entries);
    println!("  {:<25} {}", "Journal files:".bold(), stats.journal_files);
    println!(
        "  {:<25} {}",
        "Size on disk:".bold(),
        format_bytes(stats.journal_size_bytes)
    );
    if stats.over_size_limit {
        println!(
            "{}",
            format!(
                "[WARNING] Journal exceeds {} MB; run `media-guard journal archive`",
                config.journal.max_journal_size_mb
            )
            .yellow()
        );
    }
    Ok(())
}
