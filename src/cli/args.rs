//! Command line argument definitions.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

/// Media Guard - inspect and recover journaled file operations
#[derive(Parser, Debug)]
#[command(name = "media-guard")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Use this config file instead of the default location
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Inspect and roll back the operation journal
    Journal {
        #[command(subcommand)]
        action: JournalAction,
    },

    /// Inspect and clean the staging area
    Staging {
        #[command(subcommand)]
        action: StagingAction,
    },

    /// Run preflight checks for an operation without touching anything
    Check {
        /// Source path
        #[arg(value_name = "SOURCE")]
        source: PathBuf,

        /// Destination path (omit for deletes)
        #[arg(value_name = "DESTINATION")]
        destination: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
pub enum JournalAction {
    /// List transactions, newest first
    List,

    /// Show the entries of one transaction
    Show {
        /// Transaction ID
        #[arg(value_name = "TRANSACTION_ID")]
        transaction_id: Uuid,
    },

    /// List entries left unfinished by a previous run
    Pending,

    /// Roll back a transaction
    Rollback {
        /// Transaction ID
        #[arg(value_name = "TRANSACTION_ID")]
        transaction_id: Uuid,

        /// conservative or aggressive
        #[arg(short, long, default_value = "conservative")]
        strategy: String,

        /// Dry run - show what would be done
        #[arg(long)]
        dry_run: bool,
    },

    /// Roll back a single entry
    RollbackEntry {
        /// Journal entry ID
        #[arg(value_name = "ENTRY_ID")]
        entry_id: Uuid,

        /// conservative or aggressive
        #[arg(short, long, default_value = "conservative")]
        strategy: String,
    },

    /// Drop expired entries from the journal
    Cleanup {
        /// Clean even when auto cleanup is disabled
        #[arg(long)]
        force: bool,
    },

    /// Zip rotated journal files older than the archive threshold
    Archive,

    /// Show journal statistics
    Stats,
}

#[derive(Subcommand, Debug)]
pub enum StagingAction {
    /// Show staged copies on disk
    Summary,

    /// Delete staged copies older than the configured age
    Cleanup {
        /// Override the maximum age in hours
        #[arg(long, value_name = "HOURS")]
        max_age_hours: Option<u64>,
    },
}
