//! Media Guard CLI
//!
//! Operator tool for the media_guard safety layer: inspect the journal,
//! roll back interrupted work, clean the staging area and dry-run preflight.

use clap::Parser;
use media_guard::cli::{
    args::{Cli, Commands, JournalAction, StagingAction},
    commands::{check, journal, staging},
};
use media_guard::models::config::{self, Config};

fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => config::load_config(),
    };

    match cli.command {
        Commands::Journal { action } => match action {
            JournalAction::List => journal::list(&config)?,
            JournalAction::Show { transaction_id } => journal::show(&config, transaction_id)?,
            JournalAction::Pending => journal::pending(&config)?,
            JournalAction::Rollback {
                transaction_id,
                strategy,
                dry_run,
            } => journal::rollback(&config, transaction_id, &strategy, dry_run)?,
            JournalAction::RollbackEntry { entry_id, strategy } => {
                journal::rollback_entry(&config, entry_id, &strategy)?
            }
            JournalAction::Cleanup { force } => journal::cleanup(&config, force)?,
            JournalAction::Archive => journal::archive(&config)?,
            JournalAction::Stats => journal::stats(&config)?,
        },

        Commands::Staging { action } => match action {
            StagingAction::Summary => staging::summary(&config)?,
            StagingAction::Cleanup { max_age_hours } => staging::cleanup(&config, max_age_hours)?,
        },

        Commands::Check {
            source,
            destination,
        } => {
            if !check::check(&source, destination.as_deref())? {
                anyhow::bail!("Preflight checks failed. Fix the issues above and try again.");
            }
        }
    }

    Ok(())
}

/// Initialize the logging system.
fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("media_guard=debug")
    } else {
        EnvFilter::new("media_guard=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}
