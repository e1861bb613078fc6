//! Staging command implementation.
//!
//! Works on the staging directory on disk, so copies left by earlier runs
//! are visible and can be cleaned up.

use crate::core::staging::StagingManager;
use crate::models::config::Config;
use crate::utils::fs::format_bytes;
use crate::Result;
use chrono::{Duration, Utc};
use colored::Colorize;

/// Show the staged copies on disk.
pub fn summary(config: &Config) -> Result<()> {
    println!("{}", "[STAGING] Summary".bold().cyan());
    println!();

    let manager = StagingManager::new(config.staging.clone())?;
    let artifacts = manager.disk_entries()?;

    println!("  {:<25} {}", "Staging directory:".bold(), manager.staging_directory().display());
    println!("  {:<25} {}h", "Max age:".bold(), config.staging.max_staging_age_hours);
    println!("  {:<25} {}", "Staged copies:".bold(), artifacts.len());
    println!(
        "  {:<25} {}",
        "Total size:".bold(),
        format_bytes(artifacts.iter().map(|a| a.size).sum())
    );
    println!();

    if artifacts.is_empty() {
        return Ok(());
    }

    let cutoff = Utc::now() - Duration::hours(config.staging.max_staging_age_hours as i64);
    println!("{:<10} {:<12} {:<20} {}", "Kind".bold(), "Size".bold(), "Staged".bold(), "Path".bold());
    println!("{}", "-".repeat(80));
    for artifact in &artifacts {
        let kind = if artifact.is_directory { "dir" } else { "file" };
        let staged = artifact
            .staged_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let expired = artifact.staged_at.map(|t| t <= cutoff).unwrap_or(false);
        let name = artifact
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let line = format!("{:<10} {:<12} {:<20} {}", kind, format_bytes(artifact.size), staged, name);
        if expired {
            println!("{}", line.dimmed());
        } else {
            println!("{}", line);
        }
    }
    Ok(())
}

/// Delete staged copies older than the configured (or given) age.
pub fn cleanup(config: &Config, max_age_hours: Option<u64>) -> Result<()> {
    let hours = max_age_hours.unwrap_or(config.staging.max_staging_age_hours);
    let manager = StagingManager::new(config.staging.clone())?;

    let removed = manager.purge_disk_entries(Duration::hours(hours as i64))?;
    if removed == 0 {
        println!("{}", format!("[OK] No staged copies older than {}h", hours).green());
    } else {
        println!("{}", format!("[OK] Removed {} staged copies", removed).green());
    }
    Ok(())
}
