//! Check command implementation.

use crate::preflight::{print_results, PreflightCoordinator};
use crate::Result;
use colored::Colorize;
use std::path::Path;

/// Run every preflight checker against one operation. Returns whether it may proceed.
pub fn check(source: &Path, destination: Option<&Path>) -> Result<bool> {
    println!("{}", "Running preflight checks...".bold());
    println!();

    let coordinator = PreflightCoordinator::new();
    let result = coordinator.check_operation(source, destination);
    print_results(&result);
    println!();

    let issues = result.all_issues();
    if result.success {
        println!(
            "{}",
            format!("[OK] Operation may proceed ({} non-blocking issues)", issues.len()).green()
        );
    } else {
        println!(
            "{}",
            format!(
                "[FAIL] {} blocking issues found",
                result.blocking_issues().len()
            )
            .red()
            .bold()
        );
    }
    Ok(result.success)
}
