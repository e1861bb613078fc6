//! Preflight checks module.
//!
//! Read-only hazard checks run before any file is touched. Each checker is
//! independent; the [`PreflightCoordinator`] runs the applicable ones in
//! registration order and folds their findings into one
//! [`PreflightCheckResult`].

mod circular;
mod conflict;
mod disk_space;
mod file_lock;
mod path_validity;
mod permission;

pub use circular::CircularReferenceChecker;
pub use conflict::FileConflictChecker;
pub use disk_space::DiskSpaceChecker;
pub use file_lock::FileLockChecker;
pub use path_validity::PathValidityChecker;
pub use permission::PermissionChecker;

use crate::models::preflight::{PreflightCheckResult, PreflightResult, Severity};
use crate::Result;
use colored::Colorize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// A (source, destination?) pair submitted for checking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedOperation {
    pub source: PathBuf,
    pub destination: Option<PathBuf>,
}

impl PlannedOperation {
    pub fn new(source: impl Into<PathBuf>, destination: Option<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination,
        }
    }
}

/// A single hazard check.
pub trait PreflightChecker: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Whether the check makes sense for this pair.
    fn is_applicable(&self, _source: &Path, _destination: Option<&Path>) -> bool {
        true
    }

    /// Inspect one pair and record findings into `result`.
    fn check_operation(
        &self,
        source: &Path,
        destination: Option<&Path>,
        result: &mut PreflightResult,
    ) -> Result<()>;

    /// Inspect many pairs. Override to aggregate across operations.
    fn check_batch(&self, operations: &[&PlannedOperation], result: &mut PreflightResult) -> Result<()> {
        for op in operations {
            self.check_operation(&op.source, op.destination.as_deref(), result)?;
        }
        Ok(())
    }
}

struct RegisteredChecker {
    checker: Arc<dyn PreflightChecker>,
    enabled: bool,
}

/// Ordered, named set of checkers.
pub struct PreflightCoordinator {
    checkers: RwLock<Vec<RegisteredChecker>>,
}

impl PreflightCoordinator {
    /// Coordinator without any checker.
    pub fn empty() -> Self {
        Self {
            checkers: RwLock::new(Vec::new()),
        }
    }

    /// Coordinator with the six standard checkers.
    pub fn new() -> Self {
        let coordinator = Self::empty();
        coordinator.add_checker(Arc::new(FileConflictChecker));
        coordinator.add_checker(Arc::new(PermissionChecker));
        coordinator.add_checker(Arc::new(DiskSpaceChecker));
        coordinator.add_checker(Arc::new(PathValidityChecker));
        coordinator.add_checker(Arc::new(CircularReferenceChecker));
        coordinator.add_checker(Arc::new(FileLockChecker));
        coordinator
    }

    /// Register a checker. A checker with the same name is replaced in place.
    pub fn add_checker(&self, checker: Arc<dyn PreflightChecker>) {
        let Ok(mut checkers) = self.checkers.write() else {
            return;
        };
        match checkers.iter_mut().find(|c| c.checker.name() == checker.name()) {
            Some(existing) => existing.checker = checker,
            None => checkers.push(RegisteredChecker {
                checker,
                enabled: true,
            }),
        }
    }

    pub fn remove_checker(&self, name: &str) -> bool {
        let Ok(mut checkers) = self.checkers.write() else {
            return false;
        };
        let before = checkers.len();
        checkers.retain(|c| c.checker.name() != name);
        checkers.len() != before
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        let Ok(mut checkers) = self.checkers.write() else {
            return false;
        };
        match checkers.iter_mut().find(|c| c.checker.name() == name) {
            Some(c) => {
                c.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Names of enabled checkers in run order.
    pub fn checker_names(&self) -> Vec<&'static str> {
        self.enabled_checkers().iter().map(|c| c.name()).collect()
    }

    fn enabled_checkers(&self) -> Vec<Arc<dyn PreflightChecker>> {
        self.checkers
            .read()
            .map(|c| {
                c.iter()
                    .filter(|r| r.enabled)
                    .map(|r| Arc::clone(&r.checker))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Check one (source, destination?) pair.
    pub fn check_operation(&self, source: &Path, destination: Option<&Path>) -> PreflightCheckResult {
        let op = PlannedOperation::new(source, destination.map(Path::to_path_buf));
        self.run(std::slice::from_ref(&op))
    }

    /// Check many pairs, letting each checker aggregate across them.
    pub fn check_batch_operations(&self, operations: &[PlannedOperation]) -> PreflightCheckResult {
        self.run(operations)
    }

    fn run(&self, operations: &[PlannedOperation]) -> PreflightCheckResult {
        let started = Instant::now();
        let mut check = PreflightCheckResult::new(operations.len());

        for checker in self.enabled_checkers() {
            let applicable: Vec<&PlannedOperation> = operations
                .iter()
                .filter(|op| checker.is_applicable(&op.source, op.destination.as_deref()))
                .collect();
            if applicable.is_empty() {
                continue;
            }

            let checker_started = Instant::now();
            let mut result = PreflightResult::new(checker.name());
            result.checked_operations = applicable.len();

            let outcome = catch_unwind(AssertUnwindSafe(|| {
                checker.check_batch(&applicable, &mut result)
            }));
            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some("checker panicked".to_string()),
            };
            if let Some(message) = failure {
                tracing::error!("Preflight checker {} failed: {}", checker.name(), message);
                let files = applicable.iter().map(|op| op.source.clone());
                let issue = result
                    .issue(
                        Severity::Critical,
                        "Checker error",
                        format!("{} could not complete: {}", checker.name(), message),
                    )
                    .with_files(files)
                    .with_suggestions(["Inspect the paths manually before retrying"]);
                result.push(issue);
            }

            result.duration_ms = checker_started.elapsed().as_millis() as u64;
            check.add(result);
        }

        check.duration_ms = started.elapsed().as_millis() as u64;
        tracing::debug!("Preflight: {}", check.summary());
        check
    }
}

impl Default for PreflightCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Print preflight check results.
pub fn print_results(check: &PreflightCheckResult) {
    for result in &check.checker_results {
        if result.issues.is_empty() {
            println!("{} {}", "[OK]".green(), result.checker_name.bold());
            continue;
        }
        for issue in &result.issues {
            let tag = match issue.severity {
                Severity::Info => "[INFO]".cyan(),
                Severity::Warning => "[WARN]".yellow(),
                Severity::Error => "[FAIL]".red(),
                Severity::Critical => "[CRITICAL]".red().bold(),
            };
            println!(
                "{} {}: {} - {}",
                tag,
                result.checker_name.bold(),
                issue.title,
                issue.description
            );
            for hint in &issue.suggestions {
                println!("  {} {}", "->".yellow(), hint);
            }
        }
    }
}
