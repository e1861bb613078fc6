//! Preflight check data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How serious a preflight finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    /// Error and Critical findings stop an operation.
    pub fn is_blocking(self) -> bool {
        matches!(self, Severity::Error | Severity::Critical)
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

/// A single finding reported by a checker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreflightIssue {
    /// Name of the checker that raised it.
    pub checker_name: String,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub affected_files: Vec<PathBuf>,
    pub suggestions: Vec<String>,
}

impl PreflightIssue {
    pub fn new(
        checker_name: impl Into<String>,
        severity: Severity,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            checker_name: checker_name.into(),
            severity,
            title: title.into(),
            description: description.into(),
            affected_files: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    pub fn with_files<I, P>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.affected_files.extend(files.into_iter().map(Into::into));
        self
    }

    pub fn with_suggestions<I, S>(mut self, suggestions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.suggestions.extend(suggestions.into_iter().map(Into::into));
        self
    }

    pub fn is_blocking(&self) -> bool {
        self.severity.is_blocking()
    }
}

/// Issues collected by one checker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreflightResult {
    pub checker_name: String,
    pub issues: Vec<PreflightIssue>,
    /// Number of (source, destination) pairs examined.
    pub checked_operations: usize,
    pub duration_ms: u64,
    /// True when the checker was not applicable to any operation.
    pub skipped: bool,
}

impl PreflightResult {
    pub fn new(checker_name: impl Into<String>) -> Self {
        Self {
            checker_name: checker_name.into(),
            issues: Vec::new(),
            checked_operations: 0,
            duration_ms: 0,
            skipped: false,
        }
    }

    /// Record an issue.
    pub fn push(&mut self, issue: PreflightIssue) {
        self.issues.push(issue);
    }

    /// Start an issue attributed to this checker.
    pub fn issue(
        &self,
        severity: Severity,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> PreflightIssue {
        PreflightIssue::new(self.checker_name.clone(), severity, title, description)
    }

    pub fn merge(&mut self, other: PreflightResult) {
        self.issues.extend(other.issues);
        self.checked_operations += other.checked_operations;
        self.duration_ms += other.duration_ms;
        self.skipped = self.skipped && other.skipped;
    }

    pub fn has_blocking_issues(&self) -> bool {
        self.issues.iter().any(PreflightIssue::is_blocking)
    }

    pub fn blocking_issues(&self) -> Vec<&PreflightIssue> {
        self.issues.iter().filter(|i| i.is_blocking()).collect()
    }

    pub fn warning_issues(&self) -> Vec<&PreflightIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Warning)
            .collect()
    }
}

/// Aggregate of every checker's result for one or many operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreflightCheckResult {
    /// False if any checker reported a blocking issue.
    pub success: bool,
    /// Results in checker registration order.
    pub checker_results: Vec<PreflightResult>,
    pub total_operations: usize,
    pub checked_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl PreflightCheckResult {
    pub fn new(total_operations: usize) -> Self {
        Self {
            success: true,
            checker_results: Vec::new(),
            total_operations,
            checked_at: Utc::now(),
            duration_ms: 0,
        }
    }

    /// Add a checker result and refresh `success`.
    pub fn add(&mut self, result: PreflightResult) {
        if result.has_blocking_issues() {
            self.success = false;
        }
        self.checker_results.push(result);
    }

    pub fn all_issues(&self) -> Vec<&PreflightIssue> {
        self.checker_results
            .iter()
            .flat_map(|r| r.issues.iter())
            .collect()
    }

    pub fn has_blocking_issues(&self) -> bool {
        self.checker_results.iter().any(|r| r.has_blocking_issues())
    }

    pub fn blocking_issues(&self) -> Vec<&PreflightIssue> {
        self.all_issues()
            .into_iter()
            .filter(|i| i.is_blocking())
            .collect()
    }

    pub fn warning_issues(&self) -> Vec<&PreflightIssue> {
        self.all_issues()
            .into_iter()
            .filter(|i| i.severity == Severity::Warning)
            .collect()
    }

    pub fn issues_with_severity(&self, severity: Severity) -> Vec<&PreflightIssue> {
        self.all_issues()
            .into_iter()
            .filter(|i| i.severity == severity)
            .collect()
    }

    pub fn result_for(&self, checker_name: &str) -> Option<&PreflightResult> {
        self.checker_results
            .iter()
            .find(|r| r.checker_name == checker_name)
    }

    /// One-line human summary.
    pub fn summary(&self) -> String {
        let count = |s| self.issues_with_severity(s).len();
        format!(
            "{} operation(s), {} checker(s): {} critical, {} error, {} warning, {} info",
            self.total_operations,
            self.checker_results.len(),
            count(Severity::Critical),
            count(Severity::Error),
            count(Severity::Warning),
            count(Severity::Info),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocking_partition() {
        let mut r = PreflightResult::new("Demo");
        let warn = r.issue(Severity::Warning, "w", "warn");
        let crit = r.issue(Severity::Critical, "c", "crit");
        r.push(warn);
        r.push(crit);

        let mut check = PreflightCheckResult::new(1);
        check.add(r);

        assert!(!check.success);
        assert!(check.has_blocking_issues());
        assert_eq!(check.blocking_issues().len(), 1);
        assert_eq!(check.warning_issues().len(), 1);
        assert_eq!(check.all_issues().len(), 2);
    }

    #[test]
    fn test_empty_result_is_success() {
        let check = PreflightCheckResult::new(0);
        assert!(check.success);
        assert!(!check.has_blocking_issues());
        assert!(check.blocking_issues().is_empty());
    }
}
