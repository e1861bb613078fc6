//! Directory-into-itself check.

use super::PreflightChecker;
use crate::models::preflight::{PreflightResult, Severity};
use crate::utils::fs::resolve_path;
use crate::Result;
use std::path::Path;

/// Refuses moving or copying a directory below itself.
pub struct CircularReferenceChecker;

impl PreflightChecker for CircularReferenceChecker {
    fn name(&self) -> &'static str {
        "CircularReference"
    }

    fn description(&self) -> &'static str {
        "Checks that a directory is not moved into its own subtree"
    }

    fn is_applicable(&self, source: &Path, destination: Option<&Path>) -> bool {
        destination.is_some() && source.is_dir()
    }

    fn check_operation(
        &self,
        source: &Path,
        destination: Option<&Path>,
        result: &mut PreflightResult,
    ) -> Result<()> {
        let Some(dest) = destination else {
            return Ok(());
        };

        let issue = match (resolve_path(source), resolve_path(dest)) {
            (Ok(src), Ok(dst)) if dst.starts_with(&src) => result
                .issue(
                    Severity::Critical,
                    "Circular reference",
                    format!(
                        "Cannot place {} inside itself at {}",
                        source.display(),
                        dest.display()
                    ),
                )
                .with_files([source, dest])
                .with_suggestions(["Choose a destination outside the source directory"]),
            (Ok(_), Ok(_)) => return Ok(()),
            (Err(e), _) | (_, Err(e)) => result
                .issue(
                    Severity::Warning,
                    "Circular reference check failed",
                    format!("Could not resolve paths: {}", e),
                )
                .with_files([source, dest])
                .with_suggestions(["Verify the paths manually"]),
        };
        result.push(issue);
        Ok(())
    }
}
