//! Destination conflict check.

use super::PreflightChecker;
use crate::models::preflight::{PreflightResult, Severity};
use crate::utils::fs::{format_bytes, is_dir_empty};
use crate::Result;
use std::path::Path;

/// Flags destinations that already exist.
pub struct FileConflictChecker;

impl PreflightChecker for FileConflictChecker {
    fn name(&self) -> &'static str {
        "FileConflict"
    }

    fn description(&self) -> &'static str {
        "Checks whether the destination already exists"
    }

    fn is_applicable(&self, _source: &Path, destination: Option<&Path>) -> bool {
        destination.map(Path::exists).unwrap_or(false)
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
        if !dest.exists() {
            return Ok(());
        }

        let same = match (source.canonicalize(), dest.canonicalize()) {
            (Ok(a), Ok(b)) => a == b,
            _ => source == dest,
        };
        if same {
            let issue = result
                .issue(
                    Severity::Warning,
                    "Source and destination are the same",
                    format!("{} points at itself", source.display()),
                )
                .with_files([source])
                .with_suggestions(["Pick a different destination"]);
            result.push(issue);
            return Ok(());
        }

        let issue = if source.is_file() && dest.is_file() {
            let src_size = std::fs::metadata(source)?.len();
            let dest_size = std::fs::metadata(dest)?.len();
            result
                .issue(
                    Severity::Error,
                    "Destination file exists",
                    format!(
                        "{} would be overwritten (source {}, existing {})",
                        dest.display(),
                        format_bytes(src_size),
                        format_bytes(dest_size)
                    ),
                )
                .with_files([source, dest])
                .with_suggestions([
                    "Enable overwrite to replace the file",
                    "Rename the destination",
                ])
        } else if source.is_dir() && dest.is_dir() {
            if is_dir_empty(dest) {
                result
                    .issue(
                        Severity::Info,
                        "Destination directory is empty",
                        format!("{} exists but is empty", dest.display()),
                    )
                    .with_files([dest])
            } else {
                result
                    .issue(
                        Severity::Warning,
                        "Directories will be merged",
                        format!("{} already has content", dest.display()),
                    )
                    .with_files([source, dest])
                    .with_suggestions(["Review the destination contents before merging"])
            }
        } else {
            result
                .issue(
                    Severity::Critical,
                    "File and directory type mismatch",
                    format!(
                        "{} and {} are of different types",
                        source.display(),
                        dest.display()
                    ),
                )
                .with_files([source, dest])
                .with_suggestions(["Choose a destination of the same type"])
        };
        result.push(issue);
        Ok(())
    }
}
