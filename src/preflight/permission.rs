//! Read/write permission check.

use super::PreflightChecker;
use crate::models::preflight::{PreflightResult, Severity};
use crate::utils::fs::nearest_existing_ancestor;
use crate::Result;
use std::path::Path;

/// Verifies the process may read the source and write where the operation writes.
pub struct PermissionChecker;

#[cfg(unix)]
fn has_access(path: &Path, mode: libc::c_int) -> bool {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let Ok(c_path) = CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };
    unsafe { libc::access(c_path.as_ptr(), mode) == 0 }
}

#[cfg(unix)]
pub(crate) fn can_read(path: &Path) -> bool {
    has_access(path, libc::R_OK)
}

#[cfg(unix)]
pub(crate) fn can_write(path: &Path) -> bool {
    has_access(path, libc::W_OK)
}

#[cfg(not(unix))]
pub(crate) fn can_read(path: &Path) -> bool {
    std::fs::metadata(path).is_ok()
}

#[cfg(not(unix))]
pub(crate) fn can_write(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| !m.permissions().readonly())
        .unwrap_or(false)
}

impl PermissionChecker {
    fn deny(result: &mut PreflightResult, title: &str, path: &Path, hint: &str) {
        let issue = result
            .issue(
                Severity::Critical,
                title,
                format!("Insufficient permission on {}", path.display()),
            )
            .with_files([path])
            .with_suggestions([hint]);
        result.push(issue);
    }

    /// Whether `path` could be created: its nearest existing ancestor must be writable.
    fn check_creatable(path: &Path, result: &mut PreflightResult) {
        let Some(parent) = path.parent() else {
            return;
        };
        if let Some(ancestor) = nearest_existing_ancestor(parent) {
            if !can_write(&ancestor) {
                Self::deny(
                    result,
                    "Destination not writable",
                    &ancestor,
                    "Choose a destination you can write to",
                );
            }
        }
    }
}

impl PreflightChecker for PermissionChecker {
    fn name(&self) -> &'static str {
        "Permission"
    }

    fn description(&self) -> &'static str {
        "Checks read access on the source and write access on the destination"
    }

    fn check_operation(
        &self,
        source: &Path,
        destination: Option<&Path>,
        result: &mut PreflightResult,
    ) -> Result<()> {
        if !source.exists() {
            // Nothing to read yet (directory creation): only creatability matters.
            if destination.is_none() {
                Self::check_creatable(source, result);
            }
        } else if !can_read(source) {
            Self::deny(
                result,
                "Source not readable",
                source,
                "Grant read access to the source",
            );
        }

        let Some(dest) = destination else {
            return Ok(());
        };

        if let Some(src_parent) = source.parent().filter(|p| p.exists()) {
            if !can_write(src_parent) {
                Self::deny(
                    result,
                    "Source directory not writable",
                    src_parent,
                    "Grant write access to the source directory or copy instead of moving",
                );
            }
        }

        Self::check_creatable(dest, result);

        if dest.exists() && !can_write(dest) {
            Self::deny(
                result,
                "Existing destination not writable",
                dest,
                "Grant write access to the existing destination",
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readable_source_and_writable_destination() {
        let temp = tempfile::TempDir::new().unwrap();
        let src = temp.path().join("a.mkv");
        std::fs::write(&src, b"x").unwrap();

        let mut result = PreflightResult::new("Permission");
        PermissionChecker
            .check_operation(&src, Some(&temp.path().join("new/dir/a.mkv")), &mut result)
            .unwrap();
        assert!(result.issues.is_empty());
    }

    #[test]
    fn test_access_helpers() {
        let temp = tempfile::TempDir::new().unwrap();
        assert!(can_read(temp.path()));
        assert!(can_write(temp.path()));
        assert!(!can_read(&temp.path().join("missing")));
    }
}
