//! Free space check for cross-device operations.
//!
//! Same-device moves are renames and need no extra space, so the check only
//! applies when source and destination live on different filesystems.

use super::{PlannedOperation, PreflightChecker};
use crate::models::preflight::{PreflightResult, Severity};
use crate::utils::fs::{format_bytes, nearest_existing_ancestor, path_size};
use crate::Result;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Compares source size against free space on the destination filesystem.
pub struct DiskSpaceChecker;

/// Identifier of the filesystem holding `path`.
#[cfg(unix)]
fn device_of(path: &Path) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    std::fs::metadata(path).ok().map(|m| m.dev())
}

#[cfg(not(unix))]
fn device_of(path: &Path) -> Option<u64> {
    use std::hash::{Hash, Hasher};
    let prefix = path.components().next()?;
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    prefix.hash(&mut hasher);
    Some(hasher.finish())
}

/// Bytes available to unprivileged users on the filesystem holding `path`.
#[cfg(unix)]
fn available_space(path: &Path) -> Option<u64> {
    use std::ffi::CString;
    use std::mem::MaybeUninit;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes()).ok()?;
    unsafe {
        let mut stat: MaybeUninit<libc::statvfs> = MaybeUninit::uninit();
        if libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) != 0 {
            return None;
        }
        let stat = stat.assume_init();
        Some((stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64))
    }
}

#[cfg(not(unix))]
fn available_space(_path: &Path) -> Option<u64> {
    None
}

/// Existing directory that will receive the destination.
fn destination_anchor(dest: &Path) -> Option<PathBuf> {
    dest.parent().and_then(nearest_existing_ancestor)
}

/// Grade `required` bytes against `available` bytes.
pub(crate) fn assess(required: u64, available: u64) -> Severity {
    if required > available {
        Severity::Critical
    } else if (required as f64) > (available as f64) * 0.9 {
        Severity::Warning
    } else {
        Severity::Info
    }
}

impl DiskSpaceChecker {
    fn report(result: &mut PreflightResult, anchor: &Path, required: u64, files: Vec<PathBuf>) {
        let Some(available) = available_space(anchor) else {
            let issue = result
                .issue(
                    Severity::Warning,
                    "Free space unknown",
                    format!("Could not query free space for {}", anchor.display()),
                )
                .with_files([anchor]);
            result.push(issue);
            return;
        };

        let severity = assess(required, available);
        let (title, hints): (&str, &[&str]) = match severity {
            Severity::Critical => (
                "Insufficient disk space",
                &["Free up space on the destination", "Choose another destination"],
            ),
            Severity::Warning => (
                "Disk space nearly exhausted",
                &["The destination will be almost full after this operation"],
            ),
            _ => ("Sufficient disk space", &[]),
        };
        let issue = result
            .issue(
                severity,
                title,
                format!(
                    "Need {}, {} available on {}",
                    format_bytes(required),
                    format_bytes(available),
                    anchor.display()
                ),
            )
            .with_files(files)
            .with_suggestions(hints.iter().copied());
        result.push(issue);
    }
}

impl PreflightChecker for DiskSpaceChecker {
    fn name(&self) -> &'static str {
        "DiskSpace"
    }

    fn description(&self) -> &'static str {
        "Checks free space on the destination for cross-device operations"
    }

    fn is_applicable(&self, source: &Path, destination: Option<&Path>) -> bool {
        let Some(dest) = destination else {
            return false;
        };
        if !source.exists() {
            return false;
        }
        match (device_of(source), destination_anchor(dest).and_then(|a| device_of(&a))) {
            (Some(a), Some(b)) => a != b,
            _ => false,
        }
    }

    fn check_operation(
        &self,
        source: &Path,
        destination: Option<&Path>,
        result: &mut PreflightResult,
    ) -> Result<()> {
        let Some(anchor) = destination.and_then(destination_anchor) else {
            return Ok(());
        };
        Self::report(result, &anchor, path_size(source), vec![source.to_path_buf()]);
        Ok(())
    }

    /// Sum the requirements of every operation landing on the same device.
    fn check_batch(&self, operations: &[&PlannedOperation], result: &mut PreflightResult) -> Result<()> {
        let mut per_device: BTreeMap<u64, (PathBuf, u64, Vec<PathBuf>)> = BTreeMap::new();

        for op in operations {
            let Some(anchor) = op.destination.as_deref().and_then(destination_anchor) else {
                continue;
            };
            let Some(device) = device_of(&anchor) else {
                continue;
            };
            let slot = per_device
                .entry(device)
                .or_insert_with(|| (anchor.clone(), 0, Vec::new()));
            slot.1 += path_size(&op.source);
            slot.2.push(op.source.clone());
        }

        for (_, (anchor, required, files)) in per_device {
            Self::report(result, &anchor, required, files);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assess_thresholds() {
        assert_eq!(assess(200, 100), Severity::Critical);
        assert_eq!(assess(95, 100), Severity::Warning);
        assert_eq!(assess(10, 100), Severity::Info);
    }

    #[test]
    fn test_same_device_not_applicable() {
        let temp = tempfile::TempDir::new().unwrap();
        let src = temp.path().join("a");
        std::fs::write(&src, b"x").unwrap();
        assert!(!DiskSpaceChecker.is_applicable(&src, Some(&temp.path().join("b"))));
        assert!(!DiskSpaceChecker.is_applicable(&src, None));
    }

    #[cfg(unix)]
    #[test]
    fn test_available_space_reported() {
        let temp = tempfile::TempDir::new().unwrap();
        assert!(available_space(temp.path()).is_some());
    }
}
