//! In-use file check.

use super::PreflightChecker;
use crate::models::preflight::{PreflightResult, Severity};
use crate::Result;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

/// Detects files another process holds open exclusively.
pub struct FileLockChecker;

/// Probe an advisory lock without blocking. `Ok(false)` means another holder.
#[cfg(unix)]
fn try_lock(file: &File) -> io::Result<bool> {
    use std::os::fd::AsRawFd;

    let fd = file.as_raw_fd();
    let rc = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
    if rc != 0 {
        let err = io::Error::last_os_error();
        return if err.kind() == io::ErrorKind::WouldBlock {
            Ok(false)
        } else {
            Err(err)
        };
    }
    unsafe { libc::flock(fd, libc::LOCK_UN) };
    Ok(true)
}

#[cfg(not(unix))]
fn try_lock(_file: &File) -> io::Result<bool> {
    Ok(true)
}

impl FileLockChecker {
    fn try_open(path: &Path, label: &str, result: &mut PreflightResult) {
        if !path.is_file() {
            return;
        }

        let in_use = || {
            result
                .issue(
                    Severity::Error,
                    format!("{} file in use", label),
                    format!("{} is in use by another process", path.display()),
                )
                .with_files([path])
                .with_suggestions(["Close the program using the file", "Retry later"])
        };

        let issue = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => match try_lock(&file) {
                Ok(true) => None,
                Ok(false) => Some(in_use()),
                Err(e) => Some(Self::unknown(result, label, path, &e)),
            },
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => Some(in_use()),
            Err(e) => Some(Self::unknown(result, label, path, &e)),
        };
        if let Some(issue) = issue {
            result.push(issue);
        }
    }

    fn unknown(
        result: &PreflightResult,
        label: &str,
        path: &Path,
        err: &io::Error,
    ) -> crate::models::preflight::PreflightIssue {
        result
            .issue(
                Severity::Warning,
                format!("{} lock state unknown", label),
                format!("Could not open {}: {}", path.display(), err),
            )
            .with_files([path])
            .with_suggestions(["The file may be in use; proceed with care"])
    }
}

impl PreflightChecker for FileLockChecker {
    fn name(&self) -> &'static str {
        "FileLock"
    }

    fn description(&self) -> &'static str {
        "Checks whether another process is using the files"
    }

    fn check_operation(
        &self,
        source: &Path,
        destination: Option<&Path>,
        result: &mut PreflightResult,
    ) -> Result<()> {
        Self::try_open(source, "Source", result);
        if let Some(dest) = destination.filter(|d| d.exists()) {
            Self::try_open(dest, "Destination", result);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlocked_file_passes() {
        let temp = tempfile::TempDir::new().unwrap();
        let file = temp.path().join("a.mkv");
        std::fs::write(&file, b"x").unwrap();

        let mut result = PreflightResult::new("FileLock");
        FileLockChecker.check_operation(&file, None, &mut result).unwrap();
        assert!(result.issues.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_flock_held_elsewhere_is_error() {
        use std::os::fd::AsRawFd;

        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("busy.mkv");
        std::fs::write(&path, b"x").unwrap();

        let holder = File::open(&path).unwrap();
        let rc = unsafe { libc::flock(holder.as_raw_fd(), libc::LOCK_EX) };
        assert_eq!(rc, 0);

        let mut result = PreflightResult::new("FileLock");
        FileLockChecker.check_operation(&path, None, &mut result).unwrap();
        assert_eq!(result.issues.len(), 1);
        assert_eq!(result.issues[0].severity, Severity::Error);
    }
}
