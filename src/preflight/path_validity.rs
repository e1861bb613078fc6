//! Portable path validity check.
//!
//! Media libraries are often shared with Windows machines, so names that are
//! illegal there are flagged even on Unix.

use super::PreflightChecker;
use crate::models::preflight::{PreflightResult, Severity};
use crate::Result;
use std::path::{Component, Path};

const MAX_PATH_LEN: usize = 260;
const FORBIDDEN_CHARS: &[char] = &['<', '>', '"', '|', '?', '*'];

/// Flags over-long paths, reserved device names and forbidden characters.
pub struct PathValidityChecker;

fn is_reserved_name(name: &str) -> bool {
    let stem = name.split('.').next().unwrap_or(name).to_uppercase();
    regex::Regex::new(r"^(CON|PRN|AUX|NUL|COM[1-9]|LPT[1-9])$")
        .map(|re| re.is_match(&stem))
        .unwrap_or(false)
}

impl PathValidityChecker {
    fn check_path(path: &Path, label: &str, result: &mut PreflightResult) {
        let path_str = path.to_string_lossy();
        let char_count = path_str.chars().count();
        if char_count > MAX_PATH_LEN {
            let issue = result
                .issue(
                    Severity::Error,
                    format!("{} path too long", label),
                    format!("{} characters exceeds the {} limit", char_count, MAX_PATH_LEN),
                )
                .with_files([path])
                .with_suggestions(["Use a shorter path"]);
            result.push(issue);
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if is_reserved_name(&name) {
            let issue = result
                .issue(
                    Severity::Critical,
                    format!("{} name is reserved", label),
                    format!("'{}' is a reserved device name", name),
                )
                .with_files([path])
                .with_suggestions(["Use a different file name"]);
            result.push(issue);
        }

        let parts = path.components().filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        });
        for part in parts {
            let forbidden = part
                .chars()
                .find(|c| FORBIDDEN_CHARS.contains(c))
                .or_else(|| (part.contains(':') && part.chars().count() > 2).then_some(':'));
            if let Some(ch) = forbidden {
                let issue = result
                    .issue(
                        Severity::Error,
                        format!("{} contains a forbidden character", label),
                        format!("'{}' contains '{}'", part, ch),
                    )
                    .with_files([path])
                    .with_suggestions(["Remove or replace the character"]);
                result.push(issue);
                return;
            }
        }

        if name.ends_with(' ') || name.ends_with('.') {
            let issue = result
                .issue(
                    Severity::Warning,
                    format!("{} name ends with space or dot", label),
                    format!("'{}' ends with a space or a dot", name),
                )
                .with_files([path])
                .with_suggestions(["Trim the trailing character"]);
            result.push(issue);
        }
    }
}

impl PreflightChecker for PathValidityChecker {
    fn name(&self) -> &'static str {
        "PathValidity"
    }

    fn description(&self) -> &'static str {
        "Checks path length, reserved names and forbidden characters"
    }

    fn check_operation(
        &self,
        source: &Path,
        destination: Option<&Path>,
        result: &mut PreflightResult,
    ) -> Result<()> {
        Self::check_path(source, "Source", result);
        if let Some(dest) = destination {
            Self::check_path(dest, "Destination", result);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issues_for(path: &str) -> Vec<Severity> {
        let mut result = PreflightResult::new("PathValidity");
        PathValidityChecker
            .check_operation(Path::new(path), None, &mut result)
            .unwrap();
        result.issues.iter().map(|i| i.severity).collect()
    }

    #[test]
    fn test_valid_path() {
        assert!(issues_for("/media/Movies/Film (2020).mkv").is_empty());
    }

    #[test]
    fn test_reserved_names() {
        assert_eq!(issues_for("/media/CON"), vec![Severity::Critical]);
        assert_eq!(issues_for("/media/com1.txt"), vec![Severity::Critical]);
        assert!(issues_for("/media/CONSOLE.txt").is_empty());
    }

    #[test]
    fn test_forbidden_characters() {
        assert_eq!(issues_for("/media/what?.mkv"), vec![Severity::Error]);
        assert_eq!(issues_for("/media/a:b.mkv"), vec![Severity::Error]);
    }

    #[test]
    fn test_trailing_dot_and_length() {
        assert_eq!(issues_for("/media/name."), vec![Severity::Warning]);
        let long = format!("/{}", "a".repeat(300));
        assert_eq!(issues_for(&long), vec![Severity::Error]);
    }
}
