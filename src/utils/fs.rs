//! File system utilities.

use crate::Result;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const SUBTITLE_EXTENSIONS: &[&str] = &["srt", "ass", "ssa", "sub", "vtt", "idx", "smi"];

/// Check if a path exists and is a directory.
pub fn ensure_directory(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(crate::Error::PathNotFound(path.display().to_string()));
    }
    if !path.is_dir() {
        return Err(crate::Error::NotADirectory(path.display().to_string()));
    }
    Ok(())
}

/// Create the parent directory of `path` if it is missing.
pub fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Move a file or directory from one location to another.
///
/// Uses a rename when possible and falls back to copy + delete when the
/// destination lives on another filesystem.
pub fn move_path(from: &Path, to: &Path) -> Result<()> {
    match fs::rename(from, to) {
        Ok(()) => return Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::CrossesDevices => {
            tracing::debug!("Cross-filesystem move detected, using copy+delete");
        }
        Err(e) => return Err(e.into()),
    }

    if from.is_dir() {
        copy_dir_all(from, to)?;
        fs::remove_dir_all(from)?;
    } else {
        fs::copy(from, to)?;
        fs::remove_file(from)?;
    }
    Ok(())
}

/// Copy a file or a whole directory tree. Returns the number of bytes copied.
pub fn copy_path(from: &Path, to: &Path) -> Result<u64> {
    if from.is_dir() {
        copy_dir_all(from, to)
    } else {
        Ok(fs::copy(from, to)?)
    }
}

/// Recursively copy a directory tree.
pub fn copy_dir_all(from: &Path, to: &Path) -> Result<u64> {
    let mut copied = 0;
    for entry in WalkDir::new(from) {
        let entry = entry.map_err(|e| crate::Error::other(e.to_string()))?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| crate::Error::other(e.to_string()))?;
        let target = to.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            ensure_parent(&target)?;
            copied += fs::copy(entry.path(), &target)?;
        }
    }
    Ok(copied)
}

/// Remove a file or a directory tree.
pub fn remove_path(path: &Path) -> Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path)?;
    } else {
        fs::remove_file(path)?;
    }
    Ok(())
}

/// Total size in bytes of a file, or of every file below a directory.
pub fn path_size(path: &Path) -> u64 {
    if path.is_file() {
        return fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    }

    WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter_map(|e| e.metadata().ok())
        .filter(|m| m.is_file())
        .map(|m| m.len())
        .sum()
}

/// Check whether a directory has no entries. Unreadable directories count as non-empty.
pub fn is_dir_empty(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false)
}

/// Remove `dirs` (deepest first) while they are empty; stops at the first one still in use.
pub fn remove_created_dirs(dirs: &[PathBuf]) {
    for dir in dirs {
        if !dir.is_dir() {
            continue;
        }
        if !is_dir_empty(dir) {
            break;
        }
        if let Err(e) = fs::remove_dir(dir) {
            tracing::warn!("Could not remove created directory {:?}: {}", dir, e);
            break;
        }
    }
}

/// Sibling path used to park a pre-existing destination: `a.mkv` -> `a.mkv.backup`.
pub fn backup_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".backup");
    path.with_file_name(name)
}

/// Walk up from `path` until an existing ancestor (or `path` itself) is found.
pub fn nearest_existing_ancestor(path: &Path) -> Option<PathBuf> {
    path.ancestors()
        .find(|p| !p.as_os_str().is_empty() && p.exists())
        .map(Path::to_path_buf)
}

/// Absolute, symlink-free form of `path`, which need not exist yet.
///
/// The existing prefix is canonicalized and the missing tail appended as is.
pub fn resolve_path(path: &Path) -> Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    let anchor = nearest_existing_ancestor(&absolute)
        .ok_or_else(|| crate::Error::PathNotFound(absolute.display().to_string()))?;
    let tail = absolute
        .strip_prefix(&anchor)
        .map_err(|e| crate::Error::other(e.to_string()))?
        .to_path_buf();
    Ok(anchor.canonicalize()?.join(tail))
}

/// Get file extension in lowercase.
pub fn get_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

/// Check if a file is a video file based on extension.
pub fn is_video_file(path: &Path) -> bool {
    const VIDEO_EXTENSIONS: &[&str] = &[
        "mkv", "mp4", "avi", "mov", "wmv", "m4v", "ts", "m2ts", "flv", "webm", "mpg", "mpeg",
    ];

    get_extension(path)
        .map(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Check if a file is a subtitle file based on extension.
pub fn is_subtitle_file(path: &Path) -> bool {
    get_extension(path)
        .map(|ext| SUBTITLE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Find subtitle files next to a video that share its stem
/// (`Movie.srt`, `Movie.en.ass`, ...).
pub fn subtitle_companions(video: &Path) -> Vec<PathBuf> {
    if !is_video_file(video) {
        return Vec::new();
    }
    let (Some(dir), Some(stem)) = (video.parent(), video.file_stem().and_then(|s| s.to_str()))
    else {
        return Vec::new();
    };
    let prefix = format!("{}.", stem);

    let Ok(entries) = fs::read_dir(if dir.as_os_str().is_empty() { Path::new(".") } else { dir })
    else {
        return Vec::new();
    };

    let mut found: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && is_subtitle_file(p))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(&prefix))
                .unwrap_or(false)
        })
        .map(|p| dir.join(p.file_name().unwrap_or_default()))
        .collect();
    found.sort();
    found
}

/// Destination of a subtitle companion when its video goes to `dest_video`.
pub fn companion_destination(subtitle: &Path, video: &Path, dest_video: &Path) -> PathBuf {
    let video_stem = video.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    let dest_stem = dest_video.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    let name = subtitle
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let suffix = name.strip_prefix(video_stem).unwrap_or(name);
    let target_dir = dest_video.parent().unwrap_or_else(|| Path::new(""));
    target_dir.join(format!("{}{}", dest_stem, suffix))
}

/// Human readable byte size.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}
