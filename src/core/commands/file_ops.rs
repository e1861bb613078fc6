//! Single-path file commands: move, copy, delete, rename, mkdir.

use super::{Command, CommandContext, CommandCore, CommandOptions, ExecutionScope};
use crate::models::command::CommandKind;
use crate::models::journal::{FileOperationDetails, JournalEntry, JournalEntryType};
use crate::models::preflight::{PreflightIssue, Severity};
use crate::utils::fs::{
    backup_path_for, companion_destination, copy_path, ensure_parent, is_dir_empty, move_path,
    path_size, remove_created_dirs, remove_path, subtitle_companions,
};
use crate::utils::hash;
use crate::{Error, Result};
use std::any::Any;
use std::fs;
use std::path::{Path, PathBuf};

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn hash_if_file(path: &Path) -> Option<String> {
    if path.is_file() {
        hash::sha256_file(path).ok()
    } else {
        None
    }
}

/// Create the missing ancestors of `path`'s parent. Returns them deepest first.
fn prepare_parent(path: &Path, create_dirs: bool) -> Result<Vec<PathBuf>> {
    let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(Vec::new());
    };
    if parent.exists() {
        return Ok(Vec::new());
    }
    if !create_dirs {
        return Err(Error::PathNotFound(parent.display().to_string()));
    }

    let missing: Vec<PathBuf> = parent
        .ancestors()
        .take_while(|p| !p.as_os_str().is_empty() && !p.exists())
        .map(Path::to_path_buf)
        .collect();
    fs::create_dir_all(parent)?;
    Ok(missing)
}

/// Park an existing destination at `<dest>.backup` when overwriting.
fn displace_existing(dest: &Path, overwrite: bool) -> Result<Option<PathBuf>> {
    if !dest.exists() {
        return Ok(None);
    }
    if !overwrite {
        return Err(Error::FileAlreadyExists(dest.display().to_string()));
    }
    let backup = backup_path_for(dest);
    if backup.exists() {
        remove_path(&backup)?;
    }
    move_path(dest, &backup)?;
    tracing::debug!("Parked existing destination at {:?}", backup);
    Ok(Some(backup))
}

/// Carry subtitle companions of `video` along to `dest_video`.
fn transfer_companions<F>(
    companions: &[PathBuf],
    video: &Path,
    dest_video: &Path,
    transfer: F,
) -> Vec<(PathBuf, PathBuf)>
where
    F: Fn(&Path, &Path) -> Result<()>,
{
    let mut done = Vec::new();
    for subtitle in companions {
        let target = companion_destination(subtitle, video, dest_video);
        if target.exists() {
            tracing::warn!("Subtitle target exists, leaving {:?} in place", subtitle);
            continue;
        }
        match transfer(subtitle, &target) {
            Ok(()) => done.push((subtitle.clone(), target)),
            Err(e) => tracing::warn!("Could not carry subtitle {:?}: {}", subtitle, e),
        }
    }
    done
}

fn file_problems(source: &Path, destination: &Path, overwrite: bool, create_dirs: bool) -> Option<String> {
    if !source.exists() {
        return Some(format!("Source does not exist: {}", source.display()));
    }
    if source == destination {
        return Some("Source and destination are the same".to_string());
    }
    if destination.exists() && !overwrite {
        return Some(format!("Destination already exists: {}", destination.display()));
    }
    if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
        if !parent.exists() && !create_dirs {
            return Some(format!(
                "Destination directory does not exist: {}",
                parent.display()
            ));
        }
    }
    None
}

fn overwrite_conflict(issue: &PreflightIssue) -> bool {
    issue.checker_name == "FileConflict" && issue.severity == Severity::Error
}

// ========== MOVE ==========

/// Move a file or directory, carrying subtitle companions of videos.
pub struct MoveFileCommand {
    core: CommandCore,
    source: PathBuf,
    destination: PathBuf,
    overwrite: bool,
    create_dirs: bool,
    move_subtitles: bool,
}

impl MoveFileCommand {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>, context: CommandContext) -> Self {
        let source = source.into();
        let destination = destination.into();
        let description = format!("Move {} to {}", display_name(&source), destination.display());
        let move_subtitles = context.defaults.move_subtitles;
        Self {
            core: CommandCore::new(CommandKind::MoveFile, description, context),
            source,
            destination,
            overwrite: false,
            create_dirs: true,
            move_subtitles,
        }
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn create_dirs(mut self, create_dirs: bool) -> Self {
        self.create_dirs = create_dirs;
        self
    }

    pub fn with_subtitles(mut self, move_subtitles: bool) -> Self {
        self.move_subtitles = move_subtitles;
        self
    }

    pub fn with_options(mut self, options: CommandOptions) -> Self {
        self.core.set_options(options);
        self
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }
}

impl Command for MoveFileCommand {
    fn core(&self) -> &CommandCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut CommandCore {
        &mut self.core
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn preflight_target(&self) -> Option<(PathBuf, Option<PathBuf>)> {
        Some((self.source.clone(), Some(self.destination.clone())))
    }

    fn staging_targets(&self) -> Vec<(PathBuf, &'static str)> {
        vec![(self.source.clone(), "move")]
    }

    fn journal_entry(&self) -> Option<JournalEntry> {
        let mut details = FileOperationDetails::new("move", &self.source).with_destination(&self.destination);
        details.overwrite = self.overwrite;
        details.create_dirs = self.create_dirs;
        details.file_size = Some(path_size(&self.source));
        Some(JournalEntry::new(JournalEntryType::FileMove).with_details(details))
    }

    fn validation_problem(&self) -> Option<String> {
        file_problems(&self.source, &self.destination, self.overwrite, self.create_dirs)
    }

    fn tolerates(&self, issue: &PreflightIssue) -> bool {
        self.overwrite && overwrite_conflict(issue)
    }

    fn execute_impl(&mut self, scope: &mut ExecutionScope) -> Result<()> {
        let companions = if self.move_subtitles {
            subtitle_companions(&self.source)
        } else {
            Vec::new()
        };

        let created_dirs = prepare_parent(&self.destination, self.create_dirs)?;
        let backup = displace_existing(&self.destination, self.overwrite)?;

        move_path(&self.source, &self.destination)?;
        tracing::debug!("Moved: {:?} -> {:?}", self.source, self.destination);
        scope.result.add_deleted(&self.source);
        scope.result.add_created(&self.destination);

        let moved = transfer_companions(&companions, &self.source, &self.destination, move_path);
        for (from, to) in &moved {
            scope.result.add_deleted(from);
            scope.result.add_created(to);
        }

        scope.undo_data.store("original_source", &self.source)?;
        scope.undo_data.store("destination", &self.destination)?;
        scope.undo_data.store("backup_path", &backup)?;
        scope.undo_data.store("created_dirs", &created_dirs)?;
        scope.undo_data.store("companions", &moved)?;

        let hash = hash_if_file(&self.destination);
        if let Some(details) = scope.details_mut() {
            details.backup_path = backup;
            details.file_hash = hash;
            details.metadata.insert("companions".to_string(), serde_json::to_value(&moved)?);
            details
                .metadata
                .insert("created_dirs".to_string(), serde_json::to_value(&created_dirs)?);
        }
        Ok(())
    }

    fn undo_impl(&mut self, scope: &mut ExecutionScope) -> Result<()> {
        let source = scope.undo_data.path("original_source").unwrap_or_else(|| self.source.clone());
        let dest = scope.undo_data.path("destination").unwrap_or_else(|| self.destination.clone());

        if !dest.exists() {
            return Err(Error::Undo(format!("Moved file no longer at {}", dest.display())));
        }
        if source.exists() {
            return Err(Error::Undo(format!(
                "Original location is occupied: {}",
                source.display()
            )));
        }

        ensure_parent(&source)?;
        move_path(&dest, &source)?;
        scope.result.add_deleted(&dest);
        scope.result.add_created(&source);

        let companions: Vec<(PathBuf, PathBuf)> = scope.undo_data.get("companions").unwrap_or_default();
        for (from, to) in companions {
            if to.exists() && !from.exists() {
                move_path(&to, &from)?;
                scope.result.add_created(&from);
            }
        }

        if let Some(backup) = scope
            .undo_data
            .get::<Option<PathBuf>>("backup_path")
            .flatten()
            .filter(|b| b.exists())
        {
            move_path(&backup, &dest)?;
            scope.result.add_modified(&dest);
        }

        let created: Vec<PathBuf> = scope.undo_data.get("created_dirs").unwrap_or_default();
        remove_created_dirs(&created);
        Ok(())
    }
}

// ========== COPY ==========

/// Copy a file or directory tree, carrying subtitle companions of videos.
pub struct CopyFileCommand {
    core: CommandCore,
    source: PathBuf,
    destination: PathBuf,
    overwrite: bool,
    create_dirs: bool,
    copy_subtitles: bool,
}

impl CopyFileCommand {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>, context: CommandContext) -> Self {
        let source = source.into();
        let destination = destination.into();
        let description = format!("Copy {} to {}", display_name(&source), destination.display());
        let copy_subtitles = context.defaults.move_subtitles;
        Self {
            core: CommandCore::new(CommandKind::CopyFile, description, context),
            source,
            destination,
            overwrite: false,
            create_dirs: true,
            copy_subtitles,
        }
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn create_dirs(mut self, create_dirs: bool) -> Self {
        self.create_dirs = create_dirs;
        self
    }

    pub fn with_subtitles(mut self, copy_subtitles: bool) -> Self {
        self.copy_subtitles = copy_subtitles;
        self
    }

    pub fn with_options(mut self, options: CommandOptions) -> Self {
        self.core.set_options(options);
        self
    }
}

impl Command for CopyFileCommand {
    fn core(&self) -> &CommandCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut CommandCore {
        &mut self.core
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn preflight_target(&self) -> Option<(PathBuf, Option<PathBuf>)> {
        Some((self.source.clone(), Some(self.destination.clone())))
    }

    /// Only a destination about to be replaced needs a safety copy.
    fn staging_targets(&self) -> Vec<(PathBuf, &'static str)> {
        if self.overwrite && self.destination.exists() {
            vec![(self.destination.clone(), "copy_overwrite")]
        } else {
            Vec::new()
        }
    }

    fn journal_entry(&self) -> Option<JournalEntry> {
        let mut details = FileOperationDetails::new("copy", &self.source).with_destination(&self.destination);
        details.overwrite = self.overwrite;
        details.create_dirs = self.create_dirs;
        details.file_size = Some(path_size(&self.source));
        Some(JournalEntry::new(JournalEntryType::FileCopy).with_details(details))
    }

    fn validation_problem(&self) -> Option<String> {
        file_problems(&self.source, &self.destination, self.overwrite, self.create_dirs)
    }

    fn tolerates(&self, issue: &PreflightIssue) -> bool {
        self.overwrite && overwrite_conflict(issue)
    }

    fn execute_impl(&mut self, scope: &mut ExecutionScope) -> Result<()> {
        let created_dirs = prepare_parent(&self.destination, self.create_dirs)?;
        let backup = displace_existing(&self.destination, self.overwrite)?;

        let bytes = copy_path(&self.source, &self.destination)?;
        tracing::debug!("Copied {} bytes: {:?} -> {:?}", bytes, self.source, self.destination);
        scope.result.add_created(&self.destination);

        let companions = if self.copy_subtitles {
            subtitle_companions(&self.source)
        } else {
            Vec::new()
        };
        let copied = transfer_companions(&companions, &self.source, &self.destination, |from, to| {
            copy_path(from, to).map(|_| ())
        });
        for (_, to) in &copied {
            scope.result.add_created(to);
        }

        scope.undo_data.store("destination", &self.destination)?;
        scope.undo_data.store("backup_path", &backup)?;
        scope.undo_data.store("created_dirs", &created_dirs)?;
        scope.undo_data.store("companions", &copied)?;

        let hash = hash_if_file(&self.destination);
        if let Some(details) = scope.details_mut() {
            details.backup_path = backup;
            details.file_hash = hash;
            details.metadata.insert("companions".to_string(), serde_json::to_value(&copied)?);
            details
                .metadata
                .insert("created_dirs".to_string(), serde_json::to_value(&created_dirs)?);
        }
        Ok(())
    }

    fn undo_impl(&mut self, scope: &mut ExecutionScope) -> Result<()> {
        let dest = scope.undo_data.path("destination").unwrap_or_else(|| self.destination.clone());

        let companions: Vec<(PathBuf, PathBuf)> = scope.undo_data.get("companions").unwrap_or_default();
        for (_, to) in companions {
            if to.exists() {
                remove_path(&to)?;
                scope.result.add_deleted(&to);
            }
        }

        if dest.exists() {
            remove_path(&dest)?;
            scope.result.add_deleted(&dest);
        }

        if let Some(backup) = scope
            .undo_data
            .get::<Option<PathBuf>>("backup_path")
            .flatten()
            .filter(|b| b.exists())
        {
            move_path(&backup, &dest)?;
            scope.result.add_modified(&dest);
        }

        let created: Vec<PathBuf> = scope.undo_data.get("created_dirs").unwrap_or_default();
        remove_created_dirs(&created);
        Ok(())
    }
}

// ========== DELETE ==========

/// Delete a file or directory, either into a trash directory or for good.
pub struct DeleteFileCommand {
    core: CommandCore,
    path: PathBuf,
    use_trash: bool,
    trash_directory: Option<PathBuf>,
}

impl DeleteFileCommand {
    /// Recoverable delete: the path is moved into `trash_directory`.
    pub fn to_trash(path: impl Into<PathBuf>, trash_directory: impl Into<PathBuf>, context: CommandContext) -> Self {
        let path = path.into();
        let description = format!("Delete {}", display_name(&path));
        Self {
            core: CommandCore::new(CommandKind::DeleteFile, description, context),
            path,
            use_trash: true,
            trash_directory: Some(trash_directory.into()),
        }
    }

    /// Recoverable delete into the context's default trash directory.
    pub fn recoverable(path: impl Into<PathBuf>, context: CommandContext) -> Self {
        let trash = context.defaults.trash_directory.clone();
        Self::to_trash(path, trash, context)
    }

    /// Permanent delete. Cannot be undone.
    pub fn permanent(path: impl Into<PathBuf>, context: CommandContext) -> Self {
        let path = path.into();
        let description = format!("Permanently delete {}", display_name(&path));
        Self {
            core: CommandCore::new(CommandKind::DeleteFile, description, context),
            path,
            use_trash: false,
            trash_directory: None,
        }
    }

    pub fn with_options(mut self, options: CommandOptions) -> Self {
        self.core.set_options(options);
        self
    }

    fn trash_path(&self) -> Option<PathBuf> {
        let trash = self.trash_directory.as_ref()?;
        let short_id = self.core.id.simple().to_string();
        Some(trash.join(format!("{}.{}", display_name(&self.path), &short_id[..8])))
    }
}

impl Command for DeleteFileCommand {
    fn core(&self) -> &CommandCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut CommandCore {
        &mut self.core
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn preflight_target(&self) -> Option<(PathBuf, Option<PathBuf>)> {
        Some((self.path.clone(), None))
    }

    fn staging_targets(&self) -> Vec<(PathBuf, &'static str)> {
        vec![(self.path.clone(), "delete")]
    }

    fn journal_entry(&self) -> Option<JournalEntry> {
        let entry_type = if self.path.is_dir() {
            JournalEntryType::DirectoryDelete
        } else {
            JournalEntryType::FileDelete
        };
        let mut details = FileOperationDetails::new("delete", &self.path);
        details.use_trash = self.use_trash;
        details.file_size = Some(path_size(&self.path));
        details.file_hash = hash_if_file(&self.path);
        Some(JournalEntry::new(entry_type).with_details(details))
    }

    fn validation_problem(&self) -> Option<String> {
        if !self.path.exists() {
            return Some(format!("Path does not exist: {}", self.path.display()));
        }
        if let Some(trash) = &self.trash_directory {
            if trash.starts_with(&self.path) {
                return Some(format!(
                    "Trash directory {} lies inside {}",
                    trash.display(),
                    self.path.display()
                ));
            }
        }
        None
    }

    fn supports_undo(&self) -> bool {
        self.use_trash
    }

    fn execute_impl(&mut self, scope: &mut ExecutionScope) -> Result<()> {
        let trash_path = match (&self.trash_directory, self.trash_path()) {
            (Some(trash), Some(target)) if self.use_trash => {
                fs::create_dir_all(trash)?;
                move_path(&self.path, &target)?;
                tracing::debug!("Moved to trash: {:?} -> {:?}", self.path, target);
                Some(target)
            }
            _ => {
                remove_path(&self.path)?;
                tracing::debug!("Deleted permanently: {:?}", self.path);
                None
            }
        };
        scope.result.add_deleted(&self.path);

        scope.undo_data.store("original_path", &self.path)?;
        scope.undo_data.store("trash_path", &trash_path)?;
        if let Some(details) = scope.details_mut() {
            details.backup_path = trash_path;
        }
        Ok(())
    }

    fn undo_impl(&mut self, scope: &mut ExecutionScope) -> Result<()> {
        let original = scope.undo_data.path("original_path").unwrap_or_else(|| self.path.clone());
        let trash_path = scope
            .undo_data
            .get::<Option<PathBuf>>("trash_path")
            .flatten()
            .ok_or_else(|| Error::Rollback(format!("{} has no trash copy", original.display())))?;

        if !trash_path.exists() {
            return Err(Error::Undo(format!(
                "Trash copy is gone: {}",
                trash_path.display()
            )));
        }
        if original.exists() {
            return Err(Error::Undo(format!(
                "Original location is occupied: {}",
                original.display()
            )));
        }

        ensure_parent(&original)?;
        move_path(&trash_path, &original)?;
        scope.result.add_created(&original);
        Ok(())
    }
}

// ========== RENAME ==========

/// Rename a path within its parent directory.
pub struct RenameFileCommand {
    core: CommandCore,
    path: PathBuf,
    new_name: String,
}

impl RenameFileCommand {
    pub fn new(path: impl Into<PathBuf>, new_name: impl Into<String>, context: CommandContext) -> Self {
        let path = path.into();
        let new_name = new_name.into();
        let description = format!("Rename {} to {}", display_name(&path), new_name);
        Self {
            core: CommandCore::new(CommandKind::RenameFile, description, context),
            path,
            new_name,
        }
    }

    pub fn with_options(mut self, options: CommandOptions) -> Self {
        self.core.set_options(options);
        self
    }

    pub fn target(&self) -> PathBuf {
        self.path.with_file_name(&self.new_name)
    }
}

impl Command for RenameFileCommand {
    fn core(&self) -> &CommandCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut CommandCore {
        &mut self.core
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn preflight_target(&self) -> Option<(PathBuf, Option<PathBuf>)> {
        Some((self.path.clone(), Some(self.target())))
    }

    fn journal_entry(&self) -> Option<JournalEntry> {
        let details = FileOperationDetails::new("rename", &self.path).with_destination(self.target());
        Some(JournalEntry::new(JournalEntryType::FileRename).with_details(details))
    }

    fn validation_problem(&self) -> Option<String> {
        let name = self.new_name.trim();
        if name.is_empty() || name == "." || name == ".." {
            return Some("New name is empty".to_string());
        }
        if self.new_name.contains(['/', '\\']) {
            return Some(format!("New name must not contain a path separator: {}", self.new_name));
        }
        if !self.path.exists() {
            return Some(format!("Path does not exist: {}", self.path.display()));
        }
        let target = self.target();
        if target == self.path {
            return Some("New name equals the current name".to_string());
        }
        if target.exists() {
            return Some(format!("A file named {} already exists", self.new_name));
        }
        None
    }

    fn execute_impl(&mut self, scope: &mut ExecutionScope) -> Result<()> {
        let target = self.target();
        move_path(&self.path, &target)?;
        tracing::debug!("Renamed: {:?} -> {:?}", self.path, target);
        scope.result.add_deleted(&self.path);
        scope.result.add_created(&target);

        scope.undo_data.store("original_path", &self.path)?;
        scope.undo_data.store("new_path", &target)?;
        let hash = hash_if_file(&target);
        if let Some(details) = scope.details_mut() {
            details.file_hash = hash;
        }
        Ok(())
    }

    fn undo_impl(&mut self, scope: &mut ExecutionScope) -> Result<()> {
        let original = scope.undo_data.path("original_path").unwrap_or_else(|| self.path.clone());
        let renamed = scope.undo_data.path("new_path").unwrap_or_else(|| self.target());

        if !renamed.exists() {
            return Err(Error::Undo(format!("Renamed path is gone: {}", renamed.display())));
        }
        if original.exists() {
            return Err(Error::Undo(format!(
                "Original name is taken: {}",
                original.display()
            )));
        }
        move_path(&renamed, &original)?;
        scope.result.add_deleted(&renamed);
        scope.result.add_created(&original);
        Ok(())
    }
}

// ========== CREATE DIRECTORY ==========

/// Create a directory (and missing parents).
pub struct CreateDirectoryCommand {
    core: CommandCore,
    path: PathBuf,
    parents: bool,
}

impl CreateDirectoryCommand {
    pub fn new(path: impl Into<PathBuf>, context: CommandContext) -> Self {
        let path = path.into();
        let description = format!("Create directory {}", path.display());
        Self {
            core: CommandCore::new(CommandKind::CreateDirectory, description, context),
            path,
            parents: true,
        }
    }

    pub fn parents(mut self, parents: bool) -> Self {
        self.parents = parents;
        self
    }

    pub fn with_options(mut self, options: CommandOptions) -> Self {
        self.core.set_options(options);
        self
    }
}

impl Command for CreateDirectoryCommand {
    fn core(&self) -> &CommandCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut CommandCore {
        &mut self.core
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn preflight_target(&self) -> Option<(PathBuf, Option<PathBuf>)> {
        Some((self.path.clone(), None))
    }

    fn journal_entry(&self) -> Option<JournalEntry> {
        let mut details = FileOperationDetails::new("create_directory", &self.path);
        details.create_dirs = self.parents;
        Some(JournalEntry::new(JournalEntryType::DirectoryCreate).with_details(details))
    }

    fn validation_problem(&self) -> Option<String> {
        if self.path.exists() {
            return Some(format!("Path already exists: {}", self.path.display()));
        }
        if !self.parents {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                if !parent.exists() {
                    return Some(format!("Parent directory does not exist: {}", parent.display()));
                }
            }
        }
        None
    }

    fn execute_impl(&mut self, scope: &mut ExecutionScope) -> Result<()> {
        let created: Vec<PathBuf> = self
            .path
            .ancestors()
            .take_while(|p| !p.as_os_str().is_empty() && !p.exists())
            .map(Path::to_path_buf)
            .collect();

        if self.parents {
            fs::create_dir_all(&self.path)?;
        } else {
            fs::create_dir(&self.path)?;
        }
        tracing::debug!("Created directory: {:?}", self.path);
        scope.result.add_created(&self.path);
        scope.undo_data.store("created_dirs", &created)?;
        Ok(())
    }

    fn undo_impl(&mut self, scope: &mut ExecutionScope) -> Result<()> {
        let created: Vec<PathBuf> = scope.undo_data.get("created_dirs").unwrap_or_default();
        for dir in &created {
            if !dir.exists() {
                continue;
            }
            if !is_dir_empty(dir) {
                if *dir == self.path {
                    return Err(Error::Undo(format!("directory not empty: {}", dir.display())));
                }
                tracing::warn!("Directory {:?} is not empty, leaving it in place", dir);
                break;
            }
            fs::remove_dir(dir)?;
            scope.result.add_deleted(dir);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::command::CommandStatus;
    use tempfile::TempDir;

    fn ctx() -> CommandContext {
        CommandContext::new()
    }

    #[test]
    fn test_move_with_overwrite_restores_backup_on_undo() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("A.mkv");
        let dest = temp.path().join("dest/A.mkv");
        fs::write(&src, b"new").unwrap();
        fs::create_dir_all(dest.parent().unwrap()).unwrap();
        fs::write(&dest, b"old").unwrap();

        let mut cmd = MoveFileCommand::new(&src, &dest, ctx()).overwrite(true);
        assert!(cmd.execute().is_success());
        assert_eq!(fs::read(&dest).unwrap(), b"new");
        assert!(backup_path_for(&dest).exists());

        assert!(cmd.undo().is_success());
        assert_eq!(fs::read(&src).unwrap(), b"new");
        assert_eq!(fs::read(&dest).unwrap(), b"old");
        assert!(!backup_path_for(&dest).exists());
    }

    #[test]
    fn test_move_creates_and_removes_parent_dirs() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("a.mkv");
        fs::write(&src, b"x").unwrap();
        let dest = temp.path().join("x/y/a.mkv");

        let mut cmd = MoveFileCommand::new(&src, &dest, ctx());
        assert!(cmd.execute().is_success());
        assert!(dest.exists());

        assert!(cmd.undo().is_success());
        assert!(src.exists());
        assert!(!temp.path().join("x").exists());
    }

    #[test]
    fn test_move_carries_subtitles() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("Movie.mkv");
        fs::write(&src, b"v").unwrap();
        fs::write(temp.path().join("Movie.en.srt"), b"s").unwrap();
        let dest = temp.path().join("lib/Film (2020).mkv");

        let mut cmd = MoveFileCommand::new(&src, &dest, ctx());
        let result = cmd.execute();
        assert!(result.is_success());
        let moved_sub = temp.path().join("lib/Film (2020).en.srt");
        assert!(moved_sub.exists());
        assert!(result.created_files.contains(&moved_sub));

        assert!(cmd.undo().is_success());
        assert!(temp.path().join("Movie.en.srt").exists());
        assert!(!moved_sub.exists());
    }

    #[test]
    fn test_copy_without_subtitles() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("Movie.mkv");
        fs::write(&src, b"v").unwrap();
        fs::write(temp.path().join("Movie.srt"), b"s").unwrap();
        let dest = temp.path().join("out/Movie.mkv");

        let mut cmd = CopyFileCommand::new(&src, &dest, ctx()).with_subtitles(false);
        assert!(cmd.execute().is_success());
        assert!(dest.exists());
        assert!(!temp.path().join("out/Movie.srt").exists());
    }

    #[test]
    fn test_delete_to_trash_and_restore() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("old.mkv");
        fs::write(&file, b"x").unwrap();
        let trash = temp.path().join(".trash");

        let mut cmd = DeleteFileCommand::to_trash(&file, &trash, ctx());
        assert!(!cmd.can_undo());
        assert!(cmd.execute().is_success());
        assert!(!file.exists());
        assert_eq!(fs::read_dir(&trash).unwrap().count(), 1);

        assert!(cmd.undo().is_success());
        assert_eq!(fs::read(&file).unwrap(), b"x");
        assert_eq!(cmd.status(), CommandStatus::Undone);
    }

    #[test]
    fn test_permanent_delete_is_not_undoable() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("gone.mkv");
        fs::write(&file, b"x").unwrap();

        let mut cmd = DeleteFileCommand::permanent(&file, ctx());
        assert!(!cmd.supports_undo());
        assert!(cmd.execute().is_success());
        assert!(!cmd.can_undo());

        let undo = cmd.undo();
        assert_eq!(undo.error.unwrap().kind, ErrorKind::Rollback);
    }

    #[test]
    fn test_rename_rejects_separators() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("a.mkv");
        fs::write(&file, b"x").unwrap();

        assert!(!RenameFileCommand::new(&file, "sub/b.mkv", ctx()).validate());

        let mut cmd = RenameFileCommand::new(&file, "b.mkv", ctx());
        assert!(cmd.execute().is_success());
        assert!(temp.path().join("b.mkv").exists());
        assert!(cmd.undo().is_success());
        assert!(file.exists());
    }

    #[test]
    fn test_create_directory_undo_leaves_non_empty() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("Season 01");

        let mut cmd = CreateDirectoryCommand::new(&dir, ctx());
        assert!(cmd.execute().is_success());
        fs::write(dir.join("ep1.mkv"), b"x").unwrap();

        let result = cmd.undo();
        assert!(!result.is_success());
        assert_eq!(result.error.unwrap().kind, ErrorKind::Undo);
        assert_eq!(cmd.status(), CommandStatus::Completed);
        assert!(cmd.can_undo());
        assert!(dir.join("ep1.mkv").exists());

        fs::remove_file(dir.join("ep1.mkv")).unwrap();
        assert!(cmd.undo().is_success());
        assert_eq!(cmd.status(), CommandStatus::Undone);
        assert!(!dir.exists());
    }

    #[test]
    fn test_create_directory_undo_keeps_non_empty_parent() {
        let temp = TempDir::new().unwrap();
        let show = temp.path().join("Show");
        let season = show.join("Season 01");

        let mut cmd = CreateDirectoryCommand::new(&season, ctx());
        assert!(cmd.execute().is_success());
        fs::write(show.join("poster.jpg"), b"x").unwrap();

        assert!(cmd.undo().is_success());
        assert!(!season.exists());
        assert!(show.join("poster.jpg").exists());
    }

    #[test]
    fn test_create_directory_on_existing_path_fails_validation() {
        let temp = TempDir::new().unwrap();
        let mut cmd = CreateDirectoryCommand::new(temp.path(), ctx());
        let result = cmd.execute();
        assert_eq!(result.status, CommandStatus::Failed);
        assert_eq!(result.error.unwrap().kind, ErrorKind::Validation);
    }
}
