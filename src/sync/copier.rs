//! Single-file synchronization.
//!
//! A file is copied only when its destination is missing or older than the
//! source. An existing destination can be backed up into a sibling `backup`
//! folder before it is replaced. Content is written to a temporary sibling and
//! renamed into place so a failed copy never leaves a truncated asset behind.

use chrono::Local;
use filetime::FileTime;
use std::fs::{self, File, Metadata};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::engine::SyncOptions;
use super::error::SyncError;

/// Name of the folder created next to overwritten files to hold backups.
pub const BACKUP_DIR: &str = "backup";

const TEMP_SUFFIX: &str = ".assetsync-tmp";

/// What happened to one file during a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    /// Content was written (or would be, in a dry run).
    Copied { bytes: u64 },
    /// Destination was already up to date.
    Skipped,
    /// The file could not be synced; the reason has been logged.
    Errored,
}

impl FileOutcome {
    /// Short status label for progress display.
    pub fn label(&self) -> &'static str {
        match self {
            FileOutcome::Copied { .. } => "copied",
            FileOutcome::Skipped => "skipped",
            FileOutcome::Errored => "error",
        }
    }

    pub fn is_copied(&self) -> bool {
        matches!(self, FileOutcome::Copied { .. })
    }
}

/// Bring `destination` up to date with `source`.
///
/// Never returns an error: failures are logged and reported as
/// [`FileOutcome::Errored`] so one bad file cannot stop a run.
pub fn sync_file(source: &Path, destination: &Path, options: &SyncOptions) -> FileOutcome {
    match try_sync_file(source, destination, options) {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(source = %source.display(), error = %e, "file sync failed");
            FileOutcome::Errored
        }
    }
}

fn try_sync_file(
    source: &Path,
    destination: &Path,
    options: &SyncOptions,
) -> Result<FileOutcome, SyncError> {
    let src_meta = fs::metadata(source).map_err(|e| SyncError::io(e, "reading", source))?;

    if options.dry_run {
        debug!(source = %source.display(), destination = %destination.display(), "dry run");
        return Ok(FileOutcome::Copied { bytes: src_meta.len() });
    }

    if !needs_copy(&src_meta, destination, options.force_copy)
        .map_err(|e| SyncError::io(e, "inspecting", destination))?
    {
        debug!(source = %source.display(), "up to date");
        return Ok(FileOutcome::Skipped);
    }

    if options.create_backup && destination.exists() {
        match backup_file(destination) {
            Ok(backup) => debug!(backup = %backup.display(), "backup created"),
            Err(e) => warn!(destination = %destination.display(), error = %e, "backup failed, copying anyway"),
        }
    }

    let bytes = copy_with_metadata(source, &src_meta, destination, options.preserve_timestamp)?;
    debug!(source = %source.display(), destination = %destination.display(), bytes, "copied");
    Ok(FileOutcome::Copied { bytes })
}

/// Staleness check: copy when forced, when the destination is missing, or when
/// the source is strictly newer.
pub fn needs_copy(src_meta: &Metadata, destination: &Path, force: bool) -> io::Result<bool> {
    if force {
        return Ok(true);
    }
    let dest_meta = match fs::metadata(destination) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(e),
    };
    Ok(src_meta.modified()? > dest_meta.modified()?)
}

/// Copy `file` into `<parent>/backup/<stem>_<YYYYmmdd_HHMMSS><.ext>`.
pub fn backup_file(file: &Path) -> Result<PathBuf, SyncError> {
    let parent = file.parent().unwrap_or_else(|| Path::new("."));
    let backup_dir = parent.join(BACKUP_DIR);
    fs::create_dir_all(&backup_dir).map_err(|e| SyncError::io(e, "creating", &backup_dir))?;

    let backup = backup_dir.join(backup_name(file, &Local::now().format("%Y%m%d_%H%M%S").to_string()));
    fs::copy(file, &backup).map_err(|e| SyncError::io(e, "backing up", file))?;
    Ok(backup)
}

fn backup_name(file: &Path, stamp: &str) -> String {
    let stem = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    match file.extension() {
        Some(ext) => format!("{}_{}.{}", stem, stamp, ext.to_string_lossy()),
        None => format!("{}_{}", stem, stamp),
    }
}

/// Copy content and permissions through a uniquely named temporary sibling,
/// then rename it over the destination. Returns the number of bytes written.
fn copy_with_metadata(
    source: &Path,
    src_meta: &Metadata,
    destination: &Path,
    preserve_timestamp: bool,
) -> Result<u64, SyncError> {
    let parent = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|e| SyncError::io(e, "creating", parent))?;

    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    // Deleted on drop unless persisted, so every early return cleans up
    let mut temp = tempfile::Builder::new()
        .prefix(&format!(".{}.", name))
        .suffix(TEMP_SUFFIX)
        .tempfile_in(parent)
        .map_err(|e| SyncError::io(e, "creating temporary file in", parent))?;

    let mut reader = File::open(source).map_err(|e| SyncError::io(e, "opening", source))?;
    let bytes = io::copy(&mut reader, temp.as_file_mut()).map_err(|e| SyncError::io(e, "copying", source))?;

    if preserve_timestamp {
        let atime = FileTime::from_last_access_time(src_meta);
        let mtime = FileTime::from_last_modification_time(src_meta);
        filetime::set_file_handle_times(temp.as_file(), Some(atime), Some(mtime))
            .map_err(|e| SyncError::io(e, "setting times on", temp.path()))?;
    }
    fs::set_permissions(temp.path(), src_meta.permissions())
        .map_err(|e| SyncError::io(e, "setting permissions on", temp.path()))?;

    temp.persist(destination)
        .map_err(|e| SyncError::io(e.error, "replacing", destination))?;
    Ok(bytes)
}
