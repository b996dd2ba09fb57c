//! File operations module
//! Provides the primitive copy, move and remove operations plus destination prechecks

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File operation errors
#[derive(Debug, Error)]
pub enum FileOpError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Trash error: {0}")]
    #[cfg(feature = "trash-support")]
    Trash(#[from] ::trash::Error),

    #[error("File not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    #[error("File already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("Not enough space in {path}: need {needed} bytes, {available} available")]
    NoSpace {
        path: PathBuf,
        needed: u64,
        available: u64,
    },

    #[error("Cannot restore {0}: {1}")]
    RestoreFailed(PathBuf, String),
}

pub type Result<T> = std::result::Result<T, FileOpError>;

/// How a move was carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveMethod {
    Rename,
    CopyAndDelete,
}

/// Primitive filesystem operations used by the operation engine.
///
/// Everything that mutates the disk goes through this trait so a session can
/// run against a substitute (tests use one to simulate a full disk).
pub trait FileOperations: Send + Sync {
    /// Copy a single file, preserving its modification time. Returns bytes copied.
    fn copy_file(&self, source: &Path, target: &Path) -> Result<u64>;

    /// Move a single file, falling back to copy + delete across filesystems
    fn move_file(&self, source: &Path, target: &Path) -> Result<MoveMethod>;

    /// Permanently remove a single file
    fn remove_file(&self, path: &Path) -> Result<()>;

    /// Free bytes on the volume holding `dir`, if it can be determined
    fn available_space(&self, dir: &Path) -> Option<u64>;

    /// Whether a rename from `source` into `dir` stays on one filesystem
    fn same_device(&self, source: &Path, dir: &Path) -> bool;
}

/// Default implementation of file operations
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultFileOperations;

impl DefaultFileOperations {
    pub fn new() -> Self {
        Self
    }
}

impl FileOperations for DefaultFileOperations {
    fn copy_file(&self, source: &Path, target: &Path) -> Result<u64> {
        if !source.is_file() {
            return Err(FileOpError::NotFound(source.to_path_buf()));
        }

        let bytes = fs::copy(source, target).map_err(|e| map_io_error(e, target))?;

        // fs::copy keeps permissions but not timestamps
        if let Ok(modified) = fs::metadata(source).and_then(|m| m.modified()) {
            let stamped = fs::File::options()
                .write(true)
                .open(target)
                .and_then(|f| f.set_modified(modified));
            if let Err(e) = stamped {
                tracing::debug!("Could not preserve mtime on {}: {}", target.display(), e);
            }
        }

        tracing::debug!("Copied {} bytes: {} -> {}", bytes, source.display(), target.display());
        Ok(bytes)
    }

    fn move_file(&self, source: &Path, target: &Path) -> Result<MoveMethod> {
        if !source.exists() {
            return Err(FileOpError::NotFound(source.to_path_buf()));
        }

        // Try rename first (fast, same filesystem)
        match fs::rename(source, target) {
            Ok(()) => {
                tracing::debug!("Moved: {} -> {}", source.display(), target.display());
                Ok(MoveMethod::Rename)
            }
            Err(e) if is_cross_device(&e) => {
                tracing::info!(
                    "Cross-filesystem move, using copy+delete: {} -> {}",
                    source.display(),
                    target.display()
                );
                self.copy_file(source, target)?;
                if let Err(e) = fs::remove_file(source) {
                    // Leave the filesystem as it was: the copy is the only new artifact
                    let _ = fs::remove_file(target);
                    return Err(map_io_error(e, source));
                }
                Ok(MoveMethod::CopyAndDelete)
            }
            Err(e) => Err(map_io_error(e, source)),
        }
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).map_err(|e| map_io_error(e, path))?;
        tracing::warn!("Permanently deleted: {}", path.display());
        Ok(())
    }

    fn available_space(&self, dir: &Path) -> Option<u64> {
        let dir = dir.canonicalize().ok()?;
        let disks = sysinfo::Disks::new_with_refreshed_list();

        // Deepest mount point containing the directory
        disks
            .list()
            .iter()
            .filter(|disk| dir.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| disk.available_space())
    }

    #[cfg(unix)]
    fn same_device(&self, source: &Path, dir: &Path) -> bool {
        use std::os::unix::fs::MetadataExt;

        match (fs::metadata(source), fs::metadata(dir)) {
            (Ok(a), Ok(b)) => a.dev() == b.dev(),
            _ => false,
        }
    }

    #[cfg(not(unix))]
    fn same_device(&self, source: &Path, dir: &Path) -> bool {
        // Compare drive / share prefixes
        let prefix = |p: &Path| {
            p.canonicalize()
                .ok()
                .and_then(|c| c.components().next().map(|c| c.as_os_str().to_os_string()))
        };
        match (prefix(source), prefix(dir)) {
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(&b),
            _ => false,
        }
    }
}

/// Validate a copy or move of `source` into `target_dir` before touching the disk.
///
/// Returns the destination path, inside the canonical form of `target_dir`.
/// A name collision is refused unless
/// `overwrite` is set; `needs_space` requests the free-space check.
pub fn precheck_destination(
    ops: &dyn FileOperations,
    source: &Path,
    target_dir: &Path,
    overwrite: bool,
    needs_space: bool,
) -> Result<PathBuf> {
    let source_meta = match fs::metadata(source) {
        Ok(meta) if meta.is_file() => meta,
        Ok(_) => {
            return Err(FileOpError::InvalidOperation(format!(
                "Not a file: {}",
                source.display()
            )))
        }
        Err(e) => return Err(map_io_error(e, source)),
    };

    let dir_meta = match fs::metadata(target_dir) {
        Ok(meta) if meta.is_dir() => meta,
        Ok(_) => {
            return Err(FileOpError::InvalidOperation(
                "Target must be a directory".to_string(),
            ))
        }
        Err(e) => return Err(map_io_error(e, target_dir)),
    };

    if dir_meta.permissions().readonly() {
        return Err(FileOpError::PermissionDenied(target_dir.to_path_buf()));
    }
    let target_dir = &target_dir.canonicalize().map_err(|e| map_io_error(e, target_dir))?;

    let file_name = source
        .file_name()
        .ok_or_else(|| FileOpError::InvalidOperation("Invalid file name".to_string()))?;
    let target = target_dir.join(file_name);

    if same_file(source, &target) {
        return Err(FileOpError::AlreadyExists(target));
    }

    if target.exists() && !overwrite {
        return Err(FileOpError::AlreadyExists(target));
    }

    if needs_space {
        let needed = source_meta.len();
        if let Some(available) = ops.available_space(target_dir) {
            if available < needed {
                return Err(FileOpError::NoSpace {
                    path: target_dir.to_path_buf(),
                    needed,
                    available,
                });
            }
        }
    }

    Ok(target)
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Check if an error came from renaming across filesystems.
/// Unix: EXDEV = 18, Windows: ERROR_NOT_SAME_DEVICE = 0x11 (17)
fn is_cross_device(e: &io::Error) -> bool {
    match e.raw_os_error() {
        Some(18) => cfg!(unix),
        Some(17) => cfg!(windows),
        _ => false,
    }
}

/// Check for a full disk.
/// Unix: ENOSPC = 28, Windows: ERROR_DISK_FULL = 112, ERROR_HANDLE_DISK_FULL = 39
fn is_disk_full(e: &io::Error) -> bool {
    match e.raw_os_error() {
        Some(28) => cfg!(unix),
        Some(112) | Some(39) => cfg!(windows),
        _ => false,
    }
}

pub(crate) fn map_io_error(e: io::Error, path: &Path) -> FileOpError {
    if is_disk_full(&e) {
        return FileOpError::NoSpace {
            path: path.to_path_buf(),
            needed: 0,
            available: 0,
        };
    }
    match e.kind() {
        io::ErrorKind::NotFound => FileOpError::NotFound(path.to_path_buf()),
        io::ErrorKind::PermissionDenied => FileOpError::PermissionDenied(path.to_path_buf()),
        io::ErrorKind::AlreadyExists => FileOpError::AlreadyExists(path.to_path_buf()),
        _ => FileOpError::Io(e),
    }
}
