//! Application error types

use std::path::PathBuf;
use thiserror::Error;

/// Why a file could not be turned into an artifact.
///
/// Captured into the cache as a terminal error artifact; never thrown past
/// the load pipeline.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecodeError {
    #[error("file could not be read")]
    Unreadable,

    #[error("format variant is not supported")]
    UnsupportedVariant,

    #[error("file data is corrupt")]
    CorruptData,

    #[error("decoding took too long")]
    Timeout,
}

/// Result of a decode attempt that may have been abandoned
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeFailure {
    /// The load was cancelled at a checkpoint; not an error
    #[error("decode cancelled")]
    Cancelled,

    #[error(transparent)]
    Error(#[from] DecodeError),
}

impl From<image::ImageError> for DecodeError {
    fn from(e: image::ImageError) -> Self {
        use image::ImageError;
        match e {
            ImageError::IoError(e) => e.into(),
            ImageError::Unsupported(_) => DecodeError::UnsupportedVariant,
            _ => DecodeError::CorruptData,
        }
    }
}

impl From<image::ImageError> for DecodeFailure {
    fn from(e: image::ImageError) -> Self {
        DecodeFailure::Error(e.into())
    }
}

impl From<std::io::Error> for DecodeError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::InvalidData => {
                DecodeError::CorruptData
            }
            _ => DecodeError::Unreadable,
        }
    }
}

impl From<std::io::Error> for DecodeFailure {
    fn from(e: std::io::Error) -> Self {
        DecodeFailure::Error(e.into())
    }
}

/// Errors surfaced synchronously by copy / move / delete / undo.
///
/// A call that fails leaves the navigation list, cache and undo stack untouched.
#[derive(Error, Debug)]
pub enum FileOperationError {
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    #[error("Destination already exists: {0}")]
    DestinationExists(PathBuf),

    #[error("Source missing: {0}")]
    SourceMissing(PathBuf),

    #[error("Not enough free space in {0}")]
    NoSpace(PathBuf),

    #[error("Last operation cannot be undone: {0}")]
    UndoNotReversible(String),

    #[error("Nothing to undo")]
    NothingToUndo,

    #[error("File operation failed: {0}")]
    Io(String),
}

impl From<app_fs::FileOpError> for FileOperationError {
    fn from(e: app_fs::FileOpError) -> Self {
        use app_fs::FileOpError;
        match e {
            FileOpError::NotFound(p) => FileOperationError::SourceMissing(p),
            FileOpError::PermissionDenied(p) => FileOperationError::PermissionDenied(p),
            FileOpError::AlreadyExists(p) => FileOperationError::DestinationExists(p),
            FileOpError::NoSpace { path, .. } => FileOperationError::NoSpace(path),
            other => FileOperationError::Io(other.to_string()),
        }
    }
}

/// Main application error type
#[derive(Error, Debug)]
pub enum AppError {
    // ===== Recoverable Errors (notify user, continue) =====
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Folder not found: {0}")]
    FolderNotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("No file under the cursor")]
    NoActiveEntry,

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    FileOperation(#[from] FileOperationError),

    // ===== Internal (force-evict and retry) =====
    #[error("Cache inconsistency for {path}: {reason}")]
    CacheInconsistency { path: String, reason: String },

    // ===== Fatal Errors (application termination) =====
    #[error("System resource exhaustion: {0}")]
    SystemResource(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Initialization failed: {0}")]
    Init(String),
}

impl AppError {
    /// Is this error recoverable?
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AppError::Io(_)
                | AppError::FolderNotFound(_)
                | AppError::AccessDenied(_)
                | AppError::UnsupportedFormat(_)
                | AppError::NoActiveEntry
                | AppError::Decode(_)
                | AppError::FileOperation(_)
                | AppError::CacheInconsistency { .. }
        )
    }

    /// Is this a fatal error?
    pub fn is_fatal(&self) -> bool {
        !self.is_recoverable()
    }

    /// Get a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            AppError::FolderNotFound(path) => format!("Folder not found: {}", path),
            AppError::AccessDenied(path) => format!("Access denied: {}", path),
            AppError::UnsupportedFormat(ext) => format!("Unsupported format: {}", ext),
            AppError::Decode(e) => format!("Cannot load file: {}", e),
            AppError::FileOperation(FileOperationError::DestinationExists(p)) => {
                format!("A file named {} already exists there", display_name(p))
            }
            AppError::FileOperation(FileOperationError::NothingToUndo) => {
                "Nothing to undo".to_string()
            }
            _ => self.to_string(),
        }
    }
}

fn display_name(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

impl From<app_fs::FsError> for AppError {
    fn from(e: app_fs::FsError) -> Self {
        match e {
            app_fs::FsError::NotFound(p) => AppError::FolderNotFound(p),
            app_fs::FsError::AccessDenied(p) => AppError::AccessDenied(p),
            app_fs::FsError::InvalidPath(p) => AppError::FolderNotFound(p),
            app_fs::FsError::Io(e) => AppError::Io(e),
        }
    }
}
