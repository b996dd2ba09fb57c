//! MediaSift File System Layer
//!
//! Provides the filesystem side of the media browser:
//! - Directory listing with stable, configurable ordering
//! - Low-level copy / move / remove with prechecks
//! - Recoverable deletion (system trash or a staging directory)

mod browser;
mod file_operations;
mod recycle;

pub use browser::{FileEntry, ListOptions, SortBy, SortOrder, list_directory, compare_entries, canonical_path};
pub use file_operations::{
    DefaultFileOperations, FileOperations, FileOpError, MoveMethod, precheck_destination,
};
pub use recycle::{RestoreToken, StagingTrash, TrashBin};
#[cfg(feature = "trash-support")]
pub use recycle::SystemTrash;

use thiserror::Error;

/// File system errors
#[derive(Error, Debug)]
pub enum FsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

pub type Result<T> = std::result::Result<T, FsError>;
