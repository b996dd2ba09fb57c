//! Recoverable deletion
//!
//! A `TrashBin` takes a file out of its folder and hands back a `RestoreToken`
//! that can later put it back in place.

use crate::file_operations::{map_io_error, DefaultFileOperations, FileOpError, FileOperations, Result};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

/// Everything needed to undo one deletion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreToken {
    original: PathBuf,
    locator: Locator,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Locator {
    /// Item id inside the platform trash
    System(OsString),
    /// Where a staging trash parked the file
    Staged(PathBuf),
}

impl RestoreToken {
    /// Path the file had before deletion
    pub fn original(&self) -> &Path {
        &self.original
    }
}

/// Trash / recycle collaborator
pub trait TrashBin: Send + Sync {
    /// Short identifier for logs
    fn name(&self) -> &'static str;

    /// Whether tokens from this bin can actually be restored on this platform
    fn can_restore(&self) -> bool {
        true
    }

    /// Remove `path` from its folder in a recoverable way
    fn trash(&self, path: &Path) -> Result<RestoreToken>;

    /// Put a trashed file back at its original path
    fn restore(&self, token: &RestoreToken) -> Result<()>;

    /// Whether the item behind `token` is still held by this bin
    fn is_restorable(&self, _token: &RestoreToken) -> bool {
        self.can_restore()
    }
}

/// Trash that parks files in a private directory.
///
/// Works on every platform and never touches the desktop trash.
#[derive(Debug, Clone)]
pub struct StagingTrash {
    dir: PathBuf,
}

impl StagingTrash {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| map_io_error(e, &dir))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl TrashBin for StagingTrash {
    fn name(&self) -> &'static str {
        "staging"
    }

    fn trash(&self, path: &Path) -> Result<RestoreToken> {
        if !path.is_file() {
            return Err(FileOpError::NotFound(path.to_path_buf()));
        }

        let file_name = path
            .file_name()
            .ok_or_else(|| FileOpError::InvalidOperation("Invalid file name".to_string()))?;
        let mut parked_name = OsString::from(uuid::Uuid::new_v4().simple().to_string());
        parked_name.push("-");
        parked_name.push(file_name);
        let parked = self.dir.join(parked_name);

        DefaultFileOperations.move_file(path, &parked)?;
        tracing::info!("Staged for deletion: {} -> {}", path.display(), parked.display());

        Ok(RestoreToken {
            original: path.to_path_buf(),
            locator: Locator::Staged(parked),
        })
    }

    fn restore(&self, token: &RestoreToken) -> Result<()> {
        let Locator::Staged(parked) = &token.locator else {
            return Err(FileOpError::RestoreFailed(
                token.original.clone(),
                "token was not issued by the staging trash".into(),
            ));
        };

        if token.original.exists() {
            return Err(FileOpError::AlreadyExists(token.original.clone()));
        }
        if !parked.exists() {
            return Err(FileOpError::RestoreFailed(
                token.original.clone(),
                format!("staged copy {} is gone", parked.display()),
            ));
        }
        if let Some(parent) = token.original.parent() {
            fs::create_dir_all(parent).map_err(|e| map_io_error(e, parent))?;
        }

        DefaultFileOperations.move_file(parked, &token.original)?;
        tracing::info!("Restored from staging: {}", token.original.display());
        Ok(())
    }

    fn is_restorable(&self, token: &RestoreToken) -> bool {
        matches!(&token.locator, Locator::Staged(parked) if parked.is_file())
    }
}

/// The desktop trash / recycle bin
#[cfg(feature = "trash-support")]
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTrash;

#[cfg(feature = "trash-support")]
impl SystemTrash {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(all(
    feature = "trash-support",
    any(
        target_os = "windows",
        all(unix, not(target_os = "macos"), not(target_os = "ios"), not(target_os = "android"))
    )
))]
impl TrashBin for SystemTrash {
    fn name(&self) -> &'static str {
        "system"
    }

    fn trash(&self, path: &Path) -> Result<RestoreToken> {
        if !path.is_file() {
            return Err(FileOpError::NotFound(path.to_path_buf()));
        }

        trash::delete(path)?;
        tracing::info!("Moved to trash: {}", path.display());

        // Newest trash item that came from this path
        let item = trash::os_limited::list()?
            .into_iter()
            .filter(|item| item.original_path() == path)
            .max_by_key(|item| item.time_deleted)
            .ok_or_else(|| {
                FileOpError::RestoreFailed(path.to_path_buf(), "trashed item not found".into())
            })?;

        Ok(RestoreToken {
            original: path.to_path_buf(),
            locator: Locator::System(item.id),
        })
    }

    fn restore(&self, token: &RestoreToken) -> Result<()> {
        let Locator::System(id) = &token.locator else {
            return Err(FileOpError::RestoreFailed(
                token.original.clone(),
                "token was not issued by the system trash".into(),
            ));
        };

        if token.original.exists() {
            return Err(FileOpError::AlreadyExists(token.original.clone()));
        }

        let item = trash::os_limited::list()?
            .into_iter()
            .find(|item| &item.id == id)
            .ok_or_else(|| {
                FileOpError::RestoreFailed(token.original.clone(), "no longer in the trash".into())
            })?;

        trash::os_limited::restore_all([item])?;
        tracing::info!("Restored from trash: {}", token.original.display());
        Ok(())
    }

    fn is_restorable(&self, token: &RestoreToken) -> bool {
        let Locator::System(id) = &token.locator else {
            return false;
        };
        match trash::os_limited::list() {
            Ok(items) => items.iter().any(|item| &item.id == id),
            Err(e) => {
                tracing::warn!("Cannot list the trash: {}", e);
                false
            }
        }
    }
}

// No trash listing API here: deletion still goes to the trash but cannot be undone.
#[cfg(all(
    feature = "trash-support",
    not(any(
        target_os = "windows",
        all(unix, not(target_os = "macos"), not(target_os = "ios"), not(target_os = "android"))
    ))
))]
impl TrashBin for SystemTrash {
    fn name(&self) -> &'static str {
        "system"
    }

    fn can_restore(&self) -> bool {
        false
    }

    fn trash(&self, path: &Path) -> Result<RestoreToken> {
        if !path.is_file() {
            return Err(FileOpError::NotFound(path.to_path_buf()));
        }

        trash::delete(path)?;
        tracing::info!("Moved to trash: {}", path.display());

        Ok(RestoreToken {
            original: path.to_path_buf(),
            locator: Locator::System(OsString::new()),
        })
    }

    fn restore(&self, token: &RestoreToken) -> Result<()> {
        Err(FileOpError::RestoreFailed(
            token.original.clone(),
            "restoring from the trash is not supported on this platform".into(),
        ))
    }
}
