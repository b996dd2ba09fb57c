//! Copy / move / delete with an undo history
//!
//! Every call validates first and touches the disk second, so a refused call
//! leaves the navigation list, the cache and the history as they were.
//! Successful calls report their effect to the [`Navigator`], which in turn
//! invalidates the affected cache keys.

use crate::config::FileOpsConfig;
use crate::navigation::Navigator;
use crate::undo::{OperationKind, UndoRecord, UndoStack};
use crate::FileOperationError;
use app_fs::{
    canonical_path, precheck_destination, DefaultFileOperations, FileOperations, RestoreToken, StagingTrash, SystemTrash,
    TrashBin,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

type Result<T> = std::result::Result<T, FileOperationError>;

/// The only component that mutates the filesystem
pub struct FileOperationEngine {
    ops: Arc<dyn FileOperations>,
    trash: Option<Arc<dyn TrashBin>>,
    config: FileOpsConfig,
    history: UndoStack,
}

impl FileOperationEngine {
    /// Engine with the real filesystem and the trash the configuration asks for
    pub fn from_config(config: &FileOpsConfig) -> Result<Self> {
        let trash: Option<Arc<dyn TrashBin>> = match &config.staging_dir {
            Some(dir) => Some(Arc::new(StagingTrash::new(dir)?)),
            None if config.use_recycle_bin => Some(Arc::new(SystemTrash::new())),
            None => None,
        };
        Ok(Self::with_collaborators(
            config.clone(),
            Arc::new(DefaultFileOperations::new()),
            trash,
        ))
    }

    pub fn with_collaborators(
        config: FileOpsConfig,
        ops: Arc<dyn FileOperations>,
        trash: Option<Arc<dyn TrashBin>>,
    ) -> Self {
        match &trash {
            Some(bin) => tracing::debug!("File operations use the {} trash", bin.name()),
            None => tracing::info!("No trash configured: deletions cannot be undone"),
        }
        Self {
            ops,
            trash,
            history: UndoStack::new(config.undo_depth),
            config,
        }
    }

    /// Copy `source` into `target_dir`; the source stays listed
    pub fn copy(&mut self, nav: &mut Navigator, source: &Path, target_dir: &Path) -> Result<PathBuf> {
        let source = canonical_path(source);
        let source = source.as_path();
        let target = self.precheck(source, target_dir, self.config.check_free_space)?;

        let mut record = UndoRecord::new(OperationKind::Copy, source, Some(target.clone()));
        let displaced = self.displace(nav, &target, &mut record)?;

        if let Err(e) = self.ops.copy_file(source, &target) {
            self.put_back(nav, displaced.as_ref());
            return Err(e.into());
        }
        record.displaced = displaced;

        tracing::info!("Copied {} -> {}", source.display(), target.display());
        nav.on_file_added(&target);
        self.history.push(record);
        Ok(target)
    }

    /// Move `source` into `target_dir`; the source leaves the list
    pub fn move_to(&mut self, nav: &mut Navigator, source: &Path, target_dir: &Path) -> Result<PathBuf> {
        let source = canonical_path(source);
        let source = source.as_path();
        let needs_space = self.config.check_free_space && !self.ops.same_device(source, target_dir);
        let target = self.precheck(source, target_dir, needs_space)?;

        let mut record = UndoRecord::new(OperationKind::Move, source, Some(target.clone()));
        record.was_current = nav.current().is_some_and(|e| e.path() == source);
        let displaced = self.displace(nav, &target, &mut record)?;

        if let Err(e) = self.ops.move_file(source, &target) {
            self.put_back(nav, displaced.as_ref());
            return Err(e.into());
        }
        record.displaced = displaced;

        tracing::info!("Moved {} -> {}", source.display(), target.display());
        nav.on_file_removed(source);
        nav.on_file_added(&target);
        self.history.push(record);
        Ok(target)
    }

    /// Delete `source`, through the trash when there is one
    pub fn delete(&mut self, nav: &mut Navigator, source: &Path) -> Result<()> {
        let source = canonical_path(source);
        let source = source.as_path();
        if !source.is_file() {
            tracing::warn!("Refusing to delete {}: not a file", source.display());
            return Err(FileOperationError::SourceMissing(source.to_path_buf()));
        }

        let mut record = UndoRecord::new(OperationKind::Delete, source, None);
        record.was_current = nav.current().is_some_and(|e| e.path() == source);

        match &self.trash {
            Some(bin) => {
                record.restore = Some(bin.trash(source)?);
                record.reversible = bin.can_restore();
            }
            None => {
                self.ops.remove_file(source)?;
                record.reversible = false;
            }
        }

        tracing::info!("Deleted {}", source.display());
        nav.on_file_removed(source);
        self.history.push(record);
        Ok(())
    }

    /// Reverse the most recent operation, completely or not at all.
    ///
    /// A record that cannot be reversed (including one whose overwritten
    /// file has left the trash) is dropped from the history and reported
    /// with the disk untouched; any other failure leaves it in place.
    pub fn undo(&mut self, nav: &mut Navigator) -> Result<UndoRecord> {
        let record = self.history.peek().ok_or(FileOperationError::NothingToUndo)?;

        let displaced_lost = record
            .displaced
            .as_ref()
            .is_some_and(|token| !self.trash.as_ref().is_some_and(|bin| bin.is_restorable(token)));
        if !record.reversible || displaced_lost {
            let description = record.describe();
            self.history.pop();
            if displaced_lost {
                tracing::warn!("Cannot undo {}: the overwritten file is no longer in the trash", description);
            } else {
                tracing::warn!("Cannot undo {}", description);
            }
            return Err(FileOperationError::UndoNotReversible(description));
        }

        let record = record.clone();
        match record.kind {
            OperationKind::Copy => self.undo_copy(nav, &record)?,
            OperationKind::Move => self.undo_move(nav, &record)?,
            OperationKind::Delete => self.undo_delete(nav, &record)?,
        }

        self.history.pop();
        tracing::info!("Undid {}", record.describe());
        Ok(record)
    }

    pub fn can_undo(&self) -> bool {
        !self.history.is_empty()
    }

    /// Records currently held
    pub fn undo_depth(&self) -> usize {
        self.history.len()
    }

    pub fn history(&self) -> &UndoStack {
        &self.history
    }

    pub fn trash_name(&self) -> Option<&'static str> {
        self.trash.as_ref().map(|bin| bin.name())
    }

    fn precheck(&self, source: &Path, target_dir: &Path, needs_space: bool) -> Result<PathBuf> {
        precheck_destination(
            self.ops.as_ref(),
            source,
            target_dir,
            self.config.overwrite_on_collision,
            needs_space,
        )
        .map_err(|e| {
            tracing::warn!("Refused {} -> {}: {}", source.display(), target_dir.display(), e);
            FileOperationError::from(e)
        })
    }

    /// Clear an existing file out of the way of an overwrite
    fn displace(
        &self,
        nav: &mut Navigator,
        target: &Path,
        record: &mut UndoRecord,
    ) -> Result<Option<RestoreToken>> {
        if !target.exists() {
            return Ok(None);
        }

        let token = match &self.trash {
            Some(bin) => {
                let token = bin.trash(target)?;
                if !bin.can_restore() {
                    record.reversible = false;
                }
                Some(token)
            }
            None => {
                self.ops.remove_file(target)?;
                record.reversible = false;
                None
            }
        };

        tracing::info!("Overwriting {}", target.display());
        nav.on_file_removed(target);
        Ok(token)
    }

    /// Best effort: return a displaced file after the operation itself failed
    fn put_back(&self, nav: &mut Navigator, displaced: Option<&RestoreToken>) {
        let (Some(token), Some(bin)) = (displaced, &self.trash) else {
            return;
        };
        match bin.restore(token) {
            Ok(()) => {
                nav.on_file_added(token.original());
            }
            Err(e) => tracing::warn!("Could not restore {}: {}", token.original().display(), e),
        }
    }

    /// Bring back the file an overwrite displaced; returns where it went
    fn restore_displaced<'a>(&self, record: &'a UndoRecord) -> Result<Option<&'a Path>> {
        match (&record.displaced, &self.trash) {
            (Some(token), Some(bin)) => {
                bin.restore(token)?;
                Ok(Some(token.original()))
            }
            _ => Ok(None),
        }
    }

    fn undo_copy(&self, nav: &mut Navigator, record: &UndoRecord) -> Result<()> {
        let copy = existing_destination(record)?;
        self.ops.remove_file(copy)?;

        let restored = match self.restore_displaced(record) {
            Ok(restored) => restored,
            Err(e) => {
                // Redo the copy so the record still matches the disk
                if let Err(redo) = self.ops.copy_file(&record.source, copy) {
                    tracing::error!("Could not put back {}: {}", copy.display(), redo);
                }
                return Err(e);
            }
        };

        nav.on_file_removed(copy);
        if let Some(path) = restored {
            nav.on_file_added(path);
        }
        Ok(())
    }

    fn undo_move(&self, nav: &mut Navigator, record: &UndoRecord) -> Result<()> {
        let moved = existing_destination(record)?;
        if record.source.exists() {
            return Err(FileOperationError::DestinationExists(record.source.clone()));
        }
        self.ops.move_file(moved, &record.source)?;

        let restored = match self.restore_displaced(record) {
            Ok(restored) => restored,
            Err(e) => {
                if let Err(redo) = self.ops.move_file(&record.source, moved) {
                    tracing::error!("Could not put back {}: {}", moved.display(), redo);
                }
                return Err(e);
            }
        };

        nav.on_file_removed(moved);
        nav.on_file_added(&record.source);
        if let Some(path) = restored {
            nav.on_file_added(path);
        }
        if record.was_current {
            nav.focus(&record.source);
        }
        Ok(())
    }

    fn undo_delete(&self, nav: &mut Navigator, record: &UndoRecord) -> Result<()> {
        let (Some(token), Some(bin)) = (&record.restore, &self.trash) else {
            return Err(FileOperationError::UndoNotReversible(record.describe()));
        };
        if record.source.exists() {
            return Err(FileOperationError::DestinationExists(record.source.clone()));
        }

        bin.restore(token)?;
        nav.on_file_added(&record.source);
        if record.was_current {
            nav.focus(&record.source);
        }
        Ok(())
    }
}

fn existing_destination(record: &UndoRecord) -> Result<&Path> {
    match record.destination.as_deref() {
        Some(path) if path.is_file() => Ok(path),
        Some(path) => Err(FileOperationError::SourceMissing(path.to_path_buf())),
        None => Err(FileOperationError::UndoNotReversible(record.describe())),
    }
}
