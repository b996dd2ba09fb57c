//! Session: the control-thread facade over navigation, cache and file operations

use crate::config::AppConfig;
use crate::media::{DecodeHint, DecodeSource, DecodedArtifact, MediaDecoder, MediaKind};
use crate::media_cache::{CacheBudget, CacheEvent, CacheLookup, CacheStats, MediaCache};
use crate::navigation::Navigator;
use crate::operations::FileOperationEngine;
use crate::pipeline::AsyncLoadPipeline;
use crate::undo::UndoRecord;
use crate::{AppError, DecodeError};
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// What the display collaborator needs to know about the entry under the cursor
#[derive(Debug, Clone)]
pub struct ActiveEntry {
    pub path: PathBuf,
    pub name: String,
    pub kind: MediaKind,
    pub size_bytes: u64,
    pub position: String,
}

/// Navigation and file operations share one lock, so a copy, move or delete
/// is reflected in the list before the next cursor move computes its window.
struct SessionInner {
    navigator: Navigator,
    engine: FileOperationEngine,
}

/// One browsing session.
///
/// Configuration is read once here; edits to the file only apply to the next
/// session.
pub struct Session {
    inner: Mutex<SessionInner>,
    cache: MediaCache,
    config: AppConfig,
}

impl Session {
    /// Build a session with the media decoders and the real filesystem
    pub fn new(config: AppConfig) -> Result<Self, AppError> {
        let engine = FileOperationEngine::from_config(&config.file_ops)?;
        Ok(Self::with_parts(config, Arc::new(MediaDecoder), engine))
    }

    pub fn with_parts(config: AppConfig, decoder: Arc<dyn DecodeSource>, engine: FileOperationEngine) -> Self {
        let workers = config.loader.resolved_worker_threads();
        let pipeline = AsyncLoadPipeline::new(decoder, DecodeHint::from_config(&config.loader), workers);
        let cache = MediaCache::new(pipeline, CacheBudget::from(&config.cache));
        let navigator = Navigator::new(cache.clone(), config.navigation.clone());

        tracing::info!(
            "Session ready: {} loader threads, cache {} entries / {} MiB",
            workers,
            config.cache.max_entries,
            config.cache.max_memory_mb
        );

        Self {
            inner: Mutex::new(SessionInner { navigator, engine }),
            cache,
            config,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn open_folder(&self, folder: &Path) -> Result<usize, AppError> {
        self.inner.lock().navigator.open_folder(folder)
    }

    pub fn open_file(&self, file: &Path) -> Result<usize, AppError> {
        self.inner.lock().navigator.open_file(file)
    }

    pub fn folder(&self) -> Option<PathBuf> {
        self.inner.lock().navigator.folder().map(Path::to_path_buf)
    }

    pub fn move_cursor(&self, delta: isize) -> Option<ActiveEntry> {
        let mut inner = self.inner.lock();
        inner.navigator.move_cursor(delta);
        active_entry(&inner.navigator)
    }

    pub fn next(&self) -> Option<ActiveEntry> {
        self.move_cursor(1)
    }

    pub fn previous(&self) -> Option<ActiveEntry> {
        self.move_cursor(-1)
    }

    pub fn first(&self) -> Option<ActiveEntry> {
        let mut inner = self.inner.lock();
        inner.navigator.first();
        active_entry(&inner.navigator)
    }

    pub fn last(&self) -> Option<ActiveEntry> {
        let mut inner = self.inner.lock();
        inner.navigator.last();
        active_entry(&inner.navigator)
    }

    /// Zero-based; out of range indices leave the cursor alone
    pub fn jump_to(&self, index: usize) -> Option<ActiveEntry> {
        let mut inner = self.inner.lock();
        inner.navigator.jump_to(index)?;
        active_entry(&inner.navigator)
    }

    pub fn active(&self) -> Option<ActiveEntry> {
        active_entry(&self.inner.lock().navigator)
    }

    /// Read access to the list under the session lock
    pub fn with_navigator<R>(&self, f: impl FnOnce(&Navigator) -> R) -> R {
        f(&self.inner.lock().navigator)
    }

    pub fn copy(&self, source: &Path, target_dir: &Path) -> Result<PathBuf, AppError> {
        let mut inner = self.inner.lock();
        let SessionInner { navigator, engine } = &mut *inner;
        Ok(engine.copy(navigator, source, target_dir)?)
    }

    pub fn move_to(&self, source: &Path, target_dir: &Path) -> Result<PathBuf, AppError> {
        let mut inner = self.inner.lock();
        let SessionInner { navigator, engine } = &mut *inner;
        Ok(engine.move_to(navigator, source, target_dir)?)
    }

    pub fn delete(&self, source: &Path) -> Result<(), AppError> {
        let mut inner = self.inner.lock();
        let SessionInner { navigator, engine } = &mut *inner;
        Ok(engine.delete(navigator, source)?)
    }

    pub fn copy_current(&self, target_dir: &Path) -> Result<PathBuf, AppError> {
        let mut inner = self.inner.lock();
        let SessionInner { navigator, engine } = &mut *inner;
        let source = navigator.current_path().ok_or_else(no_current_entry)?;
        Ok(engine.copy(navigator, &source, target_dir)?)
    }

    pub fn move_current(&self, target_dir: &Path) -> Result<PathBuf, AppError> {
        let mut inner = self.inner.lock();
        let SessionInner { navigator, engine } = &mut *inner;
        let source = navigator.current_path().ok_or_else(no_current_entry)?;
        Ok(engine.move_to(navigator, &source, target_dir)?)
    }

    pub fn delete_current(&self) -> Result<PathBuf, AppError> {
        let mut inner = self.inner.lock();
        let SessionInner { navigator, engine } = &mut *inner;
        let source = navigator.current_path().ok_or_else(no_current_entry)?;
        engine.delete(navigator, &source)?;
        Ok(source)
    }

    pub fn undo(&self) -> Result<UndoRecord, AppError> {
        let mut inner = self.inner.lock();
        let SessionInner { navigator, engine } = &mut *inner;
        Ok(engine.undo(navigator)?)
    }

    pub fn can_undo(&self) -> bool {
        self.inner.lock().engine.can_undo()
    }

    pub fn undo_depth(&self) -> usize {
        self.inner.lock().engine.undo_depth()
    }

    /// Request (or re-request) the entry under the cursor
    pub fn active_lookup(&self) -> Option<CacheLookup> {
        self.inner.lock().navigator.active_lookup()
    }

    /// Artifact for the entry under the cursor.
    ///
    /// Waits at most the `Active` soft timeout; past it a `Timeout` placeholder
    /// is returned while the real load carries on and lands in the cache.
    /// `None` for an empty list or a load cancelled while waiting.
    pub async fn await_active(&self) -> Option<Arc<DecodedArtifact>> {
        let lookup = self.active_lookup()?;
        let handle = match lookup {
            CacheLookup::HitReady(artifact) => return Some(artifact),
            CacheLookup::HitPending(handle) | CacheLookup::MissStarted(handle) => handle,
        };

        let soft_timeout = self.config.loader.active_soft_timeout();
        match tokio::time::timeout(soft_timeout, handle.wait()).await {
            Ok(outcome) => outcome.artifact().cloned(),
            Err(_) => {
                tracing::debug!(
                    "{} still loading after {:?}, showing placeholder",
                    handle.path().display(),
                    soft_timeout
                );
                Some(Arc::new(DecodedArtifact::error(
                    handle.path().to_path_buf(),
                    handle.kind(),
                    DecodeError::Timeout,
                )))
            }
        }
    }

    /// Wait for the active artifact without the soft timeout
    pub async fn resolve_active(&self, limit: Duration) -> Option<Arc<DecodedArtifact>> {
        let lookup = self.active_lookup()?;
        tokio::time::timeout(limit, lookup.resolve()).await.ok().flatten()
    }

    pub fn cache(&self) -> &MediaCache {
        &self.cache
    }

    pub fn events(&self) -> Receiver<CacheEvent> {
        self.cache.events()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

fn active_entry(navigator: &Navigator) -> Option<ActiveEntry> {
    let entry = navigator.current()?;
    Some(ActiveEntry {
        path: entry.path().to_path_buf(),
        name: entry.name().to_string(),
        kind: entry.kind(),
        size_bytes: entry.size_bytes(),
        position: navigator.position(),
    })
}

fn no_current_entry() -> AppError {
    AppError::NoActiveEntry
}
