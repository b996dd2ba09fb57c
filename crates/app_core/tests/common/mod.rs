//! Shared fixtures for the scenario tests

#![allow(dead_code)]

use app_core::media::{ArtifactPayload, CancelToken, DecodeHint, DecodeSource, MediaKind, Orientation, StaticFrame};
use app_core::{
    AsyncLoadPipeline, CacheBudget, DecodeError, DecodeFailure, FileOperationEngine, FileOpsConfig, MediaCache,
    NavigationConfig, Navigator,
};
use app_fs::{DefaultFileOperations, StagingTrash, TrashBin};
use image::RgbaImage;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Counts decodes per path; can hold decodes back and fail chosen paths
#[derive(Default)]
pub struct CountingDecoder {
    calls: Mutex<HashMap<PathBuf, usize>>,
    held: Mutex<bool>,
    released: Condvar,
    failures: HashMap<PathBuf, DecodeError>,
    sizes: HashMap<PathBuf, (u32, u32)>,
}

impl CountingDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes block until `release()`
    pub fn held() -> Self {
        let decoder = Self::default();
        *decoder.held.lock() = true;
        decoder
    }

    pub fn failing(mut self, path: impl Into<PathBuf>, error: DecodeError) -> Self {
        self.failures.insert(path.into(), error);
        self
    }

    pub fn sized(mut self, path: impl Into<PathBuf>, width: u32, height: u32) -> Self {
        self.sizes.insert(path.into(), (width, height));
        self
    }

    pub fn release(&self) {
        *self.held.lock() = false;
        self.released.notify_all();
    }

    pub fn calls(&self, path: &Path) -> usize {
        self.calls.lock().get(path).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }
}

impl DecodeSource for CountingDecoder {
    fn decode(
        &self,
        path: &Path,
        _kind: MediaKind,
        _hint: &DecodeHint,
        cancel: &CancelToken,
    ) -> Result<ArtifactPayload, DecodeFailure> {
        *self.calls.lock().entry(path.to_path_buf()).or_default() += 1;

        let mut held = self.held.lock();
        while *held {
            cancel.checkpoint()?;
            self.released.wait_for(&mut held, Duration::from_millis(20));
        }
        drop(held);

        if let Some(error) = self.failures.get(path) {
            return Err((*error).into());
        }
        let (width, height) = self.sizes.get(path).copied().unwrap_or((8, 8));
        Ok(ArtifactPayload::StaticFrame(Arc::new(StaticFrame::from_rgba(
            RgbaImage::new(width, height),
            Orientation::Normal,
        ))))
    }
}

pub fn cache_with(decoder: Arc<dyn DecodeSource>, budget: CacheBudget) -> MediaCache {
    MediaCache::new(AsyncLoadPipeline::new(decoder, DecodeHint::default(), 2), budget)
}

pub fn roomy_budget() -> CacheBudget {
    CacheBudget {
        max_entries: 64,
        max_memory_bytes: usize::MAX,
    }
}

/// Scratch tree: `photos/` (browsed), `keep/` (copy/move target), `staging/` (trash)
pub struct Workspace {
    root: TempDir,
    pub photos: PathBuf,
    pub keep: PathBuf,
}

impl Workspace {
    pub fn new(names: &[&str]) -> Self {
        let root = tempfile::tempdir().unwrap();
        let base = root.path().canonicalize().unwrap();
        let photos = base.join("photos");
        let keep = base.join("keep");
        fs::create_dir_all(&photos).unwrap();
        fs::create_dir_all(&keep).unwrap();
        for name in names {
            fs::write(photos.join(name), name.as_bytes()).unwrap();
        }
        Self { root, photos, keep }
    }

    pub fn photo(&self, name: &str) -> PathBuf {
        self.photos.join(name)
    }

    pub fn navigator(&self, decoder: Arc<dyn DecodeSource>, config: NavigationConfig) -> Navigator {
        let mut nav = Navigator::new(cache_with(decoder, roomy_budget()), config);
        nav.open_folder(&self.photos).unwrap();
        nav
    }

    pub fn engine(&self) -> FileOperationEngine {
        let trash: Arc<dyn TrashBin> = Arc::new(StagingTrash::new(self.root.path().join("staging")).unwrap());
        FileOperationEngine::with_collaborators(FileOpsConfig::default(), Arc::new(DefaultFileOperations), Some(trash))
    }

    /// File names on disk in `dir`, sorted
    pub fn disk(&self, dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

pub fn listed(nav: &Navigator) -> Vec<String> {
    nav.entries().iter().map(|e| e.name().to_string()).collect()
}

/// Poll `check` for up to five seconds
pub fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..250 {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    false
}
