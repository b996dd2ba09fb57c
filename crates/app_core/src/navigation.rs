//! Navigation list, cursor and prefetch window

use crate::config::NavigationConfig;
use crate::media::{classify, supported_extensions, MediaKind};
use crate::media_cache::{CacheLookup, MediaCache};
use crate::pipeline::LoadPriority;
use crate::AppError;
use app_fs::{canonical_path, compare_entries, list_directory, FileEntry, ListOptions};
use once_cell::sync::OnceCell;
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// One file of the navigation list.
///
/// The kind is classified on first access and never changes afterwards.
#[derive(Debug, Clone)]
pub struct MediaEntry {
    file: FileEntry,
    kind: OnceCell<MediaKind>,
}

impl MediaEntry {
    pub fn new(file: FileEntry) -> Self {
        Self {
            file,
            kind: OnceCell::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.file.path
    }

    pub fn name(&self) -> &str {
        &self.file.name
    }

    pub fn size_bytes(&self) -> u64 {
        self.file.size
    }

    /// Unix seconds
    pub fn last_modified(&self) -> Option<i64> {
        self.file.modified
    }

    pub fn kind(&self) -> MediaKind {
        *self.kind.get_or_init(|| classify(&self.file.path))
    }

    pub fn file(&self) -> &FileEntry {
        &self.file
    }
}

/// Ordered file list with a cursor.
///
/// Every cursor change recomputes the prefetch window and asks the cache for
/// each path in it: `Active` for the cursor, `Prefetch` for the neighbours.
pub struct Navigator {
    cache: MediaCache,
    config: NavigationConfig,
    folder: Option<PathBuf>,
    entries: Vec<MediaEntry>,
    cursor: Option<usize>,
    /// Paths requested by earlier windows that may still be loading
    requested: Vec<PathBuf>,
}

impl Navigator {
    pub fn new(cache: MediaCache, config: NavigationConfig) -> Self {
        Self {
            cache,
            config,
            folder: None,
            entries: Vec::new(),
            cursor: None,
            requested: Vec::new(),
        }
    }

    /// Replace the list with the media files of `folder`.
    ///
    /// The cache is emptied; the cursor lands on the first entry.
    pub fn open_folder(&mut self, folder: &Path) -> Result<usize, AppError> {
        self.load_folder(folder, None)
    }

    /// Open the folder containing `file` with the cursor on it.
    ///
    /// Falls back to the first entry when `file` is not a listed media file.
    pub fn open_file(&mut self, file: &Path) -> Result<usize, AppError> {
        let file = canonical_path(file);
        let folder = file
            .parent()
            .ok_or_else(|| AppError::FolderNotFound(file.display().to_string()))?;
        self.load_folder(folder, Some(&file))
    }

    fn load_folder(&mut self, folder: &Path, focus: Option<&Path>) -> Result<usize, AppError> {
        let options = ListOptions {
            show_hidden: self.config.show_hidden,
            sort_by: self.config.sort_by,
            sort_order: self.config.sort_order,
            filter_extensions: Some(supported_extensions()),
        };
        let folder = folder.canonicalize().unwrap_or_else(|_| folder.to_path_buf());
        let files = list_directory(&folder, &options)?;

        self.cache.clear();
        self.requested.clear();
        self.entries = files.into_iter().map(MediaEntry::new).collect();
        self.folder = Some(folder.clone());
        self.cursor = match focus.and_then(|path| self.index_of(path)) {
            Some(index) => Some(index),
            None if self.entries.is_empty() => None,
            None => Some(0),
        };

        tracing::info!("Opened {} ({} media files)", folder.display(), self.entries.len());
        self.refresh_window();
        Ok(self.entries.len())
    }

    pub fn folder(&self) -> Option<&Path> {
        self.folder.as_deref()
    }

    pub fn entries(&self) -> &[MediaEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn current(&self) -> Option<&MediaEntry> {
        self.entries.get(self.cursor?)
    }

    pub fn current_path(&self) -> Option<PathBuf> {
        self.current().map(|e| e.path().to_path_buf())
    }

    /// Index of `path` however it is spelled
    pub fn index_of(&self, path: &Path) -> Option<usize> {
        let path = canonical_path(path);
        self.entries.iter().position(|e| e.path() == path)
    }

    /// "3 / 17", or "0 / 0" for an empty list
    pub fn position(&self) -> String {
        match self.cursor {
            Some(c) => format!("{} / {}", c + 1, self.entries.len()),
            None => "0 / 0".to_string(),
        }
    }

    pub fn wraps(&self) -> bool {
        self.config.wrap_navigation
    }

    /// Move by `delta`, clamping or wrapping at the ends
    pub fn move_cursor(&mut self, delta: isize) -> Option<&MediaEntry> {
        let current = self.cursor?;
        let len = self.entries.len() as isize;
        let target = current as isize + delta;
        let index = if self.config.wrap_navigation {
            target.rem_euclid(len)
        } else {
            target.clamp(0, len - 1)
        };
        self.set_cursor(index as usize);
        self.current()
    }

    pub fn next(&mut self) -> Option<&MediaEntry> {
        self.move_cursor(1)
    }

    pub fn previous(&mut self) -> Option<&MediaEntry> {
        self.move_cursor(-1)
    }

    pub fn first(&mut self) -> Option<&MediaEntry> {
        if self.entries.is_empty() {
            return None;
        }
        self.set_cursor(0);
        self.current()
    }

    pub fn last(&mut self) -> Option<&MediaEntry> {
        if self.entries.is_empty() {
            return None;
        }
        self.set_cursor(self.entries.len() - 1);
        self.current()
    }

    /// Jump to `index`; out of range indices are refused
    pub fn jump_to(&mut self, index: usize) -> Option<&MediaEntry> {
        if index >= self.entries.len() {
            return None;
        }
        self.set_cursor(index);
        self.current()
    }

    /// Put the cursor on `path` if it is listed
    pub fn focus(&mut self, path: &Path) -> bool {
        match self.index_of(path) {
            Some(index) => {
                self.set_cursor(index);
                true
            }
            None => false,
        }
    }

    pub fn peek_next(&self) -> Option<&MediaEntry> {
        self.peek(1)
    }

    pub fn peek_previous(&self) -> Option<&MediaEntry> {
        self.peek(-1)
    }

    fn peek(&self, delta: isize) -> Option<&MediaEntry> {
        let current = self.cursor? as isize;
        let len = self.entries.len() as isize;
        let target = current + delta;
        if self.config.wrap_navigation {
            self.entries.get(target.rem_euclid(len) as usize)
        } else if (0..len).contains(&target) {
            self.entries.get(target as usize)
        } else {
            None
        }
    }

    /// Lookup for the entry under the cursor (counts as an access)
    pub fn active_lookup(&self) -> Option<CacheLookup> {
        let entry = self.current()?;
        Some(self.cache.get_or_load(entry.path(), entry.kind(), LoadPriority::Active))
    }

    /// Excise `path` after it was moved or deleted.
    ///
    /// If it was under the cursor, the cursor takes the entry that followed it
    /// (or the new last entry); the list may become empty.
    pub fn on_file_removed(&mut self, path: &Path) -> bool {
        let path = canonical_path(path);
        self.cache.invalidate(&path);
        self.requested.retain(|p| *p != path);

        let Some(index) = self.index_of(&path) else {
            return false;
        };
        self.entries.remove(index);

        self.cursor = match self.cursor {
            _ if self.entries.is_empty() => None,
            Some(c) if index < c => Some(c - 1),
            Some(c) if index == c => Some(c.min(self.entries.len() - 1)),
            other => other,
        };
        tracing::debug!("Removed {} from the list ({})", path.display(), self.position());
        self.refresh_window();
        true
    }

    /// Insert `path` in sorted position; the cursor keeps its entry.
    ///
    /// Files outside the open folder, unsupported files and paths already
    /// listed are ignored. Returns the insertion index.
    pub fn on_file_added(&mut self, path: &Path) -> Option<usize> {
        let path = canonical_path(path);
        if path.parent() != self.folder.as_deref() || self.index_of(&path).is_some() {
            return None;
        }
        let file = match FileEntry::from_path(&path) {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!("Cannot list added file {}: {}", path.display(), e);
                return None;
            }
        };
        if !supported_extensions().contains(&file.extension) {
            return None;
        }

        let (sort_by, order) = (self.config.sort_by, self.config.sort_order);
        let index = self
            .entries
            .binary_search_by(|e| compare_entries(e.file(), &file, sort_by, order))
            .unwrap_or_else(|i| i);
        self.entries.insert(index, MediaEntry::new(file));

        self.cursor = match self.cursor {
            Some(c) if index <= c => Some(c + 1),
            Some(c) => Some(c),
            None => Some(0),
        };
        tracing::debug!("Inserted {} at {}", path.display(), index);
        self.refresh_window();
        Some(index)
    }

    /// Classify every entry in parallel; counts per kind
    pub fn classify_all(&self) -> HashMap<MediaKind, usize> {
        self.entries
            .par_iter()
            .map(|e| e.kind())
            .fold(HashMap::new, |mut counts, kind| {
                *counts.entry(kind).or_insert(0) += 1;
                counts
            })
            .reduce(HashMap::new, |mut a, b| {
                for (kind, n) in b {
                    *a.entry(kind).or_insert(0) += n;
                }
                a
            })
    }

    pub fn cache(&self) -> &MediaCache {
        &self.cache
    }

    pub fn config(&self) -> &NavigationConfig {
        &self.config
    }

    fn set_cursor(&mut self, index: usize) {
        self.cursor = Some(index);
        self.refresh_window();
    }

    /// Indices within `radius` of the cursor, nearest first, forward before backward
    fn window_indices(&self, cursor: usize, radius: usize) -> Vec<usize> {
        let len = self.entries.len();
        let mut indices = vec![cursor];
        for step in 1..=radius {
            for delta in [step as isize, -(step as isize)] {
                let target = cursor as isize + delta;
                let index = if self.config.wrap_navigation {
                    Some(target.rem_euclid(len as isize) as usize)
                } else if (0..len as isize).contains(&target) {
                    Some(target as usize)
                } else {
                    None
                };
                if let Some(index) = index {
                    if !indices.contains(&index) {
                        indices.push(index);
                    }
                }
            }
        }
        indices
    }

    fn refresh_window(&mut self) {
        let Some(cursor) = self.cursor else {
            self.requested.clear();
            return;
        };

        let radius = self.config.prefetch_radius;
        for index in self.window_indices(cursor, radius) {
            let entry = &self.entries[index];
            let priority = if index == cursor {
                LoadPriority::Active
            } else {
                LoadPriority::Prefetch
            };
            self.cache.get_or_load(entry.path(), entry.kind(), priority);
            if !self.requested.iter().any(|p| p == entry.path()) {
                self.requested.push(entry.path().to_path_buf());
            }
        }

        // Loads that drifted too far behind are cancelled; ready ones age out via LRU
        let limit = radius + self.config.eviction_slack;
        let (entries, wrap) = (&self.entries, self.config.wrap_navigation);
        let mut stale = Vec::new();
        self.requested.retain(|path| {
            let far = match entries.iter().position(|e| e.path() == path) {
                Some(index) => list_distance(index, cursor, entries.len(), wrap) > limit,
                None => true,
            };
            if far {
                stale.push(path.clone());
            }
            !far
        });
        for path in stale {
            self.cache.cancel_pending(&path);
        }
    }
}

/// Distance along the list, around the ends when wrapping
fn list_distance(a: usize, b: usize, len: usize, wrap: bool) -> usize {
    let direct = a.abs_diff(b);
    if wrap {
        direct.min(len - direct)
    } else {
        direct
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{DecodeHint, DecodeSource};
    use crate::media_cache::{CacheBudget, EntryState};
    use crate::pipeline::AsyncLoadPipeline;
    use crate::test_support::{GatedDecoder, ScriptedDecoder};
    use std::fs;
    use std::sync::Arc;

    fn cache(decoder: Arc<dyn DecodeSource>) -> MediaCache {
        MediaCache::new(
            AsyncLoadPipeline::new(decoder, DecodeHint::default(), 1),
            CacheBudget {
                max_entries: 64,
                max_memory_bytes: usize::MAX,
            },
        )
    }

    fn folder(names: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in names {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        dir
    }

    fn navigator(dir: &Path, config: NavigationConfig) -> Navigator {
        let mut nav = Navigator::new(cache(Arc::new(ScriptedDecoder::new())), config);
        nav.open_folder(dir).unwrap();
        nav
    }

    fn names(nav: &Navigator) -> Vec<&str> {
        nav.entries().iter().map(|e| e.name()).collect()
    }

    #[test]
    fn test_open_folder_sorts_and_filters() {
        let dir = folder(&["b.PNG", "A.jpg", "notes.txt", "c.mp4"]);
        let nav = navigator(dir.path(), NavigationConfig::default());
        assert_eq!(names(&nav), vec!["A.jpg", "b.PNG", "c.mp4"]);
        assert_eq!(nav.cursor(), Some(0));
        assert_eq!(nav.position(), "1 / 3");
        assert_eq!(nav.entries()[2].kind(), MediaKind::Video);
    }

    #[test]
    fn test_empty_folder_has_no_cursor() {
        let dir = folder(&["readme.txt"]);
        let mut nav = navigator(dir.path(), NavigationConfig::default());
        assert!(nav.is_empty());
        assert_eq!(nav.cursor(), None);
        assert!(nav.next().is_none());
        assert_eq!(nav.position(), "0 / 0");
    }

    #[test]
    fn test_missing_folder_is_an_error() {
        let dir = folder(&[]);
        let mut nav = Navigator::new(cache(Arc::new(ScriptedDecoder::new())), NavigationConfig::default());
        let result = nav.open_folder(&dir.path().join("nope"));
        assert!(matches!(result, Err(AppError::FolderNotFound(_))));
    }

    #[test]
    fn test_clamp_and_wrap() {
        let dir = folder(&["a.jpg", "b.jpg", "c.jpg"]);

        let mut clamped = navigator(dir.path(), NavigationConfig::default());
        clamped.move_cursor(10);
        assert_eq!(clamped.cursor(), Some(2));
        clamped.move_cursor(-10);
        assert_eq!(clamped.cursor(), Some(0));
        assert!(clamped.peek_previous().is_none());

        let mut wrapped = navigator(
            dir.path(),
            NavigationConfig {
                wrap_navigation: true,
                ..Default::default()
            },
        );
        wrapped.last();
        assert_eq!(wrapped.next().map(|e| e.name()), Some("a.jpg"));
        assert_eq!(wrapped.cursor(), Some(0));
        assert_eq!(wrapped.previous().map(|e| e.name()), Some("c.jpg"));
        assert_eq!(wrapped.peek_next().map(|e| e.name()), Some("a.jpg"));
    }

    #[test]
    fn test_jump_and_focus() {
        let dir = folder(&["a.jpg", "b.jpg", "c.jpg"]);
        let mut nav = navigator(dir.path(), NavigationConfig::default());
        assert!(nav.jump_to(7).is_none());
        assert_eq!(nav.cursor(), Some(0));
        assert_eq!(nav.jump_to(2).map(|e| e.name()), Some("c.jpg"));
        assert!(nav.focus(&dir.path().join("b.jpg")));
        assert_eq!(nav.cursor(), Some(1));
        assert!(!nav.focus(&dir.path().join("zzz.jpg")));
    }

    #[test]
    fn test_removing_cursor_entry_moves_to_next() {
        let dir = folder(&["a.jpg", "b.jpg", "c.jpg"]);
        let mut nav = navigator(dir.path(), NavigationConfig::default());
        nav.jump_to(1);

        assert!(nav.on_file_removed(&dir.path().join("b.jpg")));
        assert_eq!(nav.current().map(|e| e.name()), Some("c.jpg"));

        // Removing the last entry falls back to the previous one
        assert!(nav.on_file_removed(&dir.path().join("c.jpg")));
        assert_eq!(nav.current().map(|e| e.name()), Some("a.jpg"));

        assert!(nav.on_file_removed(&dir.path().join("a.jpg")));
        assert_eq!(nav.cursor(), None);
        assert!(!nav.on_file_removed(&dir.path().join("a.jpg")));
    }

    #[test]
    fn test_removing_before_cursor_keeps_entry() {
        let dir = folder(&["a.jpg", "b.jpg", "c.jpg"]);
        let mut nav = navigator(dir.path(), NavigationConfig::default());
        nav.jump_to(2);
        nav.on_file_removed(&dir.path().join("a.jpg"));
        assert_eq!(nav.current().map(|e| e.name()), Some("c.jpg"));
        assert_eq!(nav.cursor(), Some(1));
    }

    #[test]
    fn test_other_spellings_of_listed_paths() {
        let root = folder(&[]);
        let photos = root.path().join("photos");
        fs::create_dir_all(root.path().join("keep")).unwrap();
        fs::create_dir(&photos).unwrap();
        fs::write(photos.join("a.jpg"), b"x").unwrap();
        let roundabout = root.path().join("keep").join("..").join("photos");

        let mut nav = navigator(&roundabout, NavigationConfig::default());
        assert_eq!(nav.folder(), Some(photos.canonicalize().unwrap().as_path()));

        fs::write(photos.join("b.jpg"), b"x").unwrap();
        assert_eq!(nav.on_file_added(&roundabout.join("b.jpg")), Some(1));
        assert_eq!(nav.on_file_added(&photos.join(".").join("b.jpg")), None);
        assert_eq!(names(&nav), vec!["a.jpg", "b.jpg"]);
        assert_eq!(nav.index_of(&photos.join("b.jpg")), Some(1));

        fs::remove_file(photos.join("a.jpg")).unwrap();
        assert!(nav.on_file_removed(&roundabout.join("a.jpg")));
        assert_eq!(names(&nav), vec!["b.jpg"]);
    }

    #[test]
    fn test_added_file_lands_in_order_without_moving_cursor() {
        let dir = folder(&["a.jpg", "c.jpg"]);
        let mut nav = navigator(dir.path(), NavigationConfig::default());
        nav.jump_to(1);

        fs::write(dir.path().join("B.jpg"), b"x").unwrap();
        assert_eq!(nav.on_file_added(&dir.path().join("B.jpg")), Some(1));
        assert_eq!(names(&nav), vec!["a.jpg", "B.jpg", "c.jpg"]);
        assert_eq!(nav.current().map(|e| e.name()), Some("c.jpg"));

        // Already present, or not a media file
        assert_eq!(nav.on_file_added(&dir.path().join("B.jpg")), None);
        fs::write(dir.path().join("x.txt"), b"x").unwrap();
        assert_eq!(nav.on_file_added(&dir.path().join("x.txt")), None);
    }

    #[test]
    fn test_window_requests_with_priorities() {
        let dir = folder(&["a.jpg", "b.gif", "c.mp4", "d.png", "e.png"]);
        let decoder = Arc::new(GatedDecoder::new());
        let mut nav = Navigator::new(
            cache(decoder.clone()),
            NavigationConfig {
                prefetch_radius: 1,
                eviction_slack: 0,
                ..Default::default()
            },
        );
        nav.open_folder(dir.path()).unwrap();
        nav.jump_to(2);

        let cache = nav.cache();
        let handle = |name: &str| {
            cache
                .pipeline()
                .in_flight(&dir.path().join(name))
                .map(|h| h.priority())
        };
        assert_eq!(handle("c.mp4"), Some(LoadPriority::Active));
        assert_eq!(handle("b.gif"), Some(LoadPriority::Prefetch));
        assert_eq!(handle("d.png"), Some(LoadPriority::Prefetch));
        // a.jpg was the original cursor; it is now outside the window and was cancelled
        assert_eq!(cache.entry_state(&dir.path().join("a.jpg")), None);
        assert_eq!(cache.entry_state(&dir.path().join("e.png")), None);
        decoder.open();
    }

    #[test]
    fn test_open_file_focuses_it() {
        let dir = folder(&["a.jpg", "b.jpg", "c.jpg"]);
        let mut nav = Navigator::new(cache(Arc::new(ScriptedDecoder::new())), NavigationConfig::default());
        assert_eq!(nav.open_file(&dir.path().join("b.jpg")).unwrap(), 3);
        assert_eq!(nav.current().map(|e| e.name()), Some("b.jpg"));

        nav.open_file(&dir.path().join("missing.jpg")).unwrap();
        assert_eq!(nav.cursor(), Some(0));
    }

    #[test]
    fn test_classify_all_counts_kinds() {
        let dir = folder(&["a.jpg", "b.png", "c.mp3", "d.psd"]);
        let nav = navigator(dir.path(), NavigationConfig::default());
        let counts = nav.classify_all();
        assert_eq!(counts.get(&MediaKind::Image), Some(&2));
        assert_eq!(counts.get(&MediaKind::Audio), Some(&1));
        assert_eq!(counts.get(&MediaKind::PsdDocument), Some(&1));
    }

    #[test]
    fn test_folder_change_clears_cache() {
        let first = folder(&["a.jpg"]);
        let second = folder(&["z.jpg"]);
        let mut nav = navigator(first.path(), NavigationConfig::default());
        assert!(nav.cache().entry_state(&first.path().join("a.jpg")).is_some());

        nav.open_folder(second.path()).unwrap();
        assert_eq!(nav.cache().entry_state(&first.path().join("a.jpg")), None);
        assert!(matches!(
            nav.cache().entry_state(&second.path().join("z.jpg")),
            Some(EntryState::Pending | EntryState::Ready)
        ));
    }
}
