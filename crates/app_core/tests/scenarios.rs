//! Cross-component scenarios: pipeline, cache, navigator and file operations together

mod common;

use app_core::{
    CacheBudget, CacheLookup, DecodeError, DecodedArtifact, EntryState, LoadPriority, MediaCache, MediaKind,
    NavigationConfig,
};
use common::{cache_with, eventually, listed, roomy_budget, CountingDecoder, Workspace};
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn virtual_path(name: &str) -> PathBuf {
    PathBuf::from("/virtual").join(name)
}

/// Request `path` and wait until the cache holds it as ready
fn load(cache: &MediaCache, path: &Path) -> Arc<DecodedArtifact> {
    cache.get_or_load(path, MediaKind::Image, LoadPriority::Active);
    assert!(
        eventually(|| cache.peek(path).is_some()),
        "{} never became ready",
        path.display()
    );
    cache.peek(path).unwrap()
}

fn sorted_keys(cache: &MediaCache) -> Vec<PathBuf> {
    let mut keys = cache.keys();
    keys.sort();
    keys
}

#[tokio::test]
async fn concurrent_requests_share_one_decode() {
    let decoder = Arc::new(CountingDecoder::held());
    let cache = cache_with(decoder.clone(), roomy_budget());
    let path = virtual_path("a.jpg");

    let first = cache.get_or_load(&path, MediaKind::Image, LoadPriority::Prefetch);
    let second = cache.get_or_load(&path, MediaKind::Image, LoadPriority::Active);
    assert!(matches!(first, CacheLookup::MissStarted(_)));
    assert!(matches!(second, CacheLookup::HitPending(_)));

    // Going around the cache still lands on the same work
    let direct = cache.pipeline().submit(&path, MediaKind::Image, LoadPriority::Active);
    assert!(direct.same_work(first.handle().unwrap()));

    decoder.release();
    let (a, b) = tokio::join!(first.resolve(), second.resolve());
    assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
    assert_eq!(decoder.calls(&path), 1);
}

#[test]
fn eviction_removes_least_recently_used_ready_entries() {
    let decoder = Arc::new(CountingDecoder::new());
    let cache = cache_with(
        decoder,
        CacheBudget {
            max_entries: 3,
            max_memory_bytes: usize::MAX,
        },
    );

    for name in ["1.jpg", "2.jpg", "3.jpg"] {
        load(&cache, &virtual_path(name));
    }
    cache.touch(&virtual_path("1.jpg"));

    load(&cache, &virtual_path("4.jpg"));
    assert_eq!(
        sorted_keys(&cache),
        vec![virtual_path("1.jpg"), virtual_path("3.jpg"), virtual_path("4.jpg")]
    );

    load(&cache, &virtual_path("5.jpg"));
    assert_eq!(
        sorted_keys(&cache),
        vec![virtual_path("1.jpg"), virtual_path("4.jpg"), virtual_path("5.jpg")]
    );

    let stats = cache.stats();
    assert_eq!(stats.evictions, 2);
    assert!(stats.entries <= 3);
}

#[test]
fn eviction_keeps_memory_under_budget() {
    let mut decoder = CountingDecoder::new();
    for name in ["a.jpg", "b.jpg", "c.jpg"] {
        decoder = decoder.sized(virtual_path(name), 100, 100);
    }
    // Two 100x100 RGBA frames fit, three do not
    let cache = cache_with(
        Arc::new(decoder),
        CacheBudget {
            max_entries: 10,
            max_memory_bytes: 100_000,
        },
    );

    load(&cache, &virtual_path("a.jpg"));
    load(&cache, &virtual_path("b.jpg"));
    load(&cache, &virtual_path("c.jpg"));

    assert_eq!(sorted_keys(&cache), vec![virtual_path("b.jpg"), virtual_path("c.jpg")]);
    assert!(cache.stats().memory_bytes <= 100_000);
}

#[test]
fn cursor_clamps_or_wraps_at_the_ends() {
    let ws = Workspace::new(&["a.jpg", "b.jpg", "c.jpg"]);

    let mut clamped = ws.navigator(Arc::new(CountingDecoder::new()), NavigationConfig::default());
    clamped.last();
    clamped.next();
    assert_eq!(clamped.cursor(), Some(2));

    let mut wrapped = ws.navigator(
        Arc::new(CountingDecoder::new()),
        NavigationConfig {
            wrap_navigation: true,
            ..Default::default()
        },
    );
    wrapped.last();
    wrapped.next();
    assert_eq!(wrapped.cursor(), Some(0));
}

#[test]
fn cursor_always_points_at_a_live_file() {
    let ws = Workspace::new(&["a.jpg", "b.jpg", "c.jpg", "d.jpg"]);
    let mut nav = ws.navigator(Arc::new(CountingDecoder::new()), NavigationConfig::default());
    let mut engine = ws.engine();

    nav.last();
    for _ in 0..4 {
        let current = nav.current_path().unwrap();
        engine.delete(&mut nav, &current).unwrap();
        if let Some(entry) = nav.current() {
            assert!(entry.path().exists());
            assert!(nav.index_of(entry.path()).is_some());
        }
        nav.move_cursor(3);
    }
    assert!(nav.is_empty());
    assert_eq!(nav.cursor(), None);
}

#[test]
fn copy_then_undo_restores_disk_and_list() {
    let ws = Workspace::new(&["a.jpg", "b.jpg"]);
    std::fs::write(ws.keep.join("z.jpg"), b"z").unwrap();
    let mut nav = ws.navigator(Arc::new(CountingDecoder::new()), NavigationConfig::default());
    let mut engine = ws.engine();

    let photos_before = ws.disk(&ws.photos);
    let keep_before = ws.disk(&ws.keep);
    let listed_before = listed(&nav);

    // Out of the browsed folder: the source stays listed
    engine.copy(&mut nav, &ws.photo("a.jpg"), &ws.keep).unwrap();
    assert_eq!(listed(&nav), listed_before);
    engine.undo(&mut nav).unwrap();

    // Into the browsed folder: the copy shows up and may be prefetched
    let copied = engine.copy(&mut nav, &ws.keep.join("z.jpg"), &ws.photos).unwrap();
    assert_eq!(listed(&nav), vec!["a.jpg", "b.jpg", "z.jpg"]);
    assert!(nav.cache().entry_state(&copied).is_some());
    engine.undo(&mut nav).unwrap();

    assert_eq!(ws.disk(&ws.photos), photos_before);
    assert_eq!(ws.disk(&ws.keep), keep_before);
    assert_eq!(listed(&nav), listed_before);
    assert_eq!(nav.cache().entry_state(&copied), None);
    assert_eq!(nav.cache().entry_state(&ws.keep.join("a.jpg")), None);
}

#[test]
fn copy_into_the_folder_spelled_another_way_is_listed() {
    let ws = Workspace::new(&["a.jpg"]);
    std::fs::write(ws.keep.join("z.jpg"), b"z").unwrap();
    let mut nav = ws.navigator(Arc::new(CountingDecoder::new()), NavigationConfig::default());
    let mut engine = ws.engine();

    let copied = engine.copy(&mut nav, &ws.keep.join("z.jpg"), &ws.keep.join("..").join("photos")).unwrap();
    assert_eq!(copied, ws.photo("z.jpg"));
    assert_eq!(listed(&nav), vec!["a.jpg", "z.jpg"]);

    engine.undo(&mut nav).unwrap();
    assert_eq!(listed(&nav), vec!["a.jpg"]);
    assert!(!ws.photo("z.jpg").exists());
}

#[test]
fn move_then_undo_restores_file_and_cursor() {
    let ws = Workspace::new(&["a.jpg", "b.jpg", "c.jpg"]);
    let mut nav = ws.navigator(Arc::new(CountingDecoder::new()), NavigationConfig::default());
    let mut engine = ws.engine();
    let source = ws.photo("b.jpg");
    nav.focus(&source);

    engine.move_to(&mut nav, &source, &ws.keep).unwrap();
    assert!(!source.exists());
    assert_eq!(nav.current().map(|e| e.name()), Some("c.jpg"));
    assert!(!nav.cache().keys().contains(&source));

    nav.first();
    engine.undo(&mut nav).unwrap();
    assert!(source.exists());
    assert!(!ws.keep.join("b.jpg").exists());
    assert_eq!(nav.current_path(), Some(source));
}

#[test]
fn prefetch_window_requests_only_neighbours() {
    let ws = Workspace::new(&["a.jpg", "b.gif", "c.mp4", "d.png"]);
    let decoder = Arc::new(CountingDecoder::held());
    let mut nav = app_core::Navigator::new(
        cache_with(decoder.clone(), roomy_budget()),
        NavigationConfig {
            prefetch_radius: 1,
            eviction_slack: 0,
            ..Default::default()
        },
    );
    nav.open_file(&ws.photo("b.gif")).unwrap();

    let priority = |name: &str| nav.cache().pipeline().in_flight(&ws.photo(name)).map(|h| h.priority());
    assert_eq!(priority("b.gif"), Some(LoadPriority::Active));
    assert_eq!(priority("a.jpg"), Some(LoadPriority::Prefetch));
    assert_eq!(priority("c.mp4"), Some(LoadPriority::Prefetch));
    assert_eq!(priority("d.png"), None);
    assert_eq!(nav.cache().entry_state(&ws.photo("d.png")), None);

    decoder.release();
    assert!(eventually(|| nav.cache().pipeline().in_flight_count() == 0));
    assert_eq!(decoder.total_calls(), 3);
    assert_eq!(decoder.calls(&ws.photo("d.png")), 0);
}

#[test]
fn corrupt_file_stays_an_error_until_invalidated() {
    let path = virtual_path("x.png");
    let decoder = Arc::new(CountingDecoder::new().failing(path.clone(), DecodeError::CorruptData));
    let cache = cache_with(decoder.clone(), roomy_budget());

    let first = load(&cache, &path);
    assert_eq!(first.error_kind(), Some(DecodeError::CorruptData));

    for _ in 0..3 {
        match cache.get_or_load(&path, MediaKind::Image, LoadPriority::Active) {
            CacheLookup::HitReady(artifact) => assert!(Arc::ptr_eq(&artifact, &first)),
            other => panic!("expected a ready hit, got {other:?}"),
        }
    }
    assert_eq!(decoder.calls(&path), 1);

    assert!(cache.invalidate(&path));
    assert!(matches!(
        cache.get_or_load(&path, MediaKind::Image, LoadPriority::Active),
        CacheLookup::MissStarted(_)
    ));
    assert!(eventually(|| cache.entry_state(&path) == Some(EntryState::Ready)));
    assert_eq!(decoder.calls(&path), 2);
}
