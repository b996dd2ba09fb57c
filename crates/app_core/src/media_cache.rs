//! Bounded media cache
//!
//! One mutex guards the whole entry map, so lookups, insertions and eviction
//! sweeps are atomic with respect to each other. Completion listeners run on
//! loader threads and take the same lock; nothing here calls into a handle
//! while holding it.

use crate::config::CacheConfig;
use crate::media::{DecodedArtifact, MediaKind};
use crate::pipeline::{AsyncLoadPipeline, LoadHandle, LoadOutcome, LoadPriority};
use crate::{AppError, DecodeError};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

const EVENT_CAPACITY: usize = 256;

/// Result of `get_or_load`
#[derive(Debug, Clone)]
pub enum CacheLookup {
    HitReady(Arc<DecodedArtifact>),
    HitPending(LoadHandle),
    MissStarted(LoadHandle),
}

impl CacheLookup {
    pub fn ready(&self) -> Option<&Arc<DecodedArtifact>> {
        match self {
            CacheLookup::HitReady(artifact) => Some(artifact),
            _ => None,
        }
    }

    pub fn handle(&self) -> Option<&LoadHandle> {
        match self {
            CacheLookup::HitPending(handle) | CacheLookup::MissStarted(handle) => Some(handle),
            CacheLookup::HitReady(_) => None,
        }
    }

    /// Wait for the artifact; `None` if the load was cancelled
    pub async fn resolve(self) -> Option<Arc<DecodedArtifact>> {
        match self {
            CacheLookup::HitReady(artifact) => Some(artifact),
            CacheLookup::HitPending(handle) | CacheLookup::MissStarted(handle) => match handle.wait().await {
                LoadOutcome::Completed(artifact) => Some(artifact),
                LoadOutcome::Cancelled => None,
            },
        }
    }
}

/// Notifications for the display collaborator
#[derive(Debug, Clone)]
pub enum CacheEvent {
    /// A pending entry resolved (possibly to an error artifact)
    Ready { path: PathBuf, artifact: Arc<DecodedArtifact> },
}

/// Lifecycle of a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Pending,
    Ready,
}

/// Entry count and byte limits, enforced jointly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheBudget {
    pub max_entries: usize,
    pub max_memory_bytes: usize,
}

impl From<&CacheConfig> for CacheBudget {
    fn from(config: &CacheConfig) -> Self {
        Self {
            max_entries: config.max_entries,
            max_memory_bytes: config.max_memory_bytes(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub pending: usize,
    pub memory_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub invalidations: u64,
    pub inconsistencies: u64,
}

enum Slot {
    Pending(LoadHandle),
    Ready(Arc<DecodedArtifact>),
}

struct CacheEntry {
    /// Insertion order, breaks `last_access` ties
    seq: u64,
    /// Logical clock value of the last lookup or touch
    last_access: u64,
    slot: Slot,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<PathBuf, CacheEntry>,
    clock: u64,
    next_seq: u64,
    stats: CacheStats,
}

impl CacheState {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn memory_bytes(&self) -> usize {
        self.entries
            .values()
            .map(|e| match &e.slot {
                Slot::Ready(artifact) => artifact.memory_cost_bytes(),
                Slot::Pending(_) => 0,
            })
            .sum()
    }

    fn remove(&mut self, path: &Path) -> Option<CacheEntry> {
        let entry = self.entries.remove(path)?;
        match &entry.slot {
            Slot::Pending(handle) => handle.cancel(),
            Slot::Ready(artifact) => artifact.stop_background_work(),
        }
        Some(entry)
    }

    /// Evict least recently used `Ready` entries until both budgets hold
    fn enforce(&mut self, budget: CacheBudget) {
        loop {
            let over_count = self.entries.len() > budget.max_entries;
            let over_memory = self.memory_bytes() > budget.max_memory_bytes;
            if !over_count && !over_memory {
                return;
            }

            let victim = self
                .entries
                .iter()
                .filter(|(_, e)| matches!(e.slot, Slot::Ready(_)))
                .min_by_key(|(_, e)| (e.last_access, e.seq))
                .map(|(path, _)| path.clone());

            let Some(victim) = victim else {
                // Only pending entries left; they are never evicted for budget
                return;
            };
            self.remove(&victim);
            self.stats.evictions += 1;
            tracing::debug!(
                "Evicted {} (entries over: {}, memory over: {})",
                victim.display(),
                over_count,
                over_memory
            );
        }
    }
}

struct CacheShared {
    state: Mutex<CacheState>,
    pipeline: AsyncLoadPipeline,
    budget: CacheBudget,
    events_tx: Sender<CacheEvent>,
    events_rx: Receiver<CacheEvent>,
}

/// Path-keyed store of decoded artifacts, filled by the load pipeline
#[derive(Clone)]
pub struct MediaCache {
    shared: Arc<CacheShared>,
}

impl MediaCache {
    pub fn new(pipeline: AsyncLoadPipeline, budget: CacheBudget) -> Self {
        let (events_tx, events_rx) = crossbeam_channel::bounded(EVENT_CAPACITY);
        Self {
            shared: Arc::new(CacheShared {
                state: Mutex::new(CacheState::default()),
                pipeline,
                budget,
                events_tx,
                events_rx,
            }),
        }
    }

    /// Look `path` up, starting a load on a miss.
    ///
    /// Never blocks on a decode. A broken file resolves to a terminal error
    /// artifact that later lookups return without decoding again.
    pub fn get_or_load(&self, path: &Path, kind: MediaKind, priority: LoadPriority) -> CacheLookup {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        let now = state.tick();

        if let Some(entry) = state.entries.get_mut(path) {
            let problem = match &entry.slot {
                Slot::Ready(artifact) if artifact.key != path => Some("ready artifact has a different key"),
                Slot::Pending(handle) if handle.path() != path => Some("pending load is for a different path"),
                Slot::Pending(handle) if handle.is_cancelled() => Some("pending load was cancelled"),
                _ => None,
            };

            match problem {
                None => {
                    entry.last_access = now;
                    let lookup = match &entry.slot {
                        Slot::Ready(artifact) => CacheLookup::HitReady(artifact.clone()),
                        Slot::Pending(handle) => {
                            shared.pipeline.reprioritize(handle, priority);
                            CacheLookup::HitPending(handle.clone())
                        }
                    };
                    state.stats.hits += 1;
                    return lookup;
                }
                Some(reason) => {
                    let error = AppError::CacheInconsistency {
                        path: path.display().to_string(),
                        reason: reason.to_string(),
                    };
                    tracing::error!("{}; evicting and reloading", error);
                    state.stats.inconsistencies += 1;
                    state.remove(path);
                }
            }
        }

        state.stats.misses += 1;
        let seq = state.next_seq;
        state.next_seq += 1;

        if kind == MediaKind::Unsupported {
            let artifact = Arc::new(DecodedArtifact::error(path.to_path_buf(), kind, DecodeError::UnsupportedVariant));
            state.entries.insert(
                path.to_path_buf(),
                CacheEntry {
                    seq,
                    last_access: now,
                    slot: Slot::Ready(artifact.clone()),
                },
            );
            state.enforce(shared.budget);
            return CacheLookup::HitReady(artifact);
        }

        let handle = shared.pipeline.submit(path, kind, priority);
        state.entries.insert(
            path.to_path_buf(),
            CacheEntry {
                seq,
                last_access: now,
                slot: Slot::Pending(handle.clone()),
            },
        );
        state.enforce(shared.budget);
        drop(state);

        let weak: Weak<CacheShared> = Arc::downgrade(shared);
        let key = path.to_path_buf();
        let id = handle.id();
        handle.on_complete(move |outcome| {
            if let Some(shared) = weak.upgrade() {
                shared.resolve(&key, id, outcome);
            }
        });

        CacheLookup::MissStarted(handle)
    }

    /// Drop the entry in whatever state; a pending load is cancelled
    pub fn invalidate(&self, path: &Path) -> bool {
        let mut state = self.shared.state.lock();
        let removed = state.remove(path).is_some();
        if removed {
            state.stats.invalidations += 1;
            tracing::debug!("Invalidated {}", path.display());
        }
        removed
    }

    /// Cancel a load that is still pending; ready entries are left to LRU
    pub fn cancel_pending(&self, path: &Path) -> bool {
        let mut state = self.shared.state.lock();
        let pending = matches!(state.entries.get(path), Some(CacheEntry { slot: Slot::Pending(_), .. }));
        if pending {
            state.remove(path);
            tracing::debug!("Cancelled pending load of {}", path.display());
        }
        pending
    }

    /// Mark as recently used without loading
    pub fn touch(&self, path: &Path) -> bool {
        let mut state = self.shared.state.lock();
        let now = state.tick();
        match state.entries.get_mut(path) {
            Some(entry) => {
                entry.last_access = now;
                true
            }
            None => false,
        }
    }

    /// Ready artifact for `path`, without counting as an access
    pub fn peek(&self, path: &Path) -> Option<Arc<DecodedArtifact>> {
        match &self.shared.state.lock().entries.get(path)?.slot {
            Slot::Ready(artifact) => Some(artifact.clone()),
            Slot::Pending(_) => None,
        }
    }

    pub fn entry_state(&self, path: &Path) -> Option<EntryState> {
        self.shared.state.lock().entries.get(path).map(|e| match e.slot {
            Slot::Pending(_) => EntryState::Pending,
            Slot::Ready(_) => EntryState::Ready,
        })
    }

    /// Drop every entry whose path fails `keep`
    pub fn retain_paths(&self, keep: impl Fn(&Path) -> bool) {
        let mut state = self.shared.state.lock();
        let doomed: Vec<PathBuf> = state.entries.keys().filter(|p| !keep(p)).cloned().collect();
        for path in &doomed {
            state.remove(path);
        }
        if !doomed.is_empty() {
            tracing::debug!("Dropped {} cache entries", doomed.len());
        }
    }

    pub fn clear(&self) {
        self.retain_paths(|_| false);
    }

    pub fn keys(&self) -> Vec<PathBuf> {
        self.shared.state.lock().entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.shared.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn budget(&self) -> CacheBudget {
        self.shared.budget
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.shared.state.lock();
        CacheStats {
            entries: state.entries.len(),
            pending: state
                .entries
                .values()
                .filter(|e| matches!(e.slot, Slot::Pending(_)))
                .count(),
            memory_bytes: state.memory_bytes(),
            ..state.stats.clone()
        }
    }

    /// Ready notifications. Best effort: when nobody drains the channel,
    /// notifications are dropped and the cache itself stays authoritative.
    pub fn events(&self) -> Receiver<CacheEvent> {
        self.shared.events_rx.clone()
    }

    pub fn pipeline(&self) -> &AsyncLoadPipeline {
        &self.shared.pipeline
    }
}

impl CacheShared {
    /// Completion listener for load `id` of `path`
    fn resolve(self: &Arc<Self>, path: &Path, id: u64, outcome: &LoadOutcome) {
        let mut state = self.state.lock();
        let current = matches!(
            state.entries.get(path),
            Some(CacheEntry { slot: Slot::Pending(handle), .. }) if handle.id() == id
        );

        if !current {
            // Invalidated or replaced while loading
            if let LoadOutcome::Completed(artifact) = outcome {
                artifact.stop_background_work();
            }
            return;
        }

        match outcome {
            LoadOutcome::Completed(artifact) => {
                if let Some(entry) = state.entries.get_mut(path) {
                    entry.slot = Slot::Ready(artifact.clone());
                }
                // Frames filled in later grow the entry past what was checked here
                let weak = Arc::downgrade(self);
                artifact.watch_growth(move || {
                    if let Some(shared) = weak.upgrade() {
                        shared.enforce_budget();
                    }
                });
                state.enforce(self.budget);
                drop(state);

                let event = CacheEvent::Ready {
                    path: path.to_path_buf(),
                    artifact: artifact.clone(),
                };
                if let Err(TrySendError::Full(_)) = self.events_tx.try_send(event) {
                    tracing::debug!("Ready notification for {} dropped, channel full", path.display());
                }
            }
            LoadOutcome::Cancelled => {
                state.entries.remove(path);
            }
        }
    }

    fn enforce_budget(&self) {
        self.state.lock().enforce(self.budget);
    }
}
