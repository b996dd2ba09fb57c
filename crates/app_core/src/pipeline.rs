//! Asynchronous load pipeline
//!
//! A bounded pool of worker threads pulls decode jobs from one priority
//! queue. `Active` work is dequeued before `Prefetch` before `Background`;
//! within a tier jobs run in submission order. Started work is never
//! preempted.

use crate::media::{CancelToken, DecodeHint, DecodeSource, DecodedArtifact, MediaKind};
use crate::{DecodeError, DecodeFailure};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::watch;

/// Scheduling tier of a load request
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LoadPriority {
    /// Speculative work (animation frame fill, warm-up)
    Background = 0,
    /// Neighbours of the cursor
    Prefetch = 1,
    /// The file on screen
    Active = 2,
}

impl LoadPriority {
    fn from_u8(v: u8) -> Self {
        match v {
            2 => LoadPriority::Active,
            1 => LoadPriority::Prefetch,
            _ => LoadPriority::Background,
        }
    }
}

/// How a load ended
#[derive(Debug, Clone)]
pub enum LoadOutcome {
    /// Decoded, or failed with an error artifact
    Completed(Arc<DecodedArtifact>),
    /// Abandoned at a cancellation checkpoint; no value is delivered
    Cancelled,
}

impl LoadOutcome {
    pub fn artifact(&self) -> Option<&Arc<DecodedArtifact>> {
        match self {
            LoadOutcome::Completed(artifact) => Some(artifact),
            LoadOutcome::Cancelled => None,
        }
    }
}

type Listener = Box<dyn FnOnce(&LoadOutcome) + Send>;

struct LoadShared {
    id: u64,
    path: PathBuf,
    kind: MediaKind,
    priority: AtomicU8,
    started: AtomicBool,
    cancel: CancelToken,
    outcome: watch::Sender<Option<LoadOutcome>>,
    listeners: Mutex<Vec<Listener>>,
}

/// Handle to one unit of decode work. Clones share the same work.
#[derive(Clone)]
pub struct LoadHandle {
    shared: Arc<LoadShared>,
}

impl std::fmt::Debug for LoadHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadHandle")
            .field("id", &self.shared.id)
            .field("path", &self.shared.path)
            .field("priority", &self.priority())
            .field("cancelled", &self.is_cancelled())
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl LoadHandle {
    fn new(id: u64, path: PathBuf, kind: MediaKind, priority: LoadPriority) -> Self {
        let (outcome, _) = watch::channel(None);
        Self {
            shared: Arc::new(LoadShared {
                id,
                path,
                kind,
                priority: AtomicU8::new(priority as u8),
                started: AtomicBool::new(false),
                cancel: CancelToken::new(),
                outcome,
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn kind(&self) -> MediaKind {
        self.shared.kind
    }

    pub fn priority(&self) -> LoadPriority {
        LoadPriority::from_u8(self.shared.priority.load(Ordering::Acquire))
    }

    /// Same underlying work
    pub fn same_work(&self, other: &LoadHandle) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Request cooperative cancellation. A load that already finished keeps its result.
    pub fn cancel(&self) {
        if !self.is_finished() {
            tracing::debug!("Cancelling load #{} of {}", self.shared.id, self.shared.path.display());
        }
        self.shared.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    pub fn is_started(&self) -> bool {
        self.shared.started.load(Ordering::Acquire)
    }

    pub fn is_finished(&self) -> bool {
        self.shared.outcome.borrow().is_some()
    }

    /// Outcome if the load has finished
    pub fn try_outcome(&self) -> Option<LoadOutcome> {
        self.shared.outcome.borrow().clone()
    }

    /// Wait for the load to finish
    pub async fn wait(&self) -> LoadOutcome {
        let mut rx = self.shared.outcome.subscribe();
        let result = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            // The sender lives in `self`, so the channel cannot close while we wait
            Err(_) => None,
        };
        result.unwrap_or(LoadOutcome::Cancelled)
    }

    /// Run `listener` once with the outcome; immediately if already finished
    pub fn on_complete(&self, listener: impl FnOnce(&LoadOutcome) + Send + 'static) {
        let mut listeners = self.shared.listeners.lock();
        if let Some(outcome) = self.try_outcome() {
            drop(listeners);
            listener(&outcome);
            return;
        }
        listeners.push(Box::new(listener));
    }

    fn raise_priority(&self, priority: LoadPriority) -> bool {
        let previous = self.shared.priority.fetch_max(priority as u8, Ordering::AcqRel);
        previous < priority as u8
    }

    fn mark_started(&self) -> bool {
        !self.shared.started.swap(true, Ordering::AcqRel)
    }

    fn complete(&self, outcome: LoadOutcome) {
        let listeners = {
            let mut listeners = self.shared.listeners.lock();
            if self.is_finished() {
                return;
            }
            self.shared.outcome.send_replace(Some(outcome.clone()));
            std::mem::take(&mut *listeners)
        };
        for listener in listeners {
            listener(&outcome);
        }
    }
}

enum Job {
    Decode(LoadHandle),
    Fill { artifact: Arc<DecodedArtifact>, cancel: CancelToken },
}

struct QueuedJob {
    priority: LoadPriority,
    seq: u64,
    job: Job,
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for QueuedJob {}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedJob {
    /// Max-heap: higher priority first, then earlier submission
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct JobQueue {
    heap: BinaryHeap<QueuedJob>,
    next_seq: u64,
}

impl JobQueue {
    fn push(&mut self, priority: LoadPriority, job: Job) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(QueuedJob { priority, seq, job });
    }
}

struct PipelineInner {
    decoder: Arc<dyn DecodeSource>,
    hint: DecodeHint,
    queue: Mutex<JobQueue>,
    available: Condvar,
    in_flight: DashMap<PathBuf, LoadHandle>,
    next_id: AtomicU64,
    decodes: AtomicU64,
    shutdown: AtomicBool,
}

/// Worker pool turning paths into artifacts
pub struct AsyncLoadPipeline {
    inner: Arc<PipelineInner>,
    workers: Vec<JoinHandle<()>>,
}

impl AsyncLoadPipeline {
    pub fn new(decoder: Arc<dyn DecodeSource>, hint: DecodeHint, worker_threads: usize) -> Self {
        let inner = Arc::new(PipelineInner {
            decoder,
            hint,
            queue: Mutex::new(JobQueue::default()),
            available: Condvar::new(),
            in_flight: DashMap::new(),
            next_id: AtomicU64::new(1),
            decodes: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        });

        let worker_threads = worker_threads.max(1);
        let mut workers = Vec::with_capacity(worker_threads);
        for i in 0..worker_threads {
            let inner = inner.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("sift-loader-{}", i))
                .spawn(move || inner.worker_loop());
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => tracing::error!("Failed to spawn loader thread {}: {}", i, e),
            }
        }
        tracing::info!("Load pipeline started with {} workers", workers.len());

        Self { inner, workers }
    }

    /// Queue a decode of `path`.
    ///
    /// While a request for the same path is outstanding, the existing handle
    /// is returned (raising its priority if it has not started yet).
    pub fn submit(&self, path: &Path, kind: MediaKind, priority: LoadPriority) -> LoadHandle {
        let inner = &self.inner;
        let handle = match inner.in_flight.entry(path.to_path_buf()) {
            Entry::Occupied(mut entry) if entry.get().is_cancelled() => {
                let handle = inner.new_handle(path, kind, priority);
                entry.insert(handle.clone());
                inner.enqueue(priority, Job::Decode(handle.clone()));
                handle
            }
            Entry::Occupied(entry) => {
                let handle = entry.get().clone();
                drop(entry);
                self.reprioritize(&handle, priority);
                return handle;
            }
            Entry::Vacant(entry) => {
                let handle = inner.new_handle(path, kind, priority);
                entry.insert(handle.clone());
                inner.enqueue(priority, Job::Decode(handle.clone()));
                handle
            }
        };
        tracing::debug!("Queued load #{} of {} ({:?}, {})", handle.id(), path.display(), priority, kind);
        handle
    }

    /// Move a queued request to a higher tier; no effect once it has started
    pub fn reprioritize(&self, handle: &LoadHandle, priority: LoadPriority) {
        if !handle.is_started() && !handle.is_cancelled() && handle.raise_priority(priority) {
            tracing::debug!("Raised load #{} of {} to {:?}", handle.id(), handle.path().display(), priority);
            self.inner.enqueue(priority, Job::Decode(handle.clone()));
        }
    }

    /// Outstanding (queued or running) handle for `path`
    pub fn in_flight(&self, path: &Path) -> Option<LoadHandle> {
        self.inner.in_flight.get(path).map(|h| h.clone())
    }

    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// Number of decoder invocations so far (animation fills excluded)
    pub fn decode_count(&self) -> u64 {
        self.inner.decodes.load(Ordering::Relaxed)
    }

    pub fn hint(&self) -> &DecodeHint {
        &self.inner.hint
    }
}

impl Drop for AsyncLoadPipeline {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, Ordering::Release);
        for entry in self.inner.in_flight.iter() {
            entry.value().cancel();
        }
        let abandoned: Vec<QueuedJob> = self.inner.queue.lock().heap.drain().collect();
        self.inner.available.notify_all();

        for queued in abandoned {
            match queued.job {
                Job::Decode(handle) if !handle.is_started() => handle.complete(LoadOutcome::Cancelled),
                Job::Decode(_) => {}
                Job::Fill { cancel, .. } => cancel.cancel(),
            }
        }
        let current = std::thread::current().id();
        for worker in self.workers.drain(..) {
            // The last owner may be a completion listener running on a worker
            if worker.thread().id() != current {
                let _ = worker.join();
            }
        }
        tracing::debug!("Load pipeline stopped");
    }
}

impl PipelineInner {
    fn new_handle(&self, path: &Path, kind: MediaKind, priority: LoadPriority) -> LoadHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        LoadHandle::new(id, path.to_path_buf(), kind, priority)
    }

    fn enqueue(&self, priority: LoadPriority, job: Job) {
        self.queue.lock().push(priority, job);
        self.available.notify_one();
    }

    fn worker_loop(&self) {
        loop {
            let queued = {
                let mut queue = self.queue.lock();
                loop {
                    if self.shutdown.load(Ordering::Acquire) {
                        return;
                    }
                    if let Some(job) = queue.heap.pop() {
                        break job;
                    }
                    self.available.wait(&mut queue);
                }
            };

            match queued.job {
                Job::Decode(handle) => {
                    // Stale duplicate left behind by a priority raise
                    if !handle.mark_started() {
                        continue;
                    }
                    self.run_decode(handle);
                }
                Job::Fill { artifact, cancel } => self.run_fill(&artifact, &cancel),
            }
        }
    }

    fn run_decode(&self, handle: LoadHandle) {
        let path = handle.path().to_path_buf();
        let kind = handle.kind();

        let outcome = if handle.is_cancelled() {
            LoadOutcome::Cancelled
        } else {
            self.decodes.fetch_add(1, Ordering::Relaxed);
            let hint = self.hint.with_request_id(handle.id());
            let cancel = handle.shared.cancel.clone();
            let decoder = &self.decoder;

            let result = catch_unwind(AssertUnwindSafe(|| decoder.decode(&path, kind, &hint, &cancel)))
                .unwrap_or_else(|payload| {
                    tracing::warn!(
                        "Decoder panicked on {}, treating as corrupt: {}",
                        path.display(),
                        app_log::panic_payload(payload.as_ref())
                    );
                    Err(DecodeError::CorruptData.into())
                });

            match result {
                // Whatever was produced after cancellation is dropped here
                _ if handle.is_cancelled() => LoadOutcome::Cancelled,
                Err(DecodeFailure::Cancelled) => LoadOutcome::Cancelled,
                Ok(payload) => LoadOutcome::Completed(Arc::new(DecodedArtifact::new(path.clone(), kind, payload))),
                Err(DecodeFailure::Error(e)) => {
                    tracing::warn!("Failed to decode {} as {}: {}", path.display(), kind, e);
                    LoadOutcome::Completed(Arc::new(DecodedArtifact::error(path.clone(), kind, e)))
                }
            }
        };

        if let LoadOutcome::Completed(artifact) = &outcome {
            if let Some(cancel) = artifact.background_token() {
                self.enqueue(
                    LoadPriority::Background,
                    Job::Fill {
                        artifact: artifact.clone(),
                        cancel,
                    },
                );
            }
        }

        let id = handle.id();
        self.in_flight.remove_if(&path, |_, h| h.id() == id);
        tracing::debug!(
            "Load #{} of {} finished: {}",
            id,
            path.display(),
            match &outcome {
                LoadOutcome::Completed(a) => a.summary(),
                LoadOutcome::Cancelled => "cancelled".to_string(),
            }
        );
        handle.complete(outcome);
    }

    fn run_fill(&self, artifact: &DecodedArtifact, cancel: &CancelToken) {
        let result = catch_unwind(AssertUnwindSafe(|| self.decoder.fill(artifact, &self.hint, cancel)));
        match result {
            Ok(Ok(())) | Ok(Err(DecodeFailure::Cancelled)) => {}
            Ok(Err(DecodeFailure::Error(e))) => {
                tracing::debug!("Background fill of {} failed: {}", artifact.key.display(), e);
            }
            Err(payload) => {
                tracing::error!(
                    "Background fill panicked on {}: {}",
                    artifact.key.display(),
                    app_log::panic_payload(payload.as_ref())
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::ArtifactPayload;
    use crate::test_support::{GatedDecoder, ScriptedDecoder};
    use std::time::Duration;

    fn pipeline(decoder: Arc<dyn DecodeSource>, workers: usize) -> AsyncLoadPipeline {
        AsyncLoadPipeline::new(decoder, DecodeHint::default(), workers)
    }

    #[tokio::test]
    async fn test_duplicate_submissions_share_work() {
        let decoder = Arc::new(GatedDecoder::new());
        let pipeline = pipeline(decoder.clone(), 2);

        let a = pipeline.submit(Path::new("/m/a.png"), MediaKind::Image, LoadPriority::Prefetch);
        let b = pipeline.submit(Path::new("/m/a.png"), MediaKind::Image, LoadPriority::Active);
        assert!(a.same_work(&b));

        decoder.open();
        let outcome = tokio::time::timeout(Duration::from_secs(5), a.wait()).await.unwrap();
        assert!(outcome.artifact().is_some());
        assert!(matches!(b.try_outcome(), Some(LoadOutcome::Completed(_))));
        assert_eq!(decoder.calls(Path::new("/m/a.png")), 1);
        assert_eq!(pipeline.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_active_jumps_the_queue() {
        let decoder = Arc::new(GatedDecoder::new());
        let pipeline = pipeline(decoder.clone(), 1);

        // Occupies the single worker until the gate opens
        let blocker = pipeline.submit(Path::new("/m/0.png"), MediaKind::Image, LoadPriority::Active);
        decoder.wait_started(1);

        let bg = pipeline.submit(Path::new("/m/bg.png"), MediaKind::Image, LoadPriority::Background);
        let p1 = pipeline.submit(Path::new("/m/p1.png"), MediaKind::Image, LoadPriority::Prefetch);
        let p2 = pipeline.submit(Path::new("/m/p2.png"), MediaKind::Image, LoadPriority::Prefetch);
        let active = pipeline.submit(Path::new("/m/act.png"), MediaKind::Image, LoadPriority::Active);

        decoder.open();
        for handle in [&blocker, &bg, &p1, &p2, &active] {
            tokio::time::timeout(Duration::from_secs(5), handle.wait()).await.unwrap();
        }

        let order = decoder.order();
        let names: Vec<_> = order.iter().map(|p| p.file_name().unwrap().to_string_lossy().into_owned()).collect();
        assert_eq!(names, vec!["0.png", "act.png", "p1.png", "p2.png", "bg.png"]);
    }

    #[tokio::test]
    async fn test_raising_a_queued_request() {
        let decoder = Arc::new(GatedDecoder::new());
        let pipeline = pipeline(decoder.clone(), 1);

        let blocker = pipeline.submit(Path::new("/m/0.png"), MediaKind::Image, LoadPriority::Active);
        decoder.wait_started(1);
        let first = pipeline.submit(Path::new("/m/1.png"), MediaKind::Image, LoadPriority::Prefetch);
        let later = pipeline.submit(Path::new("/m/2.png"), MediaKind::Image, LoadPriority::Background);
        let raised = pipeline.submit(Path::new("/m/2.png"), MediaKind::Image, LoadPriority::Active);
        assert!(later.same_work(&raised));
        assert_eq!(raised.priority(), LoadPriority::Active);

        decoder.open();
        for handle in [&blocker, &first, &later] {
            tokio::time::timeout(Duration::from_secs(5), handle.wait()).await.unwrap();
        }
        let names: Vec<_> = decoder
            .order()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["0.png", "2.png", "1.png"]);
        assert_eq!(decoder.calls(Path::new("/m/2.png")), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_never_decodes() {
        let decoder = Arc::new(GatedDecoder::new());
        let pipeline = pipeline(decoder.clone(), 1);

        let blocker = pipeline.submit(Path::new("/m/0.png"), MediaKind::Image, LoadPriority::Active);
        decoder.wait_started(1);
        let doomed = pipeline.submit(Path::new("/m/x.png"), MediaKind::Image, LoadPriority::Prefetch);
        doomed.cancel();

        decoder.open();
        tokio::time::timeout(Duration::from_secs(5), blocker.wait()).await.unwrap();
        let outcome = tokio::time::timeout(Duration::from_secs(5), doomed.wait()).await.unwrap();
        assert!(matches!(outcome, LoadOutcome::Cancelled));
        assert_eq!(decoder.calls(Path::new("/m/x.png")), 0);
    }

    #[tokio::test]
    async fn test_resubmitting_cancelled_path_starts_fresh_work() {
        let decoder = Arc::new(GatedDecoder::new());
        let pipeline = pipeline(decoder.clone(), 1);

        let blocker = pipeline.submit(Path::new("/m/0.png"), MediaKind::Image, LoadPriority::Active);
        decoder.wait_started(1);
        let old = pipeline.submit(Path::new("/m/x.png"), MediaKind::Image, LoadPriority::Prefetch);
        old.cancel();
        let fresh = pipeline.submit(Path::new("/m/x.png"), MediaKind::Image, LoadPriority::Prefetch);
        assert!(!old.same_work(&fresh));

        decoder.open();
        tokio::time::timeout(Duration::from_secs(5), blocker.wait()).await.unwrap();
        let outcome = tokio::time::timeout(Duration::from_secs(5), fresh.wait()).await.unwrap();
        assert!(outcome.artifact().is_some());
        assert_eq!(decoder.calls(Path::new("/m/x.png")), 1);
    }

    #[tokio::test]
    async fn test_errors_and_panics_become_error_artifacts() {
        let decoder = Arc::new(
            ScriptedDecoder::new()
                .fail("/m/bad.png", DecodeError::CorruptData)
                .panic_on("/m/boom.png"),
        );
        let pipeline = pipeline(decoder, 1);

        let bad = pipeline.submit(Path::new("/m/bad.png"), MediaKind::Image, LoadPriority::Active);
        let boom = pipeline.submit(Path::new("/m/boom.png"), MediaKind::Image, LoadPriority::Active);

        for (handle, expected) in [(&bad, DecodeError::CorruptData), (&boom, DecodeError::CorruptData)] {
            let outcome = tokio::time::timeout(Duration::from_secs(5), handle.wait()).await.unwrap();
            let artifact = outcome.artifact().unwrap();
            assert!(matches!(artifact.payload, ArtifactPayload::Error(e) if e == expected));
        }
    }

    #[tokio::test]
    async fn test_listener_runs_once_even_when_late() {
        let decoder = Arc::new(ScriptedDecoder::new());
        let pipeline = pipeline(decoder, 1);
        let handle = pipeline.submit(Path::new("/m/a.png"), MediaKind::Image, LoadPriority::Active);
        tokio::time::timeout(Duration::from_secs(5), handle.wait()).await.unwrap();

        let (tx, rx) = crossbeam_channel::unbounded();
        handle.on_complete(move |outcome| {
            let _ = tx.send(outcome.artifact().is_some());
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)), Ok(true));
    }
}
