//! Decoded, display-ready artifacts
//!
//! Artifacts are immutable once published. The cache hands out `Arc`s, so an
//! evicted artifact stays alive until its last reader drops it. The one
//! exception is a `FrameSequence`, which only ever grows (frames appended by
//! the background fill) and never changes frames already handed out.

use super::decoder::CancelToken;
use super::MediaKind;
use crate::DecodeError;
use image::{DynamicImage, RgbaImage};
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// EXIF orientation of a frame; pixels are stored as decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
    #[default]
    Normal,
    Rotate90,
    Rotate180,
    Rotate270,
    FlipHorizontal,
    FlipVertical,
    Rotate90FlipH,
    Rotate270FlipH,
}

impl From<image::metadata::Orientation> for Orientation {
    fn from(o: image::metadata::Orientation) -> Self {
        use image::metadata::Orientation as Exif;
        match o {
            Exif::NoTransforms => Orientation::Normal,
            Exif::Rotate90 => Orientation::Rotate90,
            Exif::Rotate180 => Orientation::Rotate180,
            Exif::Rotate270 => Orientation::Rotate270,
            Exif::FlipHorizontal => Orientation::FlipHorizontal,
            Exif::FlipVertical => Orientation::FlipVertical,
            Exif::Rotate90FlipH => Orientation::Rotate90FlipH,
            Exif::Rotate270FlipH => Orientation::Rotate270FlipH,
        }
    }
}

/// One RGBA8 frame
#[derive(Clone)]
pub struct StaticFrame {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub orientation: Orientation,
    /// Dimensions before downsampling
    pub source_width: u32,
    pub source_height: u32,
}

impl std::fmt::Debug for StaticFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("orientation", &self.orientation)
            .field("source", &(self.source_width, self.source_height))
            .finish()
    }
}

impl StaticFrame {
    /// Downsample (aspect preserved) so neither side exceeds `max_dimension`
    pub fn from_dynamic(image: DynamicImage, max_dimension: u32, orientation: Orientation) -> Self {
        let (source_width, source_height) = (image.width(), image.height());
        let image = if max_dimension > 0 && (source_width > max_dimension || source_height > max_dimension) {
            image.thumbnail(max_dimension, max_dimension)
        } else {
            image
        };
        let mut frame = Self::from_rgba(image.into_rgba8(), orientation);
        frame.source_width = source_width;
        frame.source_height = source_height;
        frame
    }

    pub fn from_rgba(image: RgbaImage, orientation: Orientation) -> Self {
        let (width, height) = image.dimensions();
        Self {
            pixels: image.into_raw(),
            width,
            height,
            orientation,
            source_width: width,
            source_height: height,
        }
    }

    pub fn memory_cost(&self) -> usize {
        self.pixels.len() + std::mem::size_of::<Self>()
    }
}

/// A frame of an animation and how long it stays on screen
#[derive(Debug, Clone)]
pub struct AnimationFrame {
    pub frame: Arc<StaticFrame>,
    pub duration: Duration,
}

/// How many times an animation plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopCount {
    Infinite,
    Finite(u32),
}

impl From<image::metadata::LoopCount> for LoopCount {
    fn from(count: image::metadata::LoopCount) -> Self {
        match count {
            image::metadata::LoopCount::Infinite => LoopCount::Infinite,
            image::metadata::LoopCount::Finite(n) => LoopCount::Finite(n.get()),
        }
    }
}

type GrowthHook = Box<dyn Fn() + Send + Sync>;

/// Progress of the background frame fill
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillState {
    /// More frames may still arrive
    Partial,
    /// Every frame (up to the cap) is decoded
    Complete,
    /// Fill stopped early (cancelled or a later frame was corrupt)
    Abandoned,
}

impl FillState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => FillState::Partial,
            1 => FillState::Complete,
            _ => FillState::Abandoned,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            FillState::Partial => 0,
            FillState::Complete => 1,
            FillState::Abandoned => 2,
        }
    }
}

/// Animation frames, first frame always present
pub struct FrameSequence {
    source: PathBuf,
    frames: RwLock<Vec<AnimationFrame>>,
    loop_count: LoopCount,
    fill: AtomicU8,
    memory: AtomicUsize,
    max_frames: usize,
    max_dimension: u32,
    fill_cancel: CancelToken,
    /// Called after every appended frame, outside the frame lock
    on_growth: OnceCell<GrowthHook>,
}

impl std::fmt::Debug for FrameSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSequence")
            .field("source", &self.source)
            .field("frames", &self.decoded_frames())
            .field("fill", &self.fill_state())
            .finish()
    }
}

impl FrameSequence {
    pub(crate) fn new(
        source: PathBuf,
        first: AnimationFrame,
        loop_count: LoopCount,
        max_frames: usize,
        max_dimension: u32,
    ) -> Self {
        let memory = first.frame.memory_cost();
        Self {
            source,
            frames: RwLock::new(vec![first]),
            loop_count,
            fill: AtomicU8::new(FillState::Partial.as_u8()),
            memory: AtomicUsize::new(memory),
            max_frames: max_frames.max(1),
            max_dimension,
            fill_cancel: CancelToken::new(),
            on_growth: OnceCell::new(),
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn loop_count(&self) -> LoopCount {
        self.loop_count
    }

    pub fn first_frame(&self) -> AnimationFrame {
        self.frames.read()[0].clone()
    }

    /// Frame `index` if it has been decoded
    pub fn frame(&self, index: usize) -> Option<AnimationFrame> {
        self.frames.read().get(index).cloned()
    }

    pub fn decoded_frames(&self) -> usize {
        self.frames.read().len()
    }

    pub fn frame_durations(&self) -> Vec<Duration> {
        self.frames.read().iter().map(|f| f.duration).collect()
    }

    pub fn fill_state(&self) -> FillState {
        FillState::from_u8(self.fill.load(Ordering::Acquire))
    }

    pub fn memory_cost(&self) -> usize {
        self.memory.load(Ordering::Acquire)
    }

    /// Register the observer of memory growth; only the first one sticks
    pub(crate) fn set_growth_hook(&self, hook: impl Fn() + Send + Sync + 'static) -> bool {
        self.on_growth.set(Box::new(hook)).is_ok()
    }

    /// Ask the background fill to stop at its next frame
    pub fn stop_fill(&self) {
        self.fill_cancel.cancel();
    }

    pub(crate) fn fill_token(&self) -> CancelToken {
        self.fill_cancel.clone()
    }

    pub(crate) fn max_frames(&self) -> usize {
        self.max_frames
    }

    pub(crate) fn max_dimension(&self) -> u32 {
        self.max_dimension
    }

    /// Append a frame; refuses once the cap is reached
    pub(crate) fn push_frame(&self, frame: AnimationFrame) -> bool {
        {
            let mut frames = self.frames.write();
            if frames.len() >= self.max_frames {
                return false;
            }
            self.memory.fetch_add(frame.frame.memory_cost(), Ordering::AcqRel);
            frames.push(frame);
        }
        if let Some(hook) = self.on_growth.get() {
            hook();
        }
        true
    }

    pub(crate) fn finish(&self, state: FillState) {
        self.fill.store(state.as_u8(), Ordering::Release);
    }
}

/// Probe results handed to the playback collaborator
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamProbe {
    pub duration: Option<Duration>,
    pub dimensions: Option<(u32, u32)>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u8>,
    pub bitrate_kbps: Option<u32>,
    pub file_size: u64,
}

/// Reference an external player opens; no samples are decoded here
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaStreamHandle {
    pub path: PathBuf,
    pub kind: MediaKind,
    pub probe: StreamProbe,
}

#[derive(Debug, Clone)]
pub enum ArtifactPayload {
    StaticFrame(Arc<StaticFrame>),
    FrameSequence(Arc<FrameSequence>),
    MediaStream(MediaStreamHandle),
    /// Terminal decode failure, or a placeholder while the real load continues
    Error(DecodeError),
}

/// Display-ready result for one file
#[derive(Debug, Clone)]
pub struct DecodedArtifact {
    pub key: PathBuf,
    pub kind: MediaKind,
    pub payload: ArtifactPayload,
    pub decoded_at: Instant,
}

impl DecodedArtifact {
    pub fn new(key: PathBuf, kind: MediaKind, payload: ArtifactPayload) -> Self {
        Self {
            key,
            kind,
            payload,
            decoded_at: Instant::now(),
        }
    }

    pub fn error(key: PathBuf, kind: MediaKind, error: DecodeError) -> Self {
        Self::new(key, kind, ArtifactPayload::Error(error))
    }

    pub fn error_kind(&self) -> Option<DecodeError> {
        match self.payload {
            ArtifactPayload::Error(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error_kind().is_some()
    }

    /// Token for the background work still attached to this artifact
    pub(crate) fn background_token(&self) -> Option<CancelToken> {
        match &self.payload {
            ArtifactPayload::FrameSequence(seq) if seq.fill_state() == FillState::Partial => Some(seq.fill_token()),
            _ => None,
        }
    }

    /// Run `hook` whenever the artifact grows after publication
    pub(crate) fn watch_growth(&self, hook: impl Fn() + Send + Sync + 'static) {
        if let ArtifactPayload::FrameSequence(seq) = &self.payload {
            seq.set_growth_hook(hook);
        }
    }

    /// Called when the cache lets go of the artifact
    pub(crate) fn stop_background_work(&self) {
        if let ArtifactPayload::FrameSequence(seq) = &self.payload {
            seq.stop_fill();
        }
    }

    /// Current decoded size; grows while an animation is being filled
    pub fn memory_cost_bytes(&self) -> usize {
        match &self.payload {
            ArtifactPayload::StaticFrame(frame) => frame.memory_cost(),
            ArtifactPayload::FrameSequence(seq) => seq.memory_cost(),
            ArtifactPayload::MediaStream(handle) => {
                std::mem::size_of::<MediaStreamHandle>() + handle.path.as_os_str().len()
            }
            ArtifactPayload::Error(_) => 0,
        }
    }

    /// One-line description for logs and the command front-end
    pub fn summary(&self) -> String {
        match &self.payload {
            ArtifactPayload::StaticFrame(f) => {
                format!("{} {}x{} (source {}x{})", self.kind, f.width, f.height, f.source_width, f.source_height)
            }
            ArtifactPayload::FrameSequence(seq) => {
                let first = seq.first_frame();
                format!(
                    "{} {}x{}, {} frames decoded ({:?})",
                    self.kind,
                    first.frame.width,
                    first.frame.height,
                    seq.decoded_frames(),
                    seq.fill_state()
                )
            }
            ArtifactPayload::MediaStream(handle) => {
                let duration = handle
                    .probe
                    .duration
                    .map(|d| format!("{:.1}s", d.as_secs_f64()))
                    .unwrap_or_else(|| "unknown length".to_string());
                format!("{} stream, {}", self.kind, duration)
            }
            ArtifactPayload::Error(e) => format!("{} unavailable: {}", self.kind, e),
        }
    }
}
