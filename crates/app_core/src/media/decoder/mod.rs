//! Format dispatch
//!
//! One decode function per `MediaKind`, selected in a single `match`. Adding
//! a kind without a decoder is a compile error.

mod animation;
mod psd;
mod raw;
mod still;
mod stream;

use super::{ArtifactPayload, DecodedArtifact, MediaKind};
use crate::{DecodeError, DecodeFailure};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub use animation::normalize_frame_delay;

/// Shared cancellation flag.
///
/// The canceller only sets the flag; the decode notices at its next
/// checkpoint and releases its own resources.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Bail out with `Cancelled` if the flag is set
    pub fn checkpoint(&self) -> Result<(), DecodeFailure> {
        if self.is_cancelled() {
            Err(DecodeFailure::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Per-request decode parameters
#[derive(Debug, Clone)]
pub struct DecodeHint {
    pub target_max_dimension: u32,
    pub request_id: u64,
    pub max_animation_frames: usize,
    pub raw_decode_timeout: Duration,
}

impl Default for DecodeHint {
    fn default() -> Self {
        Self {
            target_max_dimension: 4096,
            request_id: 0,
            max_animation_frames: 1000,
            raw_decode_timeout: Duration::from_secs(10),
        }
    }
}

impl DecodeHint {
    pub fn from_config(config: &crate::config::LoaderConfig) -> Self {
        Self {
            target_max_dimension: config.target_max_dimension,
            request_id: 0,
            max_animation_frames: config.max_animation_frames,
            raw_decode_timeout: config.raw_decode_timeout(),
        }
    }

    pub fn with_request_id(&self, request_id: u64) -> Self {
        Self {
            request_id,
            ..self.clone()
        }
    }
}

/// Where the pipeline gets its pixels from.
///
/// `MediaDecoder` is the real implementation; tests plug in fakes to count
/// or gate decodes.
pub trait DecodeSource: Send + Sync + 'static {
    /// Decode `path` as `kind`. Must return an error value on bad input, never panic
    fn decode(
        &self,
        path: &Path,
        kind: MediaKind,
        hint: &DecodeHint,
        cancel: &CancelToken,
    ) -> Result<ArtifactPayload, DecodeFailure>;

    /// Complete a partially decoded artifact (remaining animation frames)
    fn fill(&self, _artifact: &DecodedArtifact, _hint: &DecodeHint, _cancel: &CancelToken) -> Result<(), DecodeFailure> {
        Ok(())
    }
}

/// Built-in decoders for every supported kind
#[derive(Debug, Default, Clone, Copy)]
pub struct MediaDecoder;

impl DecodeSource for MediaDecoder {
    fn decode(
        &self,
        path: &Path,
        kind: MediaKind,
        hint: &DecodeHint,
        cancel: &CancelToken,
    ) -> Result<ArtifactPayload, DecodeFailure> {
        cancel.checkpoint()?;
        match kind {
            MediaKind::Image => still::decode(path, hint),
            MediaKind::RawImage => raw::decode(path, hint, cancel),
            MediaKind::Animation => animation::decode_first(path, hint),
            MediaKind::Video | MediaKind::Audio => stream::probe(path, kind),
            MediaKind::PsdDocument => psd::decode(path, hint, cancel),
            MediaKind::Unsupported => Err(DecodeError::UnsupportedVariant.into()),
        }
    }

    fn fill(&self, artifact: &DecodedArtifact, _hint: &DecodeHint, cancel: &CancelToken) -> Result<(), DecodeFailure> {
        match &artifact.payload {
            ArtifactPayload::FrameSequence(seq) => animation::fill_remaining(seq, cancel),
            _ => Ok(()),
        }
    }
}
