//! GIF and animated WebP
//!
//! The first frame is decoded before returning; the rest are appended by a
//! background fill job that re-reads the file and skips what it already has.

use super::{CancelToken, DecodeHint};
use crate::media::{AnimationFrame, ArtifactPayload, FillState, FrameSequence, LoopCount, Orientation, StaticFrame};
use crate::{DecodeError, DecodeFailure};
use image::codecs::gif::GifDecoder;
use image::codecs::webp::WebPDecoder;
use image::{AnimationDecoder, DynamicImage, Frame, Frames, ImageFormat, ImageReader};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Browsers treat delays this short as "as fast as possible"; play them at 10 fps
const MIN_FRAME_DELAY_MS: u32 = 10;
const DEFAULT_FRAME_DELAY_MS: u32 = 100;

pub fn normalize_frame_delay(delay_ms: u32) -> Duration {
    if delay_ms <= MIN_FRAME_DELAY_MS {
        Duration::from_millis(DEFAULT_FRAME_DELAY_MS as u64)
    } else {
        Duration::from_millis(delay_ms as u64)
    }
}

pub(super) fn decode_first(path: &Path, hint: &DecodeHint) -> Result<ArtifactPayload, DecodeFailure> {
    let (mut frames, loop_count) = open_frames(path)?;
    let first = match frames.next() {
        Some(frame) => convert(frame?, hint.target_max_dimension),
        None => return Err(DecodeError::CorruptData.into()),
    };

    let seq = FrameSequence::new(
        path.to_path_buf(),
        first,
        loop_count,
        hint.max_animation_frames,
        hint.target_max_dimension,
    );
    if hint.max_animation_frames <= 1 {
        seq.finish(FillState::Complete);
    }
    Ok(ArtifactPayload::FrameSequence(Arc::new(seq)))
}

/// Append the frames after those already decoded, one checkpoint per frame
pub(super) fn fill_remaining(seq: &FrameSequence, cancel: &CancelToken) -> Result<(), DecodeFailure> {
    if seq.fill_state() != FillState::Partial {
        return Ok(());
    }

    let result = fill_frames(seq, cancel);
    let state = match &result {
        Ok(()) => FillState::Complete,
        Err(DecodeFailure::Cancelled) => FillState::Abandoned,
        Err(DecodeFailure::Error(e)) => {
            tracing::warn!(
                "Animation {} stopped after {} frames: {}",
                seq.source().display(),
                seq.decoded_frames(),
                e
            );
            FillState::Abandoned
        }
    };
    seq.finish(state);
    tracing::debug!("Frame fill of {} ended {:?} with {} frames", seq.source().display(), state, seq.decoded_frames());
    result
}

fn fill_frames(seq: &FrameSequence, cancel: &CancelToken) -> Result<(), DecodeFailure> {
    let skip = seq.decoded_frames();
    let (frames, _) = open_frames(seq.source())?;

    for frame in frames.skip(skip) {
        cancel.checkpoint()?;
        if seq.decoded_frames() >= seq.max_frames() {
            break;
        }
        let frame = convert(frame?, seq.max_dimension());
        if !seq.push_frame(frame) {
            break;
        }
    }
    Ok(())
}

/// Frame iterator plus the repeat count from the GIF NETSCAPE block or the WebP ANIM chunk
fn open_frames(path: &Path) -> Result<(Frames<'static>, LoopCount), DecodeFailure> {
    let format = ImageReader::open(path)?.with_guessed_format()?.format();
    let reader = BufReader::new(File::open(path)?);

    match format {
        Some(ImageFormat::Gif) => Ok(animated(GifDecoder::new(reader)?)),
        Some(ImageFormat::WebP) => Ok(animated(WebPDecoder::new(reader)?)),
        _ => Err(DecodeError::UnsupportedVariant.into()),
    }
}

fn animated(decoder: impl AnimationDecoder<'static>) -> (Frames<'static>, LoopCount) {
    let loop_count = LoopCount::from(decoder.loop_count());
    (decoder.into_frames(), loop_count)
}

fn convert(frame: Frame, max_dimension: u32) -> AnimationFrame {
    let (numer, denom) = frame.delay().numer_denom_ms();
    let delay_ms = if denom == 0 { 0 } else { numer / denom };
    let image = DynamicImage::ImageRgba8(frame.into_buffer());
    AnimationFrame {
        frame: Arc::new(StaticFrame::from_dynamic(image, max_dimension, Orientation::Normal)),
        duration: normalize_frame_delay(delay_ms),
    }
}
