//! Photoshop documents
//!
//! The merged composite is decoded by the `psd` crate. The header is
//! checked here first so that large-document (PSB) files and color modes
//! the crate cannot flatten report `UnsupportedVariant` instead of a
//! generic parse failure.

use super::{CancelToken, DecodeHint};
use crate::media::{ArtifactPayload, Orientation, StaticFrame};
use crate::{DecodeError, DecodeFailure};
use image::{DynamicImage, RgbaImage};
use psd::Psd;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

const SIGNATURE: &[u8; 4] = b"8BPS";
const HEADER_LEN: usize = 26;

pub(super) fn decode(path: &Path, hint: &DecodeHint, cancel: &CancelToken) -> Result<ArtifactPayload, DecodeFailure> {
    let data = std::fs::read(path)?;
    cancel.checkpoint()?;
    let rgba = decode_composite(&data)?;
    cancel.checkpoint()?;
    tracing::debug!("Decoded PSD composite {} ({}x{})", path.display(), rgba.width(), rgba.height());
    Ok(ArtifactPayload::StaticFrame(Arc::new(StaticFrame::from_dynamic(
        DynamicImage::ImageRgba8(rgba),
        hint.target_max_dimension,
        Orientation::Normal,
    ))))
}

fn decode_composite(data: &[u8]) -> Result<RgbaImage, DecodeFailure> {
    check_header(data)?;

    // The parser indexes slices by header lengths and can panic on a lying file
    let parsed = panic::catch_unwind(AssertUnwindSafe(|| {
        Psd::from_bytes(data).map(|psd| (psd.width(), psd.height(), psd.rgba()))
    }));
    let (width, height, pixels) = match parsed {
        Ok(Ok(parts)) => parts,
        Ok(Err(e)) => {
            tracing::debug!("PSD parse failed: {}", e);
            return Err(DecodeError::CorruptData.into());
        }
        Err(_) => {
            tracing::debug!("PSD parser panicked");
            return Err(DecodeError::CorruptData.into());
        }
    };

    composite_image(width, height, pixels)
}

/// Signature, version, depth and color mode from the fixed 26-byte header
fn check_header(data: &[u8]) -> Result<(), DecodeFailure> {
    if data.len() < HEADER_LEN || &data[..4] != SIGNATURE {
        return Err(DecodeError::CorruptData.into());
    }
    let be16 = |at: usize| u16::from_be_bytes([data[at], data[at + 1]]);

    match be16(4) {
        1 => {}
        // PSB
        2 => return Err(DecodeError::UnsupportedVariant.into()),
        _ => return Err(DecodeError::CorruptData.into()),
    }
    if !matches!(be16(22), 8 | 16) {
        return Err(DecodeError::UnsupportedVariant.into());
    }
    // Grayscale, RGB, CMYK
    if !matches!(be16(24), 1 | 3 | 4) {
        return Err(DecodeError::UnsupportedVariant.into());
    }
    Ok(())
}

fn composite_image(width: u32, height: u32, pixels: Vec<u8>) -> Result<RgbaImage, DecodeFailure> {
    if width == 0 || height == 0 {
        return Err(DecodeError::CorruptData.into());
    }
    RgbaImage::from_raw(width, height, pixels).ok_or_else(|| DecodeError::CorruptData.into())
}
