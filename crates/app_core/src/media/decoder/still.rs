//! Still images through the `image` crate

use super::DecodeHint;
use crate::media::{ArtifactPayload, StaticFrame};
use crate::DecodeFailure;
use image::metadata::Orientation as ExifOrientation;
use image::{DynamicImage, ImageDecoder, ImageReader};
use std::path::Path;
use std::sync::Arc;

pub(super) fn decode(path: &Path, hint: &DecodeHint) -> Result<ArtifactPayload, DecodeFailure> {
    let reader = ImageReader::open(path)?.with_guessed_format()?;
    let mut decoder = reader.into_decoder()?;
    let orientation = decoder.orientation().unwrap_or(ExifOrientation::NoTransforms);
    let image = DynamicImage::from_decoder(decoder)?;

    tracing::debug!(
        "Decoded {} ({}x{}, request {})",
        path.display(),
        image.width(),
        image.height(),
        hint.request_id
    );

    Ok(ArtifactPayload::StaticFrame(Arc::new(StaticFrame::from_dynamic(
        image,
        hint.target_max_dimension,
        orientation.into(),
    ))))
}

/// Decode an in-memory encoded image (embedded previews)
pub(super) fn decode_bytes(data: &[u8], hint: &DecodeHint) -> Result<StaticFrame, DecodeFailure> {
    let reader = ImageReader::new(std::io::Cursor::new(data)).with_guessed_format()?;
    let mut decoder = reader.into_decoder()?;
    let orientation = decoder.orientation().unwrap_or(ExifOrientation::NoTransforms);
    let image = DynamicImage::from_decoder(decoder)?;
    Ok(StaticFrame::from_dynamic(image, hint.target_max_dimension, orientation.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DecodeError;
    use image::{ImageFormat, Rgba, RgbaImage};

    #[test]
    fn test_large_image_is_downsampled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wide.png");
        RgbaImage::from_pixel(300, 100, Rgba([0, 0, 255, 255]))
            .save_with_format(&path, ImageFormat::Png)
            .unwrap();

        let hint = DecodeHint {
            target_max_dimension: 150,
            ..Default::default()
        };
        let ArtifactPayload::StaticFrame(frame) = decode(&path, &hint).unwrap() else {
            panic!("expected a static frame");
        };
        assert_eq!((frame.width, frame.height), (150, 50));
        assert_eq!((frame.source_width, frame.source_height), (300, 100));
    }

    #[test]
    fn test_truncated_png_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.png");
        RgbaImage::new(64, 64).save_with_format(&good, ImageFormat::Png).unwrap();
        let bytes = std::fs::read(&good).unwrap();

        let broken = dir.path().join("broken.png");
        std::fs::write(&broken, &bytes[..bytes.len() / 2]).unwrap();

        assert_eq!(
            decode(&broken, &DecodeHint::default()).err(),
            Some(DecodeFailure::Error(DecodeError::CorruptData))
        );
    }

    #[test]
    fn test_missing_file_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let result = decode(&dir.path().join("gone.png"), &DecodeHint::default());
        assert_eq!(result.err(), Some(DecodeFailure::Error(DecodeError::Unreadable)));
    }

    #[test]
    fn test_text_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.xyz");
        std::fs::write(&path, b"definitely not an image").unwrap();
        assert_eq!(
            decode(&path, &DecodeHint::default()).err(),
            Some(DecodeFailure::Error(DecodeError::UnsupportedVariant))
        );
    }
}
