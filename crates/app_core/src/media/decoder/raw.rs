//! Camera RAW files
//!
//! The largest embedded JPEG preview is good enough for triage and costs a
//! fraction of a sensor decode. Only when no usable preview exists do we run
//! `rawloader` and demosaic by 2x2 binning.

use super::{still, CancelToken, DecodeHint};
use crate::media::{ArtifactPayload, Orientation, StaticFrame};
use crate::{DecodeError, DecodeFailure};
use crossbeam_channel::RecvTimeoutError;
use image::{DynamicImage, RgbaImage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

const JPEG_SOI: &[u8] = b"\xff\xd8\xff";
const JPEG_EOI: &[u8] = b"\xff\xd9";

/// Previews smaller than this (longest side) are thumbnails, not previews
const MIN_PREVIEW_DIMENSION: u32 = 640;

const WAIT_SLICE: Duration = Duration::from_millis(50);

pub(super) fn decode(path: &Path, hint: &DecodeHint, cancel: &CancelToken) -> Result<ArtifactPayload, DecodeFailure> {
    let data = std::fs::read(path)?;
    cancel.checkpoint()?;

    for (start, end) in preview_candidates(&data) {
        cancel.checkpoint()?;
        match still::decode_bytes(&data[start..end], hint) {
            Ok(frame) if frame.source_width.max(frame.source_height) >= MIN_PREVIEW_DIMENSION => {
                tracing::debug!(
                    "Using embedded preview of {} ({}x{})",
                    path.display(),
                    frame.source_width,
                    frame.source_height
                );
                return Ok(ArtifactPayload::StaticFrame(Arc::new(frame)));
            }
            Ok(_) => break,
            Err(_) => continue,
        }
    }
    drop(data);

    tracing::debug!("No usable preview in {}, decoding sensor data", path.display());
    let frame = decode_sensor_with_timeout(path.to_path_buf(), hint, cancel)?;
    Ok(ArtifactPayload::StaticFrame(Arc::new(frame)))
}

/// Embedded JPEG spans, largest first
fn preview_candidates(data: &[u8]) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut pos = 0;
    while pos + JPEG_SOI.len() <= data.len() {
        if !data[pos..].starts_with(JPEG_SOI) {
            pos += 1;
            continue;
        }
        match data[pos..].windows(2).position(|w| w == JPEG_EOI) {
            Some(offset) => {
                let end = pos + offset + JPEG_EOI.len();
                spans.push((pos, end));
                pos = end;
            }
            None => break,
        }
    }
    spans.sort_by_key(|&(start, end)| std::cmp::Reverse(end - start));
    spans
}

/// `rawloader` cannot be interrupted, so it runs on its own thread while we
/// wait in slices, watching both the deadline and the cancel flag. An
/// abandoned decode finishes in the background and its result is dropped.
fn decode_sensor_with_timeout(path: PathBuf, hint: &DecodeHint, cancel: &CancelToken) -> Result<StaticFrame, DecodeFailure> {
    let (tx, rx) = crossbeam_channel::bounded(1);
    let max_dimension = hint.target_max_dimension;
    let worker_cancel = cancel.clone();

    std::thread::Builder::new()
        .name("sift-loader-raw".to_string())
        .spawn(move || {
            let result = decode_sensor(&path, max_dimension, &worker_cancel);
            let _ = tx.send(result);
        })
        .map_err(|_| DecodeFailure::Error(DecodeError::Unreadable))?;

    let deadline = Instant::now() + hint.raw_decode_timeout;
    loop {
        cancel.checkpoint()?;
        let now = Instant::now();
        if now >= deadline {
            return Err(DecodeError::Timeout.into());
        }
        match rx.recv_timeout(WAIT_SLICE.min(deadline - now)) {
            Ok(result) => return result,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return Err(DecodeError::CorruptData.into()),
        }
    }
}

fn decode_sensor(path: &Path, max_dimension: u32, cancel: &CancelToken) -> Result<StaticFrame, DecodeFailure> {
    let raw = rawloader::decode_file(path).map_err(|e| {
        tracing::debug!("rawloader rejected {}: {:?}", path.display(), e);
        DecodeFailure::Error(DecodeError::UnsupportedVariant)
    })?;
    cancel.checkpoint()?;

    let samples: Vec<f32> = match &raw.data {
        rawloader::RawImageData::Integer(values) => values.iter().map(|&v| v as f32).collect(),
        rawloader::RawImageData::Float(values) => values.clone(),
    };
    let sensor = Sensor {
        width: raw.width,
        height: raw.height,
        cpp: raw.cpp,
        black: raw.blacklevels[0] as f32,
        white: if matches!(raw.data, rawloader::RawImageData::Float(_)) {
            1.0
        } else {
            raw.whitelevels[0] as f32
        },
        wb: normalized_white_balance(raw.wb_coeffs),
    };

    let rgba = if sensor.cpp == 1 {
        bin_cfa(&sensor, &samples, |row, col| raw.cfa.color_at(row, col), cancel)?
    } else {
        subsample_rgb(&sensor, &samples, cancel)?
    };

    Ok(StaticFrame::from_dynamic(
        DynamicImage::ImageRgba8(rgba),
        max_dimension,
        Orientation::Normal,
    ))
}

struct Sensor {
    width: usize,
    height: usize,
    cpp: usize,
    black: f32,
    white: f32,
    wb: [f32; 3],
}

impl Sensor {
    fn to_u8(&self, value: f32, channel: usize) -> u8 {
        let range = (self.white - self.black).max(1.0);
        let linear = ((value - self.black) / range * self.wb[channel]).clamp(0.0, 1.0);
        (linear.powf(1.0 / 2.2) * 255.0).round() as u8
    }
}

/// Divide by green; missing or broken coefficients mean neutral
fn normalized_white_balance(coeffs: [f32; 4]) -> [f32; 3] {
    let valid = |v: f32| v.is_finite() && v > 0.0;
    if !valid(coeffs[0]) || !valid(coeffs[1]) || !valid(coeffs[2]) {
        return [1.0, 1.0, 1.0];
    }
    [coeffs[0] / coeffs[1], 1.0, coeffs[2] / coeffs[1]]
}

/// Collapse each 2x2 CFA block into one RGB pixel
fn bin_cfa(
    sensor: &Sensor,
    samples: &[f32],
    color_at: impl Fn(usize, usize) -> usize,
    cancel: &CancelToken,
) -> Result<RgbaImage, DecodeFailure> {
    let out_w = (sensor.width / 2) as u32;
    let out_h = (sensor.height / 2) as u32;
    if out_w == 0 || out_h == 0 || samples.len() < sensor.width * sensor.height {
        return Err(DecodeError::CorruptData.into());
    }

    let mut out = RgbaImage::new(out_w, out_h);
    for y in 0..out_h as usize {
        cancel.checkpoint()?;
        for x in 0..out_w as usize {
            let mut sum = [0.0f32; 3];
            let mut count = [0u32; 3];
            for (dy, dx) in [(0, 0), (0, 1), (1, 0), (1, 1)] {
                let (row, col) = (y * 2 + dy, x * 2 + dx);
                // 3 is the second green of RGBE/RGGB patterns
                let channel = match color_at(row, col) {
                    0 => 0,
                    2 => 2,
                    _ => 1,
                };
                sum[channel] += samples[row * sensor.width + col];
                count[channel] += 1;
            }
            let mut pixel = [0u8, 0, 0, 255];
            for c in 0..3 {
                let value = if count[c] > 0 { sum[c] / count[c] as f32 } else { sensor.black };
                pixel[c] = sensor.to_u8(value, c);
            }
            out.put_pixel(x as u32, y as u32, image::Rgba(pixel));
        }
    }
    Ok(out)
}

/// Already demosaiced data (linear DNG): take every other pixel
fn subsample_rgb(sensor: &Sensor, samples: &[f32], cancel: &CancelToken) -> Result<RgbaImage, DecodeFailure> {
    let out_w = (sensor.width / 2).max(1) as u32;
    let out_h = (sensor.height / 2).max(1) as u32;
    if sensor.cpp < 3 || samples.len() < sensor.width * sensor.height * sensor.cpp {
        return Err(DecodeError::UnsupportedVariant.into());
    }

    let mut out = RgbaImage::new(out_w, out_h);
    for y in 0..out_h as usize {
        cancel.checkpoint()?;
        let row = (y * 2).min(sensor.height - 1);
        for x in 0..out_w as usize {
            let col = (x * 2).min(sensor.width - 1);
            let base = (row * sensor.width + col) * sensor.cpp;
            let pixel = [
                sensor.to_u8(samples[base], 0),
                sensor.to_u8(samples[base + 1], 1),
                sensor.to_u8(samples[base + 2], 2),
                255,
            ];
            out.put_pixel(x as u32, y as u32, image::Rgba(pixel));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::jpeg::JpegEncoder;

    fn jpeg(width: u32, height: u32) -> Vec<u8> {
        let mut out = Vec::new();
        let image = image::RgbImage::from_pixel(width, height, image::Rgb([200, 100, 50]));
        JpegEncoder::new_with_quality(&mut out, 80)
            .encode_image(&image)
            .unwrap();
        out
    }

    #[test]
    fn test_candidates_sorted_largest_first() {
        let mut data = b"HEADER".to_vec();
        data.extend(b"\xff\xd8\xffAB\xff\xd9");
        data.extend(b"junk");
        data.extend(b"\xff\xd8\xffABCDEFGH\xff\xd9");
        let spans = preview_candidates(&data);
        assert_eq!(spans.len(), 2);
        assert!(spans[0].1 - spans[0].0 > spans[1].1 - spans[1].0);
        assert!(data[spans[0].0..spans[0].1].ends_with(JPEG_EOI));
    }

    #[test]
    fn test_embedded_preview_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shot.nef");
        let mut container = b"II*\0 fake tiff header".to_vec();
        container.extend(jpeg(64, 48));
        container.extend(b"padding");
        container.extend(jpeg(800, 600));
        std::fs::write(&path, container).unwrap();

        let hint = DecodeHint {
            target_max_dimension: 400,
            ..Default::default()
        };
        let ArtifactPayload::StaticFrame(frame) = decode(&path, &hint, &CancelToken::new()).unwrap() else {
            panic!("expected a static frame");
        };
        assert_eq!((frame.source_width, frame.source_height), (800, 600));
        assert_eq!((frame.width, frame.height), (400, 300));
    }

    #[test]
    fn test_garbage_without_preview_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.cr2");
        std::fs::write(&path, vec![0u8; 4096]).unwrap();
        let result = decode(&path, &DecodeHint::default(), &CancelToken::new());
        assert!(matches!(result, Err(DecodeFailure::Error(_))));
    }

    #[test]
    fn test_binning_applies_levels() {
        let sensor = Sensor {
            width: 2,
            height: 2,
            cpp: 1,
            black: 0.0,
            white: 100.0,
            wb: [1.0, 1.0, 1.0],
        };
        // RGGB: R=100, G=0, G=0, B=0
        let samples = [100.0, 0.0, 0.0, 0.0];
        let rggb = |row: usize, col: usize| [[0, 1], [3, 2]][row % 2][col % 2];
        let image = bin_cfa(&sensor, &samples, rggb, &CancelToken::new()).unwrap();
        assert_eq!(image.dimensions(), (1, 1));
        assert_eq!(image.get_pixel(0, 0).0, [255, 0, 0, 255]);
    }

    #[test]
    fn test_white_balance_falls_back_to_neutral() {
        assert_eq!(normalized_white_balance([f32::NAN, 1.0, 1.0, 1.0]), [1.0, 1.0, 1.0]);
        assert_eq!(normalized_white_balance([2.0, 1.0, 1.5, 1.0]), [2.0, 1.0, 1.5]);
    }
}
