//! Media format classification
//!
//! Extension first; a short signature sniff settles the ambiguous cases
//! (stills saved as .gif/.webp, audio-only MP4 containers, files without a
//! usable extension).

use infer::MatcherType;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// What kind of media a file holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    Image,
    RawImage,
    Animation,
    Video,
    Audio,
    PsdDocument,
    /// Terminal classification: never decoded, never retried
    Unsupported,
}

impl MediaKind {
    pub const ALL: [MediaKind; 7] = [
        MediaKind::Image,
        MediaKind::RawImage,
        MediaKind::Animation,
        MediaKind::Video,
        MediaKind::Audio,
        MediaKind::PsdDocument,
        MediaKind::Unsupported,
    ];

    /// Classify by extension alone (lowercase, no dot)
    pub fn from_extension(ext: &str) -> MediaKind {
        let ext = ext.to_ascii_lowercase();
        let ext = ext.as_str();
        if IMAGE_EXTENSIONS.contains(&ext) {
            MediaKind::Image
        } else if RAW_EXTENSIONS.contains(&ext) {
            MediaKind::RawImage
        } else if ANIMATION_EXTENSIONS.contains(&ext) {
            MediaKind::Animation
        } else if VIDEO_EXTENSIONS.contains(&ext) {
            MediaKind::Video
        } else if AUDIO_EXTENSIONS.contains(&ext) {
            MediaKind::Audio
        } else if PSD_EXTENSIONS.contains(&ext) {
            MediaKind::PsdDocument
        } else {
            MediaKind::Unsupported
        }
    }

    /// Handled by the external playback collaborator rather than decoded
    pub fn is_stream(self) -> bool {
        matches!(self, MediaKind::Video | MediaKind::Audio)
    }

    pub fn label(self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::RawImage => "raw",
            MediaKind::Animation => "animation",
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::PsdDocument => "psd",
            MediaKind::Unsupported => "unsupported",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

pub const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "bmp", "tiff", "tif", "ico", "jfif", "jpe", "tga",
    "heic", "heif", "avif",
];

pub const RAW_EXTENSIONS: &[&str] = &[
    "cr2", "nef", "arw", "orf", "rw2", "dng", "pef", "raf", "srw", "crw", "raw",
    "kdc", "mrw", "dcr", "sr2", "3fr", "mef", "erf", "rwl", "mdc", "mos", "x3f",
    "bay", "nrw",
];

pub const ANIMATION_EXTENSIONS: &[&str] = &["gif", "webp"];

pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "avi", "ts", "m2ts", "mov", "qt", "mkv", "flv", "webm", "3gp", "m4v",
    "mpg", "mpeg", "vob", "wmv",
];

pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "aac", "m4a", "ogg", "wav"];

pub const PSD_EXTENSIONS: &[&str] = &["psd", "psb"];

/// Containers whose extension alone may lie about the content
const SNIFFED_EXTENSIONS: &[&str] = &["gif", "webp", "mp4", "m4v", "mov"];

/// Every extension a folder listing should include
pub fn supported_extensions() -> Vec<String> {
    [
        IMAGE_EXTENSIONS,
        RAW_EXTENSIONS,
        ANIMATION_EXTENSIONS,
        VIDEO_EXTENSIONS,
        AUDIO_EXTENSIONS,
        PSD_EXTENSIONS,
    ]
    .iter()
    .flat_map(|list| list.iter().map(|e| e.to_string()))
    .collect()
}

/// Classify a file.
///
/// Reads at most a few KiB, and only for ambiguous extensions. Unreadable
/// files fall back to their extension.
pub fn classify(path: &Path) -> MediaKind {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    let by_extension = MediaKind::from_extension(&ext);

    let must_sniff = by_extension == MediaKind::Unsupported || SNIFFED_EXTENSIONS.contains(&ext.as_str());
    if !must_sniff {
        return by_extension;
    }

    let sniffed = match infer::get_from_path(path) {
        Ok(Some(kind)) => kind,
        Ok(None) => return by_extension,
        Err(e) => {
            tracing::debug!("Signature sniff failed for {}: {}", path.display(), e);
            return by_extension;
        }
    };

    let kind = refine(by_extension, &sniffed);
    if kind != by_extension {
        tracing::debug!(
            "Reclassified {} from {} to {} ({})",
            path.display(),
            by_extension,
            kind,
            sniffed.mime_type()
        );
    }
    kind
}

/// Combine the extension guess with the signature
fn refine(by_extension: MediaKind, sniffed: &infer::Type) -> MediaKind {
    let signature = classify_signature(sniffed);
    match by_extension {
        // A still image wearing an animation extension
        MediaKind::Animation => match signature {
            MediaKind::Image | MediaKind::RawImage | MediaKind::PsdDocument => signature,
            _ => MediaKind::Animation,
        },
        MediaKind::Video => match signature {
            MediaKind::Audio => MediaKind::Audio,
            _ => MediaKind::Video,
        },
        MediaKind::Unsupported => signature,
        other => other,
    }
}

fn classify_signature(sniffed: &infer::Type) -> MediaKind {
    match sniffed.mime_type() {
        "image/gif" | "image/webp" => return MediaKind::Animation,
        "image/vnd.adobe.photoshop" => return MediaKind::PsdDocument,
        _ => {}
    }

    if RAW_EXTENSIONS.contains(&sniffed.extension()) {
        return MediaKind::RawImage;
    }

    match sniffed.matcher_type() {
        MatcherType::Image => MediaKind::Image,
        MatcherType::Video => MediaKind::Video,
        MatcherType::Audio => MediaKind::Audio,
        _ => MediaKind::Unsupported,
    }
}
