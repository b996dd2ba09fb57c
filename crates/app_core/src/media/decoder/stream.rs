//! Video and audio: a metadata probe, never a full decode

use crate::media::{ArtifactPayload, MediaKind, MediaStreamHandle, StreamProbe};
use crate::{DecodeError, DecodeFailure};
use lofty::error::LoftyError;
use lofty::file::AudioFile;
use lofty::probe::Probe;
use lofty::properties::FileProperties;
use std::path::Path;

pub(super) fn probe(path: &Path, kind: MediaKind) -> Result<ArtifactPayload, DecodeFailure> {
    let metadata = std::fs::metadata(path)?;
    if !metadata.is_file() {
        return Err(DecodeError::Unreadable.into());
    }

    let mut probe = StreamProbe {
        file_size: metadata.len(),
        ..Default::default()
    };

    match read_properties(path) {
        Ok(props) => {
            probe.duration = Some(props.duration()).filter(|d| !d.is_zero());
            probe.sample_rate = props.sample_rate();
            probe.channels = props.channels();
            probe.bitrate_kbps = props.audio_bitrate();
        }
        // The player may still handle containers the probe cannot parse
        Err(e) if kind == MediaKind::Video => {
            tracing::debug!("Video probe failed for {}: {}", path.display(), e);
        }
        Err(e) => {
            tracing::warn!("Audio probe failed for {}: {}", path.display(), e);
            return Err(DecodeError::CorruptData.into());
        }
    }

    Ok(ArtifactPayload::MediaStream(MediaStreamHandle {
        path: path.to_path_buf(),
        kind,
        probe,
    }))
}

fn read_properties(path: &Path) -> Result<FileProperties, LoftyError> {
    let tagged = Probe::open(path)?.guess_file_type()?.read()?;
    Ok(tagged.properties().clone())
}
