//! Media model: classification, decoded artifacts and the decoders

mod artifact;
pub mod decoder;
mod format;

pub use artifact::{
    AnimationFrame, ArtifactPayload, DecodedArtifact, FillState, FrameSequence, LoopCount, MediaStreamHandle,
    Orientation, StaticFrame, StreamProbe,
};
pub use decoder::{CancelToken, DecodeHint, DecodeSource, MediaDecoder};
pub use format::{
    classify, supported_extensions, MediaKind, ANIMATION_EXTENSIONS, AUDIO_EXTENSIONS, IMAGE_EXTENSIONS,
    PSD_EXTENSIONS, RAW_EXTENSIONS, VIDEO_EXTENSIONS,
};
