//! MediaSift Core Domain Logic
//!
//! This crate contains:
//! - Media classification, decoded artifacts and the decoders
//! - The asynchronous load pipeline and the bounded media cache
//! - Navigation list, cursor and prefetch window
//! - File operations with undo
//! - Session facade, configuration and error types

pub mod config;
pub mod error;
pub mod media;
pub mod media_cache;
pub mod navigation;
pub mod operations;
pub mod pipeline;
pub mod state;
pub mod undo;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{AppConfig, CacheConfig, FileOpsConfig, LoaderConfig, NavigationConfig};
pub use error::{AppError, DecodeError, DecodeFailure, FileOperationError};
pub use media::{
    classify, supported_extensions, ArtifactPayload, CancelToken, DecodeHint, DecodeSource, DecodedArtifact,
    FrameSequence, MediaKind, MediaStreamHandle, StaticFrame,
};
pub use media_cache::{CacheBudget, CacheEvent, CacheLookup, CacheStats, EntryState, MediaCache};
pub use navigation::{MediaEntry, Navigator};
pub use operations::FileOperationEngine;
pub use pipeline::{AsyncLoadPipeline, LoadHandle, LoadOutcome, LoadPriority};
pub use state::{ActiveEntry, Session};
pub use undo::{OperationKind, UndoRecord, UndoStack};

pub use app_fs::{SortBy, SortOrder};

use once_cell::sync::OnceCell;

/// Global session (for the command loop)
static SESSION: OnceCell<Session> = OnceCell::new();

/// Initialize the global session
pub fn init(config: AppConfig) -> anyhow::Result<&'static Session> {
    let session = Session::new(config)?;
    SESSION
        .set(session)
        .map_err(|_| anyhow::anyhow!("Session already initialized"))?;
    SESSION
        .get()
        .ok_or_else(|| anyhow::anyhow!("Session initialization failed"))
}

/// Get the global session
pub fn session() -> Option<&'static Session> {
    SESSION.get()
}
