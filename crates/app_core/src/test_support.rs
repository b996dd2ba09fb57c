//! Fake decoders for unit tests

use crate::media::{ArtifactPayload, CancelToken, DecodeHint, DecodeSource, MediaKind, Orientation, StaticFrame};
use crate::{DecodeError, DecodeFailure};
use image::RgbaImage;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub fn frame_payload(width: u32, height: u32) -> ArtifactPayload {
    ArtifactPayload::StaticFrame(Arc::new(StaticFrame::from_rgba(
        RgbaImage::new(width, height),
        Orientation::Normal,
    )))
}

/// Bytes a `frame_payload(width, height)` costs in the cache
pub fn frame_cost(width: u32, height: u32) -> usize {
    (width * height * 4) as usize + std::mem::size_of::<StaticFrame>()
}

#[derive(Default)]
struct Record {
    order: Vec<PathBuf>,
    calls: HashMap<PathBuf, usize>,
}

impl Record {
    fn note(&mut self, path: &Path) {
        self.order.push(path.to_path_buf());
        *self.calls.entry(path.to_path_buf()).or_default() += 1;
    }
}

/// Decodes block until `open()` is called (cancellation still gets through)
pub struct GatedDecoder {
    record: Mutex<Record>,
    started: Condvar,
    gate: Mutex<bool>,
    opened: Condvar,
}

impl GatedDecoder {
    pub fn new() -> Self {
        Self {
            record: Mutex::new(Record::default()),
            started: Condvar::new(),
            gate: Mutex::new(false),
            opened: Condvar::new(),
        }
    }

    pub fn open(&self) {
        *self.gate.lock() = true;
        self.opened.notify_all();
    }

    /// Block until `count` decodes have started
    pub fn wait_started(&self, count: usize) {
        let mut record = self.record.lock();
        while record.order.len() < count {
            let timed_out = self.started.wait_for(&mut record, Duration::from_secs(5)).timed_out();
            assert!(!timed_out, "only {} decodes started", record.order.len());
        }
    }

    pub fn order(&self) -> Vec<PathBuf> {
        self.record.lock().order.clone()
    }

    pub fn calls(&self, path: &Path) -> usize {
        self.record.lock().calls.get(path).copied().unwrap_or(0)
    }
}

impl DecodeSource for GatedDecoder {
    fn decode(
        &self,
        path: &Path,
        _kind: MediaKind,
        _hint: &DecodeHint,
        cancel: &CancelToken,
    ) -> Result<ArtifactPayload, DecodeFailure> {
        self.record.lock().note(path);
        self.started.notify_all();

        let mut open = self.gate.lock();
        while !*open {
            cancel.checkpoint()?;
            self.opened.wait_for(&mut open, Duration::from_millis(20));
        }
        Ok(frame_payload(4, 4))
    }
}

/// Answers immediately: scripted failures, panics and frame sizes
#[derive(Default)]
pub struct ScriptedDecoder {
    record: Mutex<Record>,
    failures: HashMap<PathBuf, DecodeError>,
    panics: HashSet<PathBuf>,
    sizes: HashMap<PathBuf, (u32, u32)>,
}

impl ScriptedDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(mut self, path: impl Into<PathBuf>, error: DecodeError) -> Self {
        self.failures.insert(path.into(), error);
        self
    }

    pub fn panic_on(mut self, path: impl Into<PathBuf>) -> Self {
        self.panics.insert(path.into());
        self
    }

    pub fn size(mut self, path: impl Into<PathBuf>, width: u32, height: u32) -> Self {
        self.sizes.insert(path.into(), (width, height));
        self
    }

    pub fn calls(&self, path: &Path) -> usize {
        self.record.lock().calls.get(path).copied().unwrap_or(0)
    }
}

impl DecodeSource for ScriptedDecoder {
    fn decode(
        &self,
        path: &Path,
        _kind: MediaKind,
        _hint: &DecodeHint,
        cancel: &CancelToken,
    ) -> Result<ArtifactPayload, DecodeFailure> {
        self.record.lock().note(path);
        cancel.checkpoint()?;
        if self.panics.contains(path) {
            panic!("scripted decoder panic");
        }
        if let Some(error) = self.failures.get(path) {
            return Err((*error).into());
        }
        let (w, h) = self.sizes.get(path).copied().unwrap_or((4, 4));
        Ok(frame_payload(w, h))
    }
}
