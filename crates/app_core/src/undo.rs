//! Bounded undo history for file operations

use app_fs::RestoreToken;
use chrono::{DateTime, Local};
use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};

/// Kind of a recorded file operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Copy,
    Move,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OperationKind::Copy => "copy",
            OperationKind::Move => "move",
            OperationKind::Delete => "delete",
        };
        f.write_str(label)
    }
}

/// One completed operation, with everything its reversal needs.
///
/// Reversal is a pure function of the record: remove the copy, move the file
/// back, or restore it from the recoverable store.
#[derive(Debug, Clone)]
pub struct UndoRecord {
    pub kind: OperationKind,
    pub source: PathBuf,
    /// Where a copy or move landed
    pub destination: Option<PathBuf>,
    pub timestamp: DateTime<Local>,
    /// Trash token for a deleted source
    pub(crate) restore: Option<RestoreToken>,
    /// Trash token for a file replaced at the destination
    pub(crate) displaced: Option<RestoreToken>,
    pub(crate) reversible: bool,
    /// The source was under the cursor when the operation ran
    pub was_current: bool,
}

impl UndoRecord {
    pub(crate) fn new(kind: OperationKind, source: &Path, destination: Option<PathBuf>) -> Self {
        Self {
            kind,
            source: source.to_path_buf(),
            destination,
            timestamp: Local::now(),
            restore: None,
            displaced: None,
            reversible: true,
            was_current: false,
        }
    }

    pub fn is_reversible(&self) -> bool {
        self.reversible
    }

    /// Short description for messages, e.g. "move a.jpg -> /keep"
    pub fn describe(&self) -> String {
        let name = self
            .source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.source.display().to_string());
        match self.destination.as_deref().and_then(Path::parent) {
            Some(dir) => format!("{} {} -> {}", self.kind, name, dir.display()),
            None => format!("{} {}", self.kind, name),
        }
    }
}

/// Most recent first; the oldest record is dropped past `depth`
#[derive(Debug)]
pub struct UndoStack {
    records: VecDeque<UndoRecord>,
    depth: usize,
}

impl UndoStack {
    pub fn new(depth: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(depth.min(64)),
            depth,
        }
    }

    pub fn push(&mut self, record: UndoRecord) {
        if self.depth == 0 {
            return;
        }
        self.records.push_front(record);
        if self.records.len() > self.depth {
            if let Some(dropped) = self.records.pop_back() {
                tracing::debug!("Undo history full, dropped: {}", dropped.describe());
            }
        }
    }

    pub fn pop(&mut self) -> Option<UndoRecord> {
        self.records.pop_front()
    }

    pub fn peek(&self) -> Option<&UndoRecord> {
        self.records.front()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn iter(&self) -> impl Iterator<Item = &UndoRecord> {
        self.records.iter()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
