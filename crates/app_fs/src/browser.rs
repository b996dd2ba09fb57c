//! Directory listing and ordering

use crate::{FsError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

/// File entry with metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    pub name: String,
    pub is_hidden: bool,
    pub size: u64,
    /// Unix seconds
    pub modified: Option<i64>,
    /// Lowercase, without the dot
    pub extension: String,
}

impl FileEntry {
    /// Create a new file entry from path
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let metadata = fs::metadata(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => FsError::NotFound(path.display().to_string()),
            std::io::ErrorKind::PermissionDenied => FsError::AccessDenied(path.display().to_string()),
            _ => FsError::Io(e),
        })?;

        if metadata.is_dir() {
            return Err(FsError::InvalidPath(format!("Not a file: {}", path.display())));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        let modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64);

        let is_hidden = is_hidden_file(path, &name);

        Ok(Self {
            path: path.to_path_buf(),
            name,
            is_hidden,
            size: metadata.len(),
            modified,
            extension,
        })
    }
}

/// Sort key for file listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortBy {
    /// Case-insensitive file name
    #[default]
    #[serde(rename = "name")]
    Name,
    /// Case-insensitive, digit runs compared numerically ("img2" < "img10")
    #[serde(rename = "natural")]
    Natural,
    #[serde(rename = "size")]
    Size,
    #[serde(rename = "modified")]
    Modified,
    #[serde(rename = "type")]
    Extension,
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortOrder {
    #[default]
    #[serde(rename = "asc")]
    Ascending,
    #[serde(rename = "desc")]
    Descending,
}

/// Options for listing directory contents
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub show_hidden: bool,
    pub sort_by: SortBy,
    pub sort_order: SortOrder,
    /// Lowercase extensions without the dot; `None` lists every file
    pub filter_extensions: Option<Vec<String>>,
}

/// List the files (not sub-directories) of a directory, sorted per `options`
pub fn list_directory<P: AsRef<Path>>(path: P, options: &ListOptions) -> Result<Vec<FileEntry>> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(FsError::NotFound(path.display().to_string()));
    }

    if !path.is_dir() {
        return Err(FsError::InvalidPath(format!("Not a directory: {}", path.display())));
    }

    let mut entries = Vec::new();

    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let file_entry = match FileEntry::from_path(entry.path()) {
            Ok(e) => e,
            Err(_) => continue, // directories and unreadable entries
        };

        if !options.show_hidden && file_entry.is_hidden {
            continue;
        }

        if let Some(ref exts) = options.filter_extensions {
            if !exts.contains(&file_entry.extension) {
                continue;
            }
        }

        entries.push(file_entry);
    }

    entries.sort_by(|a, b| compare_entries(a, b, options.sort_by, options.sort_order));

    tracing::debug!("Listed {} files in {}", entries.len(), path.display());
    Ok(entries)
}

/// Spelling-independent form of a file path.
///
/// The parent folder is resolved (`..`, `.`, symlinked folders) and the file
/// name kept as is, so a file that was just deleted still resolves and a
/// symlinked file keeps its own name. Unresolvable paths come back unchanged.
pub fn canonical_path(path: &Path) -> PathBuf {
    let resolved = match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => {
            let parent = if parent.as_os_str().is_empty() { Path::new(".") } else { parent };
            parent.canonicalize().map(|dir| dir.join(name))
        }
        _ => path.canonicalize(),
    };
    resolved.unwrap_or_else(|_| path.to_path_buf())
}

/// Total order over entries used both for listing and for sorted insertion.
///
/// Ties on the primary key fall back to the exact name and then the path so
/// the order never depends on `read_dir` order.
pub fn compare_entries(a: &FileEntry, b: &FileEntry, sort_by: SortBy, order: SortOrder) -> Ordering {
    let cmp = match sort_by {
        SortBy::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
        SortBy::Natural => natural_sort_key(&a.name).cmp(&natural_sort_key(&b.name)),
        SortBy::Size => a.size.cmp(&b.size),
        SortBy::Modified => a.modified.cmp(&b.modified),
        SortBy::Extension => a
            .extension
            .cmp(&b.extension)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase())),
    };

    let cmp = cmp
        .then_with(|| a.name.cmp(&b.name))
        .then_with(|| a.path.cmp(&b.path));

    match order {
        SortOrder::Ascending => cmp,
        SortOrder::Descending => cmp.reverse(),
    }
}

/// Generate a natural sort key (handles numbers correctly)
/// "image2.jpg" < "image10.jpg"
fn natural_sort_key(s: &str) -> Vec<NaturalSortPart> {
    let mut parts = Vec::new();
    let mut current_num = String::new();
    let mut current_str = String::new();

    for c in s.chars() {
        if c.is_ascii_digit() {
            if !current_str.is_empty() {
                parts.push(NaturalSortPart::Str(current_str.to_lowercase()));
                current_str.clear();
            }
            current_num.push(c);
        } else {
            if !current_num.is_empty() {
                parts.push(NaturalSortPart::num(&current_num));
                current_num.clear();
            }
            current_str.push(c);
        }
    }

    if !current_num.is_empty() {
        parts.push(NaturalSortPart::num(&current_num));
    }
    if !current_str.is_empty() {
        parts.push(NaturalSortPart::Str(current_str.to_lowercase()));
    }

    parts
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum NaturalSortPart {
    Num(u64),
    Str(String),
}

impl NaturalSortPart {
    fn num(digits: &str) -> Self {
        // Overlong digit runs compare as text
        digits
            .parse::<u64>()
            .map(NaturalSortPart::Num)
            .unwrap_or_else(|_| NaturalSortPart::Str(digits.to_string()))
    }
}

/// Check if a file is hidden
#[cfg(windows)]
fn is_hidden_file(path: &Path, _name: &str) -> bool {
    use std::os::windows::fs::MetadataExt;

    const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;

    fs::metadata(path)
        .map(|m| m.file_attributes() & FILE_ATTRIBUTE_HIDDEN != 0)
        .unwrap_or(false)
}

#[cfg(not(windows))]
fn is_hidden_file(_path: &Path, name: &str) -> bool {
    name.starts_with('.')
}
