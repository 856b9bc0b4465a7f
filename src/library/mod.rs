//! Read-only media library consumed by the transcode engine.
//!
//! The library is an in-memory store seeded once at startup by
//! [`scan_directory`]. The engine treats items as immutable facts.

mod loader;

pub use loader::scan_directory;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Broad media class of an item.
///
/// The numeric id participates in artifact file names and must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// Stable numeric id used in artifact file names.
    pub fn type_id(self) -> u32 {
        match self {
            MediaKind::Audio => 1,
            MediaKind::Video => 2,
        }
    }

    /// Classify a file by extension. `None` for non-media files.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "mp3" | "m4a" | "aac" | "ogg" | "oga" | "flac" | "wav" | "wma" => Some(Self::Audio),
            "mp4" | "m4v" | "mkv" | "webm" | "avi" | "mov" | "ts" | "mpg" | "mpeg" | "wmv" => {
                Some(Self::Video)
            }
            _ => None,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// A playable entry in the library.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: u64,
    pub kind: MediaKind,
    pub path: PathBuf,
    pub file_name: String,
    /// Playback length, when the probe could determine it.
    pub duration_seconds: Option<u32>,
    /// Overall source bitrate, when the probe could determine it.
    pub bitrate_kbps: Option<u32>,
    pub file_size: u64,
}

/// Thread-safe in-memory item store.
#[derive(Default)]
pub struct MediaLibrary {
    items: RwLock<Vec<MediaItem>>,
}

impl MediaLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole store with a freshly scanned item set.
    pub fn replace_all(&self, items: Vec<MediaItem>) {
        let mut store = self.items.write();
        *store = items;
    }

    /// Add a single item. Used by tests and ad-hoc seeding.
    pub fn add(&self, item: MediaItem) {
        self.items.write().push(item);
    }

    /// Look up an item by id.
    pub fn get(&self, id: u64) -> Option<MediaItem> {
        self.items.read().iter().find(|item| item.id == id).cloned()
    }

    /// All items, in scan order.
    pub fn list(&self) -> Vec<MediaItem> {
        self.items.read().clone()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}
