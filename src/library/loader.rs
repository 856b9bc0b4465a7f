//! Filesystem scan that seeds the in-memory library.

use std::path::Path;

use walkdir::WalkDir;

use crate::library::{MediaItem, MediaKind};
use crate::probe::{ProbeInfo, Prober};

/// Scan `root` for media files and probe each for duration and bitrate.
///
/// Probe failures leave the duration/bitrate fields unset; the engine
/// treats such items as unestimatable rather than unplayable.
pub async fn scan_directory(root: &Path, prober: &dyn Prober) -> Vec<MediaItem> {
    let mut items = Vec::new();
    let mut next_id: u64 = 1;

    for entry in WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let Some(kind) = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(MediaKind::from_extension)
        else {
            continue;
        };

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to stat media file");
                continue;
            }
        };

        let info = match prober.probe(path).await {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "probe failed");
                ProbeInfo::default()
            }
        };

        items.push(MediaItem {
            id: next_id,
            kind,
            path: path.to_path_buf(),
            file_name: entry.file_name().to_string_lossy().into_owned(),
            duration_seconds: info.duration_seconds,
            bitrate_kbps: info.bitrate_kbps,
            file_size: metadata.len(),
        });
        next_id += 1;
    }

    tracing::info!(count = items.len(), root = %root.display(), "library scan complete");
    items
}
