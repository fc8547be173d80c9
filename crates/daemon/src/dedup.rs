//! Dedup guard: clears every record (and file) registered at a path.
//!
//! Deletion is unconditional on path match. There is no confirmation and no
//! soft delete, so a naming collision removes whatever was there before.

use crate::library::{Library, LibraryError, VideoId};
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum DedupError {
    #[error("Library error while clearing path: {0}")]
    Library(#[from] LibraryError),

    #[error("Failed to remove {path}: {source}")]
    RemoveFile {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// How aggressive a purge is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurgeOptions {
    /// Delete the file at the path as well as the records.
    pub remove_file: bool,
    /// Record that must survive the purge (the in-flight ingestion's own).
    pub keep: Option<VideoId>,
}

impl PurgeOptions {
    /// Records and the file go.
    pub fn full() -> Self {
        Self {
            remove_file: true,
            keep: None,
        }
    }

    /// Records only; the file stays on disk.
    pub fn records_only() -> Self {
        Self {
            remove_file: false,
            keep: None,
        }
    }

    pub fn keeping(mut self, id: VideoId) -> Self {
        self.keep = Some(id);
        self
    }
}

/// Deletes every video record whose path equals `path`.
///
/// With `remove_file` the file at `path` is removed too; a file that is
/// already gone is not an error. Returns how many records were deleted.
pub fn purge_path(
    library: &dyn Library,
    path: &Path,
    options: PurgeOptions,
) -> Result<usize, DedupError> {
    let mut removed = 0;
    for video in library.videos_at_path(path)? {
        if options.keep == Some(video.id) {
            continue;
        }
        match library.delete_video(video.id) {
            Ok(()) => removed += 1,
            // Deleted concurrently by someone else; same outcome
            Err(LibraryError::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }
    }

    if removed > 0 {
        info!("Removed {} stale record(s) at {}", removed, path.display());
    }

    if options.remove_file && options.keep.is_none() {
        remove_file_if_present(path)?;
    } else if options.remove_file {
        warn!("Not removing {}: it belongs to a kept record", path.display());
    }

    Ok(removed)
}

fn remove_file_if_present(path: &Path) -> Result<(), DedupError> {
    match fs::remove_file(path) {
        Ok(()) => {
            info!("Removed file {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(DedupError::RemoveFile {
            path: path.display().to_string(),
            source,
        }),
    }
}
