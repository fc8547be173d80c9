//! Batch scanner: registers video files found under the storage roots.
//!
//! Files already known to the library (exact path match) are left alone.
//! New files become videos of the root's kind with no identity linked; the
//! batch matcher fills that in later.

use crate::library::{Library, MediaKind, NewVideo};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Video file extensions used when content sniffing is inconclusive
/// (case-insensitive matching).
pub const VIDEO_EXTENSIONS: &[&str] = &[
    ".mkv", ".mp4", ".avi", ".mov", ".m4v", ".ts", ".m2ts", ".webm", ".wmv", ".mpg", ".mpeg",
];

/// Bytes read from the head of a file for sniffing.
const SNIFF_LEN: usize = 8192;

/// A video file discovered during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanCandidate {
    /// Full path to the video file.
    pub path: PathBuf,
    /// File size in bytes at discovery time.
    pub size_bytes: u64,
}

/// Counts from one scan run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub registered: usize,
    pub already_known: usize,
    pub errors: usize,
}

impl ScanReport {
    fn merge(&mut self, other: ScanReport) {
        self.registered += other.registered;
        self.already_known += other.already_known;
        self.errors += other.errors;
    }
}

/// Checks if a file has a video extension (case-insensitive).
pub fn has_video_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext_lower = format!(".{}", ext.to_lowercase());
            VIDEO_EXTENSIONS.contains(&ext_lower.as_str())
        })
        .unwrap_or(false)
}

/// Decides from the first bytes of a file whether it holds video.
///
/// A recognised signature decides on its own; unknown content falls back to
/// the extension.
pub fn looks_like_video(path: &Path, head: &[u8]) -> bool {
    match infer::get(head) {
        Some(kind) => kind.matcher_type() == infer::MatcherType::Video,
        None => has_video_extension(path),
    }
}

fn read_head(path: &Path) -> io::Result<Vec<u8>> {
    let mut buffer = Vec::with_capacity(SNIFF_LEN);
    File::open(path)?
        .take(SNIFF_LEN as u64)
        .read_to_end(&mut buffer)?;
    Ok(buffer)
}

/// Walks `root` for video files.
///
/// - Recursively walks the root directory
/// - Skips hidden directories (names starting with `.`) below the root
/// - Keeps files whose content (or, failing that, extension) says video
///
/// Unreadable entries are logged and counted in the returned error count.
pub fn discover_videos(root: &Path) -> (Vec<ScanCandidate>, usize) {
    let mut candidates = Vec::new();
    let mut errors = 0;

    let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
        if entry.file_type().is_dir() && entry.depth() > 0 {
            if let Some(name) = entry.file_name().to_str() {
                return !name.starts_with('.');
            }
        }
        true
    });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Scan error under {}: {}", root.display(), e);
                errors += 1;
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let head = match read_head(path) {
            Ok(head) => head,
            Err(e) => {
                warn!("Cannot read {}: {}", path.display(), e);
                errors += 1;
                continue;
            }
        };
        if !looks_like_video(path, &head) {
            debug!("Not a video: {}", path.display());
            continue;
        }

        match entry.metadata() {
            Ok(metadata) => candidates.push(ScanCandidate {
                path: path.to_path_buf(),
                size_bytes: metadata.len(),
            }),
            Err(e) => {
                warn!("Cannot stat {}: {}", path.display(), e);
                errors += 1;
            }
        }
    }

    (candidates, errors)
}

/// Registers every unseen video under `roots` as an unidentified video of `kind`.
pub fn scan_roots(library: &dyn Library, kind: MediaKind, roots: &[PathBuf]) -> ScanReport {
    let mut report = ScanReport::default();

    for root in roots {
        if !root.is_dir() {
            warn!("Skipping {} root {}: not a directory", kind, root.display());
            report.errors += 1;
            continue;
        }

        let (candidates, errors) = discover_videos(root);
        report.errors += errors;

        for candidate in candidates {
            match library.videos_at_path(&candidate.path) {
                Ok(existing) if !existing.is_empty() => {
                    report.already_known += 1;
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Lookup failed for {}: {}", candidate.path.display(), e);
                    report.errors += 1;
                    continue;
                }
            }

            let new_video = NewVideo {
                owner: "scanner".to_string(),
                path: candidate.path.clone(),
                size: candidate.size_bytes,
                kind,
            };
            match library.create_video(new_video) {
                Ok(video) => {
                    info!("Registered {} {} as video {}", kind, candidate.path.display(), video.id);
                    report.registered += 1;
                }
                Err(e) => {
                    warn!("Could not register {}: {}", candidate.path.display(), e);
                    report.errors += 1;
                }
            }
        }
    }

    report
}

/// Scans the movie roots then the TV roots.
pub fn scan_all(library: &dyn Library, movie_roots: &[PathBuf], tv_roots: &[PathBuf]) -> ScanReport {
    let mut report = scan_roots(library, MediaKind::Movie, movie_roots);
    report.merge(scan_roots(library, MediaKind::Tv, tv_roots));
    info!(
        "Scan finished: {} registered, {} already known, {} errors",
        report.registered, report.already_known, report.errors
    );
    report
}
