//! Library module: the metadata store seam.
//!
//! The ingestion core only needs a handful of operations from the store that
//! persists videos and their movie/TV metadata. They are expressed by the
//! [`Library`] trait so the orchestrator can run against the SQLite store in
//! production and against [`MemoryLibrary`] in tests.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Identifier of a video record.
pub type VideoId = u64;

/// Errors reported by a Library backend.
#[derive(Debug, Error)]
pub enum LibraryError {
    /// Referenced record does not exist.
    #[error("{what} {id} not found")]
    NotFound { what: &'static str, id: u64 },

    /// Underlying storage failed.
    #[error("Library storage error: {0}")]
    Storage(String),

    /// Path cannot be stored without losing bytes.
    #[error("Path is not valid UTF-8: {}", .0.display())]
    NonUtf8Path(PathBuf),
}

impl From<rusqlite::Error> for LibraryError {
    fn from(e: rusqlite::Error) -> Self {
        LibraryError::Storage(e.to_string())
    }
}

/// What a video file is believed to contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Movie,
    Tv,
    Unknown,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Movie => "movie",
            MediaKind::Tv => "tv",
            MediaKind::Unknown => "unknown",
        }
    }

    /// Parses "movie", "tv" or "unknown".
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "movie" => Some(MediaKind::Movie),
            "tv" => Some(MediaKind::Tv),
            "unknown" => Some(MediaKind::Unknown),
            _ => None,
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Link from a video to a TV episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeRef {
    pub tv_id: u64,
    pub season: u32,
    pub episode: u32,
}

/// A video record as stored in the Library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Video {
    pub id: VideoId,
    /// Tag of the actor that created the record ("server", "scanner", ...).
    pub owner: String,
    pub path: PathBuf,
    pub size: u64,
    pub kind: MediaKind,
    pub movie_id: Option<u64>,
    pub episode: Option<EpisodeRef>,
    pub watch_time: Option<u64>,
    /// Unix timestamp (milliseconds) when the record was created.
    pub created_at: i64,
}

impl Video {
    /// True when neither a movie nor an episode is linked.
    pub fn is_unidentified(&self) -> bool {
        self.movie_id.is_none() && self.episode.is_none()
    }
}

/// Fields needed to create a video record.
#[derive(Debug, Clone, PartialEq)]
pub struct NewVideo {
    pub owner: String,
    pub path: PathBuf,
    pub size: u64,
    pub kind: MediaKind,
}

/// Movie or TV show metadata, as far as naming is concerned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRecord {
    pub id: u64,
    pub title: String,
    pub original_title: String,
    /// "YYYY-MM-DD" when known.
    pub release_date: Option<String>,
}

impl MediaRecord {
    /// Four-digit release year, if the release date carries one.
    pub fn release_year(&self) -> Option<&str> {
        let date = self.release_date.as_deref()?;
        let year = date.get(..4)?;
        year.chars().all(|c| c.is_ascii_digit()).then_some(year)
    }
}

/// Operations the ingestion core needs from the metadata store.
///
/// Implementations must be usable from several worker threads at once. They
/// give no isolation across calls: the "look up by path, then delete, then
/// create" sequence is protected by the orchestrator, not by the store.
pub trait Library: Send + Sync {
    /// Creates a video record and returns it with its new id.
    fn create_video(&self, video: NewVideo) -> Result<Video, LibraryError>;

    fn video(&self, id: VideoId) -> Result<Option<Video>, LibraryError>;

    /// All records whose path equals `path` exactly.
    fn videos_at_path(&self, path: &Path) -> Result<Vec<Video>, LibraryError>;

    /// Records of `kind` with no movie or episode linked, oldest first.
    fn unidentified_videos(&self, kind: MediaKind) -> Result<Vec<Video>, LibraryError>;

    fn delete_video(&self, id: VideoId) -> Result<(), LibraryError>;

    /// Links a video to a movie and marks it as a movie.
    fn set_movie(&self, id: VideoId, movie_id: u64) -> Result<(), LibraryError>;

    /// Links a video to a TV episode and marks it as TV.
    fn set_tv(&self, id: VideoId, episode: EpisodeRef) -> Result<(), LibraryError>;

    fn set_path(&self, id: VideoId, path: &Path) -> Result<(), LibraryError>;

    fn movie(&self, movie_id: u64) -> Result<Option<MediaRecord>, LibraryError>;

    fn tv(&self, tv_id: u64) -> Result<Option<MediaRecord>, LibraryError>;

    /// Inserts or replaces movie metadata.
    fn put_movie(&self, record: MediaRecord) -> Result<(), LibraryError>;

    /// Inserts or replaces TV show metadata.
    fn put_tv(&self, record: MediaRecord) -> Result<(), LibraryError>;
}

/// Current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: VideoId,
    videos: BTreeMap<VideoId, Video>,
    movies: BTreeMap<u64, MediaRecord>,
    tvs: BTreeMap<u64, MediaRecord>,
}

/// In-process Library keeping everything in maps.
#[derive(Debug, Default)]
pub struct MemoryLibrary {
    state: Mutex<MemoryState>,
}

impl MemoryLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of video records currently stored.
    pub fn video_count(&self) -> usize {
        self.lock().map(|s| s.videos.len()).unwrap_or(0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>, LibraryError> {
        self.state
            .lock()
            .map_err(|_| LibraryError::Storage("memory library lock poisoned".to_string()))
    }

    fn with_video<F>(&self, id: VideoId, f: F) -> Result<(), LibraryError>
    where
        F: FnOnce(&mut Video),
    {
        let mut state = self.lock()?;
        let video = state
            .videos
            .get_mut(&id)
            .ok_or(LibraryError::NotFound { what: "video", id })?;
        f(video);
        Ok(())
    }
}

impl Library for MemoryLibrary {
    fn create_video(&self, video: NewVideo) -> Result<Video, LibraryError> {
        let mut state = self.lock()?;
        state.next_id += 1;
        let record = Video {
            id: state.next_id,
            owner: video.owner,
            path: video.path,
            size: video.size,
            kind: video.kind,
            movie_id: None,
            episode: None,
            watch_time: None,
            created_at: current_timestamp_ms(),
        };
        state.videos.insert(record.id, record.clone());
        Ok(record)
    }

    fn video(&self, id: VideoId) -> Result<Option<Video>, LibraryError> {
        Ok(self.lock()?.videos.get(&id).cloned())
    }

    fn videos_at_path(&self, path: &Path) -> Result<Vec<Video>, LibraryError> {
        Ok(self
            .lock()?
            .videos
            .values()
            .filter(|v| v.path == path)
            .cloned()
            .collect())
    }

    fn unidentified_videos(&self, kind: MediaKind) -> Result<Vec<Video>, LibraryError> {
        Ok(self
            .lock()?
            .videos
            .values()
            .filter(|v| v.kind == kind && v.is_unidentified())
            .cloned()
            .collect())
    }

    fn delete_video(&self, id: VideoId) -> Result<(), LibraryError> {
        self.lock()?
            .videos
            .remove(&id)
            .map(|_| ())
            .ok_or(LibraryError::NotFound { what: "video", id })
    }

    fn set_movie(&self, id: VideoId, movie_id: u64) -> Result<(), LibraryError> {
        self.with_video(id, |v| {
            v.kind = MediaKind::Movie;
            v.movie_id = Some(movie_id);
            v.episode = None;
        })
    }

    fn set_tv(&self, id: VideoId, episode: EpisodeRef) -> Result<(), LibraryError> {
        self.with_video(id, |v| {
            v.kind = MediaKind::Tv;
            v.movie_id = None;
            v.episode = Some(episode);
        })
    }

    fn set_path(&self, id: VideoId, path: &Path) -> Result<(), LibraryError> {
        self.with_video(id, |v| v.path = path.to_path_buf())
    }

    fn movie(&self, movie_id: u64) -> Result<Option<MediaRecord>, LibraryError> {
        Ok(self.lock()?.movies.get(&movie_id).cloned())
    }

    fn tv(&self, tv_id: u64) -> Result<Option<MediaRecord>, LibraryError> {
        Ok(self.lock()?.tvs.get(&tv_id).cloned())
    }

    fn put_movie(&self, record: MediaRecord) -> Result<(), LibraryError> {
        self.lock()?.movies.insert(record.id, record);
        Ok(())
    }

    fn put_tv(&self, record: MediaRecord) -> Result<(), LibraryError> {
        self.lock()?.tvs.insert(record.id, record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_video(path: &str, kind: MediaKind) -> NewVideo {
        NewVideo {
            owner: "test".to_string(),
            path: PathBuf::from(path),
            size: 42,
            kind,
        }
    }

    #[test]
    fn test_media_kind_parse() {
        assert_eq!(MediaKind::parse("movie"), Some(MediaKind::Movie));
        assert_eq!(MediaKind::parse("tv"), Some(MediaKind::Tv));
        assert_eq!(MediaKind::parse("unknown"), Some(MediaKind::Unknown));
        assert_eq!(MediaKind::parse("film"), None);
        assert_eq!(MediaKind::Tv.to_string(), "tv");
    }

    #[test]
    fn test_release_year() {
        let mut record = MediaRecord {
            id: 1,
            title: "Spider-Man".to_string(),
            original_title: "Spider-Man".to_string(),
            release_date: Some("2002-05-03".to_string()),
        };
        assert_eq!(record.release_year(), Some("2002"));

        record.release_date = Some("".to_string());
        assert_eq!(record.release_year(), None);

        record.release_date = None;
        assert_eq!(record.release_year(), None);
    }

    #[test]
    fn test_memory_library_path_lookup() {
        let lib = MemoryLibrary::new();
        let a = lib.create_video(new_video("/a.mkv", MediaKind::Movie)).unwrap();
        lib.create_video(new_video("/a.mkv", MediaKind::Movie)).unwrap();
        lib.create_video(new_video("/b.mkv", MediaKind::Tv)).unwrap();

        assert_ne!(a.id, 0);
        assert_eq!(lib.videos_at_path(Path::new("/a.mkv")).unwrap().len(), 2);
        assert_eq!(lib.videos_at_path(Path::new("/b.mkv")).unwrap().len(), 1);
        assert!(lib.videos_at_path(Path::new("/c.mkv")).unwrap().is_empty());
    }

    #[test]
    fn test_memory_library_identity_updates() {
        let lib = MemoryLibrary::new();
        let v = lib.create_video(new_video("/x.mkv", MediaKind::Unknown)).unwrap();
        assert_eq!(lib.unidentified_videos(MediaKind::Unknown).unwrap().len(), 1);

        let ep = EpisodeRef { tv_id: 7, season: 1, episode: 2 };
        lib.set_tv(v.id, ep).unwrap();
        let stored = lib.video(v.id).unwrap().unwrap();
        assert_eq!(stored.kind, MediaKind::Tv);
        assert_eq!(stored.episode, Some(ep));
        assert!(lib.unidentified_videos(MediaKind::Unknown).unwrap().is_empty());
        assert!(lib.unidentified_videos(MediaKind::Tv).unwrap().is_empty());

        lib.set_path(v.id, Path::new("/y.mkv")).unwrap();
        assert_eq!(lib.video(v.id).unwrap().unwrap().path, PathBuf::from("/y.mkv"));
    }

    #[test]
    fn test_memory_library_delete_missing() {
        let lib = MemoryLibrary::new();
        let err = lib.delete_video(99).unwrap_err();
        assert!(matches!(err, LibraryError::NotFound { what: "video", id: 99 }));
        assert!(lib.set_movie(99, 1).is_err());
    }
}
