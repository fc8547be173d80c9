//! Ingestion orchestrator.
//!
//! Drives one source file through
//! `Received → Identified → Named → Placed → DestinationClear → Copied → Committed`.
//! Any failure after the video record is created deletes that record again;
//! the source file is only ever read.

use crate::dedup::{purge_path, DedupError, PurgeOptions};
use crate::library::{EpisodeRef, Library, LibraryError, MediaKind, MediaRecord, NewVideo, Video, VideoId};
use crate::normalize::normalized_title;
use crate::parse::{parse_media, ParseError};
use crate::placement::{select_volume, NoSpaceAvailable, SpaceProbe, SystemSpaceProbe};
use crate::provider::{MetadataProvider, ProviderError};
use crate::replace::{atomic_copy, ReplaceError};
use crate::resolve::{resolve, MediaId, ResolveCache};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Owner tag of records created through the HTTP service.
pub const SERVER_OWNER: &str = "server";
/// Owner tag of records created by the one-shot `ingest` command.
pub const STANDALONE_OWNER: &str = "standalone";

/// Errors that abort an ingestion.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The job description itself is malformed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Source file could not be read.
    #[error("Cannot read source {}: {source}", .path.display())]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// File name did not match the naming convention.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Provider has no candidate for the parsed title.
    #[error("No match found for '{title}'")]
    NotFound { title: String },

    /// The linked id is unknown to both the library and the provider.
    #[error("No {what} record with id {id}")]
    RecordNotFound { what: &'static str, id: u64 },

    /// The metadata record lacks what the canonical name needs.
    #[error("{what} {id} cannot be named: {reason}")]
    IncompleteMetadata {
        what: &'static str,
        id: u64,
        reason: &'static str,
    },

    #[error(transparent)]
    NoSpace(#[from] NoSpaceAvailable),

    /// Destination directory could not be created.
    #[error("Failed to create {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Copy(#[from] ReplaceError),

    #[error(transparent)]
    Dedup(#[from] DedupError),

    #[error(transparent)]
    Library(#[from] LibraryError),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl IngestError {
    /// Stable error kind reported to callers.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::InvalidRequest(_) => "InvalidRequest",
            IngestError::SourceUnreadable { .. } => "SourceUnreadable",
            IngestError::Parse(_) => "ParseError",
            IngestError::NotFound { .. } => "NotFound",
            IngestError::RecordNotFound { .. } => "RecordNotFound",
            IngestError::IncompleteMetadata { .. } => "IncompleteMetadata",
            IngestError::NoSpace(_) => "NoSpaceAvailable",
            IngestError::CreateDir { .. } | IngestError::Copy(_) => "CopyFailure",
            IngestError::Dedup(DedupError::RemoveFile { .. }) => "CopyFailure",
            IngestError::Dedup(DedupError::Library(_)) | IngestError::Library(_) => "Library",
            IngestError::Provider(_) => "Provider",
        }
    }

    /// Process exit code for the standalone ingester.
    pub fn exit_code(&self) -> i32 {
        match self {
            IngestError::NoSpace(_) => -3,
            _ => -4,
        }
    }
}

/// Stage an ingestion has reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestState {
    Received,
    Identified,
    Named,
    Placed,
    DestinationClear,
    Copied,
    Committed,
    Failed,
}

impl IngestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestState::Received => "received",
            IngestState::Identified => "identified",
            IngestState::Named => "named",
            IngestState::Placed => "placed",
            IngestState::DestinationClear => "destination_clear",
            IngestState::Copied => "copied",
            IngestState::Committed => "committed",
            IngestState::Failed => "failed",
        }
    }
}

/// What the caller knows about a file's identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity {
    Movie(u64),
    Episode(EpisodeRef),
    /// Resolve from the file name using the grammar for this kind.
    Unresolved(MediaKind),
}

impl Identity {
    /// Provisional kind recorded when the video is created.
    pub fn kind(&self) -> MediaKind {
        match self {
            Identity::Movie(_) => MediaKind::Movie,
            Identity::Episode(_) => MediaKind::Tv,
            Identity::Unresolved(kind) => *kind,
        }
    }
}

/// A validated ingestion job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestRequest {
    pub source: PathBuf,
    pub identity: Identity,
}

impl IngestRequest {
    pub fn new(source: impl Into<PathBuf>, identity: Identity) -> Self {
        Self {
            source: source.into(),
            identity,
        }
    }
}

/// Job input as it arrives over the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestJob {
    pub source_path: PathBuf,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub movie_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tv_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode: Option<u32>,
}

impl TryFrom<IngestJob> for IngestRequest {
    type Error = IngestError;

    fn try_from(job: IngestJob) -> Result<Self, Self::Error> {
        if job.source_path.as_os_str().is_empty() {
            return Err(IngestError::InvalidRequest("sourcePath is empty".to_string()));
        }
        let kind = MediaKind::parse(&job.kind)
            .ok_or_else(|| IngestError::InvalidRequest(format!("unknown kind '{}'", job.kind)))?;

        let identity = match kind {
            MediaKind::Movie => match job.movie_id {
                Some(id) => Identity::Movie(id),
                None => Identity::Unresolved(MediaKind::Movie),
            },
            MediaKind::Tv => match (job.tv_id, job.season, job.episode) {
                (Some(tv_id), Some(season), Some(episode)) => Identity::Episode(EpisodeRef {
                    tv_id,
                    season,
                    episode,
                }),
                (None, _, _) => Identity::Unresolved(MediaKind::Tv),
                _ => {
                    return Err(IngestError::InvalidRequest(
                        "tvId requires season and episode".to_string(),
                    ))
                }
            },
            MediaKind::Unknown => Identity::Unresolved(MediaKind::Unknown),
        };

        Ok(IngestRequest::new(job.source_path, identity))
    }
}

/// Result of a committed ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestOutcome {
    pub video_id: VideoId,
    pub path: PathBuf,
}

/// Destination paths currently being written in this process.
#[derive(Debug, Default)]
pub struct DestinationClaims {
    held: Mutex<HashSet<PathBuf>>,
    released: Condvar,
}

impl DestinationClaims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until `path` is unclaimed, then claims it until the guard drops.
    pub fn claim(&self, path: &Path) -> ClaimGuard<'_> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        while held.contains(path) {
            debug!("Waiting for claim on {}", path.display());
            held = self.released.wait(held).unwrap_or_else(|e| e.into_inner());
        }
        held.insert(path.to_path_buf());
        ClaimGuard {
            claims: self,
            path: path.to_path_buf(),
        }
    }

    pub fn is_claimed(&self, path: &Path) -> bool {
        self.held
            .lock()
            .map(|held| held.contains(path))
            .unwrap_or(false)
    }
}

/// Releases a destination claim on drop.
pub struct ClaimGuard<'a> {
    claims: &'a DestinationClaims,
    path: PathBuf,
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        let mut held = self.claims.held.lock().unwrap_or_else(|e| e.into_inner());
        held.remove(&self.path);
        self.claims.released.notify_all();
    }
}

/// Candidate storage roots per media kind.
#[derive(Debug, Clone, Default)]
pub struct IngestRoots {
    pub movie: Vec<PathBuf>,
    pub tv: Vec<PathBuf>,
}

/// Computes the destination path of a file relative to its storage root.
///
/// Movies become `<name>.<year><ext>`, episodes
/// `<name>/<name>.s<SS>e<EE><ext>`. `extension` includes the leading dot
/// or is empty.
pub fn canonical_name(
    media: &MediaId,
    record: &MediaRecord,
    extension: &str,
) -> Result<PathBuf, IngestError> {
    // A slash in a title would otherwise open a new directory level
    let name = normalized_title(record).replace(['/', '\\'], "-");

    match media {
        MediaId::Movie(id) => {
            if name.is_empty() {
                return Err(IngestError::IncompleteMetadata {
                    what: "movie",
                    id: *id,
                    reason: "empty title",
                });
            }
            let year = record.release_year().ok_or(IngestError::IncompleteMetadata {
                what: "movie",
                id: *id,
                reason: "no release year",
            })?;
            Ok(PathBuf::from(format!("{}.{}{}", name, year, extension)))
        }
        MediaId::Tv {
            tv_id,
            season,
            episode,
        } => {
            if name.is_empty() {
                return Err(IngestError::IncompleteMetadata {
                    what: "tv show",
                    id: *tv_id,
                    reason: "empty title",
                });
            }
            Ok(PathBuf::from(&name).join(format!(
                "{}.s{:02}e{:02}{}",
                name, season, episode, extension
            )))
        }
    }
}

/// `.ext` of `path`, or an empty string.
fn dotted_extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e))
        .unwrap_or_default()
}

/// Runs the ingestion state machine against a library and a set of volumes.
///
/// One `Ingestor` is shared by every entry point (HTTP jobs, the standalone
/// command and the batch tools) so the destination claims cover all of them
/// within a process.
pub struct Ingestor {
    library: Arc<dyn Library>,
    provider: Arc<dyn MetadataProvider>,
    roots: IngestRoots,
    probe: Arc<dyn SpaceProbe>,
    claims: DestinationClaims,
    owner: String,
}

impl Ingestor {
    pub fn new(
        library: Arc<dyn Library>,
        provider: Arc<dyn MetadataProvider>,
        roots: IngestRoots,
    ) -> Self {
        Self {
            library,
            provider,
            roots,
            probe: Arc::new(SystemSpaceProbe),
            claims: DestinationClaims::new(),
            owner: SERVER_OWNER.to_string(),
        }
    }

    /// Replaces the free-space source.
    pub fn with_probe(mut self, probe: Arc<dyn SpaceProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Sets the owner tag written on created records.
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    pub fn library(&self) -> &Arc<dyn Library> {
        &self.library
    }

    pub fn provider(&self) -> &Arc<dyn MetadataProvider> {
        &self.provider
    }

    pub fn roots(&self) -> &IngestRoots {
        &self.roots
    }

    /// Ingests one file, blocking the calling thread until it is committed
    /// or rolled back.
    ///
    /// The source is canonicalized first, so records and the in-place check
    /// do not depend on how the caller spelled the path.
    pub fn ingest(&self, request: &IngestRequest) -> Result<IngestOutcome, IngestError> {
        let unreadable = |e: io::Error| IngestError::SourceUnreadable {
            path: request.source.clone(),
            source: e,
        };
        let source = fs::canonicalize(&request.source).map_err(unreadable)?;
        let source = source.as_path();
        if source.to_str().is_none() {
            return Err(IngestError::InvalidRequest(format!(
                "source path {} is not valid UTF-8",
                source.display()
            )));
        }

        let metadata = fs::metadata(source).map_err(unreadable)?;
        if !metadata.is_file() {
            return Err(unreadable(io::Error::new(
                io::ErrorKind::InvalidInput,
                "not a regular file",
            )));
        }

        // Stale records for this source go; the file itself is what we ingest
        purge_path(self.library.as_ref(), source, PurgeOptions::records_only())?;

        let video = self.library.create_video(NewVideo {
            owner: self.owner.clone(),
            path: source.to_path_buf(),
            size: metadata.len(),
            kind: request.identity.kind(),
        })?;
        info!(
            "Video {} {}: {} ({} bytes)",
            video.id,
            IngestState::Received.as_str(),
            source.display(),
            video.size
        );

        let mut state = IngestState::Received;
        match self.advance(&video, source, request.identity, &mut state) {
            Ok(path) => {
                info!("Video {} {}: {}", video.id, IngestState::Committed.as_str(), path.display());
                Ok(IngestOutcome {
                    video_id: video.id,
                    path,
                })
            }
            Err(e) => {
                warn!(
                    "Video {} {} after {}: {}",
                    video.id,
                    IngestState::Failed.as_str(),
                    state.as_str(),
                    e
                );
                self.rollback(video.id);
                Err(e)
            }
        }
    }

    fn advance(
        &self,
        video: &Video,
        source: &Path,
        identity: Identity,
        state: &mut IngestState,
    ) -> Result<PathBuf, IngestError> {
        let media = self.identify(video.id, source, identity)?;
        self.transition(video.id, state, IngestState::Identified);

        let record = media_record(self.library.as_ref(), self.provider.as_ref(), &media)?;
        let relative = canonical_name(&media, &record, &dotted_extension(source))?;
        self.transition(video.id, state, IngestState::Named);

        let roots = match media {
            MediaId::Movie(_) => &self.roots.movie,
            MediaId::Tv { .. } => &self.roots.tv,
        };
        let root = select_volume(roots, video.size, self.probe.as_ref())?;
        let destination = root.join(&relative);
        self.transition(video.id, state, IngestState::Placed);

        let _claim = self.claims.claim(&destination);

        // Re-ingesting a file that already sits at its canonical place must not
        // delete the very bytes we are about to copy
        let in_place = is_same_file(source, &destination);
        let options = if in_place {
            PurgeOptions::records_only().keeping(video.id)
        } else {
            PurgeOptions::full()
        };
        purge_path(self.library.as_ref(), &destination, options)?;
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|e| IngestError::CreateDir {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        self.transition(video.id, state, IngestState::DestinationClear);

        atomic_copy(source, &destination)?;
        self.transition(video.id, state, IngestState::Copied);

        if let Err(e) = self.library.set_path(video.id, &destination) {
            if !in_place {
                if let Err(cleanup) = fs::remove_file(&destination) {
                    warn!(
                        "Failed to remove uncommitted copy {}: {}",
                        destination.display(),
                        cleanup
                    );
                }
            }
            return Err(e.into());
        }
        *state = IngestState::Committed;
        Ok(destination)
    }

    fn transition(&self, video_id: VideoId, state: &mut IngestState, next: IngestState) {
        debug!("Video {}: {} -> {}", video_id, state.as_str(), next.as_str());
        *state = next;
    }

    /// Links the video to its media id, resolving it from the file name when
    /// the caller did not supply one.
    fn identify(
        &self,
        video_id: VideoId,
        source: &Path,
        identity: Identity,
    ) -> Result<MediaId, IngestError> {
        let media = match identity {
            Identity::Movie(id) => MediaId::Movie(id),
            Identity::Episode(ep) => MediaId::Tv {
                tv_id: ep.tv_id,
                season: ep.season,
                episode: ep.episode,
            },
            Identity::Unresolved(kind) => {
                let token = parse_media(source, kind)?;
                let mut cache = ResolveCache::new();
                resolve(&token, self.provider.as_ref(), &mut cache)?.ok_or_else(|| {
                    IngestError::NotFound {
                        title: token.title().to_string(),
                    }
                })?
            }
        };

        match media {
            MediaId::Movie(id) => self.library.set_movie(video_id, id)?,
            MediaId::Tv {
                tv_id,
                season,
                episode,
            } => self.library.set_tv(
                video_id,
                EpisodeRef {
                    tv_id,
                    season,
                    episode,
                },
            )?,
        }
        Ok(media)
    }

    fn rollback(&self, video_id: VideoId) {
        match self.library.delete_video(video_id) {
            Ok(()) | Err(LibraryError::NotFound { .. }) => {
                debug!("Rolled back video {}", video_id)
            }
            Err(e) => warn!("Rollback of video {} failed: {}", video_id, e),
        }
    }
}

/// Whether `destination` resolves to the already canonical `source`. A
/// destination that does not exist yet never does.
fn is_same_file(source: &Path, destination: &Path) -> bool {
    match fs::canonicalize(destination) {
        Ok(destination) => destination == source,
        Err(_) => false,
    }
}

/// Metadata for `media`, fetched from the provider and stored the first time
/// the library sees the id.
pub fn media_record(
    library: &dyn Library,
    provider: &dyn MetadataProvider,
    media: &MediaId,
) -> Result<MediaRecord, IngestError> {
    match *media {
        MediaId::Movie(id) => {
            if let Some(record) = library.movie(id)? {
                return Ok(record);
            }
            let record = provider
                .movie_details(id)?
                .ok_or(IngestError::RecordNotFound { what: "movie", id })?;
            library.put_movie(record.clone())?;
            Ok(record)
        }
        MediaId::Tv { tv_id, .. } => {
            if let Some(record) = library.tv(tv_id)? {
                return Ok(record);
            }
            let record = provider.tv_details(tv_id)?.ok_or(IngestError::RecordNotFound {
                what: "tv show",
                id: tv_id,
            })?;
            library.put_tv(record.clone())?;
            Ok(record)
        }
    }
}
