//! cinedrop
//!
//! Video ingestion core: identifies the movie or episode a file holds, picks
//! a storage volume for it, clears whatever occupied that identity's path and
//! copies it into place, keeping the library in step.

pub mod daemon;
pub mod dedup;
pub mod ingest;
pub mod job_executor;
pub mod library;
pub mod matcher;
pub mod normalize;
pub mod parse;
pub mod placement;
pub mod provider;
pub mod replace;
pub mod resolve;
pub mod scan;
pub mod server;
pub mod sqlite_library;
pub mod startup;

pub use cinedrop_config as config;
pub use cinedrop_config::Config;
pub use daemon::{Daemon, DaemonError};
pub use dedup::{purge_path, DedupError, PurgeOptions};
pub use ingest::{
    canonical_name, media_record, Identity, IngestError, IngestJob, IngestOutcome, IngestRequest,
    IngestRoots, IngestState, Ingestor, SERVER_OWNER, STANDALONE_OWNER,
};
pub use job_executor::{IngestPool, JobError, JobHandle};
pub use library::{
    EpisodeRef, Library, LibraryError, MediaKind, MediaRecord, MemoryLibrary, NewVideo, Video,
    VideoId,
};
pub use matcher::{match_unidentified, MatchReport};
pub use normalize::{is_latin, normalize_str, normalized_title};
pub use parse::{parse_media, parse_movie, parse_tv, MediaToken, MovieToken, ParseError, TvToken};
pub use placement::{select_volume, FixedSpaceProbe, NoSpaceAvailable, SpaceProbe, SystemSpaceProbe};
pub use provider::{MetadataProvider, ProviderError, TmdbProvider};
pub use resolve::{resolve, MediaId, ResolveCache};
pub use scan::{scan_all, scan_roots, ScanReport};
pub use server::{create_router, run_server, AppState, ServerError};
pub use sqlite_library::SqliteLibrary;
pub use startup::{run_startup_checks, StartupError};
