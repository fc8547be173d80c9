//! Batch matcher: links unidentified videos to movies and TV episodes.
//!
//! One [`ResolveCache`] is shared by the whole run. Files whose names cannot
//! be parsed or whose titles find no match are skipped, never fatal. A video
//! is only linked once the library holds the movie or show it points at.

use crate::ingest::{media_record, IngestError};
use crate::library::{EpisodeRef, Library, MediaKind, Video};
use crate::parse::parse_media;
use crate::provider::MetadataProvider;
use crate::resolve::{resolve, MediaId, ResolveCache};
use tracing::{info, warn};

/// Counts from one matching run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchReport {
    pub matched: usize,
    pub unparsed: usize,
    pub not_found: usize,
    pub errors: usize,
}

/// Matches every unidentified TV video, then every unidentified movie.
pub fn match_unidentified(library: &dyn Library, provider: &dyn MetadataProvider) -> MatchReport {
    let mut cache = ResolveCache::new();
    let mut report = MatchReport::default();

    for kind in [MediaKind::Tv, MediaKind::Movie] {
        let videos = match library.unidentified_videos(kind) {
            Ok(videos) => videos,
            Err(e) => {
                warn!("Cannot list unidentified {} videos: {}", kind, e);
                report.errors += 1;
                continue;
            }
        };
        for video in videos {
            match_one(library, provider, &mut cache, &video, &mut report);
        }
    }

    info!(
        "Match finished: {} matched, {} unparsed, {} not found, {} errors ({} titles looked up)",
        report.matched,
        report.unparsed,
        report.not_found,
        report.errors,
        cache.len()
    );
    report
}

fn match_one(
    library: &dyn Library,
    provider: &dyn MetadataProvider,
    cache: &mut ResolveCache,
    video: &Video,
    report: &mut MatchReport,
) {
    let token = match parse_media(&video.path, video.kind) {
        Ok(token) => token,
        Err(e) => {
            warn!("Skipping video {}: {}", video.id, e);
            report.unparsed += 1;
            return;
        }
    };

    let media = match resolve(&token, provider, cache) {
        Ok(Some(media)) => media,
        Ok(None) => {
            warn!("Skipping video {}: no match for '{}'", video.id, token.title());
            report.not_found += 1;
            return;
        }
        Err(e) => {
            warn!("Lookup for video {} failed: {}", video.id, e);
            report.errors += 1;
            return;
        }
    };

    match media_record(library, provider, &media) {
        Ok(_) => {}
        Err(IngestError::RecordNotFound { what, id }) => {
            warn!("Skipping video {}: provider has no {} {}", video.id, what, id);
            report.not_found += 1;
            return;
        }
        Err(e) => {
            warn!("Cannot store metadata for video {}: {}", video.id, e);
            report.errors += 1;
            return;
        }
    }

    let linked = match media {
        MediaId::Movie(id) => library.set_movie(video.id, id),
        MediaId::Tv {
            tv_id,
            season,
            episode,
        } => library.set_tv(
            video.id,
            EpisodeRef {
                tv_id,
                season,
                episode,
            },
        ),
    };
    match linked {
        Ok(()) => {
            info!("Matched video {} ({}) to {:?}", video.id, video.path.display(), media);
            report.matched += 1;
        }
        Err(e) => {
            warn!("Could not link video {}: {}", video.id, e);
            report.errors += 1;
        }
    }
}
