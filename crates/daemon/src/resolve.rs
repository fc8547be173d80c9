//! Metadata resolver: parsed token to canonical media id.
//!
//! Lookups are memoized in a [`ResolveCache`] that the caller owns and scopes
//! to one batch run. Negative answers are cached too, so a season full of
//! episodes of an unknown show costs a single search.

use crate::parse::MediaToken;
use crate::provider::{MetadataProvider, ProviderError};
use std::collections::HashMap;
use tracing::debug;

/// Resolved identity of a media token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaId {
    Movie(u64),
    Tv { tv_id: u64, season: u32, episode: u32 },
}

/// Per-run memo of provider answers, keyed by the raw parsed title.
#[derive(Debug, Default)]
pub struct ResolveCache {
    movies: HashMap<String, Option<u64>>,
    tvs: HashMap<String, Option<u64>>,
}

impl ResolveCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct titles looked up so far.
    pub fn len(&self) -> usize {
        self.movies.len() + self.tvs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Resolves `token` through `provider`, consulting `cache` first.
///
/// `Ok(None)` means the provider has no candidate; callers treat that as a
/// skip, not a failure. Transport errors are returned and never cached.
pub fn resolve(
    token: &MediaToken,
    provider: &dyn MetadataProvider,
    cache: &mut ResolveCache,
) -> Result<Option<MediaId>, ProviderError> {
    match token {
        MediaToken::Movie(movie) => {
            let id = match cache.movies.get(&movie.title) {
                Some(hit) => *hit,
                None => {
                    let found = provider.search_movie(&movie.title, Some(movie.year))?;
                    debug!("Movie search '{}' ({}) -> {:?}", movie.title, movie.year, found);
                    cache.movies.insert(movie.title.clone(), found);
                    found
                }
            };
            Ok(id.map(MediaId::Movie))
        }
        MediaToken::Tv(tv) => {
            let id = match cache.tvs.get(&tv.title) {
                Some(hit) => *hit,
                None => {
                    let found = provider.search_tv(&tv.title)?;
                    debug!("TV search '{}' -> {:?}", tv.title, found);
                    cache.tvs.insert(tv.title.clone(), found);
                    found
                }
            };
            Ok(id.map(|tv_id| MediaId::Tv {
                tv_id,
                season: tv.season,
                episode: tv.episode,
            }))
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::library::MediaRecord;
    use crate::parse::{MovieToken, TvToken};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Provider answering from fixed tables and counting calls.
    #[derive(Default)]
    pub(crate) struct FakeProvider {
        pub movies: HashMap<String, u64>,
        pub tvs: HashMap<String, u64>,
        pub records: Mutex<HashMap<u64, MediaRecord>>,
        pub searches: AtomicUsize,
        pub fail: bool,
    }

    impl FakeProvider {
        pub fn with_record(self, record: MediaRecord) -> Self {
            self.records.lock().unwrap().insert(record.id, record);
            self
        }
    }

    impl MetadataProvider for FakeProvider {
        fn search_movie(&self, title: &str, _year: Option<u16>) -> Result<Option<u64>, ProviderError> {
            self.searches.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ProviderError::Status(503));
            }
            Ok(self.movies.get(title).copied())
        }

        fn search_tv(&self, title: &str) -> Result<Option<u64>, ProviderError> {
            self.searches.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ProviderError::Status(503));
            }
            Ok(self.tvs.get(title).copied())
        }

        fn movie_details(&self, id: u64) -> Result<Option<MediaRecord>, ProviderError> {
            Ok(self.records.lock().unwrap().get(&id).cloned())
        }

        fn tv_details(&self, id: u64) -> Result<Option<MediaRecord>, ProviderError> {
            Ok(self.records.lock().unwrap().get(&id).cloned())
        }
    }

    fn tv_token(title: &str, season: u32, episode: u32) -> MediaToken {
        MediaToken::Tv(TvToken {
            title: title.to_string(),
            season,
            episode,
        })
    }

    #[test]
    fn test_tv_hits_are_memoized() {
        let mut provider = FakeProvider::default();
        provider.tvs.insert("Mad Men".to_string(), 1104);
        let mut cache = ResolveCache::new();

        for episode in 1..=5 {
            let id = resolve(&tv_token("Mad Men", 1, episode), &provider, &mut cache).unwrap();
            assert_eq!(id, Some(MediaId::Tv { tv_id: 1104, season: 1, episode }));
        }
        assert_eq!(provider.searches.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_negative_results_are_memoized() {
        let provider = FakeProvider::default();
        let mut cache = ResolveCache::new();

        assert_eq!(resolve(&tv_token("Nope", 1, 1), &provider, &mut cache).unwrap(), None);
        assert_eq!(resolve(&tv_token("Nope", 1, 2), &provider, &mut cache).unwrap(), None);
        assert_eq!(provider.searches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_movie_and_tv_namespaces_are_separate() {
        let mut provider = FakeProvider::default();
        provider.movies.insert("Fargo".to_string(), 275);
        provider.tvs.insert("Fargo".to_string(), 60622);
        let mut cache = ResolveCache::new();

        let movie = MediaToken::Movie(MovieToken {
            title: "Fargo".to_string(),
            year: 1996,
        });
        assert_eq!(resolve(&movie, &provider, &mut cache).unwrap(), Some(MediaId::Movie(275)));
        assert_eq!(
            resolve(&tv_token("Fargo", 1, 1), &provider, &mut cache).unwrap(),
            Some(MediaId::Tv { tv_id: 60622, season: 1, episode: 1 })
        );
        assert_eq!(provider.searches.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_errors_are_not_cached() {
        let provider = FakeProvider {
            fail: true,
            ..Default::default()
        };
        let mut cache = ResolveCache::new();

        assert!(resolve(&tv_token("Mad Men", 1, 1), &provider, &mut cache).is_err());
        assert!(cache.is_empty());
    }
}
