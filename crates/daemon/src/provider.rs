//! Metadata provider seam and its TMDB implementation.
//!
//! The provider is called from ingestion workers and the batch matcher, both
//! of which already run off the async executor, so the trait is blocking.

use crate::library::MediaRecord;
use serde::Deserialize;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const TMDB_BASE_URL: &str = "https://api.themoviedb.org/3";

/// Errors from a metadata provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// No API key configured.
    #[error("Metadata provider is not configured")]
    NotConfigured,

    /// Request could not be sent or the response could not be read.
    #[error("Metadata request failed: {0}")]
    Http(String),

    /// Provider answered with an unexpected status.
    #[error("Metadata provider returned status {0}")]
    Status(u16),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        ProviderError::Http(e.to_string())
    }
}

/// Remote catalogue used to identify media.
pub trait MetadataProvider: Send + Sync {
    /// Best movie id for `title`, optionally narrowed to a release year.
    fn search_movie(&self, title: &str, year: Option<u16>) -> Result<Option<u64>, ProviderError>;

    /// Best TV show id for `title`.
    fn search_tv(&self, title: &str) -> Result<Option<u64>, ProviderError>;

    /// Naming metadata for a movie id, `None` if the id is unknown.
    fn movie_details(&self, id: u64) -> Result<Option<MediaRecord>, ProviderError>;

    /// Naming metadata for a TV show id, `None` if the id is unknown.
    fn tv_details(&self, id: u64) -> Result<Option<MediaRecord>, ProviderError>;
}

/// A search hit reduced to what ranking needs.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub id: u64,
    pub title: String,
    pub original_title: String,
    pub release_date: Option<String>,
}

/// Picks the candidate that best matches `query`.
///
/// An exact (case-insensitive) title or original title match beats a partial
/// one, a matching year breaks ties, and otherwise the provider's own order
/// (popularity) wins.
pub fn best_match(query: &str, year: Option<u16>, candidates: &[Candidate]) -> Option<u64> {
    let query = query.to_lowercase();
    let score = |c: &Candidate| {
        let mut score = 0;
        if c.title.to_lowercase() == query || c.original_title.to_lowercase() == query {
            score += 2;
        }
        let candidate_year = c.release_date.as_deref().and_then(|d| d.get(..4));
        if let (Some(year), Some(candidate_year)) = (year, candidate_year) {
            if candidate_year == year.to_string() {
                score += 1;
            }
        }
        score
    };

    let mut best: Option<(&Candidate, u32)> = None;
    for candidate in candidates {
        let s = score(candidate);
        if best.map_or(true, |(_, best_score)| s > best_score) {
            best = Some((candidate, s));
        }
    }
    best.map(|(c, _)| c.id)
}

#[derive(Debug, Deserialize)]
struct SearchPage<T> {
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct TmdbMovie {
    id: u64,
    title: String,
    original_title: String,
    #[serde(default)]
    release_date: Option<String>,
}

impl From<TmdbMovie> for Candidate {
    fn from(m: TmdbMovie) -> Self {
        Candidate {
            id: m.id,
            title: m.title,
            original_title: m.original_title,
            release_date: m.release_date.filter(|d| !d.is_empty()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TmdbTv {
    id: u64,
    name: String,
    original_name: String,
    #[serde(default)]
    first_air_date: Option<String>,
}

impl From<TmdbTv> for Candidate {
    fn from(t: TmdbTv) -> Self {
        Candidate {
            id: t.id,
            title: t.name,
            original_title: t.original_name,
            release_date: t.first_air_date.filter(|d| !d.is_empty()),
        }
    }
}

impl From<Candidate> for MediaRecord {
    fn from(c: Candidate) -> Self {
        MediaRecord {
            id: c.id,
            title: c.title,
            original_title: c.original_title,
            release_date: c.release_date,
        }
    }
}

/// The Movie Database (TMDB) v3 API client.
pub struct TmdbProvider {
    api_key: String,
    language: String,
    // Built on first use so it is created on a worker thread.
    client: OnceLock<reqwest::blocking::Client>,
}

impl TmdbProvider {
    pub fn new(api_key: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            language: language.into(),
            client: OnceLock::new(),
        }
    }

    fn client(&self) -> Result<&reqwest::blocking::Client, ProviderError> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(self.client.get_or_init(|| client))
    }

    /// GETs `endpoint`; a 404 maps to `Ok(None)`.
    fn get<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        extra: &[(&str, String)],
    ) -> Result<Option<T>, ProviderError> {
        if self.api_key.is_empty() {
            return Err(ProviderError::NotConfigured);
        }

        let mut query: Vec<(&str, String)> = vec![
            ("api_key", self.api_key.clone()),
            ("language", self.language.clone()),
        ];
        query.extend(extra.iter().cloned());

        let url = format!("{}{}", TMDB_BASE_URL, endpoint);
        debug!("TMDB request {}", url);
        let response = self.client()?.get(&url).query(&query).send()?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(ProviderError::Status(status.as_u16()));
        }
        Ok(Some(response.json()?))
    }
}

impl MetadataProvider for TmdbProvider {
    fn search_movie(&self, title: &str, year: Option<u16>) -> Result<Option<u64>, ProviderError> {
        let mut params = vec![("query", title.to_string())];
        if let Some(year) = year {
            params.push(("year", year.to_string()));
        }
        let page: Option<SearchPage<TmdbMovie>> = self.get("/search/movie", &params)?;
        let candidates: Vec<Candidate> = page
            .map(|p| p.results.into_iter().map(Candidate::from).collect())
            .unwrap_or_default();
        Ok(best_match(title, year, &candidates))
    }

    fn search_tv(&self, title: &str) -> Result<Option<u64>, ProviderError> {
        let params = vec![("query", title.to_string())];
        let page: Option<SearchPage<TmdbTv>> = self.get("/search/tv", &params)?;
        let candidates: Vec<Candidate> = page
            .map(|p| p.results.into_iter().map(Candidate::from).collect())
            .unwrap_or_default();
        Ok(best_match(title, None, &candidates))
    }

    fn movie_details(&self, id: u64) -> Result<Option<MediaRecord>, ProviderError> {
        let movie: Option<TmdbMovie> = self.get(&format!("/movie/{}", id), &[])?;
        Ok(movie.map(|m| Candidate::from(m).into()))
    }

    fn tv_details(&self, id: u64) -> Result<Option<MediaRecord>, ProviderError> {
        let tv: Option<TmdbTv> = self.get(&format!("/tv/{}", id), &[])?;
        Ok(tv.map(|t| Candidate::from(t).into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: u64, title: &str, date: Option<&str>) -> Candidate {
        Candidate {
            id,
            title: title.to_string(),
            original_title: title.to_string(),
            release_date: date.map(str::to_string),
        }
    }

    #[test]
    fn test_best_match_empty() {
        assert_eq!(best_match("anything", None, &[]), None);
    }

    #[test]
    fn test_best_match_prefers_exact_title() {
        let candidates = vec![
            candidate(1, "Spider-Man: Homecoming", Some("2017-07-05")),
            candidate(2, "Spider-Man", Some("2002-05-01")),
        ];
        assert_eq!(best_match("spider-man", None, &candidates), Some(2));
    }

    #[test]
    fn test_best_match_year_breaks_ties() {
        let candidates = vec![
            candidate(10, "Dune", Some("2021-09-15")),
            candidate(11, "Dune", Some("1984-12-14")),
        ];
        assert_eq!(best_match("Dune", Some(1984), &candidates), Some(11));
        assert_eq!(best_match("Dune", None, &candidates), Some(10));
    }

    #[test]
    fn test_best_match_falls_back_to_provider_order() {
        let candidates = vec![candidate(5, "Alpha", None), candidate(6, "Beta", None)];
        assert_eq!(best_match("gamma", None, &candidates), Some(5));
    }

    #[test]
    fn test_tmdb_movie_json_maps_to_record() {
        let json = r#"{"id": 557, "title": "Spider-Man", "original_title": "Spider-Man",
                       "release_date": "2002-05-01", "popularity": 80.1}"#;
        let movie: TmdbMovie = serde_json::from_str(json).unwrap();
        let record: MediaRecord = Candidate::from(movie).into();
        assert_eq!(record.id, 557);
        assert_eq!(record.release_year(), Some("2002"));
    }

    #[test]
    fn test_tmdb_tv_json_empty_date() {
        let json = r#"{"id": 1399, "name": "Game of Thrones", "original_name": "Game of Thrones",
                       "first_air_date": ""}"#;
        let tv: TmdbTv = serde_json::from_str(json).unwrap();
        let record: MediaRecord = Candidate::from(tv).into();
        assert_eq!(record.title, "Game of Thrones");
        assert_eq!(record.release_date, None);
    }

    #[test]
    fn test_missing_key_is_not_configured() {
        let provider = TmdbProvider::new("", "en-US");
        assert!(matches!(
            provider.search_tv("Mad Men"),
            Err(ProviderError::NotConfigured)
        ));
    }
}
