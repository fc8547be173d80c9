//! Filename parser: pulls a movie or TV token out of a release-style file name.
//!
//! Only the final path component is inspected and nothing touches the disk.
//!
//! - Movies: `Title.Of.Movie.2020[.anything].ext`; the year is the last
//!   `19xx`/`20xx` group standing on its own, so `Blade.Runner.2049.2017.mkv`
//!   names "Blade Runner 2049" from 2017.
//! - TV: `Show.Name.S01E02[.anything].ext`, case-insensitive.

use crate::library::MediaKind;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

/// The path did not match the expected naming convention.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Could not parse {}: {reason}", .path.display())]
pub struct ParseError {
    pub path: PathBuf,
    pub reason: String,
}

impl ParseError {
    fn new(path: &Path, reason: impl Into<String>) -> Self {
        Self {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovieToken {
    pub title: String,
    pub year: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TvToken {
    pub title: String,
    pub season: u32,
    pub episode: u32,
}

/// Structured identity guessed from a file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaToken {
    Movie(MovieToken),
    Tv(TvToken),
}

impl MediaToken {
    /// The raw parsed title, used as the resolver cache key.
    pub fn title(&self) -> &str {
        match self {
            MediaToken::Movie(m) => &m.title,
            MediaToken::Tv(t) => &t.title,
        }
    }
}

fn movie_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<title>.+)[._ \-(\[]+(?P<year>(?:19|20)\d{2})(?:[^0-9A-Za-z].*)?$")
            .expect("movie pattern is valid")
    })
}

fn tv_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?P<title>.+?)[._ \-]+[sS](?P<season>\d{1,3})[eE](?P<episode>\d{1,3})(?:\D.*)?$",
        )
        .expect("tv pattern is valid")
    })
}

fn file_name(path: &Path) -> Result<&str, ParseError> {
    path.file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ParseError::new(path, "no usable file name"))
}

/// Turns a dotted release title into words.
fn clean_title(raw: &str) -> String {
    let spaced = raw.replace(['.', '_'], " ");
    let words: Vec<&str> = spaced.split_whitespace().collect();
    words
        .join(" ")
        .trim_matches(|c: char| c == '-' || c == '(' || c == '[' || c.is_whitespace())
        .to_string()
}

/// Extracts `(title, year)` from a movie file path.
pub fn parse_movie(path: &Path) -> Result<MovieToken, ParseError> {
    let name = file_name(path)?;
    let caps = movie_regex()
        .captures(name)
        .ok_or_else(|| ParseError::new(path, "no title followed by a year"))?;

    let title = clean_title(&caps["title"]);
    if title.is_empty() {
        return Err(ParseError::new(path, "empty title"));
    }
    let year = caps["year"]
        .parse::<u16>()
        .map_err(|e| ParseError::new(path, format!("bad year: {}", e)))?;

    Ok(MovieToken { title, year })
}

/// Extracts `(title, season, episode)` from an episode file path.
pub fn parse_tv(path: &Path) -> Result<TvToken, ParseError> {
    let name = file_name(path)?;
    let caps = tv_regex()
        .captures(name)
        .ok_or_else(|| ParseError::new(path, "no sNNeNN marker after a title"))?;

    let title = clean_title(&caps["title"]);
    if title.is_empty() {
        return Err(ParseError::new(path, "empty title"));
    }
    let season = caps["season"]
        .parse::<u32>()
        .map_err(|e| ParseError::new(path, format!("bad season: {}", e)))?;
    let episode = caps["episode"]
        .parse::<u32>()
        .map_err(|e| ParseError::new(path, format!("bad episode: {}", e)))?;

    Ok(TvToken {
        title,
        season,
        episode,
    })
}

/// Parses `path` with the grammar for `kind`.
///
/// For [`MediaKind::Unknown`] the TV grammar is tried first since its
/// `sNNeNN` marker is far less ambiguous than a bare year.
pub fn parse_media(path: &Path, kind: MediaKind) -> Result<MediaToken, ParseError> {
    match kind {
        MediaKind::Movie => parse_movie(path).map(MediaToken::Movie),
        MediaKind::Tv => parse_tv(path).map(MediaToken::Tv),
        MediaKind::Unknown => parse_tv(path)
            .map(MediaToken::Tv)
            .or_else(|_| parse_movie(path).map(MediaToken::Movie))
            .map_err(|_| ParseError::new(path, "neither an episode nor a movie name")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn movie(path: &str) -> Result<MovieToken, ParseError> {
        parse_movie(Path::new(path))
    }

    fn tv(path: &str) -> Result<TvToken, ParseError> {
        parse_tv(Path::new(path))
    }

    #[test]
    fn test_movie_basic() {
        let token = movie("/incoming/Example.Movie.2020.mkv").unwrap();
        assert_eq!(token.title, "Example Movie");
        assert_eq!(token.year, 2020);
    }

    #[test]
    fn test_movie_with_release_tags() {
        let token = movie("/dl/The.Matrix.1999.1080p.BluRay.x264-GROUP.mkv").unwrap();
        assert_eq!(token.title, "The Matrix");
        assert_eq!(token.year, 1999);
    }

    #[test]
    fn test_movie_last_year_wins() {
        let token = movie("/dl/Blade.Runner.2049.2017.mkv").unwrap();
        assert_eq!(token.title, "Blade Runner 2049");
        assert_eq!(token.year, 2017);
    }

    #[test]
    fn test_movie_bracketed_year() {
        let token = movie("/dl/Spider-Man (2002).mkv").unwrap();
        assert_eq!(token.title, "Spider-Man");
        assert_eq!(token.year, 2002);
    }

    #[test]
    fn test_movie_resolution_is_not_a_year() {
        let token = movie("/dl/Heat.1995.2160p.mkv").unwrap();
        assert_eq!(token.year, 1995);
        assert!(movie("/dl/Heat.2160p.mkv").is_err());
    }

    #[test]
    fn test_movie_without_year_fails() {
        let err = movie("/incoming/Spiderman.mkv").unwrap_err();
        assert_eq!(err.path, PathBuf::from("/incoming/Spiderman.mkv"));
    }

    #[test]
    fn test_movie_year_only_fails() {
        assert!(movie("/incoming/2020.mkv").is_err());
    }

    #[test]
    fn test_tv_basic() {
        let token = tv("/tv/Mad.Men.S01E02.720p.mkv").unwrap();
        assert_eq!(token.title, "Mad Men");
        assert_eq!(token.season, 1);
        assert_eq!(token.episode, 2);
    }

    #[test]
    fn test_tv_lowercase_marker() {
        let token = tv("/tv/the_wire_s03e11.avi").unwrap();
        assert_eq!(token.title, "the wire");
        assert_eq!(token.season, 3);
        assert_eq!(token.episode, 11);
    }

    #[test]
    fn test_tv_without_marker_fails() {
        assert!(tv("/tv/Mad.Men.mkv").is_err());
        assert!(tv("/tv/S01E02.mkv").is_err());
    }

    #[test]
    fn test_parse_media_unknown_prefers_tv() {
        let token = parse_media(Path::new("/x/Show.2019.S02E03.mkv"), MediaKind::Unknown).unwrap();
        assert_eq!(
            token,
            MediaToken::Tv(TvToken {
                title: "Show 2019".to_string(),
                season: 2,
                episode: 3,
            })
        );

        let token = parse_media(Path::new("/x/Heat.1995.mkv"), MediaKind::Unknown).unwrap();
        assert_eq!(token.title(), "Heat");
        assert!(parse_media(Path::new("/x/clip.mkv"), MediaKind::Unknown).is_err());
    }

    #[test]
    fn test_no_file_name() {
        assert!(movie("/").is_err());
        assert!(tv("").is_err());
    }

    // **Feature: cinedrop, Property 3: Movie Name Round-Trip**
    //
    // *For any* title made of words and any year 1900-2099, the dotted release
    // name `<Title.Words>.<year>.<ext>` parses back to the same title and year.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_movie_round_trip(
            words in proptest::collection::vec("[A-Z][a-z]{1,8}", 1..5),
            year in 1900u16..2100,
            ext in prop_oneof![Just("mkv"), Just("mp4"), Just("avi")],
        ) {
            let title = words.join(" ");
            let path = PathBuf::from(format!("/incoming/{}.{}.{}", title.replace(' ', "."), year, ext));
            let token = parse_movie(&path).unwrap();
            prop_assert_eq!(token.title, title);
            prop_assert_eq!(token.year, year);
        }

        #[test]
        fn prop_tv_round_trip(
            words in proptest::collection::vec("[A-Z][a-z]{1,8}", 1..4),
            season in 0u32..100,
            episode in 0u32..1000,
        ) {
            let title = words.join(" ");
            let path = PathBuf::from(format!(
                "/tv/{}.s{:02}e{:02}.mkv",
                title.replace(' ', "."),
                season,
                episode
            ));
            let token = parse_tv(&path).unwrap();
            prop_assert_eq!(token.title, title);
            prop_assert_eq!(token.season, season);
            prop_assert_eq!(token.episode, episode);
        }
    }
}
