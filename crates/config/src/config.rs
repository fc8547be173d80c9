//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Metadata store location
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LibraryConfig {
    /// SQLite database file
    #[serde(default = "default_db_path")]
    pub db: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("library.db")
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            db: default_db_path(),
        }
    }
}

/// Remote metadata provider credentials
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TmdbConfig {
    /// API key (empty disables remote lookups)
    #[serde(default)]
    pub key: String,
    /// Response language, e.g. "en-US" or "fr"
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_language() -> String {
    "en-US".to_string()
}

impl Default for TmdbConfig {
    fn default() -> Self {
        Self {
            key: String::new(),
            language: default_language(),
        }
    }
}

/// Candidate storage volumes, tried in order
///
/// The same roots are walked by the batch scanner.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PathsConfig {
    #[serde(default)]
    pub movie: Vec<PathBuf>,
    #[serde(default)]
    pub tv: Vec<PathBuf>,
}

/// Interactive server settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Listen address (default 127.0.0.1:7878)
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Ingestion worker count (default 1, which serializes every job)
    #[serde(default = "default_workers")]
    pub workers: u32,
    /// Users allowed to delete videos
    #[serde(default)]
    pub admins: Vec<String>,
}

fn default_bind() -> String {
    "127.0.0.1:7878".to_string()
}

fn default_workers() -> u32 {
    1
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            workers: default_workers(),
            admins: Vec::new(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub library: LibraryConfig,
    #[serde(default)]
    pub tmdb: TmdbConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing sections and optional fields fall back to their defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - CINEDROP_DB -> library.db
    /// - TMDB_API_KEY -> tmdb.key
    /// - TMDB_LANGUAGE -> tmdb.language
    /// - CINEDROP_BIND -> server.bind
    /// - CINEDROP_WORKERS -> server.workers
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("CINEDROP_DB") {
            if !val.is_empty() {
                self.library.db = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("TMDB_API_KEY") {
            self.tmdb.key = val;
        }

        if let Ok(val) = env::var("TMDB_LANGUAGE") {
            if !val.is_empty() {
                self.tmdb.language = val;
            }
        }

        if let Ok(val) = env::var("CINEDROP_BIND") {
            if !val.is_empty() {
                self.server.bind = val;
            }
        }

        // Invalid or zero values keep the configured count
        if let Ok(val) = env::var("CINEDROP_WORKERS") {
            if let Ok(workers) = val.parse::<u32>() {
                if workers > 0 {
                    self.server.workers = workers;
                }
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Candidate roots for a media kind name ("movie" or "tv")
    pub fn roots_for(&self, kind: &str) -> &[PathBuf] {
        match kind {
            "movie" => &self.paths.movie,
            "tv" => &self.paths.tv,
            _ => &[],
        }
    }
}
