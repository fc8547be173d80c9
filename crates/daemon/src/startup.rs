//! Startup checks
//!
//! Preflight checks run before serving or ingesting:
//! - Every candidate root exists and is a directory
//! - The worker count is at least one
//! - A metadata provider key is present when lookups will be needed

use crate::config::Config;
use std::path::PathBuf;
use thiserror::Error;
use tracing::warn;

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("{kind} root {} does not exist", .path.display())]
    MissingRoot { kind: &'static str, path: PathBuf },

    #[error("{kind} root {} is not a directory", .path.display())]
    NotADirectory { kind: &'static str, path: PathBuf },

    #[error("Worker count must be at least 1, got {0}")]
    InvalidWorkers(u32),

    #[error("TMDB API key is not set (tmdb.key or TMDB_API_KEY)")]
    MissingApiKey,
}

/// Check that every configured movie and TV root is an existing directory
///
/// A kind with no roots at all is allowed but logged, since any ingestion of
/// that kind will then fail with no space available.
pub fn check_roots(cfg: &Config) -> Result<(), StartupError> {
    for (kind, roots) in [("movie", &cfg.paths.movie), ("tv", &cfg.paths.tv)] {
        if roots.is_empty() {
            warn!("No {} roots configured", kind);
        }
        for root in roots {
            if !root.exists() {
                return Err(StartupError::MissingRoot {
                    kind,
                    path: root.clone(),
                });
            }
            if !root.is_dir() {
                return Err(StartupError::NotADirectory {
                    kind,
                    path: root.clone(),
                });
            }
        }
    }
    Ok(())
}

pub fn check_workers(cfg: &Config) -> Result<(), StartupError> {
    if cfg.server.workers == 0 {
        return Err(StartupError::InvalidWorkers(cfg.server.workers));
    }
    Ok(())
}

pub fn check_provider_key(cfg: &Config) -> Result<(), StartupError> {
    if cfg.tmdb.key.trim().is_empty() {
        return Err(StartupError::MissingApiKey);
    }
    Ok(())
}

/// Run all startup checks in order
///
/// Checks are run in the following order:
/// 1. Candidate roots
/// 2. Worker count
/// 3. Provider key, only when `needs_provider` is set
pub fn run_startup_checks(cfg: &Config, needs_provider: bool) -> Result<(), StartupError> {
    check_roots(cfg)?;
    check_workers(cfg)?;
    if needs_provider {
        check_provider_key(cfg)?;
    }
    Ok(())
}
