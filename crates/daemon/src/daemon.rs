//! Daemon assembly
//!
//! Wires configuration, the library, the metadata provider, the ingestor and
//! the worker pool together, and exposes the entry points the command line
//! drives: serve, standalone ingest, scan and match.

use crate::config::{Config, ConfigError};
use crate::ingest::{
    IngestError, IngestOutcome, IngestRequest, IngestRoots, Ingestor, SERVER_OWNER,
    STANDALONE_OWNER,
};
use crate::job_executor::IngestPool;
use crate::library::{Library, LibraryError, MediaKind};
use crate::matcher::{match_unidentified, MatchReport};
use crate::placement::SpaceProbe;
use crate::provider::{MetadataProvider, TmdbProvider};
use crate::scan::{scan_all, ScanReport};
use crate::server::{run_server, AppState, ServerError};
use crate::sqlite_library::SqliteLibrary;
use crate::startup::{run_startup_checks, StartupError};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Error type for daemon operations
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Startup check failed
    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),

    /// Library could not be opened
    #[error("Library error: {0}")]
    Library(#[from] LibraryError),

    /// Server error
    #[error("Server error: {0}")]
    Server(#[from] ServerError),
}

/// Runtime components shared by every entry point
pub struct Daemon {
    /// Configuration loaded from file and environment
    pub config: Config,
    library: Arc<dyn Library>,
    provider: Arc<dyn MetadataProvider>,
    ingestor: Arc<Ingestor>,
    standalone: Ingestor,
}

impl Daemon {
    /// Initialize the daemon from a config file
    ///
    /// This performs the full startup sequence:
    /// 1. Load config from file
    /// 2. Apply environment overrides
    /// 3. Run startup checks (roots, workers, provider key if `needs_provider`)
    /// 4. Open the SQLite library
    /// 5. Build the TMDB provider and the ingestor
    pub fn new<P: AsRef<Path>>(config_path: P, needs_provider: bool) -> Result<Self, DaemonError> {
        let config = Config::load(config_path)?;
        Self::with_config(config, needs_provider)
    }

    /// Initialize the daemon with an already loaded configuration
    pub fn with_config(config: Config, needs_provider: bool) -> Result<Self, DaemonError> {
        run_startup_checks(&config, needs_provider)?;

        let library: Arc<dyn Library> = Arc::new(SqliteLibrary::open(&config.library.db)?);
        info!("Opened library {}", config.library.db.display());
        let provider: Arc<dyn MetadataProvider> = Arc::new(TmdbProvider::new(
            config.tmdb.key.clone(),
            config.tmdb.language.clone(),
        ));

        Ok(Self::with_components(config, library, provider, None))
    }

    /// Assemble the daemon from existing components without startup checks
    ///
    /// Useful for testing, or for embedding with another library backend.
    pub fn with_components(
        config: Config,
        library: Arc<dyn Library>,
        provider: Arc<dyn MetadataProvider>,
        probe: Option<Arc<dyn SpaceProbe>>,
    ) -> Self {
        let roots = IngestRoots {
            movie: config.roots_for(MediaKind::Movie.as_str()).to_vec(),
            tv: config.roots_for(MediaKind::Tv.as_str()).to_vec(),
        };
        let build = |owner: &str| {
            let ingestor = Ingestor::new(library.clone(), provider.clone(), roots.clone())
                .with_owner(owner);
            match &probe {
                Some(probe) => ingestor.with_probe(probe.clone()),
                None => ingestor,
            }
        };
        let ingestor = Arc::new(build(SERVER_OWNER));
        let standalone = build(STANDALONE_OWNER);

        Self {
            config,
            library,
            provider,
            ingestor,
            standalone,
        }
    }

    pub fn library(&self) -> &Arc<dyn Library> {
        &self.library
    }

    pub fn ingestor(&self) -> &Arc<Ingestor> {
        &self.ingestor
    }

    /// Build the worker pool sized from `[server] workers`
    pub fn pool(&self) -> IngestPool {
        IngestPool::new(self.ingestor.clone(), self.config.server.workers as usize)
    }

    /// Ingest one file on the calling thread (standalone mode)
    pub fn ingest(&self, request: &IngestRequest) -> Result<IngestOutcome, IngestError> {
        self.standalone.ingest(request)
    }

    /// Register unseen files under the configured roots
    pub fn scan(&self) -> ScanReport {
        scan_all(
            self.library.as_ref(),
            &self.config.paths.movie,
            &self.config.paths.tv,
        )
    }

    /// Resolve every unidentified video
    pub fn match_all(&self) -> MatchReport {
        match_unidentified(self.library.as_ref(), self.provider.as_ref())
    }

    /// Run the HTTP server until it fails
    pub async fn serve(&self) -> Result<(), DaemonError> {
        let pool = Arc::new(self.pool());
        info!("Ingestion pool with {} worker(s)", pool.workers());
        let state = AppState::new(pool, self.config.server.admins.clone());
        run_server(state, &self.config.server.bind).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::Identity;
    use crate::library::{MediaRecord, MemoryLibrary};
    use crate::placement::FixedSpaceProbe;
    use crate::resolve::tests::FakeProvider;
    use std::fs;
    use tempfile::TempDir;

    fn create_test_config(dir: &TempDir) -> Config {
        let movies = dir.path().join("movies");
        let tv = dir.path().join("tv");
        fs::create_dir_all(&movies).unwrap();
        fs::create_dir_all(&tv).unwrap();

        let mut config = Config::default();
        config.library.db = dir.path().join("library.db");
        config.paths.movie = vec![movies];
        config.paths.tv = vec![tv];
        config.server.workers = 2;
        config
    }

    #[test]
    fn test_daemon_opens_sqlite_library() {
        let dir = TempDir::new().unwrap();
        let config = create_test_config(&dir);

        let daemon = Daemon::with_config(config, false).unwrap();

        assert!(dir.path().join("library.db").exists());
        assert_eq!(daemon.pool().workers(), 2);
    }

    #[tokio::test]
    async fn test_pool_ingests_as_server() {
        let dir = TempDir::new().unwrap();
        let config = create_test_config(&dir);
        let movies = config.paths.movie[0].clone();
        let library = Arc::new(MemoryLibrary::new());
        library
            .put_movie(MediaRecord {
                id: 949,
                title: "Heat".to_string(),
                original_title: "Heat".to_string(),
                release_date: Some("1995-12-15".to_string()),
            })
            .unwrap();
        let probe = FixedSpaceProbe::new([(movies, 1_000_000u64)]);
        let daemon = Daemon::with_components(
            config,
            library.clone(),
            Arc::new(FakeProvider::default()),
            Some(Arc::new(probe)),
        );
        let incoming = dir.path().join("Heat.mkv");
        fs::write(&incoming, b"heat").unwrap();

        let outcome = daemon
            .pool()
            .ingest(IngestRequest::new(&incoming, Identity::Movie(949)))
            .await
            .unwrap()
            .unwrap();

        let video = library.video(outcome.video_id).unwrap().unwrap();
        assert_eq!(video.owner, SERVER_OWNER);
    }

    #[test]
    fn test_daemon_requires_key_when_asked() {
        let dir = TempDir::new().unwrap();
        let config = create_test_config(&dir);
        assert!(matches!(
            Daemon::with_config(config, true),
            Err(DaemonError::Startup(StartupError::MissingApiKey))
        ));
    }

    #[test]
    fn test_daemon_rejects_missing_root() {
        let dir = TempDir::new().unwrap();
        let mut config = create_test_config(&dir);
        config.paths.tv.push(dir.path().join("nope"));
        assert!(matches!(
            Daemon::with_config(config, false),
            Err(DaemonError::Startup(StartupError::MissingRoot { .. }))
        ));
    }

    #[test]
    fn test_scan_then_match_then_ingest() {
        let dir = TempDir::new().unwrap();
        let config = create_test_config(&dir);
        let movies = config.paths.movie[0].clone();
        fs::write(movies.join("Heat.1995.mkv"), b"heat").unwrap();

        let library = Arc::new(MemoryLibrary::new());
        library
            .put_movie(MediaRecord {
                id: 949,
                title: "Heat".to_string(),
                original_title: "Heat".to_string(),
                release_date: Some("1995-12-15".to_string()),
            })
            .unwrap();
        let mut provider = FakeProvider::default();
        provider.movies.insert("Heat".to_string(), 949);
        let probe = FixedSpaceProbe::new([(movies.clone(), 1_000_000u64)]);
        let daemon = Daemon::with_components(
            config,
            library.clone(),
            Arc::new(provider),
            Some(Arc::new(probe)),
        );

        assert_eq!(daemon.scan().registered, 1);
        assert_eq!(daemon.match_all().matched, 1);
        assert!(library.unidentified_videos(MediaKind::Movie).unwrap().is_empty());

        let incoming = dir.path().join("Heat.mkv");
        fs::write(&incoming, b"heat, remastered").unwrap();
        let outcome = daemon
            .ingest(&IngestRequest::new(&incoming, Identity::Movie(949)))
            .unwrap();

        assert_eq!(outcome.path, movies.join("heat.1995.mkv"));
        let video = library.video(outcome.video_id).unwrap().unwrap();
        assert_eq!(video.owner, STANDALONE_OWNER);
        // The scanned copy was a different path, so both records survive
        assert_eq!(library.video_count(), 2);
    }
}
