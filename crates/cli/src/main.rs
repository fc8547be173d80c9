//! CLI entry point for cinedrop
//!
//! `serve` runs the HTTP service, `ingest` ingests one file in this process
//! and reports the outcome through its exit code, `scan` registers new files
//! found under the configured roots and `match` identifies registered files.

use cinedrop::{Daemon, EpisodeRef, Identity, IngestRequest};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Exit codes of the standalone ingester. `-3` (no space) comes from the
/// ingestion error itself.
const EXIT_BAD_KIND: i32 = -1;
const EXIT_BAD_ARGS: i32 = -2;
const EXIT_FAILURE: i32 = -4;

/// cinedrop - identify, place and register video files
#[derive(Parser, Debug)]
#[command(name = "cinedrop")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (config.toml)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP ingestion service
    Serve,

    /// Ingest one file: `<path> movie <movie-id>` or
    /// `<path> tv <tv-id> <season> <episode>`
    Ingest {
        #[arg(num_args = 0.., allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Register unseen video files under the configured roots
    Scan,

    /// Identify every registered but unidentified video
    Match,
}

/// Turns the positional `ingest` arguments into a request, or the exit code
/// describing why they are unusable.
fn ingest_request(args: &[String]) -> Result<IngestRequest, i32> {
    if args.len() < 3 {
        return Err(EXIT_BAD_ARGS);
    }
    let source = PathBuf::from(&args[0]);
    let ids = &args[2..];

    let identity = match args[1].as_str() {
        "movie" => {
            if ids.len() != 1 {
                return Err(EXIT_BAD_ARGS);
            }
            Identity::Movie(ids[0].parse().map_err(|_| EXIT_FAILURE)?)
        }
        "tv" => {
            if ids.len() != 3 {
                return Err(EXIT_BAD_ARGS);
            }
            Identity::Episode(EpisodeRef {
                tv_id: ids[0].parse().map_err(|_| EXIT_FAILURE)?,
                season: ids[1].parse().map_err(|_| EXIT_FAILURE)?,
                episode: ids[2].parse().map_err(|_| EXIT_FAILURE)?,
            })
        }
        _ => return Err(EXIT_BAD_KIND),
    };

    Ok(IngestRequest::new(source, identity))
}

/// Standalone ingestion; returns the process exit code.
async fn run_ingest(config: PathBuf, args: Vec<String>) -> i32 {
    let request = match ingest_request(&args) {
        Ok(request) => request,
        Err(code) => {
            error!("Unusable ingest arguments {:?}", args);
            return code;
        }
    };

    let result = tokio::task::spawn_blocking(move || {
        let daemon = match Daemon::new(&config, false) {
            Ok(daemon) => daemon,
            Err(e) => {
                error!("Failed to initialize: {}", e);
                return EXIT_FAILURE;
            }
        };
        match daemon.ingest(&request) {
            Ok(outcome) => {
                info!("Video {} stored at {}", outcome.video_id, outcome.path.display());
                0
            }
            Err(e) => {
                error!("Ingestion failed ({}): {}", e.kind(), e);
                e.exit_code()
            }
        }
    })
    .await;

    result.unwrap_or_else(|e| {
        error!("Ingestion task failed: {}", e);
        EXIT_FAILURE
    })
}

/// Runs a blocking daemon operation for `scan` / `match`.
async fn run_batch<F>(config: PathBuf, needs_provider: bool, op: F) -> ExitCode
where
    F: FnOnce(&Daemon) + Send + 'static,
{
    let result = tokio::task::spawn_blocking(move || {
        Daemon::new(&config, needs_provider).map(|daemon| op(&daemon))
    })
    .await;

    match result {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(e)) => {
            error!("Failed to initialize: {}", e);
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("Batch task failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_serve(config: PathBuf) -> ExitCode {
    let daemon = match tokio::task::spawn_blocking(move || Daemon::new(&config, true)).await {
        Ok(Ok(daemon)) => daemon,
        Ok(Err(e)) => {
            error!("Failed to initialize daemon: {}", e);
            return ExitCode::FAILURE;
        }
        Err(e) => {
            error!("Initialization task failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!(
        "Serving on http://{} with {} worker(s)",
        daemon.config.server.bind, daemon.config.server.workers
    );
    if let Err(e) = daemon.serve().await {
        error!("Daemon error: {}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    info!("Config file: {}", args.config.display());

    match args.command {
        Command::Serve => run_serve(args.config).await,
        Command::Ingest { args: ingest_args } => {
            let code = run_ingest(args.config, ingest_args).await;
            // Negative codes are part of the contract, which ExitCode cannot carry
            std::process::exit(code)
        }
        Command::Scan => {
            run_batch(args.config, false, |daemon| {
                let report = daemon.scan();
                info!("{:?}", report);
            })
            .await
        }
        Command::Match => {
            run_batch(args.config, true, |daemon| {
                let report = daemon.match_all();
                info!("{:?}", report);
            })
            .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_movie_arguments() {
        let request = ingest_request(&args(&["/in/a.mkv", "movie", "123"])).unwrap();
        assert_eq!(request.identity, Identity::Movie(123));
        assert_eq!(request.source, PathBuf::from("/in/a.mkv"));
    }

    #[test]
    fn test_tv_arguments() {
        let request = ingest_request(&args(&["/in/a.mkv", "tv", "1104", "1", "2"])).unwrap();
        assert_eq!(
            request.identity,
            Identity::Episode(EpisodeRef { tv_id: 1104, season: 1, episode: 2 })
        );
    }

    #[test]
    fn test_argument_count_errors() {
        assert_eq!(ingest_request(&args(&["/in/a.mkv", "movie"])).unwrap_err(), EXIT_BAD_ARGS);
        assert_eq!(
            ingest_request(&args(&["/in/a.mkv", "movie", "1", "2"])).unwrap_err(),
            EXIT_BAD_ARGS
        );
        assert_eq!(
            ingest_request(&args(&["/in/a.mkv", "tv", "1", "2"])).unwrap_err(),
            EXIT_BAD_ARGS
        );
    }

    #[test]
    fn test_unknown_kind() {
        assert_eq!(
            ingest_request(&args(&["/in/a.mkv", "clip", "1"])).unwrap_err(),
            EXIT_BAD_KIND
        );
    }

    #[test]
    fn test_non_numeric_id_is_failure() {
        assert_eq!(
            ingest_request(&args(&["/in/a.mkv", "movie", "abc"])).unwrap_err(),
            EXIT_FAILURE
        );
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let parsed = Args::try_parse_from(["cinedrop", "--config", "c.toml", "ingest", "/x.mkv", "movie", "5"]).unwrap();
        assert_eq!(parsed.config, PathBuf::from("c.toml"));
        match parsed.command {
            Command::Ingest { args } => assert_eq!(args.len(), 3),
            other => panic!("unexpected command {:?}", other),
        }
        assert!(matches!(Args::try_parse_from(["cinedrop", "scan"]).unwrap().command, Command::Scan));
    }
}
