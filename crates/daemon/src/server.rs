//! HTTP surface: ingestion jobs, video lookup and administrative delete.
//!
//! Handlers never touch the filesystem or the library on the async executor;
//! ingestion goes through the [`IngestPool`] and lookups through
//! `spawn_blocking`.

use crate::ingest::{IngestError, IngestJob, IngestRequest};
use crate::job_executor::{IngestPool, JobError};
use crate::library::{Library, LibraryError, Video, VideoId};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Header naming the user performing an administrative request.
pub const USER_HEADER: &str = "x-user";

/// Errors that can occur when running the HTTP server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Server failed: {0}")]
    Serve(#[source] io::Error),
}

/// Request failures, rendered as `{"ok": false, "error": {"kind", "message"}}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error("User '{0}' may not perform this operation")]
    NotAllowed(String),

    #[error("Video {0} not found")]
    VideoNotFound(VideoId),

    #[error(transparent)]
    Library(#[from] LibraryError),

    #[error("Failed to remove file: {0}")]
    RemoveFile(io::Error),
}

impl ApiError {
    fn kind(&self) -> &'static str {
        match self {
            ApiError::Ingest(e) => e.kind(),
            ApiError::Job(_) => "Internal",
            ApiError::NotAllowed(_) => "NotAllowed",
            ApiError::VideoNotFound(_) => "RecordNotFound",
            ApiError::Library(_) => "Library",
            ApiError::RemoveFile(_) => "Internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self.kind() {
            "InvalidRequest" => StatusCode::BAD_REQUEST,
            "NotAllowed" => StatusCode::FORBIDDEN,
            "ParseError" | "NotFound" | "RecordNotFound" | "IncompleteMetadata"
            | "SourceUnreadable" => StatusCode::UNPROCESSABLE_ENTITY,
            "NoSpaceAvailable" => StatusCode::INSUFFICIENT_STORAGE,
            "Provider" => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            // An unknown video id in the URL is a plain 404
            ApiError::VideoNotFound(_) => StatusCode::NOT_FOUND,
            _ => self.status(),
        };
        let body = json!({
            "ok": false,
            "error": { "kind": self.kind(), "message": self.to_string() },
        });
        (status, Json(body)).into_response()
    }
}

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pool: Arc<IngestPool>,
    admins: Arc<Vec<String>>,
}

impl AppState {
    pub fn new(pool: Arc<IngestPool>, admins: Vec<String>) -> Self {
        Self {
            pool,
            admins: Arc::new(admins),
        }
    }

    fn library(&self) -> Arc<dyn Library> {
        self.pool.ingestor().library().clone()
    }
}

/// Runs a blocking library call off the async executor.
async fn blocking<F, T>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        ApiError::Job(JobError::Panicked {
            id: "request".to_string(),
            message: e.to_string(),
        })
    })?
}

/// Handler for POST /api/video
async fn create_video(
    State(state): State<AppState>,
    body: Result<Json<IngestJob>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(job) = body.map_err(|e| IngestError::InvalidRequest(e.body_text()))?;
    let request = IngestRequest::try_from(job)?;

    let handle = state.pool.ingest(request);
    let job_id = handle.id().to_string();
    let outcome = handle.await??;

    info!("Job {} committed video {}", job_id, outcome.video_id);
    Ok(Json(json!({
        "ok": true,
        "videoId": outcome.video_id,
        "path": outcome.path,
    })))
}

/// Handler for GET /api/video/:id
async fn get_video(
    State(state): State<AppState>,
    Path(id): Path<VideoId>,
) -> Result<Json<Video>, ApiError> {
    let library = state.library();
    let video = blocking(move || library.video(id).map_err(ApiError::from)).await?;
    video.map(Json).ok_or(ApiError::VideoNotFound(id))
}

/// Handler for DELETE /api/video/:id
///
/// Removes the record and the file it points to. Only configured admins may
/// call it.
async fn delete_video(
    State(state): State<AppState>,
    Path(id): Path<VideoId>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user = headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    if user.is_empty() || !state.admins.iter().any(|a| *a == user) {
        warn!("Rejected delete of video {} by '{}'", id, user);
        return Err(ApiError::NotAllowed(user));
    }

    let library = state.library();
    blocking(move || {
        let video = library.video(id)?.ok_or(ApiError::VideoNotFound(id))?;
        library.delete_video(id)?;
        match std::fs::remove_file(&video.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(ApiError::RemoveFile(e)),
        }
        info!("User {} deleted video {} ({})", user, id, video.path.display());
        Ok(())
    })
    .await?;

    Ok(Json(json!({ "ok": true })))
}

/// Creates the axum Router with the video endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/video", post(create_video))
        .route("/api/video/:id", get(get_video).delete(delete_video))
        .with_state(state)
}

/// Runs the HTTP server on `bind` until it fails.
pub async fn run_server(state: AppState, bind: &str) -> Result<(), ServerError> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|e| ServerError::Bind {
            addr: bind.to_string(),
            source: e,
        })?;
    info!("Listening on {}", bind);

    axum::serve(listener, app).await.map_err(ServerError::Serve)?;
    Ok(())
}
