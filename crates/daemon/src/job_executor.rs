//! Execution bridge between async callers and the blocking ingestion core.
//!
//! Jobs wait for a semaphore permit, run on tokio's blocking thread pool and
//! report back through a oneshot channel. There is no cancellation and no
//! timeout: a submitted job always runs to commit or rollback.

use crate::ingest::{IngestError, IngestOutcome, IngestRequest, Ingestor};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::{oneshot, Semaphore};
use tracing::{debug, error};
use uuid::Uuid;

/// Error type for job execution
#[derive(Debug, Error)]
pub enum JobError {
    /// The job's closure panicked on its worker
    #[error("Job {id} panicked: {message}")]
    Panicked { id: String, message: String },

    /// The pool went away before the job reported back
    #[error("Job {0} was dropped before completing")]
    Dropped(String),
}

/// Future resolving to a job's result.
pub struct JobHandle<T> {
    id: String,
    receiver: oneshot::Receiver<Result<T, JobError>>,
}

impl<T> JobHandle<T> {
    /// Unique id of the job, used for log correlation
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl<T> Future for JobHandle<T> {
    type Output = Result<T, JobError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let id = self.id.clone();
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(JobError::Dropped(id))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Bounded pool running ingestion work off the async executor.
///
/// Uses a tokio Semaphore to cap the number of jobs running at once. The
/// default of one worker runs jobs strictly one after another.
pub struct IngestPool {
    semaphore: Arc<Semaphore>,
    workers: usize,
    ingestor: Arc<Ingestor>,
}

impl IngestPool {
    /// Create a pool with `workers` slots (at least one).
    pub fn new(ingestor: Arc<Ingestor>, workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(workers)),
            workers,
            ingestor,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Get the number of available permits (idle worker slots)
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn ingestor(&self) -> &Arc<Ingestor> {
        &self.ingestor
    }

    /// Schedule a blocking closure and return a handle to its result.
    ///
    /// Must be called from within a tokio runtime. Returns immediately; the
    /// closure starts once a worker slot is free.
    pub fn submit<F, T>(&self, job: F) -> JobHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let id = Uuid::new_v4().to_string();
        let (sender, receiver) = oneshot::channel();
        let semaphore = self.semaphore.clone();
        let job_id = id.clone();

        tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    let _ = sender.send(Err(JobError::Dropped(job_id)));
                    return;
                }
            };
            debug!("Job {} started", job_id);

            let result = match tokio::task::spawn_blocking(job).await {
                Ok(value) => Ok(value),
                Err(join_err) => {
                    error!("Job {} panicked: {}", job_id, join_err);
                    Err(JobError::Panicked {
                        id: job_id.clone(),
                        message: join_err.to_string(),
                    })
                }
            };

            debug!("Job {} finished", job_id);
            // Caller may have stopped waiting; the work is done either way
            let _ = sender.send(result);
        });

        JobHandle { id, receiver }
    }

    /// Schedule one ingestion.
    pub fn ingest(
        &self,
        request: IngestRequest,
    ) -> JobHandle<Result<IngestOutcome, IngestError>> {
        let ingestor = self.ingestor.clone();
        let handle = self.submit(move || ingestor.ingest(&request));
        debug!(
            "Queued ingestion job {} ({} idle worker(s))",
            handle.id(),
            self.available_permits()
        );
        handle
    }
}
