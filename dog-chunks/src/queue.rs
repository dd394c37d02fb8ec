use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::merge::MergeRequest;
use crate::{ChunkError, ChunkEvent, ChunkManager, ChunkResult};

/// Unique identifier for a queued merge
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job execution outcome - determines retry behavior
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// Retryable error - will schedule retry if attempts remain
    #[error("Retryable error: {0}")]
    Retryable(String),

    /// Permanent error - fail immediately, no retry
    #[error("Permanent error: {0}")]
    Permanent(String),
}

impl JobError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Retryable(msg) | Self::Permanent(msg) => msg,
        }
    }
}

impl From<&ChunkError> for JobError {
    fn from(err: &ChunkError) -> Self {
        if err.is_retryable() {
            Self::Retryable(err.to_string())
        } else {
            Self::Permanent(err.to_string())
        }
    }
}

/// Retry policy for deferred merges
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl QueueConfig {
    /// Exponential backoff before retry number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

/// Merge of one session, runnable inline or on a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeChunksJob {
    pub id: JobId,
    pub request: MergeRequest,
}

impl MergeChunksJob {
    /// Job type identifier for dispatch
    pub const JOB_TYPE: &'static str = "dog_chunks.merge";

    pub fn new(request: MergeRequest) -> Self {
        Self {
            id: JobId::new(),
            request,
        }
    }

    /// Run the merge with the manager that owns the session
    pub async fn execute(&self, manager: &ChunkManager) -> ChunkResult<String> {
        manager.merge(&self.request).await
    }
}

/// Where merges go when they should not run inline
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Defer `job` to `queue` on `connection`
    async fn dispatch(
        &self,
        job: MergeChunksJob,
        manager: ChunkManager,
        connection: &str,
        queue: &str,
    ) -> ChunkResult<JobId>;

    /// Run `job` right away
    async fn dispatch_now(
        &self,
        job: MergeChunksJob,
        manager: ChunkManager,
    ) -> ChunkResult<String> {
        job.execute(&manager).await
    }
}

struct Envelope {
    job: MergeChunksJob,
    manager: ChunkManager,
}

/// In-process queue: one worker task per `connection/queue`, jobs run in
/// dispatch order, retryable failures are retried with exponential backoff.
#[derive(Clone, Default)]
pub struct TokioWorkQueue {
    config: QueueConfig,
    workers: Arc<DashMap<String, mpsc::UnboundedSender<Envelope>>>,
}

impl TokioWorkQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            workers: Arc::new(DashMap::new()),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    fn sender(&self, key: &str) -> mpsc::UnboundedSender<Envelope> {
        self.workers
            .entry(key.to_string())
            .or_insert_with(|| {
                let (tx, rx) = mpsc::unbounded_channel();
                tokio::spawn(run_worker(key.to_string(), rx, self.config.clone()));
                tx
            })
            .clone()
    }
}

#[async_trait]
impl WorkQueue for TokioWorkQueue {
    #[instrument(
        skip(self, job, manager),
        fields(job_id = %job.id, job_type = MergeChunksJob::JOB_TYPE)
    )]
    async fn dispatch(
        &self,
        job: MergeChunksJob,
        manager: ChunkManager,
        connection: &str,
        queue: &str,
    ) -> ChunkResult<JobId> {
        let key = format!("{}/{}", connection, queue);
        let id = job.id.clone();
        let envelope = Envelope { job, manager };

        if let Err(mpsc::error::SendError(envelope)) = self.sender(&key).send(envelope) {
            // Worker is gone; start a new one and hand the job over
            self.workers.remove(&key);
            self.sender(&key).send(envelope).map_err(|_| {
                ChunkError::configuration(format!("merge queue '{}' is not accepting jobs", key))
            })?;
        }

        debug!(queue = %key, "merge job enqueued");
        Ok(id)
    }
}

async fn run_worker(key: String, mut jobs: mpsc::UnboundedReceiver<Envelope>, config: QueueConfig) {
    debug!(queue = %key, "merge worker started");
    while let Some(Envelope { job, manager }) = jobs.recv().await {
        run_job(&job, &manager, &config).await;
    }
    debug!(queue = %key, "merge worker stopped");
}

#[instrument(skip_all, fields(job_id = %job.id, folder = %job.request.folder))]
async fn run_job(job: &MergeChunksJob, manager: &ChunkManager, config: &QueueConfig) {
    let mut attempt = 0u32;
    loop {
        match job.execute(manager).await {
            Ok(destination) => {
                info!(destination = %destination, attempts = attempt + 1, "merge job completed");
                return;
            }
            Err(err) => {
                let outcome = JobError::from(&err);
                if outcome.is_retryable() && attempt < config.max_retries {
                    attempt += 1;
                    let delay = config.backoff(attempt);
                    warn!(
                        error = %err,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "merge job failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }

                error!(error = %err, attempts = attempt + 1, "merge job failed");
                manager.events().emit(ChunkEvent::merge_failed(
                    &job.request.folder,
                    &job.request.destination,
                    outcome.message(),
                ));
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let config = QueueConfig {
            max_retries: 5,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
        };
        assert_eq!(config.backoff(1), Duration::from_millis(100));
        assert_eq!(config.backoff(2), Duration::from_millis(200));
        assert_eq!(config.backoff(3), Duration::from_millis(400));
        assert_eq!(config.backoff(4), Duration::from_millis(500));
    }

    #[test]
    fn integrity_failures_are_permanent() {
        let permanent = JobError::from(&ChunkError::integrity("short session"));
        assert!(!permanent.is_retryable());

        let transient = JobError::from(&ChunkError::from(std::io::Error::new(
            std::io::ErrorKind::Other,
            "connection reset",
        )));
        assert!(transient.is_retryable());
    }
}
