//! JobQueue trait definition

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::job::{ClaimedJob, Job, JobState, NewJob};

/// Error type for queue operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Job not found
    #[error("job not found: {0}")]
    JobNotFound(Uuid),

    /// Job is not in `RUNNING` state
    #[error("job is not running: {0}")]
    NotRunning(Uuid),

    /// Terminal update requested with a non-terminal state
    #[error("{0} is not a terminal job state")]
    NotTerminal(JobState),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Stored row could not be decoded
    #[error("corrupt job row: {0}")]
    Corrupt(String),
}

/// Shared job queue
///
/// This trait defines the interface for the relational store that all dispatcher
/// instances poll. Implementations must be thread-safe and, for
/// [`JobQueue::claim_jobs`], must guarantee that no job is handed to two callers.
#[async_trait]
pub trait JobQueue: Send + Sync + 'static {
    // =========================================================================
    // Dispatcher Operations
    // =========================================================================

    /// Claim up to `limit` jobs in `CREATED` state
    ///
    /// Jobs are selected oldest-first by `created`, locked with
    /// `SELECT ... FOR UPDATE SKIP LOCKED`, moved to `RUNNING` with `started` and
    /// `last_modified` set to `now`, and committed before being returned.
    /// The result is ordered by `created` ascending.
    async fn claim_jobs(&self, limit: usize, now: DateTime<Utc>)
        -> Result<Vec<ClaimedJob>, StoreError>;

    /// Persist a terminal state, setting `finished` and `last_modified` to `now`
    async fn finish_job(
        &self,
        job_id: Uuid,
        state: JobState,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Job ids with a pending kill request
    async fn pending_kill_requests(&self) -> Result<Vec<Uuid>, StoreError>;

    /// Acknowledge (delete) the kill request for a job
    ///
    /// Returns whether a request was actually deleted.
    async fn delete_kill_request(&self, job_id: Uuid) -> Result<bool, StoreError>;

    // =========================================================================
    // Submission Operations
    // =========================================================================

    /// Insert a new job in `CREATED` state
    async fn submit_job(&self, job: NewJob) -> Result<Uuid, StoreError>;

    /// Record a kill request for a job
    async fn request_kill(&self, job_id: Uuid) -> Result<(), StoreError>;

    /// Fetch a job record
    async fn get_job(&self, job_id: Uuid) -> Result<Job, StoreError>;
}
