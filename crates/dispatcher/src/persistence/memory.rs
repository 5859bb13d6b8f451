//! In-memory implementation of JobQueue for testing

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use super::store::*;
use crate::job::{ClaimedJob, Job, JobState, NewJob};

#[derive(Default)]
struct QueueState {
    jobs: HashMap<Uuid, Job>,
    kill_requests: HashSet<Uuid>,
}

/// In-memory implementation of JobQueue
///
/// A single mutex stands in for the row locks of the PostgreSQL implementation:
/// a claim selects and transitions its jobs under the lock, so concurrent
/// claimants never observe the same `CREATED` job.
///
/// # Example
///
/// ```
/// use jobdispatch::InMemoryJobQueue;
///
/// let queue = InMemoryJobQueue::new();
/// assert_eq!(queue.job_count(), 0);
/// ```
pub struct InMemoryJobQueue {
    state: Mutex<QueueState>,
    unavailable: AtomicBool,
}

impl InMemoryJobQueue {
    /// Create a new empty queue
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Insert a `CREATED` job with an explicit creation time
    pub fn insert_created(&self, job_type: &str, input_data: &str, created: DateTime<Utc>) -> Uuid {
        let id = Uuid::now_v7();
        self.state.lock().jobs.insert(
            id,
            Job {
                id,
                job_type: job_type.to_string(),
                input_data: input_data.to_string(),
                state: JobState::Created,
                created,
                started: None,
                finished: None,
                last_modified: created,
            },
        );
        id
    }

    /// Get the number of jobs
    pub fn job_count(&self) -> usize {
        self.state.lock().jobs.len()
    }

    /// Get the number of jobs in the given state
    pub fn count_in_state(&self, state: JobState) -> usize {
        self.state
            .lock()
            .jobs
            .values()
            .filter(|j| j.state == state)
            .count()
    }

    /// Whether a kill request is pending for the job
    pub fn has_kill_request(&self, job_id: Uuid) -> bool {
        self.state.lock().kill_requests.contains(&job_id)
    }

    /// Make every operation fail with a database error (for testing outages)
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Database("connection refused".to_string()));
        }
        Ok(())
    }
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn claim_jobs(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<ClaimedJob>, StoreError> {
        self.check_available()?;

        let mut state = self.state.lock();
        let mut candidates: Vec<&mut Job> = state
            .jobs
            .values_mut()
            .filter(|j| j.state == JobState::Created)
            .collect();
        candidates.sort_by_key(|j| (j.created, j.id));

        Ok(candidates
            .into_iter()
            .take(limit)
            .map(|job| {
                job.state = JobState::Running;
                job.started = Some(now);
                job.last_modified = now;
                ClaimedJob {
                    id: job.id,
                    job_type: job.job_type.clone(),
                    input_data: job.input_data.clone(),
                    created: job.created,
                    started: now,
                }
            })
            .collect())
    }

    async fn finish_job(
        &self,
        job_id: Uuid,
        state: JobState,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        if !state.is_terminal() {
            return Err(StoreError::NotTerminal(state));
        }

        let mut queue = self.state.lock();
        let job = queue
            .jobs
            .get_mut(&job_id)
            .ok_or(StoreError::JobNotFound(job_id))?;
        if job.state != JobState::Running {
            return Err(StoreError::NotRunning(job_id));
        }

        job.state = state;
        job.finished = Some(now);
        job.last_modified = now;
        Ok(())
    }

    async fn pending_kill_requests(&self) -> Result<Vec<Uuid>, StoreError> {
        self.check_available()?;
        Ok(self.state.lock().kill_requests.iter().copied().collect())
    }

    async fn delete_kill_request(&self, job_id: Uuid) -> Result<bool, StoreError> {
        self.check_available()?;
        Ok(self.state.lock().kill_requests.remove(&job_id))
    }

    async fn submit_job(&self, job: NewJob) -> Result<Uuid, StoreError> {
        self.check_available()?;
        Ok(self.insert_created(&job.job_type, &job.input_data, Utc::now()))
    }

    async fn request_kill(&self, job_id: Uuid) -> Result<(), StoreError> {
        self.check_available()?;
        let mut state = self.state.lock();
        if !state.jobs.contains_key(&job_id) {
            return Err(StoreError::JobNotFound(job_id));
        }
        state.kill_requests.insert(job_id);
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Job, StoreError> {
        self.check_available()?;
        self.state
            .lock()
            .jobs
            .get(&job_id)
            .cloned()
            .ok_or(StoreError::JobNotFound(job_id))
    }
}
