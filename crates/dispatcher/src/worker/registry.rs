//! In-memory set of jobs running on this instance

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

/// Handle to one running job
#[derive(Debug)]
pub struct RunningJobHandle {
    pub job_id: Uuid,
    pub job_type: String,
    pub launched_at: DateTime<Utc>,
    cancel: CancellationToken,
    task: Option<AbortHandle>,
}

/// Jobs launched here whose terminal state has not been persisted yet
///
/// The registry is the only source for kill targets and capacity accounting.
/// Entries are added before the work unit is spawned and removed by the work unit
/// after its terminal state is written.
#[derive(Debug, Clone, Default)]
pub struct RunningJobRegistry {
    jobs: Arc<DashMap<Uuid, RunningJobHandle>>,
}

impl RunningJobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a job and return its cancellation token
    pub fn register(&self, job_id: Uuid, job_type: &str) -> CancellationToken {
        let cancel = CancellationToken::new();
        self.jobs.insert(
            job_id,
            RunningJobHandle {
                job_id,
                job_type: job_type.to_string(),
                launched_at: Utc::now(),
                cancel: cancel.clone(),
                task: None,
            },
        );
        cancel
    }

    /// Remember the task running the job, for forced shutdown
    ///
    /// Returns `false` if the job already left the registry.
    pub fn attach_task(&self, job_id: Uuid, task: AbortHandle) -> bool {
        match self.jobs.get_mut(&job_id) {
            Some(mut handle) => {
                handle.task = Some(task);
                true
            }
            None => false,
        }
    }

    /// Signal cancellation to a job running here
    ///
    /// Returns `false` if the job is not in the registry.
    pub fn cancel(&self, job_id: Uuid) -> bool {
        match self.jobs.get(&job_id) {
            Some(handle) => {
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Signal cancellation to every running job
    pub fn cancel_all(&self) -> usize {
        let mut cancelled = 0;
        for entry in self.jobs.iter() {
            entry.cancel.cancel();
            cancelled += 1;
        }
        cancelled
    }

    /// Abort every running task and clear the registry
    ///
    /// Returns the ids of the aborted jobs. Their terminal state is left to the
    /// caller.
    pub fn abort_all(&self) -> Vec<Uuid> {
        let ids: Vec<Uuid> = self.jobs.iter().map(|entry| *entry.key()).collect();
        let mut aborted = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some((_, handle)) = self.jobs.remove(&id) {
                warn!(
                    job_id = %handle.job_id,
                    job_type = %handle.job_type,
                    running_secs = (Utc::now() - handle.launched_at).num_seconds(),
                    "Aborting job"
                );
                if let Some(task) = handle.task {
                    task.abort();
                }
                aborted.push(id);
            }
        }
        aborted
    }

    pub fn remove(&self, job_id: Uuid) -> Option<RunningJobHandle> {
        self.jobs.remove(&job_id).map(|(_, handle)| handle)
    }

    #[cfg(test)]
    fn contains(&self, job_id: Uuid) -> bool {
        self.jobs.contains_key(&job_id)
    }

    #[cfg(test)]
    fn is_cancelled(&self, job_id: Uuid) -> Option<bool> {
        self.jobs.get(&job_id).map(|handle| handle.cancel.is_cancelled())
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Removes a job from the registry when dropped
///
/// Held by the work unit so the entry goes away even if the unit is aborted.
pub(crate) struct RegistryGuard {
    registry: RunningJobRegistry,
    job_id: Uuid,
}

impl RegistryGuard {
    pub(crate) fn new(registry: RunningJobRegistry, job_id: Uuid) -> Self {
        Self { registry, job_id }
    }
}

impl Drop for RegistryGuard {
    fn drop(&mut self) {
        self.registry.remove(self.job_id);
    }
}
