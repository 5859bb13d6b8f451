//! Work unit: run one job's process and persist how it ended

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::registry::{RegistryGuard, RunningJobRegistry};
use crate::job::JobState;
use crate::persistence::{JobQueue, StoreError};
use crate::plugin::{JobContext, Process, ProcessError};

const PERSIST_ATTEMPTS: u32 = 3;
const PERSIST_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Terminal state for a finished process
///
/// | outcome                          | state     |
/// |----------------------------------|-----------|
/// | `Ok`, not cancelled              | COMPLETED |
/// | `Ok`, cancelled                  | CANCELED  |
/// | [`ProcessError::Interrupted`]    | CANCELED  |
/// | any other error, including panic | FAILED    |
pub fn classify(result: &Result<(), ProcessError>, cancelled: bool) -> JobState {
    match result {
        Ok(()) if cancelled => JobState::Canceled,
        Ok(()) => JobState::Completed,
        Err(ProcessError::Interrupted) => JobState::Canceled,
        Err(_) => JobState::Failed,
    }
}

/// Write a terminal state, retrying transient failures
///
/// Gives up after a fixed number of attempts and leaves the row RUNNING. A row
/// that already left RUNNING is not retried.
pub async fn persist_terminal(queue: &dyn JobQueue, job_id: Uuid, state: JobState) -> bool {
    let now = Utc::now();
    for attempt in 1..=PERSIST_ATTEMPTS {
        match queue.finish_job(job_id, state, now).await {
            Ok(()) => return true,
            Err(StoreError::NotRunning(_)) => {
                debug!(%job_id, %state, "Job already in a terminal state");
                return false;
            }
            Err(e) if attempt < PERSIST_ATTEMPTS => {
                warn!(%job_id, %state, attempt, error = %e, "Failed to persist job state, retrying");
                tokio::time::sleep(PERSIST_RETRY_DELAY).await;
            }
            Err(e) => {
                error!(%job_id, %state, error = %e, "Giving up persisting job state");
            }
        }
    }
    false
}

/// One launched job
pub struct JobRun {
    pub queue: Arc<dyn JobQueue>,
    pub registry: RunningJobRegistry,
    pub process: Arc<dyn Process>,
    pub context: JobContext,
    pub cancel: CancellationToken,
}

impl JobRun {
    /// Run the process, classify the outcome and persist it
    ///
    /// The registry entry is removed after the terminal write, or when the unit
    /// is aborted.
    pub async fn execute(self) {
        let job_id = self.context.job_id;
        let _registered = RegistryGuard::new(self.registry.clone(), job_id);
        info!(%job_id, job_type = %self.context.job_type, "Job started");

        let result = AssertUnwindSafe(self.process.run(&self.context, self.cancel.clone()))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(ProcessError::Panicked(panic_message(panic.as_ref()))));

        let state = classify(&result, self.cancel.is_cancelled());
        match &result {
            Ok(()) => info!(%job_id, %state, "Job finished"),
            Err(e) => warn!(%job_id, %state, error = %e, "Job did not complete"),
        }

        persist_terminal(self.queue.as_ref(), job_id, state).await;
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
