//! Processes that stand in for job types that cannot run

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use super::{JobContext, Process, ProcessError};
use crate::worker::append_log_line;

/// Stand-in for a job type absent from the catalog
///
/// Writes a single line to the job log and fails, so the job ends up FAILED.
#[derive(Debug, Default, Clone, Copy)]
pub struct UndefinedProcess;

#[async_trait]
impl Process for UndefinedProcess {
    async fn run(&self, ctx: &JobContext, _cancel: CancellationToken) -> Result<(), ProcessError> {
        error!(job_id = %ctx.job_id, job_type = %ctx.job_type, "Unknown process type");
        let line = format!("Unknown process type '{}'", ctx.job_type);
        if let Err(e) = append_log_line(&ctx.log_file, &line).await {
            warn!(job_id = %ctx.job_id, error = %e, "Failed to write job log");
        }
        Err(ProcessError::UnknownType(ctx.job_type.clone()))
    }
}

/// Stand-in for a declared job type whose package could not be loaded
#[derive(Debug, Clone)]
pub struct UnloadableProcess {
    reason: String,
}

impl UnloadableProcess {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Process for UnloadableProcess {
    async fn run(&self, ctx: &JobContext, _cancel: CancellationToken) -> Result<(), ProcessError> {
        let line = format!("Failed to load process type '{}': {}", ctx.job_type, self.reason);
        if let Err(e) = append_log_line(&ctx.log_file, &line).await {
            warn!(job_id = %ctx.job_id, error = %e, "Failed to write job log");
        }
        Err(ProcessError::Load(self.reason.clone()))
    }
}
