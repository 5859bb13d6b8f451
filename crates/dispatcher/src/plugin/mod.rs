//! Job-type plugins
//!
//! A [`Process`] is the unit of work behind one job type. The dispatcher asks a
//! [`ProcessResolver`] for the process of each claimed job, hands it a
//! [`JobContext`] and a cancellation token, and classifies whatever comes back.
//!
//! [`PluginLoader`] resolves job types against the dynamic catalog and the plugin
//! directory. Types missing from the catalog resolve to [`UndefinedProcess`],
//! which logs and fails instead of aborting the launch.

mod fallback;
mod loader;
mod package;

use std::path::PathBuf;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::job::ClaimedJob;
use crate::worker::JobWorkspace;

pub use fallback::{UndefinedProcess, UnloadableProcess};
pub use loader::{LoadError, PluginLoader, ProcessResolver};
pub use package::PackagedProcess;

/// Everything a plugin gets to see about its job
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: Uuid,
    pub job_type: String,
    /// Opaque payload, passed through unchanged
    pub input_data: String,
    pub log_file: PathBuf,
    pub output_dir: PathBuf,
    /// Auxiliary config; only set when the file exists
    pub config_file: Option<PathBuf>,
    /// Created when cancellation is requested
    pub cancel_marker: PathBuf,
}

impl JobContext {
    pub fn new(job: &ClaimedJob, workspace: JobWorkspace) -> Self {
        Self {
            job_id: job.id,
            job_type: job.job_type.clone(),
            input_data: job.input_data.clone(),
            log_file: workspace.log_file,
            output_dir: workspace.output_dir,
            config_file: workspace.config_file,
            cancel_marker: workspace.cancel_marker,
        }
    }
}

/// Why a process did not complete normally
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("unknown process type '{0}'")]
    UnknownType(String),

    #[error("process could not be loaded: {0}")]
    Load(String),

    #[error("failed to start plugin: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("plugin exited with {0}")]
    Exited(std::process::ExitStatus),

    /// Stopped in response to cancellation
    #[error("plugin interrupted after cancellation")]
    Interrupted,

    #[error("plugin panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Failed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The work behind one job type
///
/// Returning `Ok(())` means the work finished. Implementations should watch
/// `cancel` and return [`ProcessError::Interrupted`] when they stop early because
/// of it; returning `Ok(())` after cancellation is also treated as cancelled.
#[async_trait]
pub trait Process: Send + Sync {
    async fn run(&self, ctx: &JobContext, cancel: CancellationToken) -> Result<(), ProcessError>;
}
