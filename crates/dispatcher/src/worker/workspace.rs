//! Per-job working locations
//!
//! Everything lives under `<jobs_dir>/<job id>/`:
//!
//! ```text
//! <job id>/
//!   job.log      plugin log, also receives dispatcher-side failure lines
//!   output/      plugin output directory
//!   job.config   optional auxiliary config, passed only if present
//!   cancel       created when cancellation is requested
//! ```

use std::io;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use uuid::Uuid;

const LOG_FILE: &str = "job.log";
const OUTPUT_DIR: &str = "output";
const CONFIG_FILE: &str = "job.config";
const CANCEL_MARKER: &str = "cancel";

/// Working locations of one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobWorkspace {
    pub root: PathBuf,
    pub log_file: PathBuf,
    pub output_dir: PathBuf,
    pub config_file: Option<PathBuf>,
    pub cancel_marker: PathBuf,
}

impl JobWorkspace {
    /// Derive the locations for `job_id` without touching the filesystem
    pub fn locate(jobs_dir: &Path, job_id: Uuid) -> Self {
        let root = jobs_dir.join(job_id.to_string());
        Self {
            log_file: root.join(LOG_FILE),
            output_dir: root.join(OUTPUT_DIR),
            config_file: Some(root.join(CONFIG_FILE)),
            cancel_marker: root.join(CANCEL_MARKER),
            root,
        }
    }

    /// Create the job directory, output directory and log file
    ///
    /// `config_file` is kept only when the file already exists; a leftover cancel
    /// marker from an earlier run is removed.
    pub async fn prepare(jobs_dir: &Path, job_id: Uuid) -> io::Result<Self> {
        let mut workspace = Self::locate(jobs_dir, job_id);

        tokio::fs::create_dir_all(&workspace.output_dir).await?;
        tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&workspace.log_file)
            .await?;

        if let Some(config_file) = &workspace.config_file {
            if !tokio::fs::try_exists(config_file).await.unwrap_or(false) {
                workspace.config_file = None;
            }
        }

        match tokio::fs::remove_file(&workspace.cancel_marker).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        Ok(workspace)
    }
}

/// Append one line to a job log
pub async fn append_log_line(log_file: &Path, line: &str) -> io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.write_all(b"\n").await?;
    file.flush().await
}
