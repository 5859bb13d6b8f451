//! Plugin packages run as child processes
//!
//! Invocation contract:
//!
//! - command line: `<package> <entry_point>`, working directory = output dir
//! - environment cleared except `PATH`, plus `JOB_ID`, `JOB_TYPE`, `JOB_LOG_FILE`,
//!   `JOB_OUTPUT_DIR`, `JOB_CANCEL_FILE` and, when present, `JOB_CONFIG_FILE`
//! - stdin carries the job input; stdout and stderr are appended to the job log
//! - exit status 0 means the work finished
//!
//! On cancellation the cancel marker file is created. A plugin that exits within
//! the grace period is classified by its exit status; otherwise it is killed.

use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{JobContext, Process, ProcessError};

/// `ETXTBSY`: the package file is still open for writing somewhere
#[cfg(unix)]
const TEXT_FILE_BUSY: i32 = 26;
const SPAWN_ATTEMPTS: u32 = 5;
const SPAWN_RETRY_DELAY: Duration = Duration::from_millis(50);

/// A job type backed by an executable package
#[derive(Debug, Clone)]
pub struct PackagedProcess {
    package: PathBuf,
    entry_point: String,
    grace_period: Duration,
}

impl PackagedProcess {
    pub fn new(package: PathBuf, entry_point: String, grace_period: Duration) -> Self {
        Self {
            package,
            entry_point,
            grace_period,
        }
    }

    fn command(&self, ctx: &JobContext) -> io::Result<Command> {
        let log = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&ctx.log_file)?;

        let mut command = Command::new(&self.package);
        command
            .arg(&self.entry_point)
            .current_dir(&ctx.output_dir)
            .env_clear()
            .env("JOB_ID", ctx.job_id.to_string())
            .env("JOB_TYPE", &ctx.job_type)
            .env("JOB_LOG_FILE", &ctx.log_file)
            .env("JOB_OUTPUT_DIR", &ctx.output_dir)
            .env("JOB_CANCEL_FILE", &ctx.cancel_marker)
            .stdin(Stdio::piped())
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log))
            .kill_on_drop(true);
        if let Some(path) = std::env::var_os("PATH") {
            command.env("PATH", path);
        }
        if let Some(config_file) = &ctx.config_file {
            command.env("JOB_CONFIG_FILE", config_file);
        }
        Ok(command)
    }

    async fn interrupt(&self, child: &mut Child, ctx: &JobContext) -> Result<(), ProcessError> {
        info!(job_id = %ctx.job_id, "Cancellation requested, signalling plugin");
        if let Err(e) = tokio::fs::write(&ctx.cancel_marker, b"").await {
            warn!(job_id = %ctx.job_id, error = %e, "Failed to create cancel marker");
        }

        match tokio::time::timeout(self.grace_period, child.wait()).await {
            Ok(status) => exit_result(status?),
            Err(_) => {
                warn!(
                    job_id = %ctx.job_id,
                    grace_period_secs = self.grace_period.as_secs(),
                    "Plugin ignored cancellation, killing it"
                );
                child.kill().await?;
                Err(ProcessError::Interrupted)
            }
        }
    }
}

#[async_trait]
impl Process for PackagedProcess {
    async fn run(&self, ctx: &JobContext, cancel: CancellationToken) -> Result<(), ProcessError> {
        if cancel.is_cancelled() {
            return Err(ProcessError::Interrupted);
        }

        let mut command = self.command(ctx)?;
        let mut child = spawn(&mut command).await.map_err(ProcessError::Spawn)?;
        debug!(job_id = %ctx.job_id, pid = ?child.id(), "Plugin started");

        if let Some(mut stdin) = child.stdin.take() {
            let input = ctx.input_data.clone();
            tokio::spawn(async move {
                // A plugin that never reads stdin closes the pipe early
                let _ = stdin.write_all(input.as_bytes()).await;
            });
        }

        let finished = tokio::select! {
            status = child.wait() => Some(status),
            _ = cancel.cancelled() => None,
        };
        match finished {
            Some(status) => exit_result(status?),
            None => self.interrupt(&mut child, ctx).await,
        }
    }
}

fn exit_result(status: ExitStatus) -> Result<(), ProcessError> {
    if status.success() {
        Ok(())
    } else {
        Err(ProcessError::Exited(status))
    }
}

async fn spawn(command: &mut Command) -> io::Result<Child> {
    let mut attempt = 1;
    loop {
        match command.spawn() {
            #[cfg(unix)]
            Err(e) if e.raw_os_error() == Some(TEXT_FILE_BUSY) && attempt < SPAWN_ATTEMPTS => {
                attempt += 1;
                tokio::time::sleep(SPAWN_RETRY_DELAY).await;
            }
            result => return result,
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    use uuid::Uuid;

    use super::*;
    use crate::worker::JobWorkspace;

    fn write_plugin(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("test.plugin");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    async fn context(dir: &Path, input: &str) -> JobContext {
        let id = Uuid::now_v7();
        let workspace = JobWorkspace::prepare(&dir.join("jobs"), id).await.unwrap();
        JobContext {
            job_id: id,
            job_type: "test".to_string(),
            input_data: input.to_string(),
            log_file: workspace.log_file,
            output_dir: workspace.output_dir,
            config_file: workspace.config_file,
            cancel_marker: workspace.cancel_marker,
        }
    }

    fn process(package: PathBuf, grace: Duration) -> PackagedProcess {
        PackagedProcess::new(package, "run".to_string(), grace)
    }

    #[tokio::test]
    async fn test_successful_plugin_sees_contract() {
        let dir = tempfile::tempdir().unwrap();
        let package = write_plugin(
            dir.path(),
            r#"echo "entry=$1 type=$JOB_TYPE id=$JOB_ID"
read -r line
echo "input=$line"
pwd > result.txt"#,
        );
        let ctx = context(dir.path(), "{\"a\":1}\n").await;

        let result = process(package, Duration::from_secs(5))
            .run(&ctx, CancellationToken::new())
            .await;

        assert!(result.is_ok(), "{:?}", result);
        let log = std::fs::read_to_string(&ctx.log_file).unwrap();
        assert!(log.contains(&format!("entry=run type=test id={}", ctx.job_id)));
        assert!(log.contains("input={\"a\":1}"));
        assert!(ctx.output_dir.join("result.txt").exists());
    }

    #[tokio::test]
    async fn test_non_zero_exit_fails() {
        let dir = tempfile::tempdir().unwrap();
        let package = write_plugin(dir.path(), "echo boom >&2\nexit 3");
        let ctx = context(dir.path(), "").await;

        let result = process(package, Duration::from_secs(5))
            .run(&ctx, CancellationToken::new())
            .await;

        match result {
            Err(ProcessError::Exited(status)) => assert_eq!(status.code(), Some(3)),
            other => panic!("expected Exited, got {:?}", other),
        }
        assert!(std::fs::read_to_string(&ctx.log_file)
            .unwrap()
            .contains("boom"));
    }

    #[tokio::test]
    async fn test_cooperative_plugin_exits_on_marker() {
        let dir = tempfile::tempdir().unwrap();
        let package = write_plugin(
            dir.path(),
            r#"while [ ! -e "$JOB_CANCEL_FILE" ]; do sleep 0.05; done
exit 0"#,
        );
        let ctx = context(dir.path(), "").await;
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let result = process(package, Duration::from_secs(10)).run(&ctx, cancel).await;
        assert!(result.is_ok(), "{:?}", result);
        assert!(ctx.cancel_marker.exists());
    }

    #[tokio::test]
    async fn test_stubborn_plugin_is_killed_after_grace_period() {
        let dir = tempfile::tempdir().unwrap();
        let package = write_plugin(dir.path(), "exec sleep 30");
        let ctx = context(dir.path(), "").await;
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result = process(package, Duration::from_millis(200))
            .run(&ctx, cancel)
            .await;

        assert!(matches!(result, Err(ProcessError::Interrupted)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), "").await;

        let result = process(dir.path().join("absent.plugin"), Duration::from_secs(1))
            .run(&ctx, CancellationToken::new())
            .await;

        assert!(matches!(result, Err(ProcessError::Spawn(_))));
    }
}
