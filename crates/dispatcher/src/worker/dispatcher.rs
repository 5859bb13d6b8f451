//! The polling loop
//!
//! Each tick:
//!
//! 1. reload the dynamic configuration (keep the previous one on failure)
//! 2. evaluate the version gate
//! 3. if accepting, claim up to the free slots and launch each job
//! 4. cancel running jobs that have a pending kill request
//! 5. exit if draining and nothing is running
//!
//! then sleep for the polling interval. Queue failures are logged and retried on
//! the next tick.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use super::gate::{GateState, VersionGate, EXECUTOR_VERSION};
use super::poller::JobPoller;
use super::pool::JobPool;
use super::registry::RunningJobRegistry;
use super::runner::{persist_terminal, JobRun};
use super::workspace::JobWorkspace;
use crate::config::{DynamicConfig, DynamicConfigError, Settings};
use crate::job::{ClaimedJob, JobState};
use crate::persistence::JobQueue;
use crate::plugin::{JobContext, Process, ProcessResolver, UnloadableProcess};
use crate::telemetry::LogLevelControl;

const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Dispatcher errors
#[derive(Debug, thiserror::Error)]
pub enum DispatcherError {
    /// The initial dynamic configuration could not be loaded
    #[error("startup configuration error: {0}")]
    Config(#[from] DynamicConfigError),
}

/// What a tick decided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    /// Draining finished; the process should exit
    Exit,
}

/// Why [`Dispatcher::run`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// Outdated version, all running jobs finished
    Drained,
    /// Shutdown was requested
    Shutdown,
}

/// Dispatcher options
#[derive(Debug, Clone)]
pub struct DispatcherOptions {
    pub dynamic_config_file: PathBuf,
    pub jobs_dir: PathBuf,
    /// Version compared against `min_supported_version`
    pub local_version: u32,
    /// How long shutdown waits for cancelled jobs before aborting them
    pub shutdown_timeout: Duration,
}

impl DispatcherOptions {
    pub fn new(dynamic_config_file: impl Into<PathBuf>, jobs_dir: impl Into<PathBuf>) -> Self {
        Self {
            dynamic_config_file: dynamic_config_file.into(),
            jobs_dir: jobs_dir.into(),
            local_version: EXECUTOR_VERSION,
            shutdown_timeout: Duration::from_secs(30),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(&settings.dynamic_config_file, &settings.jobs_dir)
            .with_shutdown_timeout(settings.shutdown_timeout)
    }

    pub fn with_local_version(mut self, version: u32) -> Self {
        self.local_version = version;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Requests a graceful shutdown of a running [`Dispatcher`]
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

/// Polling job dispatcher
///
/// One instance runs one loop; any number of instances may share a queue.
pub struct Dispatcher {
    queue: Arc<dyn JobQueue>,
    resolver: Arc<dyn ProcessResolver>,
    poller: JobPoller,
    pool: JobPool,
    registry: RunningJobRegistry,
    gate: VersionGate,
    config: Arc<DynamicConfig>,
    options: DispatcherOptions,
    log_control: Option<LogLevelControl>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl Dispatcher {
    /// Create a dispatcher
    ///
    /// The first configuration load must succeed; later reload failures only
    /// keep the previous configuration.
    pub async fn new(
        queue: Arc<dyn JobQueue>,
        resolver: Arc<dyn ProcessResolver>,
        options: DispatcherOptions,
    ) -> Result<Self, DispatcherError> {
        let config = DynamicConfig::load(&options.dynamic_config_file).await?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(
            local_version = options.local_version,
            max_concurrent_jobs = config.executor_config.max_concurrent_jobs,
            polling_interval_secs = config.executor_config.polling_interval.as_secs(),
            job_types = config.processes.len(),
            "Dispatcher configured"
        );

        Ok(Self {
            poller: JobPoller::new(Arc::clone(&queue), shutdown_rx),
            pool: JobPool::new(config.executor_config.max_concurrent_jobs),
            registry: RunningJobRegistry::new(),
            gate: VersionGate::new(options.local_version),
            config: Arc::new(config),
            queue,
            resolver,
            options,
            log_control: None,
            shutdown_tx: Arc::new(shutdown_tx),
        })
    }

    /// Apply `executor_config.log_level` through this control on every reload
    pub fn with_log_control(mut self, control: LogLevelControl) -> Self {
        control.apply(self.config.executor_config.log_level);
        self.log_control = Some(control);
        self
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: Arc::clone(&self.shutdown_tx),
        }
    }

    pub fn registry(&self) -> &RunningJobRegistry {
        &self.registry
    }

    pub fn gate_state(&self) -> GateState {
        self.gate.state()
    }

    pub fn config(&self) -> &DynamicConfig {
        &self.config
    }

    /// Tick until drained or shut down
    pub async fn run(&mut self) -> RunExit {
        info!("Dispatcher started");
        loop {
            if self.tick().await == TickOutcome::Exit {
                info!("Dispatcher drained, exiting");
                return RunExit::Drained;
            }
            if self
                .poller
                .wait(self.config.executor_config.polling_interval)
                .await
            {
                self.shutdown().await;
                return RunExit::Shutdown;
            }
        }
    }

    /// Run one iteration of the loop
    #[instrument(skip(self), fields(running = self.registry.len()))]
    pub async fn tick(&mut self) -> TickOutcome {
        self.reload_config().await;

        let min_supported = self.config.executor_config.min_supported_version;
        if self.gate.observe(min_supported) == GateState::Accepting {
            self.claim_and_launch().await;
        } else {
            debug!(running = self.registry.len(), "Draining, not claiming");
        }

        self.process_kill_requests().await;

        if self.gate.should_exit(self.registry.len()) {
            return TickOutcome::Exit;
        }
        TickOutcome::Continue
    }

    /// Cancel every running job, wait for them, abort the rest at the timeout
    ///
    /// Aborted jobs are recorded as CANCELED so no row is left RUNNING.
    pub async fn shutdown(&mut self) {
        let _ = self.shutdown_tx.send(true);
        let cancelled = self.registry.cancel_all();
        info!(cancelled, "Shutting down, waiting for running jobs");

        let deadline = tokio::time::Instant::now() + self.options.shutdown_timeout;
        while !self.registry.is_empty() {
            if tokio::time::Instant::now() >= deadline {
                let aborted = self.registry.abort_all();
                warn!(
                    aborted = aborted.len(),
                    "Shutdown timeout reached, aborting remaining jobs"
                );
                for job_id in aborted {
                    persist_terminal(self.queue.as_ref(), job_id, JobState::Canceled).await;
                }
                break;
            }
            tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
        }
        info!("Dispatcher stopped");
    }

    async fn reload_config(&mut self) {
        match DynamicConfig::load(&self.options.dynamic_config_file).await {
            Ok(config) => self.apply_config(config),
            Err(e) => warn!(error = %e, "Failed to reload dynamic config, keeping previous"),
        }
    }

    fn apply_config(&mut self, config: DynamicConfig) {
        if config == *self.config {
            return;
        }

        let executor = &config.executor_config;
        info!(
            min_supported_version = executor.min_supported_version,
            max_concurrent_jobs = executor.max_concurrent_jobs,
            polling_interval_secs = executor.polling_interval.as_secs(),
            log_level = ?executor.log_level,
            job_types = config.processes.len(),
            "Dynamic config changed"
        );
        self.pool.resize(executor.max_concurrent_jobs);
        if let Some(control) = &self.log_control {
            control.apply(executor.log_level);
        }
        self.config = Arc::new(config);
    }

    async fn claim_and_launch(&mut self) {
        let max = self.config.executor_config.max_concurrent_jobs;
        let running = self.registry.len();
        let available = max.saturating_sub(running);
        debug!(running, max, "Checking for new jobs");
        if available == 0 {
            return;
        }

        let jobs = match self.poller.claim(available).await {
            Ok(jobs) => jobs,
            Err(e) => {
                error!(error = %e, "Failed to claim jobs");
                return;
            }
        };
        for job in jobs {
            self.launch(job).await;
        }
    }

    async fn launch(&self, job: ClaimedJob) {
        let workspace = match JobWorkspace::prepare(&self.options.jobs_dir, job.id).await {
            Ok(workspace) => workspace,
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Failed to prepare job workspace");
                persist_terminal(self.queue.as_ref(), job.id, JobState::Failed).await;
                return;
            }
        };

        let process: Arc<dyn Process> =
            match self.resolver.resolve(&job.job_type, &self.config).await {
                Ok(process) => process,
                Err(e) => {
                    error!(job_id = %job.id, job_type = %job.job_type, error = %e, "Failed to load process");
                    Arc::new(UnloadableProcess::new(e.to_string()))
                }
            };

        info!(job_id = %job.id, job_type = %job.job_type, "Launching job");
        let cancel = self.registry.register(job.id, &job.job_type);
        let run = JobRun {
            queue: Arc::clone(&self.queue),
            registry: self.registry.clone(),
            process,
            context: JobContext::new(&job, workspace),
            cancel,
        };
        let task = self.pool.spawn(run.execute());
        self.registry.attach_task(job.id, task.abort_handle());
    }

    async fn process_kill_requests(&self) {
        let pending = match self.queue.pending_kill_requests().await {
            Ok(pending) => pending,
            Err(e) => {
                error!(error = %e, "Failed to read kill requests");
                return;
            }
        };

        for job_id in pending {
            if !self.registry.cancel(job_id) {
                debug!(%job_id, "Kill request for a job not running here");
                continue;
            }
            info!(%job_id, "Cancelling job on request");
            if let Err(e) = self.queue.delete_kill_request(job_id).await {
                error!(%job_id, error = %e, "Failed to delete kill request");
            }
        }
    }
}
