//! # Job Dispatcher
//!
//! A polling dispatcher for a PostgreSQL-backed job queue. Any number of instances
//! share one queue; each claims waiting jobs, runs them through the plugin
//! declared for their type and records how they ended.
//!
//! ## Features
//!
//! - **Contention-free claiming**: `FOR UPDATE SKIP LOCKED` hands each job to exactly one instance
//! - **Plugins per job type**: resolved from a catalog that is reloaded every tick
//! - **Kill requests**: cooperative cancellation of running jobs through the queue
//! - **Version gate**: outdated instances stop claiming, drain and exit
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Dispatcher                            │
//! │  (reload config, gate, claim, launch, kill, drain)          │
//! └─────────────────────────────────────────────────────────────┘
//!          │                                    │
//!          ▼                                    ▼
//! ┌──────────────────────────┐   ┌──────────────────────────────┐
//! │        JobQueue          │   │     ProcessResolver          │
//! │  (PostgreSQL: jobs,      │   │  (catalog + plugin dir ->    │
//! │   job_kill_requests)     │   │   Process)                   │
//! └──────────────────────────┘   └──────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use jobdispatch::prelude::*;
//!
//! let settings = Settings::load(Path::new("dispatcher.env"))?;
//! let queue = Arc::new(PostgresJobQueue::connect_lazy(
//!     &settings.database_url,
//!     settings.database_max_connections,
//! )?);
//! let loader = Arc::new(PluginLoader::new(&settings.plugins_dir));
//!
//! let mut dispatcher =
//!     Dispatcher::new(queue, loader, DispatcherOptions::from_settings(&settings)).await?;
//! dispatcher.run().await;
//! ```

pub mod config;
pub mod job;
pub mod persistence;
pub mod plugin;
pub mod telemetry;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::{DynamicConfig, ExecutorConfig, LogLevel, ProcessDefinition, Settings};
    pub use crate::job::{ClaimedJob, Job, JobState, NewJob};
    pub use crate::persistence::{InMemoryJobQueue, JobQueue, PostgresJobQueue, StoreError};
    pub use crate::plugin::{
        JobContext, LoadError, PluginLoader, Process, ProcessError, ProcessResolver,
    };
    pub use crate::worker::{
        Dispatcher, DispatcherError, DispatcherOptions, GateState, RunExit, ShutdownHandle,
        TickOutcome, EXECUTOR_VERSION,
    };
}

// Re-export key types at crate root
pub use config::{DynamicConfig, DynamicConfigError, Settings, SettingsError};
pub use job::{ClaimedJob, Job, JobState, NewJob};
pub use persistence::{InMemoryJobQueue, JobQueue, PostgresJobQueue, StoreError};
pub use plugin::{JobContext, LoadError, PluginLoader, Process, ProcessError, ProcessResolver};
pub use worker::{
    Dispatcher, DispatcherError, DispatcherOptions, GateState, RunExit, ShutdownHandle,
    TickOutcome, EXECUTOR_VERSION,
};
