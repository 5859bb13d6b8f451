//! Dispatcher loop and job execution
//!
//! This module provides:
//! - [`Dispatcher`] - the polling loop: reload, gate, claim, launch, kill, drain
//! - [`JobPool`] - bounded, resizable execution of work units
//! - [`RunningJobRegistry`] - jobs running on this instance, with cancellation
//! - [`VersionGate`] - drain-and-exit for outdated instances
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                        Dispatcher                          │
//! │  ┌────────────┐   ┌─────────────┐   ┌──────────────────┐   │
//! │  │ JobPoller  │   │ VersionGate │   │ DynamicConfig    │   │
//! │  │ (claim)    │   │ (drain)     │   │ (reload / tick)  │   │
//! │  └─────┬──────┘   └─────────────┘   └──────────────────┘   │
//! │        │                                                    │
//! │        ▼                                                    │
//! │  ┌──────────────────────────────────────────────────────┐  │
//! │  │ RunningJobRegistry  (id -> cancel token, task)        │  │
//! │  └──────────────────────────────────────────────────────┘  │
//! │        │                                                    │
//! │        ▼                                                    │
//! │  ┌──────────────────────────────────────────────────────┐  │
//! │  │ JobPool (Semaphore-limited)                           │  │
//! │  │  [JobRun 1] [JobRun 2] ... [JobRun N]                 │  │
//! │  └──────────────────────────────────────────────────────┘  │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use jobdispatch::prelude::*;
//!
//! let queue = Arc::new(PostgresJobQueue::connect_lazy(&settings.database_url, 5)?);
//! let loader = Arc::new(PluginLoader::new(&settings.plugins_dir));
//! let mut dispatcher =
//!     Dispatcher::new(queue, loader, DispatcherOptions::from_settings(&settings)).await?;
//!
//! match dispatcher.run().await {
//!     RunExit::Drained => println!("outdated, exiting"),
//!     RunExit::Shutdown => println!("stopped"),
//! }
//! ```

mod dispatcher;
mod gate;
mod poller;
mod pool;
mod registry;
mod runner;
mod workspace;

pub use dispatcher::{
    Dispatcher, DispatcherError, DispatcherOptions, RunExit, ShutdownHandle, TickOutcome,
};
pub use gate::{GateState, VersionGate, EXECUTOR_VERSION};
pub use poller::JobPoller;
pub use pool::JobPool;
pub use registry::{RunningJobHandle, RunningJobRegistry};
pub use runner::{classify, persist_terminal, JobRun};
pub use workspace::{append_log_line, JobWorkspace};
