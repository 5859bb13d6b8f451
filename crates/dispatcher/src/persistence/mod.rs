//! Persistence layer for the shared job queue
//!
//! This module provides:
//! - [`JobQueue`] trait for claiming, finishing and signalling jobs
//! - [`PostgresJobQueue`] for production
//! - [`InMemoryJobQueue`] for testing

mod memory;
mod postgres;
mod store;

pub use memory::InMemoryJobQueue;
pub use postgres::PostgresJobQueue;
pub use store::{JobQueue, StoreError};
