//! Wharf Core - Foundational Types and Abstractions
//!
//! This crate provides the types shared across the Wharf build
//! subsystem: the error taxonomy, configuration, the build job model
//! and the durable upload queue.

pub mod config;
pub mod error;
pub mod job;
pub mod queue;

// Re-export commonly used types
pub use config::{BuildEnvironment, WharfConfig};
pub use error::{Result, WharfError};
pub use job::{BuildJob, FileRef, UploadType};
pub use queue::{DeliveryHandle, DurableQueue, JobRecord, JobStore, MemoryJobStore, QueueOptions};

/// Wharf version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
