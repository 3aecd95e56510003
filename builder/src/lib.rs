//! Wharf Builder - Asynchronous Model Build Subsystem
//!
//! Turns queued "build this uploaded model" jobs into pushed registry
//! artifacts. The moving parts, leaf first:
//!
//! - [`registry::auth`] — registry-scoped bearer tokens minted from a
//!   local RSA key pair, including the key-identifier derivation.
//! - [`registry`] — the container-registry v2 protocol: manifests,
//!   blobs, chunked uploads.
//! - [`tasks`] — independently testable build steps over a shared
//!   [`tasks::BuildContext`].
//! - [`pipeline`] — composes an ordered task list per upload type.
//! - [`processor`] — polls the durable queue, runs the pipeline and
//!   reports disposition back to the queue.

pub mod pipeline;
pub mod processor;
pub mod records;
pub mod registry;
pub mod storage;
pub mod tasks;

pub use pipeline::{Pipeline, PipelineDeps};
pub use processor::UploadProcessor;
pub use registry::{ImageRef, Layer, Manifest, Registry, RegistryClient, TokenIssuer};
pub use storage::{FsObjectStore, ObjectStore};
