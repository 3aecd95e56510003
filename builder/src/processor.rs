//! The upload processor, the worker loop tying queue, records and
//! pipelines together.
//!
//! Each delivery resolves its user and version records, plans the
//! pipeline for the upload type and runs it. The error taxonomy
//! decides settlement: success acks, a transient failure goes back to
//! the queue for redelivery, anything retrying cannot fix is
//! dead-lettered immediately.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use wharf_core::config::WharfConfig;
use wharf_core::error::{Result, WharfError};
use wharf_core::job::BuildJob;
use wharf_core::queue::{DeliveryHandle, DurableQueue};

use crate::pipeline::{Pipeline, PipelineDeps};
use crate::records::{UserStore, VersionStore};
use crate::tasks::BuildContext;

pub struct UploadProcessor {
    queue: Arc<DurableQueue>,
    users: Arc<dyn UserStore>,
    versions: Arc<dyn VersionStore>,
    deps: PipelineDeps,
    config: WharfConfig,
}

impl UploadProcessor {
    pub fn new(
        queue: Arc<DurableQueue>,
        users: Arc<dyn UserStore>,
        versions: Arc<dyn VersionStore>,
        deps: PipelineDeps,
        config: WharfConfig,
    ) -> Self {
        Self {
            queue,
            users,
            versions,
            deps,
            config,
        }
    }

    /// Wait for one delivery and handle it. Returns whether a job was
    /// delivered at all.
    pub async fn poll_once(&self) -> Result<bool> {
        let timeout = Duration::from_secs(self.config.queue.receive_timeout_secs);
        match self.queue.receive(timeout).await? {
            Some((job, handle)) => {
                self.handle_delivery(job, handle).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Run deliveries until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }
            tokio::select! {
                _ = shutdown.changed() => {
                    tracing::info!("Worker shutting down");
                    return Ok(());
                }
                polled = self.poll_once() => {
                    if let Err(e) = polled {
                        tracing::error!(error = %e, "Queue poll failed");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }

    async fn handle_delivery(&self, job: BuildJob, handle: DeliveryHandle) -> Result<()> {
        let job_id = handle.id().to_string();
        match self.process(&job, &job_id).await {
            Ok(()) => {
                tracing::info!(job = %job_id, version = %job.version_id, "Build succeeded");
                self.queue.ack(handle).await
            }
            Err(e) if e.is_retryable() => {
                tracing::warn!(
                    job = %job_id,
                    version = %job.version_id,
                    attempts = handle.attempts(),
                    error = %e,
                    "Build failed, will retry"
                );
                self.queue.fail(handle).await
            }
            Err(e) => {
                tracing::error!(
                    job = %job_id,
                    version = %job.version_id,
                    error = %e,
                    "Build failed fatally, dead-lettering"
                );
                self.queue.bury(handle).await
            }
        }
    }

    /// Run one job to completion: resolve records, plan, execute,
    /// record the result.
    async fn process(&self, job: &BuildJob, job_id: &str) -> Result<()> {
        let user = self
            .users
            .find_by_internal_id(&job.user_id)
            .await?
            .ok_or_else(|| WharfError::MissingRecord {
                kind: "user",
                id: job.user_id.clone(),
            })?;

        let version = self
            .versions
            .find_by_id(&job.version_id)
            .await?
            .ok_or_else(|| WharfError::MissingRecord {
                kind: "version",
                id: job.version_id.clone(),
            })?;

        tracing::info!(
            job = %job_id,
            user = %user.id,
            version = %version.id,
            upload_type = ?job.upload_type,
            "Processing upload"
        );

        let pipeline = Pipeline::plan(job.upload_type, &self.deps, &self.config);
        let mut ctx = BuildContext::new(job_id, job, version);
        pipeline.run(&mut ctx).await?;

        self.versions.mark_built(&job.version_id).await?;
        Ok(())
    }
}
