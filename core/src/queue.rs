//! Durable upload queue with at-least-once delivery.
//!
//! Jobs are persisted through a [`JobStore`] and handed to workers
//! under a visibility timeout: a delivered job stays invisible to
//! other receivers until it is acked, failed, or the timeout elapses.
//! The expiring timeout is the sole crash-recovery signal, so build
//! tasks must be idempotent. Jobs that exhaust their retry budget are
//! moved unchanged to a dead-letter store and require manual
//! intervention.
//!
//! Each delivery carries a lease token. Settlement is only honored
//! while that token is still the record's active lease; once the
//! visibility window expires and the job is redelivered, the old
//! handle is stale and settling with it is a no-op. A worker that
//! outlives its lease therefore cannot release or dead-letter a job
//! another worker is processing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{Result, WharfError};
use crate::job::BuildJob;

/// A persisted queue entry wrapping a job payload.
///
/// Immutable once enqueued except for `attempts`, `visible_at` and
/// `lease`, which the store updates on each delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub payload: BuildJob,
    pub enqueued_at: DateTime<Utc>,
    /// Number of deliveries so far
    pub attempts: u32,
    /// Earliest instant the record may be delivered (again)
    pub visible_at: DateTime<Utc>,
    /// Lease token of the active delivery, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease: Option<String>,
}

/// Persistence backend for the queue.
///
/// The queue treats the store as a collaborator: all durability and
/// the atomicity of `claim` live here. The in-memory implementation
/// below is used for tests and single-node deployments; a database
/// backend implements the same trait.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new record.
    async fn insert(&self, record: JobRecord) -> Result<()>;

    /// Atomically claim the oldest record visible at `now`: marks it
    /// invisible until `until`, stores `lease` as the delivery's
    /// settlement token, increments `attempts` and returns the updated
    /// record. Returns `None` when nothing is deliverable.
    async fn claim(
        &self,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
        lease: &str,
    ) -> Result<Option<JobRecord>>;

    /// Remove a record if `lease` still matches its active delivery,
    /// returning it. `None` when the record is gone or the lease is
    /// stale.
    async fn remove(&self, id: &str, lease: &str) -> Result<Option<JobRecord>>;

    /// Make a record deliverable again at `visible_at` if `lease`
    /// still matches its active delivery. Returns whether the record
    /// was requeued.
    async fn requeue(&self, id: &str, lease: &str, visible_at: DateTime<Utc>) -> Result<bool>;

    /// All records, oldest first. Used for dead-letter inspection.
    async fn list(&self) -> Result<Vec<JobRecord>>;
}

/// In-memory [`JobStore`].
#[derive(Default)]
pub struct MemoryJobStore {
    records: Mutex<Vec<JobRecord>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, record: JobRecord) -> Result<()> {
        self.records.lock().await.push(record);
        Ok(())
    }

    async fn claim(
        &self,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
        lease: &str,
    ) -> Result<Option<JobRecord>> {
        let mut records = self.records.lock().await;
        // insertion order doubles as FIFO order
        let candidate = records.iter_mut().find(|r| r.visible_at <= now);

        if let Some(record) = candidate {
            record.visible_at = until;
            record.attempts += 1;
            record.lease = Some(lease.to_string());
            Ok(Some(record.clone()))
        } else {
            Ok(None)
        }
    }

    async fn remove(&self, id: &str, lease: &str) -> Result<Option<JobRecord>> {
        let mut records = self.records.lock().await;
        match records
            .iter()
            .position(|r| r.id == id && r.lease.as_deref() == Some(lease))
        {
            Some(idx) => Ok(Some(records.remove(idx))),
            None => Ok(None),
        }
    }

    async fn requeue(&self, id: &str, lease: &str, visible_at: DateTime<Utc>) -> Result<bool> {
        let mut records = self.records.lock().await;
        match records
            .iter_mut()
            .find(|r| r.id == id && r.lease.as_deref() == Some(lease))
        {
            Some(record) => {
                record.visible_at = visible_at;
                record.lease = None;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list(&self) -> Result<Vec<JobRecord>> {
        let mut records = self.records.lock().await.clone();
        records.sort_by_key(|r| r.enqueued_at);
        Ok(records)
    }
}

/// Queue tuning knobs.
#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// How long a delivered job stays invisible to other receivers
    pub visibility: Duration,
    /// Redeliveries granted before dead-lettering
    pub max_retries: u32,
    /// Store poll interval while waiting in `receive`
    pub poll_interval: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            visibility: Duration::from_secs(9 * 60),
            max_retries: 2,
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Proof of a delivery, required to settle it.
///
/// The handle carries the delivery's lease token. Once the visibility
/// window expires and the job is redelivered, the handle is stale and
/// settling with it does nothing.
#[derive(Debug)]
pub struct DeliveryHandle {
    id: String,
    attempts: u32,
    lease: String,
}

impl DeliveryHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Delivery count including this one.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Durable at-least-once job queue.
pub struct DurableQueue {
    store: Arc<dyn JobStore>,
    dead: Arc<dyn JobStore>,
    options: QueueOptions,
}

impl DurableQueue {
    /// Create a queue over a main store and a dead-letter store.
    pub fn new(store: Arc<dyn JobStore>, dead: Arc<dyn JobStore>, options: QueueOptions) -> Self {
        Self {
            store,
            dead,
            options,
        }
    }

    /// Persist a new job and return its id.
    pub async fn enqueue(&self, payload: BuildJob) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let record = JobRecord {
            id: id.clone(),
            payload,
            enqueued_at: now,
            attempts: 0,
            visible_at: now,
            lease: None,
        };
        self.store.insert(record).await?;
        tracing::debug!(job = %id, "Job enqueued");
        Ok(id)
    }

    /// Wait up to `timeout` for a deliverable job.
    ///
    /// A returned job is invisible to other receivers for the
    /// configured visibility window.
    pub async fn receive(&self, timeout: Duration) -> Result<Option<(BuildJob, DeliveryHandle)>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let now = Utc::now();
            let until = now
                + chrono::Duration::from_std(self.options.visibility)
                    .map_err(|e| WharfError::QueueError(format!("Invalid visibility: {e}")))?;

            let lease = Uuid::new_v4().to_string();
            if let Some(record) = self.store.claim(now, until, &lease).await? {
                tracing::debug!(job = %record.id, attempts = record.attempts, "Job delivered");
                let handle = DeliveryHandle {
                    id: record.id,
                    attempts: record.attempts,
                    lease,
                };
                return Ok(Some((record.payload, handle)));
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            tokio::time::sleep(self.options.poll_interval.min(remaining)).await;
        }
    }

    /// Acknowledge a delivery, removing the job permanently. A stale
    /// handle is ignored: the job now belongs to a later delivery.
    pub async fn ack(&self, handle: DeliveryHandle) -> Result<()> {
        if self.store.remove(&handle.id, &handle.lease).await?.is_some() {
            tracing::debug!(job = %handle.id, "Job acked");
        } else {
            tracing::warn!(job = %handle.id, "Stale ack ignored, delivery was superseded");
        }
        Ok(())
    }

    /// Report a failed delivery.
    ///
    /// The job is made deliverable again until it has been handed out
    /// `max_retries + 1` times, after which it moves unchanged to the
    /// dead-letter store. A stale handle is ignored.
    pub async fn fail(&self, handle: DeliveryHandle) -> Result<()> {
        if handle.attempts > self.options.max_retries {
            tracing::warn!(
                job = %handle.id,
                attempts = handle.attempts,
                "Retries exhausted, dead-lettering job"
            );
            self.bury(handle).await
        } else if self
            .store
            .requeue(&handle.id, &handle.lease, Utc::now())
            .await?
        {
            tracing::debug!(job = %handle.id, attempts = handle.attempts, "Job requeued");
            Ok(())
        } else {
            tracing::warn!(job = %handle.id, "Stale fail ignored, delivery was superseded");
            Ok(())
        }
    }

    /// Move a job straight to the dead-letter store, skipping any
    /// remaining retries. Used for failures retrying cannot fix. A
    /// stale handle is ignored.
    pub async fn bury(&self, handle: DeliveryHandle) -> Result<()> {
        match self.store.remove(&handle.id, &handle.lease).await? {
            Some(record) => {
                self.dead.insert(record).await?;
                tracing::debug!(job = %handle.id, "Job dead-lettered");
            }
            None => {
                tracing::warn!(job = %handle.id, "Stale bury ignored, delivery was superseded");
            }
        }
        Ok(())
    }

    /// Dead-lettered jobs, oldest first.
    pub async fn dead_letters(&self) -> Result<Vec<JobRecord>> {
        self.dead.list().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::UploadType;

    fn job(version: &str) -> BuildJob {
        BuildJob {
            version_id: version.to_string(),
            user_id: "u-1".to_string(),
            upload_type: UploadType::ModelCard,
            binary: None,
            code: None,
            docker: None,
        }
    }

    fn queue(visibility: Duration, max_retries: u32) -> DurableQueue {
        DurableQueue::new(
            Arc::new(MemoryJobStore::new()),
            Arc::new(MemoryJobStore::new()),
            QueueOptions {
                visibility,
                max_retries,
                poll_interval: Duration::from_millis(5),
            },
        )
    }

    #[tokio::test]
    async fn test_enqueue_receive_ack() {
        let q = queue(Duration::from_secs(60), 2);
        q.enqueue(job("v-1")).await.unwrap();

        let (payload, handle) = q.receive(Duration::from_millis(50)).await.unwrap().unwrap();
        assert_eq!(payload.version_id, "v-1");
        assert_eq!(handle.attempts(), 1);

        q.ack(handle).await.unwrap();
        assert!(q.receive(Duration::from_millis(20)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_receive_empty_times_out() {
        let q = queue(Duration::from_secs(60), 2);
        let got = q.receive(Duration::from_millis(30)).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_delivered_job_is_invisible() {
        let q = queue(Duration::from_secs(60), 2);
        q.enqueue(job("v-1")).await.unwrap();

        let first = q.receive(Duration::from_millis(50)).await.unwrap();
        assert!(first.is_some());

        // still leased, a second receive sees nothing
        let second = q.receive(Duration::from_millis(30)).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_redelivery_after_visibility_expires() {
        let q = queue(Duration::from_millis(40), 2);
        q.enqueue(job("v-1")).await.unwrap();

        let (_, handle) = q.receive(Duration::from_millis(50)).await.unwrap().unwrap();
        assert_eq!(handle.attempts(), 1);
        drop(handle); // worker crash: no ack, no fail

        tokio::time::sleep(Duration::from_millis(60)).await;

        let (_, handle) = q.receive(Duration::from_millis(50)).await.unwrap().unwrap();
        assert_eq!(handle.attempts(), 2);
    }

    #[tokio::test]
    async fn test_fail_requeues_immediately() {
        let q = queue(Duration::from_secs(60), 2);
        q.enqueue(job("v-1")).await.unwrap();

        let (_, handle) = q.receive(Duration::from_millis(50)).await.unwrap().unwrap();
        q.fail(handle).await.unwrap();

        let (_, handle) = q.receive(Duration::from_millis(50)).await.unwrap().unwrap();
        assert_eq!(handle.attempts(), 2);
    }

    #[tokio::test]
    async fn test_dead_letter_after_max_retries() {
        let q = queue(Duration::from_secs(60), 2);
        q.enqueue(job("v-1")).await.unwrap();

        // max_retries = 2: the job fails exactly 3 times before dead-lettering
        let mut seen_attempts = Vec::new();
        for _ in 0..3 {
            let (_, handle) = q.receive(Duration::from_millis(50)).await.unwrap().unwrap();
            seen_attempts.push(handle.attempts());
            q.fail(handle).await.unwrap();
        }
        assert_eq!(seen_attempts, vec![1, 2, 3]);

        assert!(q.receive(Duration::from_millis(20)).await.unwrap().is_none());
        let dead = q.dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        // payload moved unchanged
        assert_eq!(dead[0].payload.version_id, "v-1");
        assert_eq!(dead[0].attempts, 3);
    }

    #[tokio::test]
    async fn test_bury_skips_retries() {
        let q = queue(Duration::from_secs(60), 2);
        q.enqueue(job("v-1")).await.unwrap();

        let (_, handle) = q.receive(Duration::from_millis(50)).await.unwrap().unwrap();
        assert_eq!(handle.attempts(), 1);
        q.bury(handle).await.unwrap();

        assert!(q.receive(Duration::from_millis(20)).await.unwrap().is_none());
        assert_eq!(q.dead_letters().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stale_fail_does_not_release_live_lease() {
        let q = queue(Duration::from_millis(200), 5);
        q.enqueue(job("v-1")).await.unwrap();

        let (_, stale) = q.receive(Duration::from_millis(50)).await.unwrap().unwrap();
        assert_eq!(stale.attempts(), 1);

        // visibility expires, the job is redelivered to a second worker
        tokio::time::sleep(Duration::from_millis(250)).await;
        let (_, live) = q.receive(Duration::from_millis(50)).await.unwrap().unwrap();
        assert_eq!(live.attempts(), 2);

        // the first worker reports failure with its expired handle
        q.fail(stale).await.unwrap();

        // the job stays leased to the second worker
        assert!(q.receive(Duration::from_millis(30)).await.unwrap().is_none());

        // and the live handle still settles normally
        q.ack(live).await.unwrap();
        assert!(q.receive(Duration::from_millis(20)).await.unwrap().is_none());
        assert!(q.dead_letters().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stale_bury_does_not_dead_letter_live_delivery() {
        let q = queue(Duration::from_millis(200), 2);
        q.enqueue(job("v-1")).await.unwrap();

        let (_, stale) = q.receive(Duration::from_millis(50)).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        let (_, live) = q.receive(Duration::from_millis(50)).await.unwrap().unwrap();

        q.bury(stale).await.unwrap();
        assert!(q.dead_letters().await.unwrap().is_empty());

        q.ack(live).await.unwrap();
        assert!(q.receive(Duration::from_millis(20)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_ack_does_not_drop_redelivered_job() {
        let q = queue(Duration::from_millis(200), 5);
        q.enqueue(job("v-1")).await.unwrap();

        let (_, stale) = q.receive(Duration::from_millis(50)).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        let (_, live) = q.receive(Duration::from_millis(50)).await.unwrap().unwrap();
        assert_eq!(live.attempts(), 2);

        q.ack(stale).await.unwrap();

        // the live delivery is unaffected and settles on its own terms
        q.fail(live).await.unwrap();
        let (_, handle) = q.receive(Duration::from_millis(50)).await.unwrap().unwrap();
        assert_eq!(handle.attempts(), 3);
    }

    #[tokio::test]
    async fn test_fifo_between_jobs() {
        let q = queue(Duration::from_secs(60), 2);
        q.enqueue(job("v-1")).await.unwrap();
        q.enqueue(job("v-2")).await.unwrap();

        let (first, _) = q.receive(Duration::from_millis(50)).await.unwrap().unwrap();
        let (second, _) = q.receive(Duration::from_millis(50)).await.unwrap().unwrap();
        assert_eq!(first.version_id, "v-1");
        assert_eq!(second.version_id, "v-2");
    }
}
