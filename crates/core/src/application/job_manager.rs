// Job Manager - state machine transitions, progress, locking, cancellation

use crate::domain::{
    Job, JobFilter, JobMetadata, JobProgress, JobScope, JobStatistics, JobStatus, JobType,
};
use crate::error::Result;
use crate::port::{JobStore, TimeProvider};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Error text written by the stale-job sweep
pub const STALE_JOB_ERROR: &str = "Job timed out - no updates received for an extended period";

/// Single owner of Job records. All mutations go through here; runners and
/// the scheduler never touch the store directly.
pub struct JobManager {
    store: Arc<dyn JobStore>,
    time: Arc<dyn TimeProvider>,
}

impl JobManager {
    pub fn new(store: Arc<dyn JobStore>, time: Arc<dyn TimeProvider>) -> Self {
        Self { store, time }
    }

    /// Insert a new Pending record with zeroed progress.
    ///
    /// # Errors
    /// `AppError::Conflict` when the job id already exists.
    pub async fn create_job(
        &self,
        job_id: &str,
        job_type: JobType,
        scope: JobScope,
        metadata: JobMetadata,
    ) -> Result<Job> {
        let now = self.time.now_millis();
        let job = Job::new(job_id, job_type, scope, metadata, now);
        self.store.insert(&job).await?;
        info!(job_id = %job.job_id, job_type = %job.job_type, "Job created");
        Ok(job)
    }

    /// Set status (and optionally progress/error/result in the same call).
    /// started_at is stamped on the first transition into Running,
    /// completed_at on any terminal transition. Returns whether a record was
    /// actually modified.
    pub async fn update_job_status(
        &self,
        job_id: &str,
        status: JobStatus,
        progress: Option<(u32, u32, String)>,
        error: Option<String>,
        result: Option<serde_json::Value>,
    ) -> Result<bool> {
        let now = self.time.now_millis();
        let modified = self
            .store
            .set_status(job_id, status, error.as_deref(), result.as_ref(), now)
            .await?;
        if !modified {
            debug!(job_id = %job_id, status = %status, "Status update did not modify job");
            return Ok(false);
        }
        if let Some((current, total, message)) = progress {
            self.update_job_progress(job_id, current, total, &message, None)
                .await?;
        }
        info!(job_id = %job_id, status = %status, "Job status updated");
        Ok(true)
    }

    /// Write a progress snapshot, independent of status. May be called many
    /// times per second by a runner.
    pub async fn update_job_progress(
        &self,
        job_id: &str,
        current: u32,
        total: u32,
        message: &str,
        details: Option<serde_json::Value>,
    ) -> Result<bool> {
        let percentage = if total == 0 {
            0.0
        } else {
            current as f64 / total as f64 * 100.0
        };
        let progress = JobProgress {
            current,
            total,
            percentage,
            message: message.to_string(),
            details: details.unwrap_or(serde_json::Value::Null),
        };
        let now = self.time.now_millis();
        self.store.set_progress(job_id, &progress, now).await
    }

    /// Signal cancellation intent. Valid only while the job is
    /// Pending/Running; forces status to Cancelling. Cancelling an
    /// already-terminal job returns false, never silently succeeds.
    pub async fn request_cancellation(
        &self,
        job_id: &str,
        requested_by: Option<&str>,
    ) -> Result<bool> {
        let now = self.time.now_millis();
        let modified = self
            .store
            .mark_cancellation_requested(job_id, requested_by, now)
            .await?;
        if modified {
            info!(job_id = %job_id, requested_by = ?requested_by, "Cancellation requested");
        } else {
            debug!(job_id = %job_id, "Cancellation rejected (job missing or not active)");
        }
        Ok(modified)
    }

    /// The one primitive runners poll at their checkpoints. True when the
    /// flag is set or status is already Cancelling/Cancelled; false for
    /// unknown job ids.
    pub async fn is_cancellation_requested(&self, job_id: &str) -> Result<bool> {
        match self.store.find_by_id(job_id).await? {
            Some(job) => Ok(job.cancellation_requested
                || matches!(job.status, JobStatus::Cancelling | JobStatus::Cancelled)),
            None => Ok(false),
        }
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        self.store.find_by_id(job_id).await
    }

    /// Jobs with status Pending or Running, oldest first
    pub async fn get_active_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        self.store.find_active(filter).await
    }

    /// Advisory lock for exclusive processing by one worker. Succeeds iff no
    /// holder is set or the existing lock is older than `timeout`. The store
    /// applies this as one atomic conditional write with a single `now`.
    pub async fn acquire_job_lock(
        &self,
        job_id: &str,
        holder: &str,
        timeout: Duration,
    ) -> Result<bool> {
        let now = self.time.now_millis();
        let acquired = self
            .store
            .try_acquire_lock(job_id, holder, timeout.as_millis() as i64, now)
            .await?;
        if acquired {
            debug!(job_id = %job_id, holder = %holder, "Job lock acquired");
        }
        Ok(acquired)
    }

    /// Clear the lock, only when `holder` currently holds it
    pub async fn release_job_lock(&self, job_id: &str, holder: &str) -> Result<bool> {
        self.store.release_lock(job_id, holder).await
    }

    /// Force-fail Running/Cancelling jobs whose updated_at is older than
    /// `stale_after` - the recovery path for crashed workers. Returns the
    /// number of jobs failed.
    pub async fn cleanup_stale_jobs(&self, stale_after: Duration) -> Result<u64> {
        let now = self.time.now_millis();
        let cutoff = now - stale_after.as_millis() as i64;
        let failed = self.store.fail_stale(cutoff, STALE_JOB_ERROR, now).await?;
        if failed > 0 {
            warn!(failed_jobs = failed, "Stale jobs force-failed");
        }
        Ok(failed)
    }

    /// Physically delete terminal jobs older than `retention`
    pub async fn purge_terminal_jobs(
        &self,
        status: JobStatus,
        retention: Duration,
    ) -> Result<u64> {
        let cutoff = self.time.now_millis() - retention.as_millis() as i64;
        self.store.delete_terminal_before(status, cutoff).await
    }

    /// Aggregate counts by (type, status) plus average duration over a
    /// lookback window. total_jobs always equals the sum of by_status.
    pub async fn get_job_statistics(
        &self,
        filter: &JobFilter,
        window: Duration,
    ) -> Result<JobStatistics> {
        let since = self.time.now_millis() - window.as_millis() as i64;
        self.store.aggregate_statistics(filter, since).await
    }
}
