// Job Store Port (Interface)
//
// Every mutation is a single-record conditional update: implementations
// must apply the condition and the write atomically (one UPDATE statement,
// not read-then-write) so two near-simultaneous callers cannot both win.

use crate::domain::{Job, JobFilter, JobProgress, JobStatistics, JobStatus};
use crate::error::Result;
use async_trait::async_trait;

/// Repository interface for Job persistence
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job. Fails with Conflict when the id already exists.
    async fn insert(&self, job: &Job) -> Result<()>;

    /// Find job by id
    async fn find_by_id(&self, id: &str) -> Result<Option<Job>>;

    /// All Pending/Running jobs matching the filter, oldest first
    async fn find_active(&self, filter: &JobFilter) -> Result<Vec<Job>>;

    /// Set status and updated_at; stamps started_at on the first transition
    /// into Running and completed_at on any terminal transition. Refuses to
    /// move a terminal job, or a Cancelling job anywhere but
    /// Cancelled/Failed. Returns whether a record was modified.
    async fn set_status(
        &self,
        id: &str,
        status: JobStatus,
        error: Option<&str>,
        result: Option<&serde_json::Value>,
        now: i64,
    ) -> Result<bool>;

    /// Overwrite the progress snapshot and updated_at, independent of status
    async fn set_progress(&self, id: &str, progress: &JobProgress, now: i64) -> Result<bool>;

    /// Flag cancellation and force status to Cancelling, only while the job
    /// is still Pending/Running. Returns false otherwise.
    async fn mark_cancellation_requested(
        &self,
        id: &str,
        requested_by: Option<&str>,
        now: i64,
    ) -> Result<bool>;

    /// Advisory lock compare-and-swap: succeeds iff no holder is set or the
    /// existing lock is older than `timeout_ms`. The same `now` is used for
    /// the staleness comparison and the stored acquisition time.
    async fn try_acquire_lock(
        &self,
        id: &str,
        holder: &str,
        timeout_ms: i64,
        now: i64,
    ) -> Result<bool>;

    /// Clear lock fields, only when `holder` currently holds the lock
    async fn release_lock(&self, id: &str, holder: &str) -> Result<bool>;

    /// Force-fail every Running/Cancelling job whose updated_at is older
    /// than `cutoff`. Returns the number of jobs failed.
    async fn fail_stale(&self, cutoff: i64, error: &str, now: i64) -> Result<u64>;

    /// Physically delete jobs in `status` whose completed_at is older than
    /// `cutoff`. Returns the number deleted.
    async fn delete_terminal_before(&self, status: JobStatus, cutoff: i64) -> Result<u64>;

    /// Counts by (type, status) and average duration for jobs created at or
    /// after `since`
    async fn aggregate_statistics(&self, filter: &JobFilter, since: i64) -> Result<JobStatistics>;
}

// ============================================================================
// Mock Implementation for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory JobStore with the same conditional-update semantics as the
    /// SQLite adapter
    #[derive(Default)]
    pub struct MemoryJobStore {
        jobs: Mutex<HashMap<String, Job>>,
    }

    impl MemoryJobStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Direct read-back for assertions
        pub fn snapshot(&self, id: &str) -> Option<Job> {
            self.jobs.lock().unwrap().get(id).cloned()
        }

        /// Direct write for test setup (bypasses conditional semantics)
        pub fn put(&self, job: Job) {
            self.jobs.lock().unwrap().insert(job.job_id.clone(), job);
        }
    }

    fn transition_allowed(current: JobStatus, next: JobStatus) -> bool {
        if current.is_terminal() {
            return false;
        }
        if current == JobStatus::Cancelling {
            return matches!(next, JobStatus::Cancelled | JobStatus::Failed);
        }
        // Jobs are born Pending; nothing moves back to it
        next != JobStatus::Pending
    }

    #[async_trait]
    impl JobStore for MemoryJobStore {
        async fn insert(&self, job: &Job) -> Result<()> {
            let mut jobs = self.jobs.lock().unwrap();
            if jobs.contains_key(&job.job_id) {
                return Err(AppError::Conflict(format!(
                    "Job {} already exists",
                    job.job_id
                )));
            }
            jobs.insert(job.job_id.clone(), job.clone());
            Ok(())
        }

        async fn find_by_id(&self, id: &str) -> Result<Option<Job>> {
            Ok(self.jobs.lock().unwrap().get(id).cloned())
        }

        async fn find_active(&self, filter: &JobFilter) -> Result<Vec<Job>> {
            let jobs = self.jobs.lock().unwrap();
            let mut active: Vec<Job> = jobs
                .values()
                .filter(|j| j.status.is_active() && filter.matches(j))
                .cloned()
                .collect();
            active.sort_by_key(|j| j.created_at);
            Ok(active)
        }

        async fn set_status(
            &self,
            id: &str,
            status: JobStatus,
            error: Option<&str>,
            result: Option<&serde_json::Value>,
            now: i64,
        ) -> Result<bool> {
            let mut jobs = self.jobs.lock().unwrap();
            let job = match jobs.get_mut(id) {
                Some(j) => j,
                None => return Ok(false),
            };
            if !transition_allowed(job.status, status) {
                return Ok(false);
            }
            job.status = status;
            job.updated_at = now;
            if status == JobStatus::Running && job.started_at.is_none() {
                job.started_at = Some(now);
            }
            if status.is_terminal() && job.completed_at.is_none() {
                job.completed_at = Some(now);
            }
            if let Some(e) = error {
                job.error = Some(e.to_string());
            }
            if let Some(r) = result {
                job.result = Some(r.clone());
            }
            Ok(true)
        }

        async fn set_progress(&self, id: &str, progress: &JobProgress, now: i64) -> Result<bool> {
            let mut jobs = self.jobs.lock().unwrap();
            match jobs.get_mut(id) {
                Some(job) => {
                    job.progress = progress.clone();
                    job.updated_at = now;
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        async fn mark_cancellation_requested(
            &self,
            id: &str,
            requested_by: Option<&str>,
            now: i64,
        ) -> Result<bool> {
            let mut jobs = self.jobs.lock().unwrap();
            let job = match jobs.get_mut(id) {
                Some(j) => j,
                None => return Ok(false),
            };
            if !job.status.is_active() {
                return Ok(false);
            }
            job.cancellation_requested = true;
            job.cancellation_requested_at = Some(now);
            job.cancellation_requested_by = requested_by.map(|s| s.to_string());
            job.status = JobStatus::Cancelling;
            job.updated_at = now;
            Ok(true)
        }

        async fn try_acquire_lock(
            &self,
            id: &str,
            holder: &str,
            timeout_ms: i64,
            now: i64,
        ) -> Result<bool> {
            let mut jobs = self.jobs.lock().unwrap();
            let job = match jobs.get_mut(id) {
                Some(j) => j,
                None => return Ok(false),
            };
            let free = match (&job.lock_holder, job.lock_acquired_at) {
                (None, _) => true,
                (Some(_), Some(acquired_at)) => acquired_at < now - timeout_ms,
                (Some(_), None) => true,
            };
            if !free {
                return Ok(false);
            }
            job.lock_holder = Some(holder.to_string());
            job.lock_acquired_at = Some(now);
            job.lock_expiry = Some(now + timeout_ms);
            Ok(true)
        }

        async fn release_lock(&self, id: &str, holder: &str) -> Result<bool> {
            let mut jobs = self.jobs.lock().unwrap();
            let job = match jobs.get_mut(id) {
                Some(j) => j,
                None => return Ok(false),
            };
            if job.lock_holder.as_deref() != Some(holder) {
                return Ok(false);
            }
            job.lock_holder = None;
            job.lock_acquired_at = None;
            job.lock_expiry = None;
            Ok(true)
        }

        async fn fail_stale(&self, cutoff: i64, error: &str, now: i64) -> Result<u64> {
            let mut jobs = self.jobs.lock().unwrap();
            let mut failed = 0u64;
            for job in jobs.values_mut() {
                let sweepable = matches!(job.status, JobStatus::Running | JobStatus::Cancelling);
                if sweepable && job.updated_at < cutoff {
                    job.status = JobStatus::Failed;
                    job.error = Some(error.to_string());
                    job.completed_at = Some(now);
                    job.updated_at = now;
                    failed += 1;
                }
            }
            Ok(failed)
        }

        async fn delete_terminal_before(&self, status: JobStatus, cutoff: i64) -> Result<u64> {
            let mut jobs = self.jobs.lock().unwrap();
            let before = jobs.len();
            jobs.retain(|_, j| {
                !(j.status == status && j.completed_at.map(|t| t < cutoff).unwrap_or(false))
            });
            Ok((before - jobs.len()) as u64)
        }

        async fn aggregate_statistics(
            &self,
            filter: &JobFilter,
            since: i64,
        ) -> Result<JobStatistics> {
            let jobs = self.jobs.lock().unwrap();
            let mut stats = JobStatistics::default();
            let mut duration_sum = 0i64;
            let mut duration_count = 0i64;
            for job in jobs.values() {
                if job.created_at < since || !filter.matches(job) {
                    continue;
                }
                stats.total_jobs += 1;
                *stats.by_status.entry(job.status.to_string()).or_insert(0) += 1;
                *stats.by_type.entry(job.job_type.to_string()).or_insert(0) += 1;
                if let (Some(started), Some(completed)) = (job.started_at, job.completed_at) {
                    duration_sum += completed - started;
                    duration_count += 1;
                }
            }
            if duration_count > 0 {
                stats.average_duration_ms = Some(duration_sum as f64 / duration_count as f64);
            }
            Ok(stats)
        }
    }
}
