// Background Sweep - stale-job recovery and retention
//
// Supervised periodic task: force-fails jobs whose worker died, deletes
// Cancelled jobs after a short retention window and Completed jobs after a
// longer one. Failures back off instead of busy-looping; shutdown is
// observed at every wait point.

use crate::application::job_manager::JobManager;
use crate::application::shutdown::ShutdownToken;
use crate::domain::JobStatus;
use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info};

#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// How often the sweep runs
    pub interval: Duration,
    /// Running/Cancelling jobs not updated for this long are force-failed
    pub stale_after: Duration,
    /// Cancelled jobs are deleted this long after completion
    pub cancelled_retention: Duration,
    /// Completed jobs are deleted this long after completion
    pub completed_retention: Duration,
    /// First backoff delay after a failed cycle (doubles, capped at interval)
    pub failure_backoff: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            stale_after: Duration::from_secs(24 * 3600),
            cancelled_retention: Duration::from_secs(24 * 3600),
            completed_retention: Duration::from_secs(7 * 24 * 3600),
            failure_backoff: Duration::from_secs(60),
        }
    }
}

pub struct JobSweeper {
    jobs: Arc<JobManager>,
    config: SweepConfig,
}

impl JobSweeper {
    pub fn new(jobs: Arc<JobManager>, config: SweepConfig) -> Self {
        Self { jobs, config }
    }

    /// Run the sweep loop until shutdown. Should be spawned in tokio::spawn.
    pub async fn run(self, mut shutdown: ShutdownToken) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            stale_after_secs = self.config.stale_after.as_secs(),
            "Job sweeper started"
        );

        let mut consecutive_failures = 0u32;
        loop {
            if shutdown.is_shutdown() {
                break;
            }

            let wait = if consecutive_failures == 0 {
                self.config.interval
            } else {
                // Exponential backoff after failures, capped at the interval
                let backoff = self
                    .config
                    .failure_backoff
                    .saturating_mul(2u32.saturating_pow(consecutive_failures - 1));
                backoff.min(self.config.interval)
            };

            tokio::select! {
                _ = sleep(wait) => {}
                _ = shutdown.wait() => {
                    break;
                }
            }

            match self.sweep_once().await {
                Ok(()) => {
                    consecutive_failures = 0;
                }
                Err(e) => {
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    error!(
                        error = %e,
                        consecutive_failures = consecutive_failures,
                        "Sweep cycle failed, backing off"
                    );
                }
            }
        }
        info!("Job sweeper stopped");
    }

    /// One sweep cycle; also invoked once at daemon startup as crash
    /// recovery for jobs orphaned by the previous process.
    pub async fn sweep_once(&self) -> Result<()> {
        let failed = self.jobs.cleanup_stale_jobs(self.config.stale_after).await?;

        let cancelled_purged = self
            .jobs
            .purge_terminal_jobs(JobStatus::Cancelled, self.config.cancelled_retention)
            .await?;
        let completed_purged = self
            .jobs
            .purge_terminal_jobs(JobStatus::Completed, self.config.completed_retention)
            .await?;

        info!(
            stale_failed = failed,
            cancelled_purged = cancelled_purged,
            completed_purged = completed_purged,
            "Sweep cycle completed"
        );
        Ok(())
    }
}
