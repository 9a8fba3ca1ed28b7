// Job Domain Model

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Job ID (caller-chosen, globally unique)
pub type JobId = String;

/// Job type - one variant per orchestrated unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    Discovery,
    Testing,
    ReportGeneration,
    BulkTest,
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobType::Discovery => write!(f, "DISCOVERY"),
            JobType::Testing => write!(f, "TESTING"),
            JobType::ReportGeneration => write!(f, "REPORT_GENERATION"),
            JobType::BulkTest => write!(f, "BULK_TEST"),
        }
    }
}

impl std::str::FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DISCOVERY" => Ok(JobType::Discovery),
            "TESTING" => Ok(JobType::Testing),
            "REPORT_GENERATION" => Ok(JobType::ReportGeneration),
            "BULK_TEST" => Ok(JobType::BulkTest),
            other => Err(format!("unknown job type: {}", other)),
        }
    }
}

/// Job lifecycle status
///
/// Transitions only move forward:
/// Pending -> Running -> Completed | Failed
/// Pending | Running -> Cancelling -> Cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Cancelling,
}

impl JobStatus {
    /// Terminal statuses never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Active = visible to a worker as claimable/in-progress
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Running)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "PENDING"),
            JobStatus::Running => write!(f, "RUNNING"),
            JobStatus::Completed => write!(f, "COMPLETED"),
            JobStatus::Failed => write!(f, "FAILED"),
            JobStatus::Cancelled => write!(f, "CANCELLED"),
            JobStatus::Cancelling => write!(f, "CANCELLING"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "RUNNING" => Ok(JobStatus::Running),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            "CANCELLED" => Ok(JobStatus::Cancelled),
            "CANCELLING" => Ok(JobStatus::Cancelling),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

/// Progress snapshot, written many times per second while Running
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub current: u32,
    pub total: u32,
    /// current / total * 100, 0 when total is 0
    pub percentage: f64,
    pub message: String,
    /// Job-type-specific counters (pages_found, pages_passed, ...)
    pub details: serde_json::Value,
}

impl JobProgress {
    pub fn zero() -> Self {
        Self {
            current: 0,
            total: 0,
            percentage: 0.0,
            message: String::new(),
            details: serde_json::Value::Null,
        }
    }
}

/// Who/what a job belongs to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobScope {
    pub website_id: String,
    pub project_id: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
}

/// Job-type-specific configuration captured at creation.
///
/// Tagged union so each runner's fields are statically known instead of an
/// untyped map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobMetadata {
    Discovery {
        max_pages: u32,
        identities: Vec<String>,
    },
    Testing {
        page_ids: Vec<String>,
        identities: Vec<String>,
        run_ai_tests: bool,
        ai_page_ids: Vec<String>,
        take_screenshots: bool,
        /// Originating schedule, when the job was trigger-fired
        schedule_id: Option<String>,
        /// "schedule" | "manual" | absent for ad-hoc jobs
        trigger: Option<String>,
    },
    ReportGeneration {
        format: String,
        source_job_id: Option<String>,
    },
    BulkTest {
        website_ids: Vec<String>,
    },
}

/// Job entity - one record per unit of orchestrated work.
///
/// Timestamps are epoch milliseconds and set exclusively by the manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    pub job_type: JobType,
    pub status: JobStatus,

    pub website_id: String,
    pub project_id: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,

    pub created_at: i64,
    pub updated_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,

    pub progress: JobProgress,
    pub metadata: JobMetadata,

    /// Set only on Failed
    pub error: Option<String>,
    /// Set only on Completed
    pub result: Option<serde_json::Value>,

    pub cancellation_requested: bool,
    pub cancellation_requested_at: Option<i64>,
    pub cancellation_requested_by: Option<String>,

    // Advisory lock - optimistic and time-boxed, not a strict mutex
    pub lock_holder: Option<String>,
    pub lock_acquired_at: Option<i64>,
    pub lock_expiry: Option<i64>,
}

impl Job {
    /// Build a fresh Pending record with zeroed progress
    pub fn new(
        job_id: impl Into<String>,
        job_type: JobType,
        scope: JobScope,
        metadata: JobMetadata,
        created_at: i64,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            job_type,
            status: JobStatus::Pending,
            website_id: scope.website_id,
            project_id: scope.project_id,
            user_id: scope.user_id,
            session_id: scope.session_id,
            created_at,
            updated_at: created_at,
            started_at: None,
            completed_at: None,
            progress: JobProgress::zero(),
            metadata,
            error: None,
            result: None,
            cancellation_requested: false,
            cancellation_requested_at: None,
            cancellation_requested_by: None,
            lock_holder: None,
            lock_acquired_at: None,
            lock_expiry: None,
        }
    }
}

/// Read-side filters for job queries
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub job_type: Option<JobType>,
    pub website_id: Option<String>,
    pub project_id: Option<String>,
    pub user_id: Option<String>,
}

impl JobFilter {
    pub fn matches(&self, job: &Job) -> bool {
        if let Some(t) = self.job_type {
            if job.job_type != t {
                return false;
            }
        }
        if let Some(w) = &self.website_id {
            if &job.website_id != w {
                return false;
            }
        }
        if let Some(p) = &self.project_id {
            if &job.project_id != p {
                return false;
            }
        }
        if let Some(u) = &self.user_id {
            if job.user_id.as_ref() != Some(u) {
                return false;
            }
        }
        true
    }
}

/// Aggregate counts over a lookback window
#[derive(Debug, Clone, Default, Serialize)]
pub struct JobStatistics {
    pub total_jobs: i64,
    pub by_status: HashMap<String, i64>,
    pub by_type: HashMap<String, i64>,
    /// Average of completed_at - started_at over jobs that have both
    pub average_duration_ms: Option<f64>,
}
