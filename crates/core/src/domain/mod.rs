// Domain Layer - Pure business logic and entities

pub mod job;
pub mod schedule;
pub mod site;

// Re-exports
pub use job::{
    Job, JobFilter, JobId, JobMetadata, JobProgress, JobScope, JobStatistics, JobStatus, JobType,
};
pub use schedule::{AiPagesMode, Recurrence, Schedule, ScheduleId, TestConfig};
pub use site::{DiscoveredPage, Identity, Page, PageTestResult, ProjectUser, Website};
