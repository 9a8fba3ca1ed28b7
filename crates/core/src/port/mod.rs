// Port Layer - Interfaces for external dependencies

pub mod engine;
pub mod id_provider;
pub mod job_store;
pub mod schedule_store;
pub mod site_store;
pub mod time_provider;

// Re-exports
pub use engine::{EngineFactory, EngineSession, SessionOutcome, TestOptions};
pub use id_provider::IdProvider;
pub use job_store::JobStore;
pub use schedule_store::ScheduleStore;
pub use site_store::SiteStore;
pub use time_provider::TimeProvider;
