// Site Audit Infrastructure - SQLite Adapters
// Implements: JobStore, ScheduleStore, SiteStore

mod connection;
mod job_store;
mod migration;
mod schedule_store;
mod site_store;

pub use connection::create_pool;
pub use job_store::SqliteJobStore;
pub use migration::run_migrations;
pub use schedule_store::SqliteScheduleStore;
pub use site_store::SqliteSiteStore;

// Note: sqlx::Error conversion is handled by wrapping in helper functions
// due to Rust's orphan rules (cannot implement From<sqlx::Error> for AppError here)
