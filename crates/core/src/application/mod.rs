// Application Layer - Use Cases and Services

pub mod dispatch;
pub mod job_manager;
pub mod runner;
pub mod scheduler;
pub mod shutdown;
pub mod sweep;
pub mod trigger;

// Re-exports
pub use dispatch::RunCoordinator;
pub use job_manager::JobManager;
pub use runner::{DiscoveryRunner, TestingRunner};
pub use scheduler::{ScheduleExecutor, SchedulerConfig, SchedulerService, TriggerStatus};
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};
pub use sweep::{JobSweeper, SweepConfig};
pub use trigger::{build_trigger, Trigger};
