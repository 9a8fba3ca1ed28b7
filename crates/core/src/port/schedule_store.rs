// Schedule Store Port (Interface)

use crate::domain::Schedule;
use crate::error::Result;
use async_trait::async_trait;

/// Repository interface for Schedule persistence
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Insert a new schedule. Fails with Conflict when the id exists.
    async fn insert(&self, schedule: &Schedule) -> Result<()>;

    /// Replace an existing schedule. Returns whether a record was modified.
    async fn update(&self, schedule: &Schedule) -> Result<bool>;

    /// Delete a schedule. Returns whether a record existed.
    async fn delete(&self, id: &str) -> Result<bool>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Schedule>>;

    /// All enabled schedules (loaded at scheduler startup)
    async fn find_enabled(&self) -> Result<Vec<Schedule>>;

    /// Flip the enabled flag. Returns whether a record was modified.
    async fn set_enabled(&self, id: &str, enabled: bool, now: i64) -> Result<bool>;

    /// Persist the computed next fire time
    async fn set_next_run_at(&self, id: &str, next_run_at: Option<i64>, now: i64) -> Result<bool>;

    /// Record dispatch bookkeeping after a fire
    async fn record_run(&self, id: &str, job_id: &str, status: &str, now: i64) -> Result<bool>;
}

// ============================================================================
// Mock Implementation for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MemoryScheduleStore {
        schedules: Mutex<HashMap<String, Schedule>>,
    }

    impl MemoryScheduleStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn snapshot(&self, id: &str) -> Option<Schedule> {
            self.schedules.lock().unwrap().get(id).cloned()
        }
    }

    #[async_trait]
    impl ScheduleStore for MemoryScheduleStore {
        async fn insert(&self, schedule: &Schedule) -> Result<()> {
            let mut map = self.schedules.lock().unwrap();
            if map.contains_key(&schedule.schedule_id) {
                return Err(AppError::Conflict(format!(
                    "Schedule {} already exists",
                    schedule.schedule_id
                )));
            }
            map.insert(schedule.schedule_id.clone(), schedule.clone());
            Ok(())
        }

        async fn update(&self, schedule: &Schedule) -> Result<bool> {
            let mut map = self.schedules.lock().unwrap();
            match map.get_mut(&schedule.schedule_id) {
                Some(existing) => {
                    *existing = schedule.clone();
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        async fn delete(&self, id: &str) -> Result<bool> {
            Ok(self.schedules.lock().unwrap().remove(id).is_some())
        }

        async fn find_by_id(&self, id: &str) -> Result<Option<Schedule>> {
            Ok(self.schedules.lock().unwrap().get(id).cloned())
        }

        async fn find_enabled(&self) -> Result<Vec<Schedule>> {
            let map = self.schedules.lock().unwrap();
            let mut enabled: Vec<Schedule> =
                map.values().filter(|s| s.enabled).cloned().collect();
            enabled.sort_by(|a, b| a.schedule_id.cmp(&b.schedule_id));
            Ok(enabled)
        }

        async fn set_enabled(&self, id: &str, enabled: bool, now: i64) -> Result<bool> {
            let mut map = self.schedules.lock().unwrap();
            match map.get_mut(id) {
                Some(s) => {
                    s.enabled = enabled;
                    s.updated_at = now;
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        async fn set_next_run_at(
            &self,
            id: &str,
            next_run_at: Option<i64>,
            now: i64,
        ) -> Result<bool> {
            let mut map = self.schedules.lock().unwrap();
            match map.get_mut(id) {
                Some(s) => {
                    s.next_run_at = next_run_at;
                    s.updated_at = now;
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        async fn record_run(&self, id: &str, job_id: &str, status: &str, now: i64) -> Result<bool> {
            let mut map = self.schedules.lock().unwrap();
            match map.get_mut(id) {
                Some(s) => {
                    s.last_job_id = Some(job_id.to_string());
                    s.last_run_status = Some(status.to_string());
                    s.updated_at = now;
                    Ok(true)
                }
                None => Ok(false),
            }
        }
    }
}
