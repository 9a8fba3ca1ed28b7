// Scheduler Service
//
// Keeps an in-memory registration per enabled schedule and walks them on a
// fixed tick, dispatching due schedules through the ScheduleExecutor seam.
// Registrations advance at fire time, so an outage coalesces into at most
// one late fire; a fire overdue past the misfire grace is skipped entirely.

use crate::application::trigger::{build_trigger, Trigger};
use crate::domain::Schedule;
use crate::error::{AppError, Result};
use crate::port::{ScheduleStore, TimeProvider};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, RwLock, Semaphore};
use tracing::{debug, error, info, warn};

/// Dispatch seam between the scheduler and job execution. Returns the id of
/// the job created for this run.
#[async_trait]
pub trait ScheduleExecutor: Send + Sync {
    async fn execute(&self, schedule_id: &str) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub tick_interval: Duration,
    /// Upper bound on concurrently executing scheduled runs
    pub max_concurrent_fires: usize,
    /// Fires overdue by more than this are skipped instead of run late
    pub misfire_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval: Duration::from_secs(1),
            max_concurrent_fires: 4,
            misfire_grace: Duration::from_secs(300),
        }
    }
}

/// Registration state reported for one schedule
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerStatus {
    pub registered: bool,
    pub next_run_at: Option<i64>,
}

struct Registration {
    trigger: Trigger,
    next_run: DateTime<Utc>,
}

pub struct SchedulerService {
    config: SchedulerConfig,
    schedules: Arc<dyn ScheduleStore>,
    executor: Arc<dyn ScheduleExecutor>,
    time: Arc<dyn TimeProvider>,
    registrations: RwLock<HashMap<String, Registration>>,
    in_flight: Mutex<HashSet<String>>,
    fire_permits: Arc<Semaphore>,
    shutdown_notify: Notify,
    running: AtomicBool,
}

impl SchedulerService {
    pub fn new(
        config: SchedulerConfig,
        schedules: Arc<dyn ScheduleStore>,
        executor: Arc<dyn ScheduleExecutor>,
        time: Arc<dyn TimeProvider>,
    ) -> Self {
        let fire_permits = Arc::new(Semaphore::new(config.max_concurrent_fires));
        Self {
            config,
            schedules,
            executor,
            time,
            registrations: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
            fire_permits,
            shutdown_notify: Notify::new(),
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Load enabled schedules, register them and spawn the tick loop.
    /// No-op when disabled by configuration or already running.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if !self.config.enabled {
            info!("Scheduler disabled by configuration");
            return Ok(());
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let enabled = self.schedules.find_enabled().await?;
        info!(schedule_count = enabled.len(), "Scheduler starting");
        for schedule in &enabled {
            self.register_schedule(schedule).await;
        }

        let svc = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = svc.shutdown_notify.notified() => break,
                    _ = tokio::time::sleep(svc.config.tick_interval) => {
                        if !svc.running.load(Ordering::SeqCst) {
                            break;
                        }
                        svc.tick().await;
                    }
                }
            }
            info!("Scheduler tick loop stopped");
        });
        Ok(())
    }

    /// Stop the tick loop. With `wait` set, also block until every in-flight
    /// fire has finished.
    pub async fn shutdown(&self, wait: bool) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shutdown_notify.notify_waiters();
        if wait {
            // All permits held back together means no fire is executing
            let _drained = self
                .fire_permits
                .acquire_many(self.config.max_concurrent_fires as u32)
                .await;
        }
        info!("Scheduler stopped");
    }

    /// Persist a new schedule and register it when the scheduler is live
    pub async fn add_schedule(&self, schedule: &Schedule) -> Result<()> {
        self.schedules.insert(schedule).await?;
        if schedule.enabled && self.is_running() {
            self.register_schedule(schedule).await;
        }
        Ok(())
    }

    /// Persist changes to a schedule and refresh its registration
    pub async fn update_schedule(&self, schedule: &Schedule) -> Result<bool> {
        let updated = self.schedules.update(schedule).await?;
        if !updated {
            return Ok(false);
        }
        self.unregister(&schedule.schedule_id).await;
        if schedule.enabled && self.is_running() {
            self.register_schedule(schedule).await;
        }
        Ok(true)
    }

    pub async fn remove_schedule(&self, schedule_id: &str) -> Result<bool> {
        self.unregister(schedule_id).await;
        self.schedules.delete(schedule_id).await
    }

    /// Enable or disable a schedule. Disabling unregisters the trigger
    /// before the flag is persisted, so a tick cannot fire it in between.
    pub async fn toggle_schedule(&self, schedule_id: &str, enabled: bool) -> Result<bool> {
        if !enabled {
            self.unregister(schedule_id).await;
        }
        let now = self.time.now_millis();
        let changed = self.schedules.set_enabled(schedule_id, enabled, now).await?;
        if changed && enabled && self.is_running() {
            if let Some(schedule) = self.schedules.find_by_id(schedule_id).await? {
                self.register_schedule(&schedule).await;
            }
        }
        Ok(changed)
    }

    /// Fire a schedule immediately, outside its cadence
    pub async fn run_now(&self, schedule_id: &str) -> Result<String> {
        let schedule = self
            .schedules
            .find_by_id(schedule_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Schedule {} not found", schedule_id)))?;
        info!(schedule_id = %schedule.schedule_id, "Manual run requested");
        self.executor.execute(schedule_id).await
    }

    /// Preview the next `count` fire times as epoch ms. Empty for schedules
    /// without a usable trigger.
    pub async fn get_next_run_times(&self, schedule_id: &str, count: usize) -> Result<Vec<i64>> {
        let schedule = self
            .schedules
            .find_by_id(schedule_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Schedule {} not found", schedule_id)))?;
        let Some(trigger) = build_trigger(&schedule.recurrence) else {
            return Ok(Vec::new());
        };
        let now = millis_to_utc(self.time.now_millis());
        Ok(trigger
            .upcoming(now, count)
            .into_iter()
            .map(|dt| dt.timestamp_millis())
            .collect())
    }

    /// Registration state for one schedule
    pub async fn get_job_status(&self, schedule_id: &str) -> TriggerStatus {
        let regs = self.registrations.read().await;
        match regs.get(schedule_id) {
            Some(reg) => TriggerStatus {
                registered: true,
                next_run_at: Some(reg.next_run.timestamp_millis()),
            },
            None => TriggerStatus {
                registered: false,
                next_run_at: None,
            },
        }
    }

    async fn register_schedule(&self, schedule: &Schedule) {
        let id = schedule.schedule_id.clone();
        let now_ms = self.time.now_millis();
        self.registrations.write().await.remove(&id);

        let Some(trigger) = build_trigger(&schedule.recurrence) else {
            warn!(
                schedule_id = %id,
                schedule_type = schedule.recurrence.type_name(),
                "Schedule has no usable trigger, leaving unregistered"
            );
            self.persist_next_run(&id, None, now_ms).await;
            return;
        };

        match trigger.next_after(millis_to_utc(now_ms)) {
            Some(next) => {
                info!(schedule_id = %id, next_run = %next, "Schedule registered");
                self.registrations.write().await.insert(
                    id.clone(),
                    Registration {
                        trigger,
                        next_run: next,
                    },
                );
                self.persist_next_run(&id, Some(next.timestamp_millis()), now_ms)
                    .await;
            }
            None => {
                info!(schedule_id = %id, "Schedule has no future runs");
                self.persist_next_run(&id, None, now_ms).await;
            }
        }
    }

    async fn unregister(&self, schedule_id: &str) {
        if self
            .registrations
            .write()
            .await
            .remove(schedule_id)
            .is_some()
        {
            debug!(schedule_id = %schedule_id, "Schedule unregistered");
        }
    }

    async fn persist_next_run(&self, schedule_id: &str, next_run_at: Option<i64>, now: i64) {
        if let Err(e) = self
            .schedules
            .set_next_run_at(schedule_id, next_run_at, now)
            .await
        {
            warn!(schedule_id = %schedule_id, error = %e, "Failed to persist next run time");
        }
    }

    /// Advance a registration past `after`; one-time triggers with no future
    /// run drop out of the map.
    async fn advance_registration(&self, schedule_id: &str, after: DateTime<Utc>, now_ms: i64) {
        let next = {
            let mut regs = self.registrations.write().await;
            match regs.get_mut(schedule_id) {
                Some(reg) => match reg.trigger.next_after(after) {
                    Some(next) => {
                        reg.next_run = next;
                        Some(next)
                    }
                    None => {
                        regs.remove(schedule_id);
                        None
                    }
                },
                None => return,
            }
        };
        self.persist_next_run(schedule_id, next.map(|n| n.timestamp_millis()), now_ms)
            .await;
    }

    async fn tick(self: &Arc<Self>) {
        let now_ms = self.time.now_millis();
        let now = millis_to_utc(now_ms);

        let due: Vec<(String, DateTime<Utc>)> = {
            let regs = self.registrations.read().await;
            regs.iter()
                .filter(|(_, reg)| reg.next_run <= now)
                .map(|(id, reg)| (id.clone(), reg.next_run))
                .collect()
        };

        let grace = chrono::Duration::milliseconds(self.config.misfire_grace.as_millis() as i64);
        for (id, scheduled_for) in due {
            if self.in_flight.lock().await.contains(&id) {
                warn!(schedule_id = %id, "Previous run still in flight, skipping this fire");
                self.advance_registration(&id, now, now_ms).await;
                continue;
            }

            if now.signed_duration_since(scheduled_for) > grace {
                warn!(
                    schedule_id = %id,
                    scheduled_for = %scheduled_for,
                    "Fire overdue past misfire grace, skipping"
                );
                self.advance_registration(&id, now, now_ms).await;
                continue;
            }

            match Arc::clone(&self.fire_permits).try_acquire_owned() {
                Ok(permit) => {
                    self.in_flight.lock().await.insert(id.clone());
                    self.advance_registration(&id, now, now_ms).await;
                    let svc = Arc::clone(self);
                    tokio::spawn(async move {
                        let _permit = permit;
                        match svc.executor.execute(&id).await {
                            Ok(job_id) => {
                                info!(schedule_id = %id, job_id = %job_id, "Scheduled run dispatched")
                            }
                            Err(e) => {
                                error!(schedule_id = %id, error = %e, "Scheduled run failed")
                            }
                        }
                        svc.in_flight.lock().await.remove(&id);
                    });
                }
                Err(_) => {
                    // Left due; retried on the next tick once a permit frees
                    debug!(schedule_id = %id, "At fire capacity, deferring");
                }
            }
        }
    }
}

fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}
