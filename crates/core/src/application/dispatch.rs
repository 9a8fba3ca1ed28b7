// Run Coordinator
//
// Turns a schedule fire into testing passes: resolves the identity roster
// (guest plus the schedule's project users), creates one shared job record,
// then runs one pass per identity against it. Only the final pass completes
// the job; schedule bookkeeping is written whatever the outcome.

use crate::application::job_manager::JobManager;
use crate::application::runner::{TestingParams, TestingRunner};
use crate::application::scheduler::ScheduleExecutor;
use crate::domain::{AiPagesMode, Identity, JobMetadata, JobScope, JobStatus, JobType, Schedule};
use crate::error::{AppError, Result};
use crate::port::{EngineFactory, IdProvider, ScheduleStore, SiteStore, TimeProvider};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

pub struct RunCoordinator {
    jobs: Arc<JobManager>,
    schedules: Arc<dyn ScheduleStore>,
    sites: Arc<dyn SiteStore>,
    runner: TestingRunner,
    ids: Arc<dyn IdProvider>,
    time: Arc<dyn TimeProvider>,
}

impl RunCoordinator {
    pub fn new(
        jobs: Arc<JobManager>,
        schedules: Arc<dyn ScheduleStore>,
        sites: Arc<dyn SiteStore>,
        engine: Arc<dyn EngineFactory>,
        ids: Arc<dyn IdProvider>,
        time: Arc<dyn TimeProvider>,
    ) -> Self {
        let runner = TestingRunner::new(
            Arc::clone(&jobs),
            Arc::clone(&sites),
            engine,
            Arc::clone(&time),
        );
        Self {
            jobs,
            schedules,
            sites,
            runner,
            ids,
            time,
        }
    }

    /// Execute one full run of a schedule. `trigger` records how the run was
    /// initiated ("schedule" or "manual").
    pub async fn run_schedule(&self, schedule_id: &str, trigger: &str) -> Result<String> {
        let schedule = self
            .schedules
            .find_by_id(schedule_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Schedule {} not found", schedule_id)))?;
        let website = self
            .sites
            .get_website(&schedule.website_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("Website {} not found", schedule.website_id))
            })?;

        let identities = self.resolve_identities(&schedule).await?;
        let labels: Vec<String> = identities.iter().map(|i| i.label().to_string()).collect();
        let job_id = self.ids.generate_id();
        info!(
            schedule_id = %schedule_id,
            job_id = %job_id,
            identities = ?labels,
            trigger = trigger,
            "Dispatching scheduled run"
        );

        let ai_page_ids = match schedule.test_config.ai_pages_mode {
            AiPagesMode::All => None,
            AiPagesMode::Selected => Some(schedule.test_config.ai_page_ids.clone()),
        };

        // One shared job record; passes reuse it by id
        self.jobs
            .create_job(
                &job_id,
                JobType::Testing,
                JobScope {
                    website_id: website.website_id.clone(),
                    project_id: website.project_id.clone(),
                    user_id: None,
                    session_id: None,
                },
                JobMetadata::Testing {
                    page_ids: vec![],
                    identities: labels,
                    run_ai_tests: schedule.test_config.run_ai_tests,
                    ai_page_ids: ai_page_ids.clone().unwrap_or_default(),
                    take_screenshots: schedule.test_config.take_screenshots,
                    schedule_id: Some(schedule.schedule_id.clone()),
                    trigger: Some(trigger.to_string()),
                },
            )
            .await?;

        let outcome = self
            .run_passes(&schedule, &website.project_id, &job_id, &identities, ai_page_ids)
            .await;

        // Bookkeeping is written even when a pass failed
        let status = match self.jobs.get_job(&job_id).await? {
            Some(job) => job.status.to_string(),
            None => JobStatus::Failed.to_string(),
        };
        let now = self.time.now_millis();
        if let Err(e) = self
            .schedules
            .record_run(schedule_id, &job_id, &status, now)
            .await
        {
            warn!(schedule_id = %schedule_id, error = %e, "Failed to record schedule run");
        }

        outcome?;
        Ok(job_id)
    }

    async fn run_passes(
        &self,
        schedule: &Schedule,
        project_id: &str,
        job_id: &str,
        identities: &[Identity],
        ai_page_ids: Option<Vec<String>>,
    ) -> Result<()> {
        let last = identities.len() - 1;
        for (index, identity) in identities.iter().enumerate() {
            let summary = self
                .runner
                .run(TestingParams {
                    job_id: job_id.to_string(),
                    website_id: schedule.website_id.clone(),
                    project_id: project_id.to_string(),
                    page_ids: vec![],
                    identities: vec![identity.clone()],
                    run_ai_tests: schedule.test_config.run_ai_tests,
                    ai_page_ids: ai_page_ids.clone(),
                    take_screenshots: schedule.test_config.take_screenshots,
                    schedule_id: Some(schedule.schedule_id.clone()),
                    trigger: None,
                    skip_completion: index != last,
                })
                .await?;
            if summary.cancelled {
                info!(job_id = %job_id, "Run cancelled, remaining identity passes skipped");
                break;
            }
        }
        Ok(())
    }

    /// Guest always tests; named users resolve through the site store and
    /// unresolvable ids are skipped rather than failing the run
    async fn resolve_identities(&self, schedule: &Schedule) -> Result<Vec<Identity>> {
        let mut identities = vec![Identity::Guest];
        for user_id in &schedule.project_user_ids {
            match self.sites.get_project_user(user_id).await? {
                Some(user) => identities.push(Identity::User(user.username)),
                None => {
                    warn!(
                        schedule_id = %schedule.schedule_id,
                        user_id = %user_id,
                        "Unknown project user, skipping identity"
                    );
                }
            }
        }
        Ok(identities)
    }
}

#[async_trait]
impl ScheduleExecutor for RunCoordinator {
    async fn execute(&self, schedule_id: &str) -> Result<String> {
        self.run_schedule(schedule_id, "schedule").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Page, ProjectUser, Recurrence, Website};
    use crate::port::engine::mocks::MockEngineFactory;
    use crate::port::id_provider::mocks::SequentialIdProvider;
    use crate::port::job_store::mocks::MemoryJobStore;
    use crate::port::schedule_store::mocks::MemoryScheduleStore;
    use crate::port::site_store::mocks::MemorySiteStore;
    use crate::port::time_provider::mocks::FixedTimeProvider;

    fn seeded_sites() -> Arc<MemorySiteStore> {
        let sites = Arc::new(MemorySiteStore::new());
        sites.add_website(Website {
            website_id: "w1".into(),
            project_id: "p1".into(),
            name: "Example".into(),
            base_url: "https://example.test".into(),
            login_url: Some("https://example.test/login".into()),
        });
        sites.add_page(Page {
            page_id: "pg1".into(),
            website_id: "w1".into(),
            url: "/a".into(),
            title: None,
            visible_to: vec!["guest".into()],
            last_tested_at: None,
            last_test_passed: None,
        });
        sites.add_user(ProjectUser {
            user_id: "u1".into(),
            username: "alice".into(),
        });
        sites
    }

    fn schedule(project_user_ids: Vec<String>) -> Schedule {
        let mut s = Schedule::new(
            "s1",
            "nightly",
            "w1",
            Recurrence::Daily {
                time: "02:00".into(),
                timezone: "UTC".into(),
            },
            1_000,
        );
        s.project_user_ids = project_user_ids;
        s
    }

    async fn setup(
        s: Schedule,
    ) -> (
        Arc<MemoryJobStore>,
        Arc<MemoryScheduleStore>,
        Arc<MockEngineFactory>,
        RunCoordinator,
    ) {
        let job_store = Arc::new(MemoryJobStore::new());
        let schedules = Arc::new(MemoryScheduleStore::new());
        schedules.insert(&s).await.unwrap();
        let sites = seeded_sites();
        let engine = Arc::new(MockEngineFactory::passing());
        let time = Arc::new(FixedTimeProvider::new(10_000));
        let jobs = Arc::new(JobManager::new(job_store.clone(), time.clone()));
        let coordinator = RunCoordinator::new(
            jobs,
            schedules.clone(),
            sites,
            engine.clone(),
            Arc::new(SequentialIdProvider::new("job")),
            time,
        );
        (job_store, schedules, engine, coordinator)
    }

    #[tokio::test]
    async fn all_identities_share_one_job_and_last_pass_completes_it() {
        let (job_store, schedules, engine, coordinator) =
            setup(schedule(vec!["u1".into()])).await;

        let job_id = coordinator.execute("s1").await.unwrap();
        assert_eq!(job_id, "job-1");

        let job = job_store.snapshot(&job_id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        // One page tested as guest and as alice against the same record
        assert_eq!(job.progress.current, 2);
        match &job.metadata {
            JobMetadata::Testing {
                identities,
                schedule_id,
                trigger,
                ..
            } => {
                assert_eq!(identities, &vec!["guest".to_string(), "alice".to_string()]);
                assert_eq!(schedule_id.as_deref(), Some("s1"));
                assert_eq!(trigger.as_deref(), Some("schedule"));
            }
            other => panic!("unexpected metadata: {:?}", other),
        }

        let calls = engine.calls();
        assert_eq!(calls.sessions_opened, 2);
        assert_eq!(calls.logins, vec!["guest".to_string(), "alice".to_string()]);

        let s = schedules.snapshot("s1").unwrap();
        assert_eq!(s.last_job_id.as_deref(), Some("job-1"));
        assert_eq!(s.last_run_status.as_deref(), Some("COMPLETED"));
    }

    #[tokio::test]
    async fn unresolvable_users_are_skipped() {
        let (job_store, _, engine, coordinator) =
            setup(schedule(vec!["ghost".into(), "u1".into()])).await;

        coordinator.execute("s1").await.unwrap();

        let calls = engine.calls();
        assert_eq!(calls.logins, vec!["guest".to_string(), "alice".to_string()]);
        assert_eq!(
            job_store.snapshot("job-1").unwrap().status,
            JobStatus::Completed
        );
    }

    #[tokio::test]
    async fn missing_schedule_is_not_found() {
        let (_, _, _, coordinator) = setup(schedule(vec![])).await;
        let err = coordinator.execute("nope").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
