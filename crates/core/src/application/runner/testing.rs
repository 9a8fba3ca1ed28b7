// Testing Runner
//
// Re-tests known pages of a website under one or more identities. A pass
// may share its job record with other passes: progress is additive on top
// of whatever the record already carries, and a pass flagged
// skip_completion leaves the job Running for a later pass to finalize.

use super::{close_session, end_identity, PassOutcome};
use crate::application::job_manager::JobManager;
use crate::domain::{Identity, JobMetadata, JobScope, JobStatus, JobType, Page};
use crate::error::{AppError, Result};
use crate::port::{EngineFactory, EngineSession, SiteStore, TestOptions, TimeProvider};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct TestingParams {
    pub job_id: String,
    pub website_id: String,
    pub project_id: String,
    /// Pages to test; empty means every known page of the website
    pub page_ids: Vec<String>,
    /// Identities for this pass
    pub identities: Vec<Identity>,
    pub run_ai_tests: bool,
    /// None = AI checks on every tested page (when enabled)
    pub ai_page_ids: Option<Vec<String>>,
    pub take_screenshots: bool,
    pub schedule_id: Option<String>,
    pub trigger: Option<String>,
    /// Leave the job Running at the end of this pass; a later pass for the
    /// same job id finalizes it
    pub skip_completion: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TestingSummary {
    pub job_id: String,
    pub pages_tested: u32,
    pub pages_passed: u32,
    pub pages_failed: u32,
    pub cancelled: bool,
}

#[derive(Default)]
struct Counters {
    tested: u32,
    passed: u32,
    failed: u32,
    done: u32,
}

pub struct TestingRunner {
    jobs: Arc<JobManager>,
    sites: Arc<dyn SiteStore>,
    engine: Arc<dyn EngineFactory>,
    time: Arc<dyn TimeProvider>,
}

impl TestingRunner {
    pub fn new(
        jobs: Arc<JobManager>,
        sites: Arc<dyn SiteStore>,
        engine: Arc<dyn EngineFactory>,
        time: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            jobs,
            sites,
            engine,
            time,
        }
    }

    /// Run one testing pass. Any error escaping the run finalizes the job
    /// as Failed before propagating.
    pub async fn run(&self, params: TestingParams) -> Result<TestingSummary> {
        let job_id = params.job_id.clone();
        let outcome = self.run_inner(params).await;
        if let Err(e) = &outcome {
            error!(job_id = %job_id, error = %e, "Testing run failed");
            if let Err(finalize_err) = self
                .jobs
                .update_job_status(&job_id, JobStatus::Failed, None, Some(e.to_string()), None)
                .await
            {
                warn!(job_id = %job_id, error = %finalize_err, "Failed to finalize job as Failed");
            }
        }
        outcome
    }

    async fn run_inner(&self, params: TestingParams) -> Result<TestingSummary> {
        self.sites
            .get_website(&params.website_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("Website {} not found", params.website_id))
            })?;

        // Create-or-reuse: a shared multi-pass job already exists by the
        // time the second pass starts
        let job = match self.jobs.get_job(&params.job_id).await? {
            Some(job) => job,
            None => {
                self.jobs
                    .create_job(
                        &params.job_id,
                        JobType::Testing,
                        JobScope {
                            website_id: params.website_id.clone(),
                            project_id: params.project_id.clone(),
                            user_id: None,
                            session_id: None,
                        },
                        JobMetadata::Testing {
                            page_ids: params.page_ids.clone(),
                            identities: params
                                .identities
                                .iter()
                                .map(|i| i.label().to_string())
                                .collect(),
                            run_ai_tests: params.run_ai_tests,
                            ai_page_ids: params.ai_page_ids.clone().unwrap_or_default(),
                            take_screenshots: params.take_screenshots,
                            schedule_id: params.schedule_id.clone(),
                            trigger: params.trigger.clone(),
                        },
                    )
                    .await?
            }
        };
        self.jobs
            .update_job_status(&params.job_id, JobStatus::Running, None, None, None)
            .await?;

        let pages = self.resolve_pages(&params).await?;
        let offset = job.progress.current;
        let total = offset + (pages.len() * params.identities.len()) as u32;

        let mut counters = Counters::default();
        let mut cancelled = false;
        for identity in &params.identities {
            if self.jobs.is_cancellation_requested(&params.job_id).await? {
                cancelled = true;
                break;
            }
            let mut session = self.engine.open_session().await?;
            let pass = self
                .test_identity(&mut session, identity, &pages, &params, offset, total, &mut counters)
                .await;
            close_session(&mut session).await;
            match pass? {
                PassOutcome::CancelRequested => {
                    cancelled = true;
                    break;
                }
                PassOutcome::LoginFailed | PassOutcome::Finished => {}
            }
        }

        // Cancellation can land while the last page is in flight, after the
        // loop's checkpoints have all passed. One final check before
        // declaring anything
        if !cancelled {
            cancelled = self.jobs.is_cancellation_requested(&params.job_id).await?;
        }

        let mut summary = TestingSummary {
            job_id: params.job_id.clone(),
            pages_tested: counters.tested,
            pages_passed: counters.passed,
            pages_failed: counters.failed,
            cancelled,
        };

        if cancelled {
            info!(job_id = %params.job_id, pages_tested = counters.tested, "Testing cancelled");
            self.jobs
                .update_job_status(
                    &params.job_id,
                    JobStatus::Cancelled,
                    None,
                    None,
                    None,
                )
                .await?;
            return Ok(summary);
        }

        if params.skip_completion {
            info!(
                job_id = %params.job_id,
                pages_tested = counters.tested,
                "Testing pass done, job left running for the next pass"
            );
            return Ok(summary);
        }

        let result = serde_json::json!({
            "pages_tested": counters.tested,
            "pages_passed": counters.passed,
            "pages_failed": counters.failed,
        });
        info!(
            job_id = %params.job_id,
            pages_tested = counters.tested,
            pages_passed = counters.passed,
            pages_failed = counters.failed,
            "Testing completed"
        );
        let completed = self
            .jobs
            .update_job_status(&params.job_id, JobStatus::Completed, None, None, Some(result))
            .await?;
        if !completed {
            // The store's Cancelling guard refused the write; resolve the
            // job instead of leaving it stranded
            warn!(job_id = %params.job_id, "Completion refused, finalizing as cancelled");
            self.jobs
                .update_job_status(&params.job_id, JobStatus::Cancelled, None, None, None)
                .await?;
            summary.cancelled = true;
        }
        Ok(summary)
    }

    async fn resolve_pages(&self, params: &TestingParams) -> Result<Vec<Page>> {
        if params.page_ids.is_empty() {
            return self.sites.get_pages(&params.website_id).await;
        }
        let mut pages = Vec::with_capacity(params.page_ids.len());
        for page_id in &params.page_ids {
            match self.sites.get_page(page_id).await? {
                Some(page) => pages.push(page),
                None => warn!(page_id = %page_id, "Unknown page id, skipping"),
            }
        }
        Ok(pages)
    }

    #[allow(clippy::too_many_arguments)]
    async fn test_identity(
        &self,
        session: &mut Box<dyn EngineSession>,
        identity: &Identity,
        pages: &[Page],
        params: &TestingParams,
        offset: u32,
        total: u32,
        counters: &mut Counters,
    ) -> Result<PassOutcome> {
        let login = session.login(identity).await?;
        if !login.success {
            warn!(
                job_id = %params.job_id,
                identity = %identity,
                error = ?login.error,
                "Login failed, skipping identity"
            );
            return Ok(PassOutcome::LoginFailed);
        }

        for page in pages {
            if self.jobs.is_cancellation_requested(&params.job_id).await? {
                end_identity(session, identity).await?;
                return Ok(PassOutcome::CancelRequested);
            }

            let options = TestOptions {
                run_ai_tests: params.run_ai_tests && ai_applies(&params.ai_page_ids, &page.page_id),
                take_screenshots: params.take_screenshots,
            };
            match session.test_page(page, &options).await {
                Ok(result) => {
                    counters.tested += 1;
                    if result.passed {
                        counters.passed += 1;
                    } else {
                        counters.failed += 1;
                    }
                    let mut record = page.clone();
                    record.last_tested_at = Some(self.time.now_millis());
                    record.last_test_passed = Some(result.passed);
                    self.sites.update_page(&record).await?;
                }
                Err(e) => {
                    // One broken page must not sink the whole run, but it
                    // still gets recorded as a failed test
                    warn!(url = %page.url, error = %e, "Page test errored, continuing");
                    counters.failed += 1;
                    let mut record = page.clone();
                    record.last_tested_at = Some(self.time.now_millis());
                    record.last_test_passed = Some(false);
                    self.sites.update_page(&record).await?;
                }
            }

            counters.done += 1;
            self.jobs
                .update_job_progress(
                    &params.job_id,
                    offset + counters.done,
                    total,
                    &format!("Testing {} as {}", page.url, identity),
                    None,
                )
                .await?;
        }

        end_identity(session, identity).await?;
        Ok(PassOutcome::Finished)
    }
}

fn ai_applies(ai_page_ids: &Option<Vec<String>>, page_id: &str) -> bool {
    match ai_page_ids {
        None => true,
        Some(ids) => ids.iter().any(|id| id == page_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PageTestResult, Website};
    use crate::port::engine::mocks::{EngineScript, MockEngineFactory};
    use crate::port::job_store::mocks::MemoryJobStore;
    use crate::port::site_store::mocks::MemorySiteStore;
    use crate::port::time_provider::mocks::FixedTimeProvider;
    use crate::port::JobStore;

    fn site_with_pages() -> Arc<MemorySiteStore> {
        let sites = Arc::new(MemorySiteStore::new());
        sites.add_website(Website {
            website_id: "w1".into(),
            project_id: "p1".into(),
            name: "Example".into(),
            base_url: "https://example.test".into(),
            login_url: Some("https://example.test/login".into()),
        });
        for (page_id, url) in [("pg1", "/a"), ("pg2", "/b")] {
            sites.add_page(Page {
                page_id: page_id.into(),
                website_id: "w1".into(),
                url: url.into(),
                title: None,
                visible_to: vec!["guest".into()],
                last_tested_at: None,
                last_test_passed: None,
            });
        }
        sites
    }

    fn params(identities: Vec<Identity>, skip_completion: bool) -> TestingParams {
        TestingParams {
            job_id: "job-1".into(),
            website_id: "w1".into(),
            project_id: "p1".into(),
            page_ids: vec![],
            identities,
            run_ai_tests: false,
            ai_page_ids: None,
            take_screenshots: false,
            schedule_id: None,
            trigger: None,
            skip_completion,
        }
    }

    fn setup(
        script: EngineScript,
        sites: Arc<MemorySiteStore>,
    ) -> (Arc<MemoryJobStore>, Arc<MockEngineFactory>, TestingRunner) {
        let job_store = Arc::new(MemoryJobStore::new());
        let engine = Arc::new(MockEngineFactory::new(script));
        let time = Arc::new(FixedTimeProvider::new(5_000));
        let jobs = Arc::new(JobManager::new(job_store.clone(), time.clone()));
        let runner = TestingRunner::new(jobs, sites, engine.clone(), time);
        (job_store, engine, runner)
    }

    fn failing_result(url: &str) -> PageTestResult {
        PageTestResult {
            url: url.into(),
            passed: false,
            issue_count: 3,
            details: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn full_pass_updates_pages_and_completes_job() {
        let sites = site_with_pages();
        let mut script = EngineScript {
            logout_supported: true,
            ..Default::default()
        };
        script
            .test_results
            .insert("/b".into(), Ok(failing_result("/b")));
        let (job_store, _, runner) = setup(script, sites.clone());

        let summary = runner.run(params(vec![Identity::Guest], false)).await.unwrap();

        assert_eq!(summary.pages_tested, 2);
        assert_eq!(summary.pages_passed, 1);
        assert_eq!(summary.pages_failed, 1);

        let job = job_store.snapshot("job-1").unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result.as_ref().unwrap()["pages_passed"], 1);
        assert_eq!(job.progress.current, 2);
        assert_eq!(job.progress.total, 2);

        let pages = sites.all_pages();
        let a = pages.iter().find(|p| p.url == "/a").unwrap();
        assert_eq!(a.last_test_passed, Some(true));
        assert_eq!(a.last_tested_at, Some(5_000));
        let b = pages.iter().find(|p| p.url == "/b").unwrap();
        assert_eq!(b.last_test_passed, Some(false));
    }

    #[tokio::test]
    async fn skip_completion_leaves_job_running_and_progress_is_additive() {
        let sites = site_with_pages();
        let script = EngineScript {
            logout_supported: true,
            ..Default::default()
        };
        let (job_store, engine, runner) = setup(script, sites);

        // First pass holds the job open for the second
        let first = runner
            .run(params(vec![Identity::Guest], true))
            .await
            .unwrap();
        assert!(!first.cancelled);
        let job = job_store.snapshot("job-1").unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.progress.current, 2);

        let second = runner
            .run(params(vec![Identity::User("alice".into())], false))
            .await
            .unwrap();
        assert_eq!(second.pages_tested, 2);

        let job = job_store.snapshot("job-1").unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress.current, 4);
        assert_eq!(job.progress.total, 4);

        // One fresh session per pass, authenticated pass logged out
        let calls = engine.calls();
        assert_eq!(calls.sessions_opened, 2);
        assert_eq!(calls.closes, 2);
        assert_eq!(calls.logouts, 1);
    }

    #[tokio::test]
    async fn page_test_error_is_recorded_and_run_continues() {
        let sites = site_with_pages();
        let mut script = EngineScript {
            logout_supported: true,
            ..Default::default()
        };
        script
            .test_results
            .insert("/a".into(), Err("engine hiccup".into()));
        let (job_store, _, runner) = setup(script, sites.clone());

        let summary = runner.run(params(vec![Identity::Guest], false)).await.unwrap();

        assert_eq!(summary.pages_tested, 1);
        assert_eq!(summary.pages_failed, 1);
        assert_eq!(
            job_store.snapshot("job-1").unwrap().status,
            JobStatus::Completed
        );
        // The errored page is marked as a failed test, not left untouched
        let pages = sites.all_pages();
        let a = pages.iter().find(|p| p.url == "/a").unwrap();
        assert_eq!(a.last_tested_at, Some(5_000));
        assert_eq!(a.last_test_passed, Some(false));
    }

    /// Session that requests cancellation while testing the final page
    struct CancelDuringLastTestSession {
        store: Arc<MemoryJobStore>,
        pages_seen: u32,
        page_count: u32,
    }

    struct CancelDuringLastTestFactory {
        store: Arc<MemoryJobStore>,
        page_count: u32,
    }

    #[async_trait::async_trait]
    impl crate::port::EngineFactory for CancelDuringLastTestFactory {
        async fn open_session(&self) -> Result<Box<dyn EngineSession>> {
            Ok(Box::new(CancelDuringLastTestSession {
                store: self.store.clone(),
                pages_seen: 0,
                page_count: self.page_count,
            }))
        }
    }

    #[async_trait::async_trait]
    impl EngineSession for CancelDuringLastTestSession {
        async fn login(&mut self, _identity: &Identity) -> Result<crate::port::SessionOutcome> {
            Ok(crate::port::SessionOutcome::ok())
        }

        async fn logout(&mut self) -> Result<crate::port::SessionOutcome> {
            Ok(crate::port::SessionOutcome::ok())
        }

        async fn clear_cookies(&mut self) -> Result<()> {
            Ok(())
        }

        async fn start_crawl(&mut self, _website: &Website, _max_pages: u32) -> Result<()> {
            Ok(())
        }

        async fn next_page(&mut self) -> Result<Option<crate::domain::DiscoveredPage>> {
            Ok(None)
        }

        async fn test_page(
            &mut self,
            page: &Page,
            _options: &TestOptions,
        ) -> Result<PageTestResult> {
            self.pages_seen += 1;
            if self.pages_seen == self.page_count {
                self.store
                    .mark_cancellation_requested("job-1", Some("tester"), 6_000)
                    .await?;
            }
            Ok(PageTestResult {
                url: page.url.clone(),
                passed: true,
                issue_count: 0,
                details: serde_json::Value::Null,
            })
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn cancellation_during_final_page_finalizes_cancelled() {
        let sites = site_with_pages();
        let job_store = Arc::new(MemoryJobStore::new());
        let engine = Arc::new(CancelDuringLastTestFactory {
            store: job_store.clone(),
            page_count: 2,
        });
        let time = Arc::new(FixedTimeProvider::new(5_000));
        let jobs = Arc::new(JobManager::new(job_store.clone(), time.clone()));
        let runner = TestingRunner::new(jobs, sites, engine, time);

        // The flag lands inside test_page of the last page, after every
        // loop checkpoint has already passed
        let summary = runner.run(params(vec![Identity::Guest], false)).await.unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.pages_tested, 2);
        assert_eq!(
            job_store.snapshot("job-1").unwrap().status,
            JobStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn pre_cancelled_job_finalizes_without_testing() {
        let sites = site_with_pages();
        let script = EngineScript {
            logout_supported: true,
            ..Default::default()
        };
        let (job_store, engine, runner) = setup(script, sites);

        // Cancellation arrives before the pass starts
        let p = params(vec![Identity::Guest], false);
        runner
            .jobs
            .create_job(
                &p.job_id,
                JobType::Testing,
                JobScope::default(),
                JobMetadata::BulkTest { website_ids: vec![] },
            )
            .await
            .unwrap();
        job_store
            .mark_cancellation_requested("job-1", Some("tester"), 6_000)
            .await
            .unwrap();

        let summary = runner.run(p).await.unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.pages_tested, 0);
        assert_eq!(
            job_store.snapshot("job-1").unwrap().status,
            JobStatus::Cancelled
        );
        assert_eq!(engine.calls().sessions_opened, 0);
    }

    #[tokio::test]
    async fn cookies_cleared_when_site_has_no_logout() {
        let sites = site_with_pages();
        let script = EngineScript {
            logout_supported: false,
            ..Default::default()
        };
        let (_, engine, runner) = setup(script, sites);

        runner
            .run(params(vec![Identity::User("alice".into())], false))
            .await
            .unwrap();

        let calls = engine.calls();
        assert_eq!(calls.logouts, 1);
        assert_eq!(calls.cookie_clears, 1);
        assert_eq!(calls.closes, 1);
    }
}
