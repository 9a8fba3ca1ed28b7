// Discovery Runner
//
// Crawls a website once per identity and merges the results by canonical
// URL, so a page reachable both anonymously and behind a login becomes one
// record listing every identity that saw it.

use super::{close_session, end_identity, PassOutcome};
use crate::application::job_manager::JobManager;
use crate::domain::{
    DiscoveredPage, Identity, JobMetadata, JobScope, JobStatus, JobType, Website,
};
use crate::error::{AppError, Result};
use crate::port::{EngineFactory, EngineSession, SiteStore};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct DiscoveryParams {
    pub job_id: String,
    pub website_id: String,
    pub project_id: String,
    pub max_pages: u32,
    /// Identities to crawl as, in order; guest first by convention
    pub identities: Vec<Identity>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiscoverySummary {
    pub job_id: String,
    /// Distinct URLs across all identity passes
    pub pages_found: u32,
    pub cancelled: bool,
}

pub struct DiscoveryRunner {
    jobs: Arc<JobManager>,
    sites: Arc<dyn SiteStore>,
    engine: Arc<dyn EngineFactory>,
}

impl DiscoveryRunner {
    pub fn new(
        jobs: Arc<JobManager>,
        sites: Arc<dyn SiteStore>,
        engine: Arc<dyn EngineFactory>,
    ) -> Self {
        Self { jobs, sites, engine }
    }

    /// Run a full discovery job. Any error escaping the run finalizes the
    /// job as Failed before propagating.
    pub async fn run(&self, params: DiscoveryParams) -> Result<DiscoverySummary> {
        let job_id = params.job_id.clone();
        let outcome = self.run_inner(params).await;
        if let Err(e) = &outcome {
            error!(job_id = %job_id, error = %e, "Discovery run failed");
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

    async fn run_inner(&self, params: DiscoveryParams) -> Result<DiscoverySummary> {
        let website = self
            .sites
            .get_website(&params.website_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("Website {} not found", params.website_id))
            })?;

        let labels: Vec<String> = params
            .identities
            .iter()
            .map(|i| i.label().to_string())
            .collect();
        self.jobs
            .create_job(
                &params.job_id,
                JobType::Discovery,
                JobScope {
                    website_id: params.website_id.clone(),
                    project_id: params.project_id.clone(),
                    user_id: None,
                    session_id: None,
                },
                JobMetadata::Discovery {
                    max_pages: params.max_pages,
                    identities: labels.clone(),
                },
            )
            .await?;
        self.jobs
            .update_job_status(&params.job_id, JobStatus::Running, None, None, None)
            .await?;

        let mut merged: BTreeMap<String, DiscoveredPage> = BTreeMap::new();
        let mut cancelled = false;
        for identity in &params.identities {
            if self.jobs.is_cancellation_requested(&params.job_id).await? {
                cancelled = true;
                break;
            }
            let mut session = self.engine.open_session().await?;
            let pass = self
                .crawl_identity(&mut session, &website, identity, &params, &mut merged)
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

        // Persist everything found so far, cancelled runs included
        for page in merged.values() {
            self.sites.upsert_page(&params.website_id, page).await?;
        }

        // A request landing during the final page pull or the logout is
        // past every loop checkpoint; check once more before finalizing
        if !cancelled {
            cancelled = self.jobs.is_cancellation_requested(&params.job_id).await?;
        }

        let found = merged.len() as u32;
        if cancelled {
            info!(job_id = %params.job_id, pages_found = found, "Discovery cancelled");
            self.jobs
                .update_job_status(
                    &params.job_id,
                    JobStatus::Cancelled,
                    Some((found, found, "Discovery cancelled".to_string())),
                    None,
                    None,
                )
                .await?;
            return Ok(DiscoverySummary {
                job_id: params.job_id,
                pages_found: found,
                cancelled: true,
            });
        }

        let errored = merged.values().filter(|p| p.error.is_some()).count() as u32;
        let result = serde_json::json!({
            "pages_found": found,
            "pages_failed": errored,
            "identities": labels,
        });
        info!(job_id = %params.job_id, pages_found = found, "Discovery completed");
        let completed = self
            .jobs
            .update_job_status(
                &params.job_id,
                JobStatus::Completed,
                Some((found, found, "Discovery completed".to_string())),
                None,
                Some(result),
            )
            .await?;
        if !completed {
            // The store's Cancelling guard refused the write; resolve the
            // job instead of leaving it stranded
            warn!(job_id = %params.job_id, "Completion refused, finalizing as cancelled");
            self.jobs
                .update_job_status(&params.job_id, JobStatus::Cancelled, None, None, None)
                .await?;
            return Ok(DiscoverySummary {
                job_id: params.job_id,
                pages_found: found,
                cancelled: true,
            });
        }
        Ok(DiscoverySummary {
            job_id: params.job_id,
            pages_found: found,
            cancelled: false,
        })
    }

    async fn crawl_identity(
        &self,
        session: &mut Box<dyn EngineSession>,
        website: &Website,
        identity: &Identity,
        params: &DiscoveryParams,
        merged: &mut BTreeMap<String, DiscoveredPage>,
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

        session.start_crawl(website, params.max_pages).await?;
        while let Some(page) = session.next_page().await? {
            if let Some(page_error) = &page.error {
                warn!(url = %page.url, error = %page_error, "Page errored during discovery");
            }
            merge_page(merged, page, identity);

            let found = merged.len() as u32;
            self.jobs
                .update_job_progress(
                    &params.job_id,
                    found,
                    params.max_pages,
                    &format!("Crawling as {}", identity),
                    None,
                )
                .await?;
            if self.jobs.is_cancellation_requested(&params.job_id).await? {
                end_identity(session, identity).await?;
                return Ok(PassOutcome::CancelRequested);
            }
        }

        end_identity(session, identity).await?;
        Ok(PassOutcome::Finished)
    }
}

/// Merge one crawl result into the URL-keyed map. First discoverer wins the
/// title; visible_to accumulates identity labels in discovery order.
fn merge_page(
    merged: &mut BTreeMap<String, DiscoveredPage>,
    page: DiscoveredPage,
    identity: &Identity,
) {
    match merged.get_mut(&page.url) {
        Some(existing) => {
            if existing.title.is_none() {
                existing.title = page.title;
            }
            if existing.error.is_none() {
                existing.error = page.error;
            }
            for label in page.visible_to {
                if !existing.visible_to.contains(&label) {
                    existing.visible_to.push(label);
                }
            }
            let label = identity.label();
            if !existing.visible_to.iter().any(|l| l == label) {
                existing.visible_to.push(label.to_string());
            }
        }
        None => {
            let mut page = page;
            let label = identity.label();
            if !page.visible_to.iter().any(|l| l == label) {
                page.visible_to.push(label.to_string());
            }
            merged.insert(page.url.clone(), page);
        }
    }
}
