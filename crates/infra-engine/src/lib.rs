// Site Audit Infrastructure - Browser Worker Adapter
//
// The crawl/test engine runs out of process as an HTTP sidecar that owns
// the actual browser contexts. This adapter maps the EngineFactory and
// EngineSession ports onto its JSON API: one remote session per
// EngineSession, crawling as a pull of one page per request.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use siteaudit_core::domain::{DiscoveredPage, Identity, Page, PageTestResult, Website};
use siteaudit_core::error::{AppError, Result};
use siteaudit_core::port::{EngineFactory, EngineSession, SessionOutcome, TestOptions};
use std::time::Duration;
use tracing::debug;

fn map_reqwest_error(err: reqwest::Error) -> AppError {
    AppError::Engine(format!("Browser worker request failed: {}", err))
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(AppError::Engine(format!(
        "Browser worker error {}: {}",
        status, body
    )))
}

#[derive(Debug, Deserialize)]
struct SessionCreated {
    session_id: String,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    /// None logs in anonymously (the worker just opens a blank context)
    username: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct OutcomeResponse {
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct CrawlRequest<'a> {
    website_id: &'a str,
    base_url: &'a str,
    login_url: Option<&'a str>,
    max_pages: u32,
}

#[derive(Debug, Deserialize)]
struct NextPageResponse {
    /// None when the crawl frontier is exhausted
    page: Option<DiscoveredPage>,
}

#[derive(Debug, Serialize)]
struct TestRequest<'a> {
    url: &'a str,
    run_ai_tests: bool,
    take_screenshots: bool,
}

/// Factory opening sessions against one browser worker instance
pub struct HttpEngineFactory {
    base_url: String,
    client: reqwest::Client,
}

impl HttpEngineFactory {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| AppError::Engine(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl EngineFactory for HttpEngineFactory {
    async fn open_session(&self) -> Result<Box<dyn EngineSession>> {
        let response = self
            .client
            .post(format!("{}/sessions", self.base_url))
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let created: SessionCreated = check_status(response)
            .await?
            .json()
            .await
            .map_err(map_reqwest_error)?;

        debug!(session_id = %created.session_id, "Browser worker session opened");
        Ok(Box::new(HttpEngineSession {
            client: self.client.clone(),
            session_url: format!("{}/sessions/{}", self.base_url, created.session_id),
            closed: false,
        }))
    }
}

pub struct HttpEngineSession {
    client: reqwest::Client,
    session_url: String,
    closed: bool,
}

impl HttpEngineSession {
    async fn post_outcome<B: Serialize>(&self, path: &str, body: &B) -> Result<SessionOutcome> {
        let response = self
            .client
            .post(format!("{}/{}", self.session_url, path))
            .json(body)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let outcome: OutcomeResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(map_reqwest_error)?;
        Ok(if outcome.success {
            SessionOutcome::ok()
        } else {
            SessionOutcome::failed(outcome.error.unwrap_or_else(|| "unknown".to_string()))
        })
    }
}

#[async_trait]
impl EngineSession for HttpEngineSession {
    async fn login(&mut self, identity: &Identity) -> Result<SessionOutcome> {
        // Guests never authenticate; the fresh context is already anonymous
        if identity.is_guest() {
            return Ok(SessionOutcome::ok());
        }
        self.post_outcome(
            "login",
            &LoginRequest {
                username: Some(identity.label()),
            },
        )
        .await
    }

    async fn logout(&mut self) -> Result<SessionOutcome> {
        self.post_outcome("logout", &serde_json::json!({})).await
    }

    async fn clear_cookies(&mut self) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/cookies/clear", self.session_url))
            .send()
            .await
            .map_err(map_reqwest_error)?;
        check_status(response).await?;
        Ok(())
    }

    async fn start_crawl(&mut self, website: &Website, max_pages: u32) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/crawl", self.session_url))
            .json(&CrawlRequest {
                website_id: &website.website_id,
                base_url: &website.base_url,
                login_url: website.login_url.as_deref(),
                max_pages,
            })
            .send()
            .await
            .map_err(map_reqwest_error)?;
        check_status(response).await?;
        Ok(())
    }

    async fn next_page(&mut self) -> Result<Option<DiscoveredPage>> {
        let response = self
            .client
            .post(format!("{}/crawl/next", self.session_url))
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let next: NextPageResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(map_reqwest_error)?;
        Ok(next.page)
    }

    async fn test_page(&mut self, page: &Page, options: &TestOptions) -> Result<PageTestResult> {
        let response = self
            .client
            .post(format!("{}/test", self.session_url))
            .json(&TestRequest {
                url: &page.url,
                run_ai_tests: options.run_ai_tests,
                take_screenshots: options.take_screenshots,
            })
            .send()
            .await
            .map_err(map_reqwest_error)?;
        check_status(response)
            .await?
            .json()
            .await
            .map_err(map_reqwest_error)
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let response = self
            .client
            .delete(&self.session_url)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        check_status(response).await?;
        self.closed = true;
        debug!(session = %self.session_url, "Browser worker session closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_normalizes_trailing_slash() {
        let factory = HttpEngineFactory::new("http://localhost:9222/").unwrap();
        assert_eq!(factory.base_url, "http://localhost:9222");
    }

    #[test]
    fn next_page_response_handles_exhausted_crawl() {
        let next: NextPageResponse = serde_json::from_str(r#"{"page": null}"#).unwrap();
        assert!(next.page.is_none());

        let next: NextPageResponse = serde_json::from_str(
            r#"{"page": {"url": "/a", "title": "A", "visible_to": ["guest"], "error": null}}"#,
        )
        .unwrap();
        assert_eq!(next.page.unwrap().url, "/a");
    }

    #[test]
    fn outcome_response_defaults_error_to_none() {
        let outcome: OutcomeResponse = serde_json::from_str(r#"{"success": true}"#).unwrap();
        assert!(outcome.success);
        assert!(outcome.error.is_none());
    }
}
