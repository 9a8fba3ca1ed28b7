// Engine Port (Interface)
//
// Abstraction over the out-of-process browser worker. A session wraps one
// fresh browser context; authentication state lives in the session and must
// never leak between identities, so runners open a new session per identity.
//
// Crawling is a pull model: start_crawl() then next_page() until None. That
// puts every suspension point at a page boundary, which is where the
// cancellation checkpoints live.

use crate::domain::{DiscoveredPage, Identity, Page, PageTestResult, Website};
use crate::error::Result;
use async_trait::async_trait;

/// Result of a login/logout attempt
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub success: bool,
    pub error: Option<String>,
}

impl SessionOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Per-page test options, resolved by the runner from the schedule config
#[derive(Debug, Clone, Default)]
pub struct TestOptions {
    pub run_ai_tests: bool,
    pub take_screenshots: bool,
}

/// Hands out fresh engine sessions (one browser context each)
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn open_session(&self) -> Result<Box<dyn EngineSession>>;
}

/// One browser context worth of engine operations
#[async_trait]
pub trait EngineSession: Send {
    /// Authenticate as a named identity. Guest is a no-op success.
    async fn login(&mut self, identity: &Identity) -> Result<SessionOutcome>;

    /// End the authenticated session. A non-success outcome means the site
    /// has no logout mechanism; callers fall back to clear_cookies.
    async fn logout(&mut self) -> Result<SessionOutcome>;

    /// Drop all cookies - the logout fallback
    async fn clear_cookies(&mut self) -> Result<()>;

    /// Begin crawling the website under the current authentication state
    async fn start_crawl(&mut self, website: &Website, max_pages: u32) -> Result<()>;

    /// Pull the next discovered page; None when the crawl is exhausted
    async fn next_page(&mut self) -> Result<Option<DiscoveredPage>>;

    /// Run the configured checks against one page
    async fn test_page(&mut self, page: &Page, options: &TestOptions) -> Result<PageTestResult>;

    /// Release the browser context. Always called, even on failure paths.
    async fn close(&mut self) -> Result<()>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    /// Scripted behavior shared between the factory and its sessions
    #[derive(Default)]
    pub struct EngineScript {
        /// Crawl results per identity label; Err entries simulate a crawl
        /// failure at that position
        pub crawl_pages: HashMap<String, Vec<std::result::Result<DiscoveredPage, String>>>,
        /// Test results per page url; absent urls pass with zero issues
        pub test_results: HashMap<String, std::result::Result<PageTestResult, String>>,
        /// Identity labels whose login fails
        pub login_failures: Vec<String>,
        /// When false, logout() reports no logout mechanism
        pub logout_supported: bool,
    }

    #[derive(Default)]
    pub struct EngineCalls {
        pub sessions_opened: u32,
        pub logins: Vec<String>,
        pub logouts: u32,
        pub cookie_clears: u32,
        pub closes: u32,
        pub pages_tested: Vec<String>,
    }

    /// Factory handing out sessions that follow one shared script
    pub struct MockEngineFactory {
        script: Arc<Mutex<EngineScript>>,
        calls: Arc<Mutex<EngineCalls>>,
    }

    impl MockEngineFactory {
        pub fn new(script: EngineScript) -> Self {
            Self {
                script: Arc::new(Mutex::new(script)),
                calls: Arc::new(Mutex::new(EngineCalls::default())),
            }
        }

        /// Factory whose crawls return nothing and whose tests all pass
        pub fn passing() -> Self {
            Self::new(EngineScript {
                logout_supported: true,
                ..Default::default()
            })
        }

        pub fn calls(&self) -> std::sync::MutexGuard<'_, EngineCalls> {
            self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl EngineFactory for MockEngineFactory {
        async fn open_session(&self) -> Result<Box<dyn EngineSession>> {
            self.calls.lock().unwrap().sessions_opened += 1;
            Ok(Box::new(MockEngineSession {
                script: Arc::clone(&self.script),
                calls: Arc::clone(&self.calls),
                identity: Identity::Guest,
                crawl_queue: VecDeque::new(),
                closed: false,
            }))
        }
    }

    pub struct MockEngineSession {
        script: Arc<Mutex<EngineScript>>,
        calls: Arc<Mutex<EngineCalls>>,
        identity: Identity,
        crawl_queue: VecDeque<std::result::Result<DiscoveredPage, String>>,
        closed: bool,
    }

    #[async_trait]
    impl EngineSession for MockEngineSession {
        async fn login(&mut self, identity: &Identity) -> Result<SessionOutcome> {
            self.identity = identity.clone();
            self.calls
                .lock()
                .unwrap()
                .logins
                .push(identity.label().to_string());
            let script = self.script.lock().unwrap();
            if script
                .login_failures
                .iter()
                .any(|l| l == identity.label())
            {
                return Ok(SessionOutcome::failed("invalid credentials"));
            }
            Ok(SessionOutcome::ok())
        }

        async fn logout(&mut self) -> Result<SessionOutcome> {
            self.calls.lock().unwrap().logouts += 1;
            if self.script.lock().unwrap().logout_supported {
                Ok(SessionOutcome::ok())
            } else {
                Ok(SessionOutcome::failed("no logout mechanism configured"))
            }
        }

        async fn clear_cookies(&mut self) -> Result<()> {
            self.calls.lock().unwrap().cookie_clears += 1;
            Ok(())
        }

        async fn start_crawl(&mut self, _website: &Website, max_pages: u32) -> Result<()> {
            let script = self.script.lock().unwrap();
            let pages = script
                .crawl_pages
                .get(self.identity.label())
                .cloned()
                .unwrap_or_default();
            self.crawl_queue = pages.into_iter().take(max_pages as usize).collect();
            Ok(())
        }

        async fn next_page(&mut self) -> Result<Option<DiscoveredPage>> {
            match self.crawl_queue.pop_front() {
                Some(Ok(page)) => Ok(Some(page)),
                Some(Err(msg)) => Err(AppError::Engine(msg)),
                None => Ok(None),
            }
        }

        async fn test_page(
            &mut self,
            page: &Page,
            _options: &TestOptions,
        ) -> Result<PageTestResult> {
            self.calls
                .lock()
                .unwrap()
                .pages_tested
                .push(page.url.clone());
            let script = self.script.lock().unwrap();
            match script.test_results.get(&page.url) {
                Some(Ok(result)) => Ok(result.clone()),
                Some(Err(msg)) => Err(AppError::Engine(msg.clone())),
                None => Ok(PageTestResult {
                    url: page.url.clone(),
                    passed: true,
                    issue_count: 0,
                    details: serde_json::Value::Null,
                }),
            }
        }

        async fn close(&mut self) -> Result<()> {
            if !self.closed {
                self.closed = true;
                self.calls.lock().unwrap().closes += 1;
            }
            Ok(())
        }
    }

    /// Helper for building scripted crawl pages
    pub fn page(url: &str, seen_by: &str) -> DiscoveredPage {
        DiscoveredPage {
            url: url.to_string(),
            title: None,
            visible_to: vec![seen_by.to_string()],
            error: None,
        }
    }
}
