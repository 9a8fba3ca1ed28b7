// Site Store Port (Interface)
//
// Narrow read/write surface over business entities. Full Project/Website
// persistence lives elsewhere; the runners only need these calls.

use crate::domain::{DiscoveredPage, Page, ProjectUser, Website};
use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait SiteStore: Send + Sync {
    async fn get_website(&self, website_id: &str) -> Result<Option<Website>>;

    /// All known pages of a website
    async fn get_pages(&self, website_id: &str) -> Result<Vec<Page>>;

    async fn get_page(&self, page_id: &str) -> Result<Option<Page>>;

    /// Create-or-replace a page record keyed by (website_id, url); used by
    /// discovery to persist merged results
    async fn upsert_page(&self, website_id: &str, page: &DiscoveredPage) -> Result<Page>;

    /// Write back a mutated page record (test bookkeeping)
    async fn update_page(&self, page: &Page) -> Result<bool>;

    async fn get_project_user(&self, user_id: &str) -> Result<Option<ProjectUser>>;
}

// ============================================================================
// Mock Implementation for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MemorySiteStore {
        websites: Mutex<HashMap<String, Website>>,
        pages: Mutex<HashMap<String, Page>>,
        users: Mutex<HashMap<String, ProjectUser>>,
        next_page_id: Mutex<u64>,
    }

    impl MemorySiteStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn add_website(&self, website: Website) {
            self.websites
                .lock()
                .unwrap()
                .insert(website.website_id.clone(), website);
        }

        pub fn add_page(&self, page: Page) {
            self.pages.lock().unwrap().insert(page.page_id.clone(), page);
        }

        pub fn add_user(&self, user: ProjectUser) {
            self.users.lock().unwrap().insert(user.user_id.clone(), user);
        }

        pub fn all_pages(&self) -> Vec<Page> {
            let mut pages: Vec<Page> = self.pages.lock().unwrap().values().cloned().collect();
            pages.sort_by(|a, b| a.url.cmp(&b.url));
            pages
        }
    }

    #[async_trait]
    impl SiteStore for MemorySiteStore {
        async fn get_website(&self, website_id: &str) -> Result<Option<Website>> {
            Ok(self.websites.lock().unwrap().get(website_id).cloned())
        }

        async fn get_pages(&self, website_id: &str) -> Result<Vec<Page>> {
            let pages = self.pages.lock().unwrap();
            let mut found: Vec<Page> = pages
                .values()
                .filter(|p| p.website_id == website_id)
                .cloned()
                .collect();
            found.sort_by(|a, b| a.url.cmp(&b.url));
            Ok(found)
        }

        async fn get_page(&self, page_id: &str) -> Result<Option<Page>> {
            Ok(self.pages.lock().unwrap().get(page_id).cloned())
        }

        async fn upsert_page(&self, website_id: &str, page: &DiscoveredPage) -> Result<Page> {
            let mut pages = self.pages.lock().unwrap();
            let existing = pages
                .values_mut()
                .find(|p| p.website_id == website_id && p.url == page.url);
            if let Some(record) = existing {
                record.title = page.title.clone();
                record.visible_to = page.visible_to.clone();
                return Ok(record.clone());
            }
            let page_id = {
                let mut counter = self.next_page_id.lock().unwrap();
                *counter += 1;
                format!("page-{}", counter)
            };
            let record = Page {
                page_id: page_id.clone(),
                website_id: website_id.to_string(),
                url: page.url.clone(),
                title: page.title.clone(),
                visible_to: page.visible_to.clone(),
                last_tested_at: None,
                last_test_passed: None,
            };
            pages.insert(page_id, record.clone());
            Ok(record)
        }

        async fn update_page(&self, page: &Page) -> Result<bool> {
            let mut pages = self.pages.lock().unwrap();
            match pages.get_mut(&page.page_id) {
                Some(existing) => {
                    *existing = page.clone();
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        async fn get_project_user(&self, user_id: &str) -> Result<Option<ProjectUser>> {
            Ok(self.users.lock().unwrap().get(user_id).cloned())
        }
    }
}
