// SQLite SiteStore Implementation
//
// Pages are keyed logically by (website_id, url); upsert keeps the original
// page_id when discovery re-finds a known page.

use crate::job_store::map_sqlx_error;
use async_trait::async_trait;
use siteaudit_core::domain::{DiscoveredPage, Page, ProjectUser, Website};
use siteaudit_core::error::Result;
use siteaudit_core::port::{IdProvider, SiteStore};
use sqlx::SqlitePool;
use std::sync::Arc;

pub struct SqliteSiteStore {
    pool: SqlitePool,
    ids: Arc<dyn IdProvider>,
}

impl SqliteSiteStore {
    pub fn new(pool: SqlitePool, ids: Arc<dyn IdProvider>) -> Self {
        Self { pool, ids }
    }

    /// Seed a website record. Full website management belongs to the outer
    /// application; the orchestrator only needs rows to exist.
    pub async fn insert_website(&self, website: &Website) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO websites (website_id, project_id, name, base_url, login_url)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&website.website_id)
        .bind(&website.project_id)
        .bind(&website.name)
        .bind(&website.base_url)
        .bind(&website.login_url)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    /// Seed a project user record
    pub async fn insert_project_user(&self, user: &ProjectUser) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO project_users (user_id, username) VALUES (?, ?)")
            .bind(&user.user_id)
            .bind(&user.username)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}

#[async_trait]
impl SiteStore for SqliteSiteStore {
    async fn get_website(&self, website_id: &str) -> Result<Option<Website>> {
        let row = sqlx::query_as::<_, WebsiteRow>("SELECT * FROM websites WHERE website_id = ?")
            .bind(website_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.map(|r| r.into_domain()))
    }

    async fn get_pages(&self, website_id: &str) -> Result<Vec<Page>> {
        let rows = sqlx::query_as::<_, PageRow>(
            "SELECT * FROM pages WHERE website_id = ? ORDER BY url ASC",
        )
        .bind(website_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(|r| r.into_domain()).collect()
    }

    async fn get_page(&self, page_id: &str) -> Result<Option<Page>> {
        let row = sqlx::query_as::<_, PageRow>("SELECT * FROM pages WHERE page_id = ?")
            .bind(page_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(|r| r.into_domain()).transpose()
    }

    async fn upsert_page(&self, website_id: &str, page: &DiscoveredPage) -> Result<Page> {
        let visible_to = serde_json::to_string(&page.visible_to)?;
        let page_id = self.ids.generate_id();

        let row = sqlx::query_as::<_, PageRow>(
            r#"
            INSERT INTO pages (page_id, website_id, url, title, visible_to)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(website_id, url) DO UPDATE
            SET title = excluded.title, visible_to = excluded.visible_to
            RETURNING *
            "#,
        )
        .bind(page_id)
        .bind(website_id)
        .bind(&page.url)
        .bind(&page.title)
        .bind(visible_to)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.into_domain()
    }

    async fn update_page(&self, page: &Page) -> Result<bool> {
        let visible_to = serde_json::to_string(&page.visible_to)?;
        let result = sqlx::query(
            r#"
            UPDATE pages
            SET title = ?, visible_to = ?, last_tested_at = ?, last_test_passed = ?
            WHERE page_id = ?
            "#,
        )
        .bind(&page.title)
        .bind(visible_to)
        .bind(page.last_tested_at)
        .bind(page.last_test_passed.map(|p| if p { 1 } else { 0 }))
        .bind(&page.page_id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_project_user(&self, user_id: &str) -> Result<Option<ProjectUser>> {
        let row = sqlx::query_as::<_, (String, String)>(
            "SELECT user_id, username FROM project_users WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(|(user_id, username)| ProjectUser { user_id, username }))
    }
}

#[derive(Debug, sqlx::FromRow)]
struct WebsiteRow {
    website_id: String,
    project_id: String,
    name: String,
    base_url: String,
    login_url: Option<String>,
}

impl WebsiteRow {
    fn into_domain(self) -> Website {
        Website {
            website_id: self.website_id,
            project_id: self.project_id,
            name: self.name,
            base_url: self.base_url,
            login_url: self.login_url,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PageRow {
    page_id: String,
    website_id: String,
    url: String,
    title: Option<String>,
    visible_to: String,
    last_tested_at: Option<i64>,
    last_test_passed: Option<i32>,
}

impl PageRow {
    fn into_domain(self) -> Result<Page> {
        Ok(Page {
            page_id: self.page_id,
            website_id: self.website_id,
            url: self.url,
            title: self.title,
            visible_to: serde_json::from_str(&self.visible_to)?,
            last_tested_at: self.last_tested_at,
            last_test_passed: self.last_test_passed.map(|p| p != 0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};
    use siteaudit_core::port::id_provider::mocks::SequentialIdProvider;

    async fn setup_store() -> SqliteSiteStore {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        SqliteSiteStore::new(pool, Arc::new(SequentialIdProvider::new("page")))
    }

    fn discovered(url: &str, visible_to: &[&str]) -> DiscoveredPage {
        DiscoveredPage {
            url: url.into(),
            title: Some("Title".into()),
            visible_to: visible_to.iter().map(|s| s.to_string()).collect(),
            error: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_keeps_page_id_for_known_urls() {
        let store = setup_store().await;

        let first = store
            .upsert_page("w1", &discovered("/a", &["guest"]))
            .await
            .unwrap();
        assert_eq!(first.page_id, "page-1");
        assert_eq!(first.visible_to, vec!["guest".to_string()]);

        // Re-discovery with more identities updates in place
        let second = store
            .upsert_page("w1", &discovered("/a", &["guest", "alice"]))
            .await
            .unwrap();
        assert_eq!(second.page_id, "page-1");
        assert_eq!(
            second.visible_to,
            vec!["guest".to_string(), "alice".to_string()]
        );

        // Same url on another website is a separate record
        let other = store
            .upsert_page("w2", &discovered("/a", &["guest"]))
            .await
            .unwrap();
        assert_ne!(other.page_id, "page-1");

        assert_eq!(store.get_pages("w1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_page_bookkeeping() {
        let store = setup_store().await;
        let mut page = store
            .upsert_page("w1", &discovered("/a", &["guest"]))
            .await
            .unwrap();

        page.last_tested_at = Some(42_000);
        page.last_test_passed = Some(false);
        assert!(store.update_page(&page).await.unwrap());

        let loaded = store.get_page(&page.page_id).await.unwrap().unwrap();
        assert_eq!(loaded.last_tested_at, Some(42_000));
        assert_eq!(loaded.last_test_passed, Some(false));

        page.page_id = "missing".into();
        assert!(!store.update_page(&page).await.unwrap());
    }

    #[tokio::test]
    async fn test_website_and_user_lookup() {
        let store = setup_store().await;
        store
            .insert_website(&Website {
                website_id: "w1".into(),
                project_id: "p1".into(),
                name: "Example".into(),
                base_url: "https://example.test".into(),
                login_url: None,
            })
            .await
            .unwrap();
        store
            .insert_project_user(&ProjectUser {
                user_id: "u1".into(),
                username: "alice".into(),
            })
            .await
            .unwrap();

        assert!(store.get_website("w1").await.unwrap().is_some());
        assert!(store.get_website("w2").await.unwrap().is_none());
        let user = store.get_project_user("u1").await.unwrap().unwrap();
        assert_eq!(user.username, "alice");
        assert!(store.get_project_user("u2").await.unwrap().is_none());
    }
}
