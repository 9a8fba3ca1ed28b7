// SQLite ScheduleStore Implementation

use crate::job_store::{is_unique_violation, map_sqlx_error};
use async_trait::async_trait;
use siteaudit_core::domain::Schedule;
use siteaudit_core::error::{AppError, Result};
use siteaudit_core::port::ScheduleStore;
use sqlx::SqlitePool;

pub struct SqliteScheduleStore {
    pool: SqlitePool,
}

impl SqliteScheduleStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScheduleStore for SqliteScheduleStore {
    async fn insert(&self, schedule: &Schedule) -> Result<()> {
        let recurrence = serde_json::to_string(&schedule.recurrence)?;
        let test_config = serde_json::to_string(&schedule.test_config)?;
        let project_user_ids = serde_json::to_string(&schedule.project_user_ids)?;

        sqlx::query(
            r#"
            INSERT INTO schedules (
                schedule_id, name, website_id, enabled,
                recurrence, test_config, project_user_ids,
                last_job_id, last_run_status, next_run_at,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&schedule.schedule_id)
        .bind(&schedule.name)
        .bind(&schedule.website_id)
        .bind(if schedule.enabled { 1 } else { 0 })
        .bind(recurrence)
        .bind(test_config)
        .bind(project_user_ids)
        .bind(&schedule.last_job_id)
        .bind(&schedule.last_run_status)
        .bind(schedule.next_run_at)
        .bind(schedule.created_at)
        .bind(schedule.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict(format!("Schedule {} already exists", schedule.schedule_id))
            } else {
                map_sqlx_error(e)
            }
        })?;

        Ok(())
    }

    async fn update(&self, schedule: &Schedule) -> Result<bool> {
        let recurrence = serde_json::to_string(&schedule.recurrence)?;
        let test_config = serde_json::to_string(&schedule.test_config)?;
        let project_user_ids = serde_json::to_string(&schedule.project_user_ids)?;

        let result = sqlx::query(
            r#"
            UPDATE schedules
            SET name = ?, website_id = ?, enabled = ?,
                recurrence = ?, test_config = ?, project_user_ids = ?,
                updated_at = ?
            WHERE schedule_id = ?
            "#,
        )
        .bind(&schedule.name)
        .bind(&schedule.website_id)
        .bind(if schedule.enabled { 1 } else { 0 })
        .bind(recurrence)
        .bind(test_config)
        .bind(project_user_ids)
        .bind(schedule.updated_at)
        .bind(&schedule.schedule_id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM schedules WHERE schedule_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Schedule>> {
        let row =
            sqlx::query_as::<_, ScheduleRow>("SELECT * FROM schedules WHERE schedule_id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        row.map(|r| r.into_domain()).transpose()
    }

    async fn find_enabled(&self) -> Result<Vec<Schedule>> {
        let rows = sqlx::query_as::<_, ScheduleRow>(
            "SELECT * FROM schedules WHERE enabled = 1 ORDER BY schedule_id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(|r| r.into_domain()).collect()
    }

    async fn set_enabled(&self, id: &str, enabled: bool, now: i64) -> Result<bool> {
        let result =
            sqlx::query("UPDATE schedules SET enabled = ?, updated_at = ? WHERE schedule_id = ?")
                .bind(if enabled { 1 } else { 0 })
                .bind(now)
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_next_run_at(&self, id: &str, next_run_at: Option<i64>, now: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE schedules SET next_run_at = ?, updated_at = ? WHERE schedule_id = ?",
        )
        .bind(next_run_at)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_run(&self, id: &str, job_id: &str, status: &str, now: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE schedules
            SET last_job_id = ?, last_run_status = ?, updated_at = ?
            WHERE schedule_id = ?
            "#,
        )
        .bind(job_id)
        .bind(status)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ScheduleRow {
    schedule_id: String,
    name: String,
    website_id: String,
    enabled: i32, // SQLite boolean as integer
    recurrence: String,
    test_config: String,
    project_user_ids: String,
    last_job_id: Option<String>,
    last_run_status: Option<String>,
    next_run_at: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

impl ScheduleRow {
    fn into_domain(self) -> Result<Schedule> {
        Ok(Schedule {
            schedule_id: self.schedule_id,
            name: self.name,
            website_id: self.website_id,
            enabled: self.enabled != 0,
            recurrence: serde_json::from_str(&self.recurrence)?,
            test_config: serde_json::from_str(&self.test_config)?,
            project_user_ids: serde_json::from_str(&self.project_user_ids)?,
            last_job_id: self.last_job_id,
            last_run_status: self.last_run_status,
            next_run_at: self.next_run_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};
    use siteaudit_core::domain::Recurrence;

    async fn setup_test_db() -> SqlitePool {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    fn test_schedule(id: &str) -> Schedule {
        let mut s = Schedule::new(
            id,
            "nightly",
            "w1",
            Recurrence::Weekly {
                time: "02:30".into(),
                day_of_week: 3,
                timezone: "Europe/Berlin".into(),
            },
            1_000,
        );
        s.project_user_ids = vec!["u1".into(), "u2".into()];
        s
    }

    #[tokio::test]
    async fn test_insert_find_roundtrip() {
        let store = SqliteScheduleStore::new(setup_test_db().await);
        let schedule = test_schedule("s1");
        store.insert(&schedule).await.unwrap();

        let found = store.find_by_id("s1").await.unwrap().unwrap();
        assert_eq!(found.recurrence, schedule.recurrence);
        assert_eq!(found.test_config, schedule.test_config);
        assert_eq!(found.project_user_ids, schedule.project_user_ids);
        assert!(found.enabled);

        let err = store.insert(&schedule).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_find_enabled_excludes_disabled() {
        let store = SqliteScheduleStore::new(setup_test_db().await);
        store.insert(&test_schedule("s1")).await.unwrap();
        store.insert(&test_schedule("s2")).await.unwrap();
        assert!(store.set_enabled("s2", false, 2_000).await.unwrap());

        let enabled = store.find_enabled().await.unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].schedule_id, "s1");
    }

    #[tokio::test]
    async fn test_bookkeeping_updates() {
        let store = SqliteScheduleStore::new(setup_test_db().await);
        store.insert(&test_schedule("s1")).await.unwrap();

        assert!(store.set_next_run_at("s1", Some(9_000), 2_000).await.unwrap());
        assert!(store.record_run("s1", "job-7", "COMPLETED", 3_000).await.unwrap());

        let s = store.find_by_id("s1").await.unwrap().unwrap();
        assert_eq!(s.next_run_at, Some(9_000));
        assert_eq!(s.last_job_id.as_deref(), Some("job-7"));
        assert_eq!(s.last_run_status.as_deref(), Some("COMPLETED"));
        assert_eq!(s.updated_at, 3_000);

        // Unknown ids modify nothing
        assert!(!store.record_run("nope", "j", "FAILED", 4_000).await.unwrap());
        assert!(!store.delete("nope").await.unwrap());
        assert!(store.delete("s1").await.unwrap());
    }
}
