// SQLite JobStore Implementation
//
// Every conditional transition is a single UPDATE carrying its own guard,
// so concurrent callers race inside SQLite instead of in application code.

use async_trait::async_trait;
use siteaudit_core::domain::{Job, JobFilter, JobProgress, JobStatistics, JobStatus};
use siteaudit_core::error::{AppError, Result};
use siteaudit_core::port::JobStore;
use sqlx::SqlitePool;

// Helper to convert sqlx::Error to AppError with structured information
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => {
            // Extract database-specific error code and message
            if let Some(code) = db_err.code() {
                let code_str = code.as_ref();

                // SQLite error codes: https://www.sqlite.org/rescode.html
                match code_str {
                    "2067" | "1555" => AppError::Database(format!(
                        "Unique constraint violation: {} ({})",
                        db_err.message(),
                        code_str
                    )),
                    "787" | "3850" => AppError::Database(format!(
                        "Foreign key constraint violation: {} ({})",
                        db_err.message(),
                        code_str
                    )),
                    "5" => AppError::Database(format!(
                        "Database locked (SQLITE_BUSY): {}",
                        db_err.message()
                    )),
                    "13" => AppError::Database(format!("Database full: {}", db_err.message())),
                    _ => AppError::Database(format!(
                        "Database error [{}]: {}",
                        code_str,
                        db_err.message()
                    )),
                }
            } else {
                AppError::Database(format!("Database error: {}", db_err.message()))
            }
        }
        sqlx::Error::RowNotFound => AppError::Database("Row not found".to_string()),
        sqlx::Error::ColumnNotFound(col) => {
            AppError::Database(format!("Column not found: {}", col))
        }
        _ => AppError::Database(err.to_string()),
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err)
            if db_err
                .code()
                .map(|c| c.as_ref() == "2067" || c.as_ref() == "1555")
                .unwrap_or(false)
    )
}

const TERMINAL: &str = "('COMPLETED', 'FAILED', 'CANCELLED')";

pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn insert(&self, job: &Job) -> Result<()> {
        let progress = serde_json::to_string(&job.progress)?;
        let metadata = serde_json::to_string(&job.metadata)?;
        let result = job.result.as_ref().map(|r| r.to_string());

        sqlx::query(
            r#"
            INSERT INTO jobs (
                job_id, job_type, status,
                website_id, project_id, user_id, session_id,
                created_at, updated_at, started_at, completed_at,
                progress, metadata, error, result,
                cancellation_requested, cancellation_requested_at, cancellation_requested_by,
                lock_holder, lock_acquired_at, lock_expiry
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.job_id)
        .bind(job.job_type.to_string())
        .bind(job.status.to_string())
        .bind(&job.website_id)
        .bind(&job.project_id)
        .bind(&job.user_id)
        .bind(&job.session_id)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(progress)
        .bind(metadata)
        .bind(&job.error)
        .bind(result)
        .bind(if job.cancellation_requested { 1 } else { 0 })
        .bind(job.cancellation_requested_at)
        .bind(&job.cancellation_requested_by)
        .bind(&job.lock_holder)
        .bind(job.lock_acquired_at)
        .bind(job.lock_expiry)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict(format!("Job {} already exists", job.job_id))
            } else {
                map_sqlx_error(e)
            }
        })?;

        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE job_id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(|r| r.into_domain()).transpose()
    }

    async fn find_active(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let mut sql =
            String::from("SELECT * FROM jobs WHERE status IN ('PENDING', 'RUNNING')");
        let binds = push_filter_clauses(&mut sql, filter);
        sql.push_str(" ORDER BY created_at ASC");

        let mut query = sqlx::query_as::<_, JobRow>(&sql);
        for bind in &binds {
            query = query.bind(bind.as_str());
        }
        let rows = query.fetch_all(&self.pool).await.map_err(map_sqlx_error)?;

        rows.into_iter().map(|r| r.into_domain()).collect()
    }

    async fn set_status(
        &self,
        id: &str,
        status: JobStatus,
        error: Option<&str>,
        result: Option<&serde_json::Value>,
        now: i64,
    ) -> Result<bool> {
        let status_str = status.to_string();
        let result_str = result.map(|r| r.to_string());

        // The WHERE clause is the whole state machine: terminal rows never
        // move, Cancelling only resolves to Cancelled/Failed, and nothing
        // moves back to Pending
        let query = sqlx::query(&format!(
            r#"
            UPDATE jobs
            SET status = ?,
                started_at = CASE WHEN ? = 'RUNNING' AND started_at IS NULL THEN ? ELSE started_at END,
                completed_at = CASE WHEN ? IN {terminal} AND completed_at IS NULL THEN ? ELSE completed_at END,
                error = COALESCE(?, error),
                result = COALESCE(?, result),
                updated_at = ?
            WHERE job_id = ?
              AND status NOT IN {terminal}
              AND (status <> 'CANCELLING' OR ? IN ('CANCELLED', 'FAILED'))
              AND ? <> 'PENDING'
            "#,
            terminal = TERMINAL
        ))
        .bind(&status_str)
        .bind(&status_str)
        .bind(now)
        .bind(&status_str)
        .bind(now)
        .bind(error)
        .bind(result_str)
        .bind(now)
        .bind(id)
        .bind(&status_str)
        .bind(&status_str)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(query.rows_affected() > 0)
    }

    async fn set_progress(&self, id: &str, progress: &JobProgress, now: i64) -> Result<bool> {
        let progress_str = serde_json::to_string(progress)?;
        let result = sqlx::query("UPDATE jobs SET progress = ?, updated_at = ? WHERE job_id = ?")
            .bind(progress_str)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_cancellation_requested(
        &self,
        id: &str,
        requested_by: Option<&str>,
        now: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET cancellation_requested = 1,
                cancellation_requested_at = ?,
                cancellation_requested_by = ?,
                status = 'CANCELLING',
                updated_at = ?
            WHERE job_id = ? AND status IN ('PENDING', 'RUNNING')
            "#,
        )
        .bind(now)
        .bind(requested_by)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn try_acquire_lock(
        &self,
        id: &str,
        holder: &str,
        timeout_ms: i64,
        now: i64,
    ) -> Result<bool> {
        // One compare-and-swap with one `now`: the staleness comparison and
        // the stored acquisition time cannot disagree
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET lock_holder = ?, lock_acquired_at = ?, lock_expiry = ?
            WHERE job_id = ?
              AND (lock_holder IS NULL OR lock_acquired_at IS NULL OR lock_acquired_at < ?)
            "#,
        )
        .bind(holder)
        .bind(now)
        .bind(now + timeout_ms)
        .bind(id)
        .bind(now - timeout_ms)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn release_lock(&self, id: &str, holder: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET lock_holder = NULL, lock_acquired_at = NULL, lock_expiry = NULL
            WHERE job_id = ? AND lock_holder = ?
            "#,
        )
        .bind(id)
        .bind(holder)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn fail_stale(&self, cutoff: i64, error: &str, now: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'FAILED', error = ?, completed_at = ?, updated_at = ?
            WHERE status IN ('RUNNING', 'CANCELLING') AND updated_at < ?
            "#,
        )
        .bind(error)
        .bind(now)
        .bind(now)
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn delete_terminal_before(&self, status: JobStatus, cutoff: i64) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM jobs WHERE status = ? AND completed_at IS NOT NULL AND completed_at < ?",
        )
        .bind(status.to_string())
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn aggregate_statistics(&self, filter: &JobFilter, since: i64) -> Result<JobStatistics> {
        let mut stats = JobStatistics::default();

        let mut status_sql =
            String::from("SELECT status, COUNT(*) FROM jobs WHERE created_at >= ?");
        let binds = push_filter_clauses(&mut status_sql, filter);
        status_sql.push_str(" GROUP BY status");
        let mut query = sqlx::query_as::<_, (String, i64)>(&status_sql).bind(since);
        for bind in &binds {
            query = query.bind(bind.as_str());
        }
        for (status, count) in query.fetch_all(&self.pool).await.map_err(map_sqlx_error)? {
            stats.total_jobs += count;
            stats.by_status.insert(status, count);
        }

        let mut type_sql =
            String::from("SELECT job_type, COUNT(*) FROM jobs WHERE created_at >= ?");
        push_filter_clauses(&mut type_sql, filter);
        type_sql.push_str(" GROUP BY job_type");
        let mut query = sqlx::query_as::<_, (String, i64)>(&type_sql).bind(since);
        for bind in &binds {
            query = query.bind(bind.as_str());
        }
        for (job_type, count) in query.fetch_all(&self.pool).await.map_err(map_sqlx_error)? {
            stats.by_type.insert(job_type, count);
        }

        let mut avg_sql = String::from(
            "SELECT AVG(completed_at - started_at) FROM jobs \
             WHERE created_at >= ? AND started_at IS NOT NULL AND completed_at IS NOT NULL",
        );
        push_filter_clauses(&mut avg_sql, filter);
        let mut query = sqlx::query_scalar::<_, Option<f64>>(&avg_sql).bind(since);
        for bind in &binds {
            query = query.bind(bind.as_str());
        }
        stats.average_duration_ms = query
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(stats)
    }
}

/// Append the filter's AND clauses and return the bind values in order
fn push_filter_clauses(sql: &mut String, filter: &JobFilter) -> Vec<String> {
    let mut binds = Vec::new();
    if let Some(job_type) = filter.job_type {
        sql.push_str(" AND job_type = ?");
        binds.push(job_type.to_string());
    }
    if let Some(website_id) = &filter.website_id {
        sql.push_str(" AND website_id = ?");
        binds.push(website_id.clone());
    }
    if let Some(project_id) = &filter.project_id {
        sql.push_str(" AND project_id = ?");
        binds.push(project_id.clone());
    }
    if let Some(user_id) = &filter.user_id {
        sql.push_str(" AND user_id = ?");
        binds.push(user_id.clone());
    }
    binds
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    job_id: String,
    job_type: String,
    status: String,
    website_id: String,
    project_id: String,
    user_id: Option<String>,
    session_id: Option<String>,
    created_at: i64,
    updated_at: i64,
    started_at: Option<i64>,
    completed_at: Option<i64>,
    progress: String,
    metadata: String,
    error: Option<String>,
    result: Option<String>,
    cancellation_requested: i32, // SQLite boolean as integer
    cancellation_requested_at: Option<i64>,
    cancellation_requested_by: Option<String>,
    lock_holder: Option<String>,
    lock_acquired_at: Option<i64>,
    lock_expiry: Option<i64>,
}

impl JobRow {
    fn into_domain(self) -> Result<Job> {
        let job_type = self.job_type.parse().map_err(AppError::Database)?;
        let status = self.status.parse().map_err(AppError::Database)?;
        let progress: siteaudit_core::domain::JobProgress =
            serde_json::from_str(&self.progress)?;
        let metadata = serde_json::from_str(&self.metadata)?;
        let result = self.result.as_deref().map(serde_json::from_str).transpose()?;

        Ok(Job {
            job_id: self.job_id,
            job_type,
            status,
            website_id: self.website_id,
            project_id: self.project_id,
            user_id: self.user_id,
            session_id: self.session_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            progress,
            metadata,
            error: self.error,
            result,
            cancellation_requested: self.cancellation_requested != 0,
            cancellation_requested_at: self.cancellation_requested_at,
            cancellation_requested_by: self.cancellation_requested_by,
            lock_holder: self.lock_holder,
            lock_acquired_at: self.lock_acquired_at,
            lock_expiry: self.lock_expiry,
        })
    }
}
