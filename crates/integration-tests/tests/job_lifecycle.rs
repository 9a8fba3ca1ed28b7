//! Job lifecycle integration tests over the real SQLite stores.
//!
//! Covers persistence across process restarts, the advisory lock under
//! concurrent workers, cancellation, the stale sweep and retention purge.

use std::sync::Arc;
use std::time::Duration;

use siteaudit_core::application::job_manager::STALE_JOB_ERROR;
use siteaudit_core::application::{JobManager, JobSweeper, SweepConfig};
use siteaudit_core::domain::{JobFilter, JobMetadata, JobScope, JobStatus, JobType};
use siteaudit_core::port::time_provider::mocks::FixedTimeProvider;
use siteaudit_core::port::time_provider::SystemTimeProvider;
use siteaudit_core::port::TimeProvider;
use siteaudit_infra_sqlite::{create_pool, run_migrations, SqliteJobStore};

fn temp_db_path() -> String {
    std::env::temp_dir()
        .join(format!("siteaudit_test_{}.db", uuid::Uuid::new_v4()))
        .to_string_lossy()
        .into_owned()
}

fn cleanup_db(path: &str) {
    for suffix in ["", "-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{}{}", path, suffix));
    }
}

fn scope() -> JobScope {
    JobScope {
        website_id: "w1".into(),
        project_id: "p1".into(),
        user_id: None,
        session_id: None,
    }
}

fn testing_metadata() -> JobMetadata {
    JobMetadata::Testing {
        page_ids: vec![],
        identities: vec!["guest".into()],
        run_ai_tests: false,
        ai_page_ids: vec![],
        take_screenshots: false,
        schedule_id: None,
        trigger: None,
    }
}

fn manager_with(pool: sqlx::SqlitePool, time: Arc<dyn TimeProvider>) -> Arc<JobManager> {
    Arc::new(JobManager::new(Arc::new(SqliteJobStore::new(pool)), time))
}

/// A job survives a daemon restart with its status and progress intact,
/// and terminal states never move again.
#[tokio::test]
async fn test_job_survives_restart() {
    let db_path = temp_db_path();

    // First daemon run
    {
        let pool = create_pool(&db_path).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let jobs = manager_with(pool, Arc::new(SystemTimeProvider));

        jobs.create_job("j1", JobType::Testing, scope(), testing_metadata())
            .await
            .unwrap();
        assert!(jobs
            .update_job_status("j1", JobStatus::Running, None, None, None)
            .await
            .unwrap());
        assert!(jobs
            .update_job_progress("j1", 3, 10, "Testing /pricing as guest", None)
            .await
            .unwrap());
        // Pool dropped, daemon gone
    }

    // Second daemon run against the same file
    {
        let pool = create_pool(&db_path).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let jobs = manager_with(pool, Arc::new(SystemTimeProvider));

        let job = jobs.get_job("j1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.progress.current, 3);
        assert_eq!(job.progress.message, "Testing /pricing as guest");
        assert!(job.started_at.is_some());

        assert!(jobs
            .update_job_status(
                "j1",
                JobStatus::Completed,
                None,
                None,
                Some(serde_json::json!({"pages_tested": 10})),
            )
            .await
            .unwrap());

        // Terminal is terminal
        assert!(!jobs
            .update_job_status("j1", JobStatus::Running, None, None, None)
            .await
            .unwrap());
        let job = jobs.get_job("j1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.completed_at.is_some());
    }

    cleanup_db(&db_path);
    println!("✅ Job state survived a restart");
}

/// Eight workers race for the same job lock; exactly one wins.
#[tokio::test]
async fn test_concurrent_lock_has_a_single_winner() {
    let db_path = temp_db_path();
    let pool = create_pool(&db_path).await.unwrap();
    run_migrations(&pool).await.unwrap();
    let jobs = manager_with(pool, Arc::new(SystemTimeProvider));

    jobs.create_job("j1", JobType::Testing, scope(), testing_metadata())
        .await
        .unwrap();

    let mut handles = Vec::new();
    for worker in 0..8 {
        let jobs = jobs.clone();
        handles.push(tokio::spawn(async move {
            jobs.acquire_job_lock("j1", &format!("worker-{}", worker), Duration::from_secs(300))
                .await
                .unwrap()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1, "Exactly one worker should hold the lock");

    cleanup_db(&db_path);
    println!("✅ Advisory lock is exclusive under contention");
}

/// Cancellation over SQLite: the flag forces Cancelling, which resolves
/// only to Cancelled or Failed.
#[tokio::test]
async fn test_cancellation_flow() {
    let pool = create_pool("sqlite::memory:").await.unwrap();
    run_migrations(&pool).await.unwrap();
    let jobs = manager_with(pool, Arc::new(SystemTimeProvider));

    jobs.create_job("j1", JobType::Testing, scope(), testing_metadata())
        .await
        .unwrap();
    jobs.update_job_status("j1", JobStatus::Running, None, None, None)
        .await
        .unwrap();

    assert!(jobs.request_cancellation("j1", Some("admin")).await.unwrap());
    assert!(jobs.is_cancellation_requested("j1").await.unwrap());
    let job = jobs.get_job("j1").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Cancelling);
    assert!(job.cancellation_requested);

    // A runner cannot march a Cancelling job back to Running
    assert!(!jobs
        .update_job_status("j1", JobStatus::Running, None, None, None)
        .await
        .unwrap());
    assert!(jobs
        .update_job_status("j1", JobStatus::Cancelled, None, None, None)
        .await
        .unwrap());

    // Cancelling a terminal job is rejected
    assert!(!jobs.request_cancellation("j1", None).await.unwrap());
}

/// The sweep force-fails stale running jobs and purges terminal jobs
/// past their retention windows.
#[tokio::test]
async fn test_sweep_fails_stale_and_purges_old_jobs() {
    let pool = create_pool("sqlite::memory:").await.unwrap();
    run_migrations(&pool).await.unwrap();
    let time = Arc::new(FixedTimeProvider::new(1_000_000));
    let jobs = manager_with(pool, time.clone());

    for (id, status) in [
        ("stale", JobStatus::Running),
        ("done", JobStatus::Completed),
        ("stopped", JobStatus::Cancelled),
    ] {
        jobs.create_job(id, JobType::Testing, scope(), testing_metadata())
            .await
            .unwrap();
        jobs.update_job_status(id, JobStatus::Running, None, None, None)
            .await
            .unwrap();
        if status != JobStatus::Running {
            jobs.update_job_status(id, status, None, None, None)
                .await
                .unwrap();
        }
    }

    let sweeper = JobSweeper::new(jobs.clone(), SweepConfig::default());

    // 25 hours on: the running job is stale, the cancelled job past
    // its 24h retention; the completed job keeps its 7 days
    time.advance(25 * 3600 * 1000);
    sweeper.sweep_once().await.unwrap();

    let stale = jobs.get_job("stale").await.unwrap().unwrap();
    assert_eq!(stale.status, JobStatus::Failed);
    assert_eq!(stale.error.as_deref(), Some(STALE_JOB_ERROR));
    assert!(jobs.get_job("stopped").await.unwrap().is_none());
    assert!(jobs.get_job("done").await.unwrap().is_some());

    // 8 days on, the completed job goes too
    time.advance(7 * 24 * 3600 * 1000);
    sweeper.sweep_once().await.unwrap();
    assert!(jobs.get_job("done").await.unwrap().is_none());

    println!("✅ Sweep recovered the stale job and enforced retention");
}

/// Statistics aggregated by SQL keep total == sum(by_status).
#[tokio::test]
async fn test_statistics_sum_invariant() {
    let pool = create_pool("sqlite::memory:").await.unwrap();
    run_migrations(&pool).await.unwrap();
    let jobs = manager_with(pool, Arc::new(SystemTimeProvider));

    for (id, status) in [
        ("a", JobStatus::Completed),
        ("b", JobStatus::Completed),
        ("c", JobStatus::Failed),
        ("d", JobStatus::Running),
    ] {
        jobs.create_job(id, JobType::Testing, scope(), testing_metadata())
            .await
            .unwrap();
        jobs.update_job_status(id, JobStatus::Running, None, None, None)
            .await
            .unwrap();
        if status != JobStatus::Running {
            jobs.update_job_status(id, status, None, None, None)
                .await
                .unwrap();
        }
    }

    let stats = jobs
        .get_job_statistics(&JobFilter::default(), Duration::from_secs(3600))
        .await
        .unwrap();
    assert_eq!(stats.total_jobs, 4);
    let by_status_sum: i64 = stats.by_status.values().sum();
    assert_eq!(stats.total_jobs, by_status_sum);
    assert_eq!(stats.by_status.get("COMPLETED"), Some(&2));
    assert_eq!(stats.by_type.get("TESTING"), Some(&4));
}
