//! Postgres-backed job store.
//!
//! The job record itself is stored as a JSONB document; the columns pulled out
//! beside it (`status_tag`, `created_at`, `scheduled_at`) exist only to make
//! claiming cheap. Claims use `FOR UPDATE SKIP LOCKED`, so multiple workers
//! can poll the same table without stepping on each other.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use super::store::{JobStats, JobStore, JobStoreError};
use super::types::{DeadLetterEntry, Job, JobId, JobStatus};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id UUID PRIMARY KEY,
        status_tag TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        scheduled_at TIMESTAMPTZ,
        body JSONB NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS jobs_claim_idx ON jobs (status_tag, created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS job_dead_letters (
        id UUID PRIMARY KEY,
        dead_lettered_at TIMESTAMPTZ NOT NULL,
        reason TEXT NOT NULL,
        body JSONB NOT NULL
    )
    "#,
];

/// Durable job store on Postgres.
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: Arc<PgPool>,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create tables if missing.
    pub async fn migrate(&self) -> Result<(), JobStoreError> {
        for stmt in SCHEMA {
            sqlx::query(stmt)
                .execute(&*self.pool)
                .await
                .map_err(storage_err)?;
        }
        Ok(())
    }
}

fn status_tag(status: &JobStatus) -> &'static str {
    match status {
        JobStatus::Pending => "pending",
        JobStatus::Running => "running",
        JobStatus::Completed => "completed",
        JobStatus::Failed { .. } => "failed",
        JobStatus::DeadLettered { .. } => "dead_lettered",
    }
}

fn storage_err(e: sqlx::Error) -> JobStoreError {
    JobStoreError::Storage(e.to_string())
}

fn row_to_job(row: &PgRow) -> Result<Job, JobStoreError> {
    let body: serde_json::Value = row.try_get("body").map_err(storage_err)?;
    serde_json::from_value(body).map_err(|e| JobStoreError::Storage(format!("bad job body: {e}")))
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError> {
        let body = serde_json::to_value(&job)
            .map_err(|e| JobStoreError::Storage(format!("serialize job: {e}")))?;
        let result = sqlx::query(
            "INSERT INTO jobs (id, status_tag, created_at, scheduled_at, body)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(job.id.0)
        .bind(status_tag(&job.status))
        .bind(job.created_at)
        .bind(job.scheduled_at)
        .bind(body)
        .execute(&*self.pool)
        .await
        .map_err(storage_err)?;

        if result.rows_affected() == 0 {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        Ok(job.id)
    }

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query("SELECT body FROM jobs WHERE id = $1")
            .bind(job_id.0)
            .fetch_optional(&*self.pool)
            .await
            .map_err(storage_err)?;
        row.map(|r| row_to_job(&r)).transpose()
    }

    async fn update(&self, job: &Job) -> Result<(), JobStoreError> {
        let body = serde_json::to_value(job)
            .map_err(|e| JobStoreError::Storage(format!("serialize job: {e}")))?;
        let result = sqlx::query(
            "UPDATE jobs SET status_tag = $2, scheduled_at = $3, body = $4 WHERE id = $1",
        )
        .bind(job.id.0)
        .bind(status_tag(&job.status))
        .bind(job.scheduled_at)
        .bind(body)
        .execute(&*self.pool)
        .await
        .map_err(storage_err)?;

        if result.rows_affected() == 0 {
            return Err(JobStoreError::NotFound(job.id));
        }
        Ok(())
    }

    async fn claim_next(&self) -> Result<Option<Job>, JobStoreError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let row = sqlx::query(
            r#"
            SELECT body FROM jobs
            WHERE status_tag IN ('pending', 'failed')
              AND (scheduled_at IS NULL OR scheduled_at <= NOW())
            ORDER BY created_at ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage_err)?;

        let Some(row) = row else {
            tx.rollback().await.map_err(storage_err)?;
            return Ok(None);
        };

        let mut job = row_to_job(&row)?;
        job.mark_running();

        let body = serde_json::to_value(&job)
            .map_err(|e| JobStoreError::Storage(format!("serialize job: {e}")))?;
        sqlx::query("UPDATE jobs SET status_tag = $2, scheduled_at = $3, body = $4 WHERE id = $1")
            .bind(job.id.0)
            .bind(status_tag(&job.status))
            .bind(job.scheduled_at)
            .bind(body)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)?;
        Ok(Some(job))
    }

    async fn list_by_status(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<Job>, JobStoreError> {
        let rows = sqlx::query(
            "SELECT body FROM jobs
             WHERE ($1::text IS NULL OR status_tag = $1)
             ORDER BY created_at ASC
             LIMIT $2",
        )
        .bind(status.as_ref().map(status_tag))
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(storage_err)?;
        rows.iter().map(row_to_job).collect()
    }

    async fn dead_letter(&self, mut job: Job, reason: String) -> Result<(), JobStoreError> {
        job.status = JobStatus::DeadLettered {
            error: reason.clone(),
            attempts: job.attempt,
        };
        job.updated_at = Utc::now();

        let body = serde_json::to_value(&job)
            .map_err(|e| JobStoreError::Storage(format!("serialize job: {e}")))?;

        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(job.id.0)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        sqlx::query(
            "INSERT INTO job_dead_letters (id, dead_lettered_at, reason, body)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(job.id.0)
        .bind(Utc::now())
        .bind(&reason)
        .bind(body)
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;
        tx.commit().await.map_err(storage_err)?;
        Ok(())
    }

    async fn list_dead_letters(
        &self,
        limit: usize,
    ) -> Result<Vec<DeadLetterEntry>, JobStoreError> {
        let rows = sqlx::query(
            "SELECT dead_lettered_at, reason, body FROM job_dead_letters
             ORDER BY dead_lettered_at ASC
             LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(storage_err)?;

        rows.iter()
            .map(|row| {
                let dead_lettered_at: DateTime<Utc> =
                    row.try_get("dead_lettered_at").map_err(storage_err)?;
                let reason: String = row.try_get("reason").map_err(storage_err)?;
                Ok(DeadLetterEntry {
                    job: row_to_job(row)?,
                    dead_lettered_at,
                    reason,
                })
            })
            .collect()
    }

    async fn retry_dead_letter(&self, job_id: JobId) -> Result<Job, JobStoreError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let row = sqlx::query("SELECT body FROM job_dead_letters WHERE id = $1 FOR UPDATE")
            .bind(job_id.0)
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage_err)?
            .ok_or(JobStoreError::NotFound(job_id))?;

        let mut job = row_to_job(&row)?;
        job.status = JobStatus::Pending;
        job.attempt = 0;
        job.scheduled_at = None;
        job.updated_at = Utc::now();
        job.history.clear();

        sqlx::query("DELETE FROM job_dead_letters WHERE id = $1")
            .bind(job_id.0)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

        let body = serde_json::to_value(&job)
            .map_err(|e| JobStoreError::Storage(format!("serialize job: {e}")))?;
        sqlx::query(
            "INSERT INTO jobs (id, status_tag, created_at, scheduled_at, body)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(job.id.0)
        .bind(status_tag(&job.status))
        .bind(job.created_at)
        .bind(job.scheduled_at)
        .bind(&body)
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)?;
        Ok(job)
    }

    async fn stats(&self) -> Result<JobStats, JobStoreError> {
        let rows = sqlx::query("SELECT status_tag, COUNT(*) AS n FROM jobs GROUP BY status_tag")
            .fetch_all(&*self.pool)
            .await
            .map_err(storage_err)?;

        let mut stats = JobStats::default();
        for row in rows {
            let tag: String = row.try_get("status_tag").map_err(storage_err)?;
            let n: i64 = row.try_get("n").map_err(storage_err)?;
            let n = n as usize;
            match tag.as_str() {
                "pending" => stats.pending = n,
                "running" => stats.running = n,
                "completed" => stats.completed = n,
                "failed" => stats.failed = n,
                "dead_lettered" => stats.dead_lettered += n,
                _ => {}
            }
        }

        let row = sqlx::query("SELECT COUNT(*) AS n FROM job_dead_letters")
            .fetch_one(&*self.pool)
            .await
            .map_err(storage_err)?;
        let n: i64 = row.try_get("n").map_err(storage_err)?;
        stats.dead_lettered += n as usize;

        Ok(stats)
    }
}
