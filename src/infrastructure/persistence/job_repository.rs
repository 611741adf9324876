//! SQLite persistence for generation job records

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::application::ports::outbound::JobRepositoryPort;
use crate::domain::entities::{GenerationJobRecord, JobStatus, RequestType};
use crate::domain::value_objects::JobId;

pub struct SqliteJobRepository {
    pool: SqlitePool,
}

impl SqliteJobRepository {
    pub async fn new(pool: SqlitePool) -> Result<Self, sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS generation_jobs (
                id TEXT PRIMARY KEY,
                subject_id TEXT NOT NULL,
                request_type TEXT NOT NULL,
                remote_job_id TEXT,
                status TEXT NOT NULL,
                payload TEXT,
                result_image TEXT,
                error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
        "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }
}

type JobRow = (
    String,         // id
    String,         // subject_id
    String,         // request_type
    Option<String>, // remote_job_id
    String,         // status
    Option<String>, // payload
    Option<String>, // result_image
    Option<String>, // error
    String,         // created_at
    String,         // updated_at
);

fn record_from(row: JobRow) -> Result<GenerationJobRecord> {
    let (id, subject_id, request_type, remote_job_id, status, payload, result_image, error, created, updated) =
        row;
    Ok(GenerationJobRecord {
        id: id.parse().map_err(|e| anyhow!("bad job id {id:?}: {e}"))?,
        subject_id,
        request_type: RequestType::parse(&request_type)
            .ok_or_else(|| anyhow!("unknown request type {request_type:?}"))?,
        remote_job_id,
        status: JobStatus::parse(&status).ok_or_else(|| anyhow!("unknown job status {status:?}"))?,
        payload: payload
            .map(|p| serde_json::from_str(&p).map_err(|e| anyhow!("bad job payload: {e}")))
            .transpose()?,
        result_image,
        error,
        created_at: parse_timestamp(&created)?,
        updated_at: parse_timestamp(&updated)?,
    })
}

pub(crate) fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .map_err(|e| anyhow!("bad timestamp {s:?}: {e}"))?
        .with_timezone(&Utc))
}

#[async_trait]
impl JobRepositoryPort for SqliteJobRepository {
    async fn insert(&self, job: &GenerationJobRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO generation_jobs
                (id, subject_id, request_type, remote_job_id, status, payload, result_image, error, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(job.id.to_string())
        .bind(&job.subject_id)
        .bind(job.request_type.as_str())
        .bind(&job.remote_job_id)
        .bind(job.status.as_str())
        .bind(job.payload.as_ref().map(|p| p.to_string()))
        .bind(&job.result_image)
        .bind(&job.error)
        .bind(job.created_at.to_rfc3339())
        .bind(job.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<GenerationJobRecord>> {
        let row: Option<JobRow> = sqlx::query_as(
            "SELECT id, subject_id, request_type, remote_job_id, status, payload, result_image, error, created_at, updated_at
             FROM generation_jobs WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(record_from).transpose()
    }

    async fn set_remote_job_id(&self, id: JobId, remote_job_id: &str) -> Result<()> {
        sqlx::query("UPDATE generation_jobs SET remote_job_id = ?, updated_at = ? WHERE id = ?")
            .bind(remote_job_id)
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn transition(&self, id: JobId, from: JobStatus, to: JobStatus) -> Result<bool> {
        let result =
            sqlx::query("UPDATE generation_jobs SET status = ?, updated_at = ? WHERE id = ? AND status = ?")
                .bind(to.as_str())
                .bind(Utc::now().to_rfc3339())
                .bind(id.to_string())
                .bind(from.as_str())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn complete(&self, id: JobId, from: JobStatus, result_image: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE generation_jobs SET status = 'generated', result_image = ?, updated_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(result_image)
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn fail(&self, id: JobId, from: JobStatus, error: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE generation_jobs SET status = 'failed', error = ?, updated_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(error)
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn reset_for_retry(&self, id: JobId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE generation_jobs
             SET status = 'pending', error = NULL, remote_job_id = NULL, result_image = NULL, updated_at = ?
             WHERE id = ? AND status = 'failed'",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::memory_pool;

    async fn repo() -> SqliteJobRepository {
        SqliteJobRepository::new(memory_pool().await).await.unwrap()
    }

    #[tokio::test]
    async fn insert_and_get_round_trips() {
        let repo = repo().await;
        let mut job = GenerationJobRecord::new("scene-1", RequestType::Scene);
        job.payload = Some(serde_json::json!({"workflow": "portrait"}));
        repo.insert(&job).await.unwrap();

        let loaded = repo.get(job.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, job.id);
        assert_eq!(loaded.subject_id, "scene-1");
        assert_eq!(loaded.request_type, RequestType::Scene);
        assert_eq!(loaded.status, JobStatus::Pending);
        assert_eq!(loaded.remote_job_id, None);
        assert_eq!(loaded.payload, job.payload);
    }

    #[tokio::test]
    async fn transitions_are_conditional_on_the_prior_status() {
        let repo = repo().await;
        let job = GenerationJobRecord::new("scene-1", RequestType::Scene);
        repo.insert(&job).await.unwrap();

        assert!(repo
            .transition(job.id, JobStatus::Pending, JobStatus::Generating)
            .await
            .unwrap());
        // The record moved on; the same transition no longer applies
        assert!(!repo
            .transition(job.id, JobStatus::Pending, JobStatus::Generating)
            .await
            .unwrap());

        assert!(repo
            .complete(job.id, JobStatus::Generating, "https://cdn.example/a.png")
            .await
            .unwrap());
        assert!(!repo
            .complete(job.id, JobStatus::Generating, "https://cdn.example/b.png")
            .await
            .unwrap());

        let loaded = repo.get(job.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Generated);
        assert_eq!(loaded.result_image.as_deref(), Some("https://cdn.example/a.png"));
    }

    #[tokio::test]
    async fn retry_reset_clears_failure_state() {
        let repo = repo().await;
        let job = GenerationJobRecord::new("scene-1", RequestType::Scene);
        repo.insert(&job).await.unwrap();
        repo.set_remote_job_id(job.id, "remote-1").await.unwrap();
        repo.transition(job.id, JobStatus::Pending, JobStatus::Generating)
            .await
            .unwrap();
        repo.fail(job.id, JobStatus::Generating, "CUDA out of memory")
            .await
            .unwrap();

        assert!(repo.reset_for_retry(job.id).await.unwrap());
        let loaded = repo.get(job.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Pending);
        assert_eq!(loaded.error, None);
        assert_eq!(loaded.remote_job_id, None);

        // Only failed jobs reset
        assert!(!repo.reset_for_retry(job.id).await.unwrap());
    }
}
