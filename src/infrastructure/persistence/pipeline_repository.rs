//! SQLite persistence for adapter pipelines and their dataset images

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::application::ports::outbound::PipelineRepositoryPort;
use crate::domain::entities::{
    AdapterPipeline, DatasetCounts, DatasetImage, EvalStatus, ImageSource, PipelineStatus,
};
use crate::domain::value_objects::{AdapterId, CharacterId, DatasetImageId};

use super::job_repository::parse_timestamp;

pub struct SqlitePipelineRepository {
    pool: SqlitePool,
}

impl SqlitePipelineRepository {
    pub async fn new(pool: SqlitePool) -> Result<Self, sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS adapter_pipelines (
                id TEXT PRIMARY KEY,
                character_id TEXT NOT NULL,
                status TEXT NOT NULL,
                training_attempt INTEGER NOT NULL DEFAULT 0,
                failure_reason TEXT,
                adapter_file TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
        "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS dataset_images (
                id TEXT PRIMARY KEY,
                pipeline_id TEXT NOT NULL,
                image_ref TEXT NOT NULL,
                source TEXT NOT NULL,
                eval_status TEXT NOT NULL,
                eval_score REAL,
                caption TEXT,
                FOREIGN KEY (pipeline_id) REFERENCES adapter_pipelines(id)
            )
        "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }
}

type PipelineRow = (
    String,         // id
    String,         // character_id
    String,         // status
    i64,            // training_attempt
    Option<String>, // failure_reason
    Option<String>, // adapter_file
    String,         // created_at
    String,         // updated_at
);

fn pipeline_from(row: PipelineRow) -> Result<AdapterPipeline> {
    let (id, character_id, status, attempt, failure_reason, adapter_file, created, updated) = row;
    Ok(AdapterPipeline {
        id: id.parse().map_err(|e| anyhow!("bad pipeline id {id:?}: {e}"))?,
        character_id: character_id
            .parse()
            .map_err(|e| anyhow!("bad character id {character_id:?}: {e}"))?,
        status: PipelineStatus::parse(&status)
            .ok_or_else(|| anyhow!("unknown pipeline status {status:?}"))?,
        training_attempt: attempt as u32,
        failure_reason,
        adapter_file,
        created_at: parse_timestamp(&created)?,
        updated_at: parse_timestamp(&updated)?,
    })
}

type ImageRow = (
    String,         // id
    String,         // pipeline_id
    String,         // image_ref
    String,         // source
    String,         // eval_status
    Option<f64>,    // eval_score
    Option<String>, // caption
);

fn image_from(row: ImageRow) -> Result<DatasetImage> {
    let (id, pipeline_id, image_ref, source, eval_status, eval_score, caption) = row;
    Ok(DatasetImage {
        id: id.parse().map_err(|e| anyhow!("bad image id {id:?}: {e}"))?,
        pipeline_id: pipeline_id
            .parse()
            .map_err(|e| anyhow!("bad pipeline id {pipeline_id:?}: {e}"))?,
        image_ref,
        source: ImageSource::parse(&source)
            .ok_or_else(|| anyhow!("unknown image source {source:?}"))?,
        eval_status: EvalStatus::parse(&eval_status)
            .ok_or_else(|| anyhow!("unknown eval status {eval_status:?}"))?,
        eval_score,
        caption,
    })
}

const PIPELINE_COLUMNS: &str =
    "id, character_id, status, training_attempt, failure_reason, adapter_file, created_at, updated_at";

#[async_trait]
impl PipelineRepositoryPort for SqlitePipelineRepository {
    async fn insert(&self, pipeline: &AdapterPipeline) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO adapter_pipelines
                (id, character_id, status, training_attempt, failure_reason, adapter_file, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(pipeline.id.to_string())
        .bind(pipeline.character_id.to_string())
        .bind(pipeline.status.as_str())
        .bind(pipeline.training_attempt as i64)
        .bind(&pipeline.failure_reason)
        .bind(&pipeline.adapter_file)
        .bind(pipeline.created_at.to_rfc3339())
        .bind(pipeline.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: AdapterId) -> Result<Option<AdapterPipeline>> {
        let row: Option<PipelineRow> = sqlx::query_as(&format!(
            "SELECT {PIPELINE_COLUMNS} FROM adapter_pipelines WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(pipeline_from).transpose()
    }

    async fn get_by_character(&self, character_id: CharacterId) -> Result<Option<AdapterPipeline>> {
        let row: Option<PipelineRow> = sqlx::query_as(&format!(
            "SELECT {PIPELINE_COLUMNS} FROM adapter_pipelines
             WHERE character_id = ? AND status != 'archived'
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(character_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(pipeline_from).transpose()
    }

    async fn transition(
        &self,
        id: AdapterId,
        from: PipelineStatus,
        to: PipelineStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE adapter_pipelines SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(to.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn fail(&self, id: AdapterId, reason: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE adapter_pipelines SET status = 'failed', failure_reason = ?, updated_at = ?
             WHERE id = ? AND status NOT IN ('deployed', 'failed', 'archived')",
        )
        .bind(reason)
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_training_attempt(&self, id: AdapterId, attempt: u32) -> Result<()> {
        sqlx::query("UPDATE adapter_pipelines SET training_attempt = ?, updated_at = ? WHERE id = ?")
            .bind(attempt as i64)
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_adapter_file(&self, id: AdapterId, key: &str) -> Result<()> {
        sqlx::query("UPDATE adapter_pipelines SET adapter_file = ?, updated_at = ? WHERE id = ?")
            .bind(key)
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_dataset_image(&self, image: &DatasetImage) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO dataset_images (id, pipeline_id, image_ref, source, eval_status, eval_score, caption)
            VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(image.id.to_string())
        .bind(image.pipeline_id.to_string())
        .bind(&image.image_ref)
        .bind(image.source.as_str())
        .bind(image.eval_status.as_str())
        .bind(image.eval_score)
        .bind(&image.caption)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_dataset_images(&self, pipeline_id: AdapterId) -> Result<Vec<DatasetImage>> {
        let rows: Vec<ImageRow> = sqlx::query_as(
            "SELECT id, pipeline_id, image_ref, source, eval_status, eval_score, caption
             FROM dataset_images WHERE pipeline_id = ?",
        )
        .bind(pipeline_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(image_from).collect()
    }

    async fn set_eval_result(
        &self,
        id: DatasetImageId,
        status: EvalStatus,
        score: f64,
    ) -> Result<()> {
        sqlx::query("UPDATE dataset_images SET eval_status = ?, eval_score = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(score)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_caption(&self, id: DatasetImageId, caption: &str) -> Result<()> {
        sqlx::query("UPDATE dataset_images SET caption = ? WHERE id = ?")
            .bind(caption)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn dataset_counts(&self, pipeline_id: AdapterId) -> Result<DatasetCounts> {
        let (total, pending_eval, passed, captioned): (i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(eval_status = 'pending'), 0),
                COALESCE(SUM(eval_status = 'passed'), 0),
                COALESCE(SUM(caption IS NOT NULL), 0)
            FROM dataset_images WHERE pipeline_id = ?
        "#,
        )
        .bind(pipeline_id.to_string())
        .fetch_one(&self.pool)
        .await?;

        Ok(DatasetCounts {
            total: total as u32,
            pending_eval: pending_eval as u32,
            passed: passed as u32,
            captioned: captioned as u32,
        })
    }
}
