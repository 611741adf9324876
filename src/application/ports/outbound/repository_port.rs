//! Repository ports - persisted state this core reads and writes

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::entities::{
    AdapterPipeline, CharacterIdentity, DatasetCounts, DatasetImage, EvalStatus,
    GenerationJobRecord, JobStatus, PipelineStatus,
};
use crate::domain::value_objects::{AdapterId, CharacterId, DatasetImageId, JobId};

/// Read access to the externally-owned character store. This core never
/// writes approved-identity fields, only the active adapter reference.
#[async_trait]
pub trait CharacterStorePort: Send + Sync {
    async fn get(&self, id: CharacterId) -> Result<Option<CharacterIdentity>>;

    /// Record the deployed adapter on the character
    async fn set_active_adapter(&self, id: CharacterId, adapter_id: AdapterId) -> Result<()>;

    /// Clear the active adapter when it is archived
    async fn clear_active_adapter(&self, id: CharacterId) -> Result<()>;
}

/// Persistence for generation job records.
///
/// All status changes are conditional writes against the expected prior
/// status so two concurrent observers cannot apply conflicting transitions.
/// A `false` return means another observer already moved the record on.
#[async_trait]
pub trait JobRepositoryPort: Send + Sync {
    async fn insert(&self, job: &GenerationJobRecord) -> Result<()>;

    async fn get(&self, id: JobId) -> Result<Option<GenerationJobRecord>>;

    async fn set_remote_job_id(&self, id: JobId, remote_job_id: &str) -> Result<()>;

    /// Conditional status transition keyed on the expected prior status
    async fn transition(&self, id: JobId, from: JobStatus, to: JobStatus) -> Result<bool>;

    /// Transition to `generated` and record the result image in one write
    async fn complete(&self, id: JobId, from: JobStatus, result_image: &str) -> Result<bool>;

    /// Transition to `failed` and record the reason in one write
    async fn fail(&self, id: JobId, from: JobStatus, error: &str) -> Result<bool>;

    /// Operator-triggered reset of a failed job back to `pending`
    async fn reset_for_retry(&self, id: JobId) -> Result<bool>;
}

/// Persistence for adapter pipelines and their dataset images
#[async_trait]
pub trait PipelineRepositoryPort: Send + Sync {
    async fn insert(&self, pipeline: &AdapterPipeline) -> Result<()>;

    async fn get(&self, id: AdapterId) -> Result<Option<AdapterPipeline>>;

    /// Latest non-archived pipeline for a character, if any
    async fn get_by_character(&self, character_id: CharacterId) -> Result<Option<AdapterPipeline>>;

    /// Conditional status transition keyed on the expected prior status
    async fn transition(
        &self,
        id: AdapterId,
        from: PipelineStatus,
        to: PipelineStatus,
    ) -> Result<bool>;

    /// Mark failed from any non-terminal status, recording the reason
    async fn fail(&self, id: AdapterId, reason: &str) -> Result<bool>;

    async fn set_training_attempt(&self, id: AdapterId, attempt: u32) -> Result<()>;

    async fn set_adapter_file(&self, id: AdapterId, key: &str) -> Result<()>;

    async fn insert_dataset_image(&self, image: &DatasetImage) -> Result<()>;

    async fn list_dataset_images(&self, pipeline_id: AdapterId) -> Result<Vec<DatasetImage>>;

    async fn set_eval_result(
        &self,
        id: DatasetImageId,
        status: EvalStatus,
        score: f64,
    ) -> Result<()>;

    async fn set_caption(&self, id: DatasetImageId, caption: &str) -> Result<()>;

    async fn dataset_counts(&self, pipeline_id: AdapterId) -> Result<DatasetCounts>;
}
