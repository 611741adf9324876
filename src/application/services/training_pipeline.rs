//! Identity adapter training pipeline
//!
//! A resumable state machine that produces and deploys a per-character
//! identity adapter from an approved reference portrait. Every stage
//! boundary is a persisted, conditional status transition, so a process
//! restart anywhere in the run resumes cleanly from stored state.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use futures_util::stream::{self, StreamExt};

use crate::application::ports::outbound::{
    CaptioningPort, CharacterStorePort, EvaluationPort, GenerationWorkerPort, JobRepositoryPort,
    ObjectStoragePort, PipelineRepositoryPort, TrainingImage, TrainingParams, TrainingPort,
};
use crate::application::services::graph_builder::{
    adapter_filename_for, GraphBuilder, GraphInputs,
};
use crate::application::services::job_dispatcher::JobDispatcher;
use crate::application::services::prompt_decomposer;
use crate::application::services::resource_selector::select_resources;
use crate::application::services::resume::{resume_stage, GateSettings, ResumeDecision, RunKind};
use crate::domain::entities::{
    AdapterPipeline, CharacterIdentity, DatasetImage, EvalStatus, ImageSource, OutputChannel,
    PipelineStatus, RequestType,
};
use crate::domain::value_objects::{
    AdapterId, CharacterId, ContentLevel, SceneClassification, SceneKind,
};

/// Tuning values for the pipeline. Operational numbers that get adjusted
/// during incident resolution, so they come from configuration.
#[derive(Debug, Clone, Copy)]
pub struct TrainingSettings {
    pub dataset_size: u32,
    pub min_passed: u32,
    pub min_passed_resume: u32,
    pub eval_pass_score: f64,
    pub max_training_attempts: u32,
    pub validation_samples: u32,
    pub validation_threshold: f64,
    pub dataset_concurrency: usize,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            dataset_size: 30,
            min_passed: 20,
            min_passed_resume: 15,
            eval_pass_score: 0.75,
            max_training_attempts: 3,
            validation_samples: 4,
            validation_threshold: 0.7,
            dataset_concurrency: 3,
        }
    }
}

impl TrainingSettings {
    pub fn gates(&self) -> GateSettings {
        GateSettings {
            dataset_size: self.dataset_size,
            min_passed: self.min_passed,
            min_passed_resume: self.min_passed_resume,
        }
    }
}

/// Pose/expression/lighting variants cycled through when generating the
/// training dataset, so the adapter sees the character from many angles
const DATASET_VARIANTS: &[&str] = &[
    "portrait, looking at the camera, soft studio light",
    "three-quarter view, outdoors at golden hour",
    "profile view, window light, neutral expression",
    "smiling, casual clothing, city street background",
    "looking over the shoulder, evening interior light",
    "seated, reading, warm lamp light",
    "laughing, overcast daylight, park background",
    "serious expression, dramatic side lighting",
    "candid, walking, motion in the background",
    "close-up portrait, shallow depth of field",
];

const VALIDATION_VARIANTS: &[&str] = &[
    "portrait, looking at the camera, natural light",
    "three-quarter view, smiling, outdoors",
    "profile view, neutral expression, studio light",
    "candid close-up, warm evening light",
];

/// JPEG quality tiers for packaging training images. An oversized-payload
/// failure moves to the next tier instead of shrinking the dataset.
const COMPRESSION_TIERS: &[u8] = &[90, 75, 60];

/// Hyperparameters per training attempt
pub fn retry_parameters(attempt: u32) -> TrainingParams {
    match attempt {
        0 | 1 => TrainingParams {
            learning_rate: 1e-4,
            steps: 1800,
            network_rank: 16,
        },
        2 => TrainingParams {
            learning_rate: 8e-5,
            steps: 2200,
            network_rank: 16,
        },
        _ => TrainingParams {
            learning_rate: 5e-5,
            steps: 2600,
            network_rank: 8,
        },
    }
}

/// Payload-size failures are detected by message content and remediated
/// with stronger compression, never treated as generic failures.
pub fn is_oversized_payload(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("payload too large")
        || lower.contains("413")
        || lower.contains("exceeds maximum")
        || lower.contains("request entity too large")
}

pub struct TrainingPipelineService<W, S, J>
where
    W: GenerationWorkerPort,
    S: ObjectStoragePort,
    J: JobRepositoryPort,
{
    dispatcher: Arc<JobDispatcher<W, S, J>>,
    graph_builder: Arc<GraphBuilder<S>>,
    storage: Arc<S>,
    pipelines: Arc<dyn PipelineRepositoryPort>,
    characters: Arc<dyn CharacterStorePort>,
    captioning: Arc<dyn CaptioningPort>,
    training: Arc<dyn TrainingPort>,
    evaluation: Arc<dyn EvaluationPort>,
    settings: TrainingSettings,
}

impl<W, S, J> TrainingPipelineService<W, S, J>
where
    W: GenerationWorkerPort,
    S: ObjectStoragePort,
    J: JobRepositoryPort,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dispatcher: Arc<JobDispatcher<W, S, J>>,
        graph_builder: Arc<GraphBuilder<S>>,
        storage: Arc<S>,
        pipelines: Arc<dyn PipelineRepositoryPort>,
        characters: Arc<dyn CharacterStorePort>,
        captioning: Arc<dyn CaptioningPort>,
        training: Arc<dyn TrainingPort>,
        evaluation: Arc<dyn EvaluationPort>,
        settings: TrainingSettings,
    ) -> Self {
        Self {
            dispatcher,
            graph_builder,
            storage,
            pipelines,
            characters,
            captioning,
            training,
            evaluation,
            settings,
        }
    }

    /// Create a new pipeline for a character. Returns the id; the caller
    /// spawns `run_fresh` to drive it.
    pub async fn start(&self, character_id: CharacterId) -> Result<AdapterId> {
        let character = self
            .characters
            .get(character_id)
            .await?
            .ok_or_else(|| anyhow!("character {character_id} not found"))?;

        if let Some(existing) = self.pipelines.get_by_character(character_id).await? {
            if !existing.status.is_terminal() {
                return Err(anyhow!(
                    "pipeline {} for {} is already {}",
                    existing.id,
                    character.slug,
                    existing.status
                ));
            }
        }

        let pipeline = AdapterPipeline::new(character_id);
        let id = pipeline.id;
        self.pipelines.insert(&pipeline).await?;
        self.pipelines
            .transition(id, PipelineStatus::NoAdapter, PipelineStatus::Pending)
            .await?;
        tracing::info!(pipeline = %id, character = %character.slug, "adapter pipeline created");
        Ok(id)
    }

    /// Drive a fresh run to a terminal state
    pub async fn run_fresh(&self, id: AdapterId) -> Result<()> {
        self.drive(id, RunKind::Fresh).await
    }

    /// Resume an interrupted or failed pipeline from persisted state
    pub async fn resume(&self, id: AdapterId) -> Result<()> {
        let pipeline = self
            .pipelines
            .get(id)
            .await?
            .ok_or_else(|| anyhow!("pipeline {id} not found"))?;

        if pipeline.status == PipelineStatus::Failed {
            let counts = self.pipelines.dataset_counts(id).await?;
            match resume_stage(
                pipeline.status,
                counts,
                &self.settings.gates(),
                RunKind::Resume,
            ) {
                ResumeDecision::Run(stage) => {
                    if !self
                        .pipelines
                        .transition(id, PipelineStatus::Failed, stage)
                        .await?
                    {
                        return Err(anyhow!("pipeline {id} changed while resuming"));
                    }
                    tracing::info!(pipeline = %id, stage = %stage, "resuming failed pipeline");
                }
                ResumeDecision::Fail(reason) => return Err(anyhow!(reason)),
                ResumeDecision::Terminal => return Ok(()),
            }
        }

        self.drive(id, RunKind::Resume).await
    }

    /// Operator retirement of a deployed adapter
    pub async fn archive(&self, id: AdapterId) -> Result<bool> {
        let pipeline = self
            .pipelines
            .get(id)
            .await?
            .ok_or_else(|| anyhow!("pipeline {id} not found"))?;
        let archived = self
            .pipelines
            .transition(id, PipelineStatus::Deployed, PipelineStatus::Archived)
            .await?;
        if archived {
            self.characters
                .clear_active_adapter(pipeline.character_id)
                .await?;
            tracing::info!(pipeline = %id, "adapter archived");
        }
        Ok(archived)
    }

    /// Main loop: decide the next stage from persisted state, transition
    /// into it, run it. Stops on terminal status or a gate failure.
    async fn drive(&self, id: AdapterId, run: RunKind) -> Result<()> {
        // Compression tier is per-run, bumped by oversized-payload failures
        let mut compression_tier = 0usize;

        loop {
            let pipeline = self
                .pipelines
                .get(id)
                .await?
                .ok_or_else(|| anyhow!("pipeline {id} not found"))?;

            // `failed` is terminal inside a run; only an explicit resume
            // call re-enters it
            if pipeline.status.is_terminal() {
                return Ok(());
            }

            let counts = self.pipelines.dataset_counts(id).await?;
            let stage = match resume_stage(pipeline.status, counts, &self.settings.gates(), run) {
                ResumeDecision::Run(stage) => stage,
                ResumeDecision::Fail(reason) => {
                    tracing::warn!(pipeline = %id, reason = %reason, "quality gate failed");
                    self.pipelines.fail(id, &reason).await?;
                    return Ok(());
                }
                ResumeDecision::Terminal => return Ok(()),
            };

            if pipeline.status != stage {
                let moved = self.pipelines.transition(id, pipeline.status, stage).await?;
                if !moved {
                    tracing::warn!(pipeline = %id, "another runner moved this pipeline; stopping");
                    return Ok(());
                }
            }

            let character = self
                .characters
                .get(pipeline.character_id)
                .await?
                .ok_or_else(|| anyhow!("character {} not found", pipeline.character_id))?;

            let result = match stage {
                PipelineStatus::GeneratingDataset => {
                    self.generate_dataset(id, &character, counts.total).await
                }
                PipelineStatus::Evaluating => self.evaluate(id, &character).await,
                PipelineStatus::Captioning => self.caption(id, &character).await,
                PipelineStatus::Training => {
                    self.train(id, &character, &mut compression_tier).await
                }
                PipelineStatus::Validating => self.validate(id, &character).await,
                other => Err(anyhow!("resume picked non-stage status {other}")),
            };

            if let Err(e) = result {
                let reason = format!("{} stage failed: {e:#}", stage);
                tracing::error!(pipeline = %id, "{reason}");
                self.pipelines.fail(id, &reason).await?;
                return Err(e);
            }
        }
    }

    /// Generate synthetic reference images until the dataset target is met.
    /// Operator-supplied variation images already in the store count too.
    async fn generate_dataset(
        &self,
        id: AdapterId,
        character: &CharacterIdentity,
        existing: u32,
    ) -> Result<()> {
        let needed = self.settings.dataset_size.saturating_sub(existing);
        if needed == 0 {
            return Ok(());
        }

        // Dataset images anchor on the approved reference, never on a
        // previous adapter, so the builder sees no deployed adapter
        let mut subject = character.clone();
        subject.active_adapter_id = None;

        tracing::info!(
            pipeline = %id,
            character = %subject.slug,
            needed,
            "generating dataset images"
        );

        let classification = SceneClassification {
            content_level: ContentLevel::Safe,
            scene_kind: SceneKind::Portrait,
            has_dual_subject: false,
        };
        let resources = select_resources(
            &classification,
            OutputChannel::CharacterPortrait,
            Some(&subject),
            None,
        );

        let subject_ref = &subject;
        let resources_ref = &resources;
        let results: Vec<Result<String>> = stream::iter(0..needed)
            .map(|i| async move {
                let index = existing + i;
                let variant = DATASET_VARIANTS[index as usize % DATASET_VARIANTS.len()];
                let prompt = prompt_decomposer::decompose(variant, Some(subject_ref), None);
                let spec = self
                    .graph_builder
                    .build(GraphInputs {
                        prompt: &prompt,
                        resources: resources_ref,
                        seed: subject_ref.seed_for_position(index),
                        primary: Some(subject_ref),
                        secondary: None,
                    })
                    .await?;
                self.dispatcher
                    .dispatch_and_wait(&spec, &subject_ref.id.to_string(), RequestType::DatasetImage)
                    .await
            })
            .buffer_unordered(self.settings.dataset_concurrency)
            .collect()
            .await;

        let mut stored = 0u32;
        for result in results {
            match result {
                Ok(image_ref) => {
                    let image = DatasetImage::new(id, image_ref, ImageSource::Generated);
                    self.pipelines.insert_dataset_image(&image).await?;
                    stored += 1;
                }
                Err(e) => {
                    tracing::warn!(pipeline = %id, "dataset image generation failed: {e:#}");
                }
            }
        }

        if stored == 0 {
            return Err(anyhow!("dataset generation produced no images"));
        }
        Ok(())
    }

    /// Score every pending dataset image against the approved reference
    async fn evaluate(&self, id: AdapterId, character: &CharacterIdentity) -> Result<()> {
        let reference = character
            .reference_image
            .as_deref()
            .ok_or_else(|| anyhow!("character {} has no approved reference portrait", character.slug))?;

        let images = self.pipelines.list_dataset_images(id).await?;
        for image in images.iter().filter(|i| i.eval_status == EvalStatus::Pending) {
            let score = self.evaluation.score(&image.image_ref, reference).await?;
            let status = if score >= self.settings.eval_pass_score {
                EvalStatus::Passed
            } else {
                EvalStatus::Failed
            };
            self.pipelines.set_eval_result(image.id, status, score).await?;
            tracing::debug!(
                pipeline = %id,
                image = %image.id,
                score,
                passed = status == EvalStatus::Passed,
                "dataset image evaluated"
            );
        }
        Ok(())
    }

    /// Caption every passed image that has none yet
    async fn caption(&self, id: AdapterId, character: &CharacterIdentity) -> Result<()> {
        let images = self.pipelines.list_dataset_images(id).await?;
        for image in images
            .iter()
            .filter(|i| i.eval_status == EvalStatus::Passed && i.caption.is_none())
        {
            let caption = self
                .captioning
                .caption(&image.image_ref, character.gender)
                .await
                .map_err(|e| anyhow!("captioning {}: {e}", image.id))?;
            self.pipelines.set_caption(image.id, &caption).await?;
        }
        Ok(())
    }

    /// Package the captioned dataset and run training attempts up to the
    /// cap. Oversized payloads bump the compression tier; the dataset is
    /// never reduced.
    async fn train(
        &self,
        id: AdapterId,
        character: &CharacterIdentity,
        compression_tier: &mut usize,
    ) -> Result<()> {
        let pipeline = self
            .pipelines
            .get(id)
            .await?
            .ok_or_else(|| anyhow!("pipeline {id} not found"))?;
        let mut attempt = pipeline.training_attempt;

        if attempt >= self.settings.max_training_attempts {
            self.pipelines
                .fail(
                    id,
                    &format!(
                        "training diverged: attempt cap of {} reached",
                        self.settings.max_training_attempts
                    ),
                )
                .await?;
            return Ok(());
        }

        let captioned: Vec<DatasetImage> = self
            .pipelines
            .list_dataset_images(id)
            .await?
            .into_iter()
            .filter(|i| i.eval_status == EvalStatus::Passed && i.caption.is_some())
            .collect();

        while attempt < self.settings.max_training_attempts {
            attempt += 1;
            self.pipelines.set_training_attempt(id, attempt).await?;

            let quality = COMPRESSION_TIERS[(*compression_tier).min(COMPRESSION_TIERS.len() - 1)];
            let mut payload = Vec::with_capacity(captioned.len());
            for image in &captioned {
                let bytes = self
                    .storage
                    .fetch_compressed(&image.image_ref, quality)
                    .await
                    .map_err(|e| anyhow!("packaging {}: {e}", image.id))?;
                payload.push(TrainingImage {
                    bytes,
                    caption: image.caption.clone().unwrap_or_default(),
                });
            }

            tracing::info!(
                pipeline = %id,
                attempt,
                images = payload.len(),
                quality,
                "submitting training job"
            );

            match self
                .training
                .train(&payload, &character.slug, attempt, retry_parameters(attempt))
                .await
            {
                Ok(weights) => {
                    let key = format!("adapters/{}", adapter_filename_for(&character.slug, id));
                    self.storage
                        .store_bytes(&key, weights)
                        .await
                        .map_err(|e| anyhow!("storing trained adapter: {e}"))?;
                    self.pipelines.set_adapter_file(id, &key).await?;
                    self.pipelines
                        .transition(id, PipelineStatus::Training, PipelineStatus::Validating)
                        .await?;
                    return Ok(());
                }
                Err(e) => {
                    let message = e.to_string();
                    if is_oversized_payload(&message)
                        && *compression_tier + 1 < COMPRESSION_TIERS.len()
                    {
                        *compression_tier += 1;
                        tracing::warn!(
                            pipeline = %id,
                            attempt,
                            next_quality = COMPRESSION_TIERS[*compression_tier],
                            "training payload too large, repackaging with stronger compression"
                        );
                    } else {
                        tracing::warn!(pipeline = %id, attempt, "training attempt failed: {message}");
                    }
                    if attempt >= self.settings.max_training_attempts {
                        self.pipelines
                            .fail(
                                id,
                                &format!("training diverged after {attempt} attempts: {message}"),
                            )
                            .await?;
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }

    /// Exercise the candidate adapter with sample generations and score
    /// them. Deploys on success; retries training while the cap allows.
    async fn validate(&self, id: AdapterId, character: &CharacterIdentity) -> Result<()> {
        let pipeline = self
            .pipelines
            .get(id)
            .await?
            .ok_or_else(|| anyhow!("pipeline {id} not found"))?;
        let reference = character
            .reference_image
            .as_deref()
            .ok_or_else(|| anyhow!("character {} has no approved reference portrait", character.slug))?;

        // Sample generations route identity through the candidate adapter
        let mut candidate = character.clone();
        candidate.active_adapter_id = Some(id);

        let classification = SceneClassification {
            content_level: ContentLevel::Safe,
            scene_kind: SceneKind::Portrait,
            has_dual_subject: false,
        };
        let resources = select_resources(
            &classification,
            OutputChannel::CharacterPortrait,
            Some(&candidate),
            None,
        );

        let mut scores = Vec::new();
        for i in 0..self.settings.validation_samples {
            let variant = VALIDATION_VARIANTS[i as usize % VALIDATION_VARIANTS.len()];
            let prompt = prompt_decomposer::decompose(variant, Some(&candidate), None);
            let spec = self
                .graph_builder
                .build(GraphInputs {
                    prompt: &prompt,
                    resources: &resources,
                    seed: candidate.seed_for_position(1000 + i),
                    primary: Some(&candidate),
                    secondary: None,
                })
                .await?;
            let sample = self
                .dispatcher
                .dispatch_and_wait(
                    &spec,
                    &candidate.id.to_string(),
                    RequestType::ValidationSample,
                )
                .await?;
            scores.push(self.evaluation.score(&sample, reference).await?);
        }

        let mean = scores.iter().sum::<f64>() / scores.len().max(1) as f64;
        tracing::info!(pipeline = %id, mean_score = mean, "adapter validation scored");

        if mean >= self.settings.validation_threshold {
            self.pipelines
                .transition(id, PipelineStatus::Validating, PipelineStatus::Deployed)
                .await?;
            self.characters
                .set_active_adapter(pipeline.character_id, id)
                .await?;
            tracing::info!(pipeline = %id, character = %character.slug, "adapter deployed");
        } else if pipeline.training_attempt < self.settings.max_training_attempts {
            tracing::warn!(
                pipeline = %id,
                mean_score = mean,
                "validation below threshold, retrying training"
            );
            self.pipelines
                .transition(id, PipelineStatus::Validating, PipelineStatus::Training)
                .await?;
        } else {
            self.pipelines
                .fail(
                    id,
                    &format!(
                        "training diverged: validation score {mean:.2} below {:.2} after {} attempts",
                        self.settings.validation_threshold, pipeline.training_attempt
                    ),
                )
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::application::ports::outbound::{
        AdapterDownload, BinaryAsset, RemoteJobStatus, ServiceError, StorageError, WorkerError,
    };
    use crate::application::services::job_dispatcher::PollSettings;
    use crate::domain::entities::{DatasetCounts, Gender, GenerationJobRecord, JobStatus};
    use crate::domain::value_objects::{DatasetImageId, JobId};

    struct InstantWorker {
        counter: AtomicU32,
    }

    #[async_trait]
    impl GenerationWorkerPort for InstantWorker {
        async fn submit(
            &self,
            _graph: serde_json::Value,
            _assets: &[BinaryAsset],
            _downloads: &[AdapterDownload],
        ) -> Result<String, WorkerError> {
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            Ok(format!("remote-{n}"))
        }

        async fn poll_status(&self, id: &str) -> Result<RemoteJobStatus, WorkerError> {
            Ok(RemoteJobStatus::Completed {
                images: vec![format!("https://worker.example/{id}.png")],
            })
        }
    }

    #[derive(Default)]
    struct MemoryStorage {
        compressed_qualities: Mutex<Vec<u8>>,
        stored_keys: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ObjectStoragePort for MemoryStorage {
        async fn store(&self, _ephemeral_url: &str, key: &str) -> Result<String, StorageError> {
            Ok(format!("https://cdn.example/{key}"))
        }

        async fn store_bytes(&self, key: &str, _bytes: Vec<u8>) -> Result<String, StorageError> {
            self.stored_keys.lock().unwrap().push(key.to_string());
            Ok(format!("https://cdn.example/{key}"))
        }

        async fn fetch(&self, _url: &str) -> Result<Vec<u8>, StorageError> {
            Ok(vec![0u8; 8])
        }

        async fn fetch_compressed(&self, _url: &str, quality: u8) -> Result<Vec<u8>, StorageError> {
            self.compressed_qualities.lock().unwrap().push(quality);
            Ok(vec![0u8; 4])
        }

        fn public_url(&self, key: &str) -> String {
            format!("https://cdn.example/{key}")
        }
    }

    #[derive(Default)]
    struct MemoryJobRepo {
        jobs: Mutex<HashMap<JobId, GenerationJobRecord>>,
    }

    #[async_trait]
    impl JobRepositoryPort for MemoryJobRepo {
        async fn insert(&self, job: &GenerationJobRecord) -> Result<()> {
            self.jobs.lock().unwrap().insert(job.id, job.clone());
            Ok(())
        }

        async fn get(&self, id: JobId) -> Result<Option<GenerationJobRecord>> {
            Ok(self.jobs.lock().unwrap().get(&id).cloned())
        }

        async fn set_remote_job_id(&self, id: JobId, remote: &str) -> Result<()> {
            if let Some(job) = self.jobs.lock().unwrap().get_mut(&id) {
                job.remote_job_id = Some(remote.to_string());
            }
            Ok(())
        }

        async fn transition(&self, id: JobId, from: JobStatus, to: JobStatus) -> Result<bool> {
            let mut jobs = self.jobs.lock().unwrap();
            match jobs.get_mut(&id) {
                Some(job) if job.status == from => {
                    job.status = to;
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn complete(&self, id: JobId, from: JobStatus, result: &str) -> Result<bool> {
            let mut jobs = self.jobs.lock().unwrap();
            match jobs.get_mut(&id) {
                Some(job) if job.status == from => {
                    job.status = JobStatus::Generated;
                    job.result_image = Some(result.to_string());
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn fail(&self, id: JobId, from: JobStatus, error: &str) -> Result<bool> {
            let mut jobs = self.jobs.lock().unwrap();
            match jobs.get_mut(&id) {
                Some(job) if job.status == from => {
                    job.status = JobStatus::Failed;
                    job.error = Some(error.to_string());
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn reset_for_retry(&self, _id: JobId) -> Result<bool> {
            Ok(false)
        }
    }

    #[derive(Default)]
    struct MemoryPipelineRepo {
        pipelines: Mutex<HashMap<AdapterId, AdapterPipeline>>,
        images: Mutex<Vec<DatasetImage>>,
    }

    #[async_trait]
    impl PipelineRepositoryPort for MemoryPipelineRepo {
        async fn insert(&self, pipeline: &AdapterPipeline) -> Result<()> {
            self.pipelines
                .lock()
                .unwrap()
                .insert(pipeline.id, pipeline.clone());
            Ok(())
        }

        async fn get(&self, id: AdapterId) -> Result<Option<AdapterPipeline>> {
            Ok(self.pipelines.lock().unwrap().get(&id).cloned())
        }

        async fn get_by_character(
            &self,
            character_id: CharacterId,
        ) -> Result<Option<AdapterPipeline>> {
            Ok(self
                .pipelines
                .lock()
                .unwrap()
                .values()
                .find(|p| p.character_id == character_id && p.status != PipelineStatus::Archived)
                .cloned())
        }

        async fn transition(
            &self,
            id: AdapterId,
            from: PipelineStatus,
            to: PipelineStatus,
        ) -> Result<bool> {
            let mut pipelines = self.pipelines.lock().unwrap();
            match pipelines.get_mut(&id) {
                Some(p) if p.status == from => {
                    p.status = to;
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn fail(&self, id: AdapterId, reason: &str) -> Result<bool> {
            let mut pipelines = self.pipelines.lock().unwrap();
            match pipelines.get_mut(&id) {
                Some(p) if !p.status.is_terminal() => {
                    p.status = PipelineStatus::Failed;
                    p.failure_reason = Some(reason.to_string());
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn set_training_attempt(&self, id: AdapterId, attempt: u32) -> Result<()> {
            if let Some(p) = self.pipelines.lock().unwrap().get_mut(&id) {
                p.training_attempt = attempt;
            }
            Ok(())
        }

        async fn set_adapter_file(&self, id: AdapterId, key: &str) -> Result<()> {
            if let Some(p) = self.pipelines.lock().unwrap().get_mut(&id) {
                p.adapter_file = Some(key.to_string());
            }
            Ok(())
        }

        async fn insert_dataset_image(&self, image: &DatasetImage) -> Result<()> {
            self.images.lock().unwrap().push(image.clone());
            Ok(())
        }

        async fn list_dataset_images(&self, pipeline_id: AdapterId) -> Result<Vec<DatasetImage>> {
            Ok(self
                .images
                .lock()
                .unwrap()
                .iter()
                .filter(|i| i.pipeline_id == pipeline_id)
                .cloned()
                .collect())
        }

        async fn set_eval_result(
            &self,
            id: DatasetImageId,
            status: EvalStatus,
            score: f64,
        ) -> Result<()> {
            if let Some(i) = self.images.lock().unwrap().iter_mut().find(|i| i.id == id) {
                i.eval_status = status;
                i.eval_score = Some(score);
            }
            Ok(())
        }

        async fn set_caption(&self, id: DatasetImageId, caption: &str) -> Result<()> {
            if let Some(i) = self.images.lock().unwrap().iter_mut().find(|i| i.id == id) {
                i.caption = Some(caption.to_string());
            }
            Ok(())
        }

        async fn dataset_counts(&self, pipeline_id: AdapterId) -> Result<DatasetCounts> {
            let images = self.images.lock().unwrap();
            let mut counts = DatasetCounts::default();
            for image in images.iter().filter(|i| i.pipeline_id == pipeline_id) {
                counts.total += 1;
                match image.eval_status {
                    EvalStatus::Pending => counts.pending_eval += 1,
                    EvalStatus::Passed => counts.passed += 1,
                    EvalStatus::Failed => {}
                }
                if image.caption.is_some() {
                    counts.captioned += 1;
                }
            }
            Ok(counts)
        }
    }

    #[derive(Default)]
    struct MemoryCharacterStore {
        characters: Mutex<HashMap<CharacterId, CharacterIdentity>>,
    }

    #[async_trait]
    impl CharacterStorePort for MemoryCharacterStore {
        async fn get(&self, id: CharacterId) -> Result<Option<CharacterIdentity>> {
            Ok(self.characters.lock().unwrap().get(&id).cloned())
        }

        async fn set_active_adapter(&self, id: CharacterId, adapter_id: AdapterId) -> Result<()> {
            if let Some(c) = self.characters.lock().unwrap().get_mut(&id) {
                c.active_adapter_id = Some(adapter_id);
            }
            Ok(())
        }

        async fn clear_active_adapter(&self, id: CharacterId) -> Result<()> {
            if let Some(c) = self.characters.lock().unwrap().get_mut(&id) {
                c.active_adapter_id = None;
            }
            Ok(())
        }
    }

    struct ScriptedCaptioning;

    #[async_trait]
    impl CaptioningPort for ScriptedCaptioning {
        async fn caption(&self, _image_ref: &str, gender: Gender) -> Result<String, ServiceError> {
            Ok(format!("a photo of a {gender} person"))
        }
    }

    /// Pops a scripted score per call; defaults to a passing score after
    /// the script runs out
    struct ScriptedEvaluation {
        scores: Mutex<VecDeque<f64>>,
    }

    impl ScriptedEvaluation {
        fn new(scores: Vec<f64>) -> Self {
            Self {
                scores: Mutex::new(scores.into()),
            }
        }
    }

    #[async_trait]
    impl EvaluationPort for ScriptedEvaluation {
        async fn score(&self, _image: &str, _reference: &str) -> Result<f64, ServiceError> {
            Ok(self.scores.lock().unwrap().pop_front().unwrap_or(0.9))
        }
    }

    struct ScriptedTrainer {
        responses: Mutex<VecDeque<Result<Vec<u8>, String>>>,
    }

    impl ScriptedTrainer {
        fn new(responses: Vec<Result<Vec<u8>, String>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
            }
        }

        fn always_ok() -> Self {
            Self::new(vec![])
        }
    }

    #[async_trait]
    impl TrainingPort for ScriptedTrainer {
        async fn train(
            &self,
            _images: &[TrainingImage],
            _slug: &str,
            _attempt: u32,
            _params: TrainingParams,
        ) -> Result<Vec<u8>, ServiceError> {
            match self.responses.lock().unwrap().pop_front() {
                Some(Ok(weights)) => Ok(weights),
                Some(Err(message)) => Err(ServiceError::Api(message)),
                None => Ok(vec![1u8; 16]),
            }
        }
    }

    struct Harness {
        service: TrainingPipelineService<InstantWorker, MemoryStorage, MemoryJobRepo>,
        pipelines: Arc<MemoryPipelineRepo>,
        characters: Arc<MemoryCharacterStore>,
        storage: Arc<MemoryStorage>,
        character_id: CharacterId,
    }

    fn harness(evaluation: ScriptedEvaluation, trainer: ScriptedTrainer) -> Harness {
        let character = CharacterIdentity::new("Zanele", "zanele", Gender::Female)
            .with_approved_tags("25 year old woman, long black hair")
            .with_approved_seed(7)
            .with_reference_image("references/zanele.png");
        let character_id = character.id;

        let storage = Arc::new(MemoryStorage::default());
        let jobs = Arc::new(MemoryJobRepo::default());
        let pipelines = Arc::new(MemoryPipelineRepo::default());
        let characters = Arc::new(MemoryCharacterStore::default());
        characters
            .characters
            .lock()
            .unwrap()
            .insert(character_id, character);

        let dispatcher = Arc::new(JobDispatcher::new(
            Arc::new(InstantWorker {
                counter: AtomicU32::new(0),
            }),
            storage.clone(),
            jobs,
            PollSettings {
                interval: Duration::from_millis(1),
                max_attempts: 10,
            },
        ));
        let graph_builder = Arc::new(GraphBuilder::new(storage.clone()));

        let service = TrainingPipelineService::new(
            dispatcher,
            graph_builder,
            storage.clone(),
            pipelines.clone(),
            characters.clone(),
            Arc::new(ScriptedCaptioning),
            Arc::new(trainer),
            Arc::new(evaluation),
            TrainingSettings::default(),
        );

        Harness {
            service,
            pipelines,
            characters,
            storage,
            character_id,
        }
    }

    fn dataset_scores(passed: usize, failed: usize) -> Vec<f64> {
        let mut scores = vec![0.9; passed];
        scores.extend(std::iter::repeat(0.4).take(failed));
        scores
    }

    #[tokio::test]
    async fn full_run_deploys_the_adapter_and_repackages_oversized_payloads() {
        let h = harness(
            ScriptedEvaluation::new(dataset_scores(22, 8)),
            ScriptedTrainer::new(vec![
                Err("Request payload too large (413)".into()),
                Ok(vec![1u8; 16]),
            ]),
        );

        let id = h.service.start(h.character_id).await.unwrap();
        h.service.run_fresh(id).await.unwrap();

        let pipeline = h.pipelines.get(id).await.unwrap().unwrap();
        assert_eq!(pipeline.status, PipelineStatus::Deployed);
        assert_eq!(pipeline.training_attempt, 2);
        let expected_key = format!("adapters/{}", adapter_filename_for("zanele", id));
        assert_eq!(pipeline.adapter_file.as_deref(), Some(expected_key.as_str()));
        assert!(h.storage.stored_keys.lock().unwrap().contains(&expected_key));

        // 22 captioned images packaged at quality 90, then again at 75
        let qualities = h.storage.compressed_qualities.lock().unwrap();
        assert_eq!(qualities.iter().filter(|q| **q == 90).count(), 22);
        assert_eq!(qualities.iter().filter(|q| **q == 75).count(), 22);

        let character = h.characters.get(h.character_id).await.unwrap().unwrap();
        assert_eq!(character.active_adapter_id, Some(id));
    }

    #[tokio::test]
    async fn variation_images_count_toward_the_dataset_target() {
        let h = harness(ScriptedEvaluation::new(vec![]), ScriptedTrainer::always_ok());

        let id = h.service.start(h.character_id).await.unwrap();
        // Operator-supplied variation images arrive before the run
        for i in 0..10 {
            let image = DatasetImage::new(
                id,
                format!("uploads/variations/{i}.png"),
                ImageSource::Variation,
            );
            h.pipelines.insert_dataset_image(&image).await.unwrap();
        }

        h.service.run_fresh(id).await.unwrap();

        // Only the shortfall is generated; the variation rows fill the rest
        let images = h.pipelines.list_dataset_images(id).await.unwrap();
        assert_eq!(images.len(), 30);
        let generated = images
            .iter()
            .filter(|i| i.source == ImageSource::Generated)
            .count();
        assert_eq!(generated, 20);

        let pipeline = h.pipelines.get(id).await.unwrap().unwrap();
        assert_eq!(pipeline.status, PipelineStatus::Deployed);
    }

    #[tokio::test]
    async fn fresh_run_fails_when_too_few_images_pass_evaluation() {
        let h = harness(
            ScriptedEvaluation::new(dataset_scores(16, 14)),
            ScriptedTrainer::always_ok(),
        );

        let id = h.service.start(h.character_id).await.unwrap();
        h.service.run_fresh(id).await.unwrap();

        let pipeline = h.pipelines.get(id).await.unwrap().unwrap();
        assert_eq!(pipeline.status, PipelineStatus::Failed);
        assert!(pipeline
            .failure_reason
            .unwrap()
            .contains("insufficient dataset: 16 passed of 20 required"));
        let character = h.characters.get(h.character_id).await.unwrap().unwrap();
        assert_eq!(character.active_adapter_id, None);
    }

    #[tokio::test]
    async fn resume_at_training_with_no_captions_reruns_captioning_first() {
        let h = harness(ScriptedEvaluation::new(vec![]), ScriptedTrainer::always_ok());

        // Persisted state from an interrupted run: training status, a full
        // evaluated dataset, zero captions
        let mut pipeline = AdapterPipeline::new(h.character_id);
        pipeline.status = PipelineStatus::Training;
        let id = pipeline.id;
        h.pipelines.insert(&pipeline).await.unwrap();
        for i in 0..30 {
            let mut image =
                DatasetImage::new(id, format!("generated/dataset/{i}.png"), ImageSource::Generated);
            image.eval_status = if i < 20 {
                EvalStatus::Passed
            } else {
                EvalStatus::Failed
            };
            image.eval_score = Some(if i < 20 { 0.9 } else { 0.4 });
            h.pipelines.insert_dataset_image(&image).await.unwrap();
        }

        h.service.resume(id).await.unwrap();

        let pipeline = h.pipelines.get(id).await.unwrap().unwrap();
        assert_eq!(pipeline.status, PipelineStatus::Deployed);
        let captioned = h
            .pipelines
            .list_dataset_images(id)
            .await
            .unwrap()
            .iter()
            .filter(|i| i.caption.is_some())
            .count();
        assert_eq!(captioned, 20);
    }

    #[tokio::test]
    async fn resume_uses_the_lowered_evaluation_gate() {
        let h = harness(ScriptedEvaluation::new(vec![]), ScriptedTrainer::always_ok());

        // 16 passed fails a fresh run but clears the resume gate of 15
        let mut pipeline = AdapterPipeline::new(h.character_id);
        pipeline.status = PipelineStatus::Failed;
        pipeline.failure_reason = Some("insufficient dataset: 16 passed of 20 required".into());
        let id = pipeline.id;
        h.pipelines.insert(&pipeline).await.unwrap();
        for i in 0..30 {
            let mut image =
                DatasetImage::new(id, format!("generated/dataset/{i}.png"), ImageSource::Generated);
            image.eval_status = if i < 16 {
                EvalStatus::Passed
            } else {
                EvalStatus::Failed
            };
            h.pipelines.insert_dataset_image(&image).await.unwrap();
        }

        h.service.resume(id).await.unwrap();

        let pipeline = h.pipelines.get(id).await.unwrap().unwrap();
        assert_eq!(pipeline.status, PipelineStatus::Deployed);
    }

    #[tokio::test]
    async fn validation_below_threshold_exhausts_attempts_and_fails() {
        // Dataset passes, but every validation sample scores poorly
        let mut scores = dataset_scores(22, 8);
        scores.extend(std::iter::repeat(0.2).take(64));
        let h = harness(
            ScriptedEvaluation::new(scores),
            ScriptedTrainer::always_ok(),
        );

        let id = h.service.start(h.character_id).await.unwrap();
        h.service.run_fresh(id).await.unwrap();

        let pipeline = h.pipelines.get(id).await.unwrap().unwrap();
        assert_eq!(pipeline.status, PipelineStatus::Failed);
        assert!(pipeline.failure_reason.unwrap().contains("training diverged"));
        let character = h.characters.get(h.character_id).await.unwrap().unwrap();
        assert_eq!(character.active_adapter_id, None);
    }

    #[tokio::test]
    async fn archive_retires_the_adapter_and_clears_the_character() {
        let h = harness(ScriptedEvaluation::new(vec![]), ScriptedTrainer::always_ok());

        let id = h.service.start(h.character_id).await.unwrap();
        h.service.run_fresh(id).await.unwrap();
        assert!(h.service.archive(id).await.unwrap());

        let pipeline = h.pipelines.get(id).await.unwrap().unwrap();
        assert_eq!(pipeline.status, PipelineStatus::Archived);
        let character = h.characters.get(h.character_id).await.unwrap().unwrap();
        assert_eq!(character.active_adapter_id, None);
        // Archiving twice is a no-op
        assert!(!h.service.archive(id).await.unwrap());
    }

    #[tokio::test]
    async fn start_rejects_a_character_with_an_active_pipeline() {
        let h = harness(ScriptedEvaluation::new(vec![]), ScriptedTrainer::always_ok());

        h.service.start(h.character_id).await.unwrap();
        assert!(h.service.start(h.character_id).await.is_err());
    }

    #[test]
    fn oversized_payload_detection_matches_known_messages() {
        assert!(is_oversized_payload("Request payload too large (413)"));
        assert!(is_oversized_payload("body exceeds maximum allowed size"));
        assert!(is_oversized_payload("413 Request Entity Too Large"));
        assert!(!is_oversized_payload("connection reset by peer"));
    }
}
