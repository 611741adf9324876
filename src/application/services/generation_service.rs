//! Generation orchestrator
//!
//! Runs one scene request through the full pipeline front: classify the
//! text, select resources, decompose the prompt, assemble the job graph,
//! dispatch. The returned job id is what operators poll.

use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::application::ports::outbound::{
    CharacterStorePort, GenerationWorkerPort, JobRepositoryPort, ObjectStoragePort,
};
use crate::application::services::graph_builder::{GraphBuilder, GraphInputs, WorkflowKind};
use crate::application::services::job_dispatcher::JobDispatcher;
use crate::application::services::{prompt_decomposer, resource_selector, scene_classifier};
use crate::domain::entities::{CharacterIdentity, OutputChannel, RequestType, SceneRequest};
use crate::domain::value_objects::{CharacterId, JobId, SceneClassification};

/// What a dispatched request looks like to the operator boundary
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub job_id: JobId,
    pub workflow: WorkflowKind,
    pub classification: SceneClassification,
}

pub struct GenerationService<W, S, J>
where
    W: GenerationWorkerPort,
    S: ObjectStoragePort,
    J: JobRepositoryPort,
{
    characters: Arc<dyn CharacterStorePort>,
    graph_builder: Arc<GraphBuilder<S>>,
    dispatcher: Arc<JobDispatcher<W, S, J>>,
}

impl<W, S, J> GenerationService<W, S, J>
where
    W: GenerationWorkerPort,
    S: ObjectStoragePort,
    J: JobRepositoryPort,
{
    pub fn new(
        characters: Arc<dyn CharacterStorePort>,
        graph_builder: Arc<GraphBuilder<S>>,
        dispatcher: Arc<JobDispatcher<W, S, J>>,
    ) -> Self {
        Self {
            characters,
            graph_builder,
            dispatcher,
        }
    }

    pub async fn generate(&self, request: &SceneRequest) -> Result<GenerationOutcome> {
        let primary = self.load_character(request.primary_character).await?;
        let secondary = self.load_character(request.secondary_character).await?;

        let classification = scene_classifier::classify(request);
        tracing::info!(
            scene = %request.id,
            channel = %request.channel,
            content_level = ?classification.content_level,
            scene_kind = ?classification.scene_kind,
            dual = classification.has_dual_subject,
            "scene classified"
        );

        let resources = resource_selector::select_resources(
            &classification,
            request.channel,
            primary.as_ref(),
            secondary.as_ref(),
        );
        let prompt =
            prompt_decomposer::decompose(&request.raw_text, primary.as_ref(), secondary.as_ref());

        // Seeds derive from the primary character's approved portrait so a
        // re-render of the same story position reproduces
        let seed = match &primary {
            Some(character) => character.seed_for_position(request.position),
            None => rand::random::<u32>() as i64,
        };

        let spec = self
            .graph_builder
            .build(GraphInputs {
                prompt: &prompt,
                resources: &resources,
                seed,
                primary: primary.as_ref(),
                secondary: secondary.as_ref(),
            })
            .await?;

        let request_type = match request.channel {
            OutputChannel::CharacterPortrait => RequestType::Portrait,
            _ => RequestType::Scene,
        };
        let job_id = self
            .dispatcher
            .dispatch(&spec, &request.id.to_string(), request_type)
            .await?;

        Ok(GenerationOutcome {
            job_id,
            workflow: spec.workflow,
            classification,
        })
    }

    async fn load_character(
        &self,
        id: Option<CharacterId>,
    ) -> Result<Option<CharacterIdentity>> {
        match id {
            Some(id) => self
                .characters
                .get(id)
                .await?
                .ok_or_else(|| anyhow!("character {id} not found"))
                .map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::application::ports::outbound::{
        AdapterDownload, BinaryAsset, RemoteJobStatus, StorageError, WorkerError,
    };
    use crate::application::services::job_dispatcher::PollSettings;
    use crate::domain::entities::{Gender, GenerationJobRecord, JobStatus};
    use crate::domain::value_objects::{AdapterId, ContentLevel};

    struct RecordingWorker {
        submissions: Mutex<Vec<serde_json::Value>>,
    }

    #[async_trait]
    impl GenerationWorkerPort for RecordingWorker {
        async fn submit(
            &self,
            graph: serde_json::Value,
            _assets: &[BinaryAsset],
            _downloads: &[AdapterDownload],
        ) -> Result<String, WorkerError> {
            self.submissions.lock().unwrap().push(graph);
            Ok("remote-1".to_string())
        }

        async fn poll_status(&self, _id: &str) -> Result<RemoteJobStatus, WorkerError> {
            Ok(RemoteJobStatus::Queued)
        }
    }

    struct StubStorage;

    #[async_trait]
    impl ObjectStoragePort for StubStorage {
        async fn store(&self, _url: &str, key: &str) -> Result<String, StorageError> {
            Ok(format!("https://cdn.example/{key}"))
        }

        async fn store_bytes(&self, key: &str, _bytes: Vec<u8>) -> Result<String, StorageError> {
            Ok(format!("https://cdn.example/{key}"))
        }

        async fn fetch(&self, _url: &str) -> Result<Vec<u8>, StorageError> {
            Ok(vec![0u8; 8])
        }

        async fn fetch_compressed(&self, _url: &str, _quality: u8) -> Result<Vec<u8>, StorageError> {
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
        async fn insert(&self, job: &GenerationJobRecord) -> anyhow::Result<()> {
            self.jobs.lock().unwrap().insert(job.id, job.clone());
            Ok(())
        }

        async fn get(&self, id: JobId) -> anyhow::Result<Option<GenerationJobRecord>> {
            Ok(self.jobs.lock().unwrap().get(&id).cloned())
        }

        async fn set_remote_job_id(&self, id: JobId, remote: &str) -> anyhow::Result<()> {
            if let Some(job) = self.jobs.lock().unwrap().get_mut(&id) {
                job.remote_job_id = Some(remote.to_string());
            }
            Ok(())
        }

        async fn transition(
            &self,
            id: JobId,
            from: JobStatus,
            to: JobStatus,
        ) -> anyhow::Result<bool> {
            let mut jobs = self.jobs.lock().unwrap();
            match jobs.get_mut(&id) {
                Some(job) if job.status == from => {
                    job.status = to;
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn complete(&self, id: JobId, from: JobStatus, result: &str) -> anyhow::Result<bool> {
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

        async fn fail(&self, id: JobId, from: JobStatus, error: &str) -> anyhow::Result<bool> {
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

        async fn reset_for_retry(&self, _id: JobId) -> anyhow::Result<bool> {
            Ok(false)
        }
    }

    #[derive(Default)]
    struct MemoryCharacterStore {
        characters: Mutex<HashMap<CharacterId, CharacterIdentity>>,
    }

    #[async_trait]
    impl CharacterStorePort for MemoryCharacterStore {
        async fn get(&self, id: CharacterId) -> anyhow::Result<Option<CharacterIdentity>> {
            Ok(self.characters.lock().unwrap().get(&id).cloned())
        }

        async fn set_active_adapter(
            &self,
            id: CharacterId,
            adapter_id: AdapterId,
        ) -> anyhow::Result<()> {
            if let Some(c) = self.characters.lock().unwrap().get_mut(&id) {
                c.active_adapter_id = Some(adapter_id);
            }
            Ok(())
        }

        async fn clear_active_adapter(&self, id: CharacterId) -> anyhow::Result<()> {
            if let Some(c) = self.characters.lock().unwrap().get_mut(&id) {
                c.active_adapter_id = None;
            }
            Ok(())
        }
    }

    fn service(
        characters: Vec<CharacterIdentity>,
    ) -> (
        GenerationService<RecordingWorker, StubStorage, MemoryJobRepo>,
        Arc<MemoryJobRepo>,
        Arc<RecordingWorker>,
    ) {
        let store = Arc::new(MemoryCharacterStore::default());
        for character in characters {
            store
                .characters
                .lock()
                .unwrap()
                .insert(character.id, character);
        }

        let worker = Arc::new(RecordingWorker {
            submissions: Mutex::new(vec![]),
        });
        let storage = Arc::new(StubStorage);
        let jobs = Arc::new(MemoryJobRepo::default());
        let dispatcher = Arc::new(JobDispatcher::new(
            worker.clone(),
            storage.clone(),
            jobs.clone(),
            PollSettings {
                interval: Duration::from_millis(1),
                max_attempts: 5,
            },
        ));
        let graph_builder = Arc::new(GraphBuilder::new(storage));

        (
            GenerationService::new(store, graph_builder, dispatcher),
            jobs,
            worker,
        )
    }

    fn character(slug: &str, adapter: bool) -> CharacterIdentity {
        let mut c = CharacterIdentity::new(slug, slug, Gender::Female)
            .with_approved_tags("25 year old woman, long black hair")
            .with_approved_seed(7)
            .with_reference_image(format!("references/{slug}.png"));
        if adapter {
            c.active_adapter_id = Some(AdapterId::new());
        }
        c
    }

    #[tokio::test]
    async fn dual_nsfw_request_dispatches_a_dual_character_job() {
        let a = character("zanele", false);
        let b = character("marcus", false);
        let request = SceneRequest::new(
            "two people sitting at a table",
            OutputChannel::WebsiteNsfwPaired,
        )
        .with_primary(a.id)
        .with_secondary(b.id);

        let (service, jobs, worker) = service(vec![a, b]);
        let outcome = service.generate(&request).await.unwrap();

        assert_eq!(outcome.workflow, WorkflowKind::DualCharacter);
        assert_eq!(outcome.classification.content_level, ContentLevel::Suggestive);
        assert!(outcome.classification.has_dual_subject);

        let record = jobs.get(outcome.job_id).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Generating);
        assert_eq!(record.remote_job_id.as_deref(), Some("remote-1"));

        let submissions = worker.submissions.lock().unwrap();
        assert_eq!(submissions.len(), 1);
        assert!(submissions[0].to_string().contains("AttentionCouple"));
    }

    #[tokio::test]
    async fn adapter_backed_character_routes_through_multi_pass() {
        let a = character("zanele", true);
        let request = SceneRequest::new("reading in the garden", OutputChannel::WebsiteSafe)
            .with_primary(a.id);

        let (service, _, worker) = service(vec![a]);
        let outcome = service.generate(&request).await.unwrap();

        assert_eq!(outcome.workflow, WorkflowKind::MultiPass);
        let submissions = worker.submissions.lock().unwrap();
        assert!(submissions[0].to_string().contains("FaceDetailer"));
    }

    #[tokio::test]
    async fn unknown_character_is_rejected_before_dispatch() {
        let request = SceneRequest::new("a portrait", OutputChannel::CharacterPortrait)
            .with_primary(CharacterId::new());

        let (service, _, worker) = service(vec![]);
        assert!(service.generate(&request).await.is_err());
        assert!(worker.submissions.lock().unwrap().is_empty());
    }
}
