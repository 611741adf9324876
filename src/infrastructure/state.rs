//! Shared application state

use std::sync::Arc;

use anyhow::Result;

use crate::application::services::{
    GenerationService, GraphBuilder, JobDispatcher, TrainingPipelineService,
};
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::persistence::{
    self, SqliteCharacterRepository, SqliteJobRepository, SqlitePipelineRepository,
};
use crate::infrastructure::poller::PollerRegistry;
use crate::infrastructure::service_clients::{CaptioningClient, EvaluationClient, TrainingClient};
use crate::infrastructure::storage_client::StorageClient;
use crate::infrastructure::worker_client::WorkerClient;

pub type Dispatcher = JobDispatcher<WorkerClient, StorageClient, SqliteJobRepository>;
pub type Generation = GenerationService<WorkerClient, StorageClient, SqliteJobRepository>;
pub type Training = TrainingPipelineService<WorkerClient, StorageClient, SqliteJobRepository>;

/// Shared application state
pub struct AppState {
    pub config: AppConfig,
    pub generation_service: Generation,
    pub training_service: Arc<Training>,
    pub dispatcher: Arc<Dispatcher>,
    pub jobs: Arc<SqliteJobRepository>,
    pub pipelines: Arc<SqlitePipelineRepository>,
    pub characters: Arc<SqliteCharacterRepository>,
    /// Background poll loops, one per subject and request type
    pub pollers: PollerRegistry,
}

impl AppState {
    pub async fn new(config: AppConfig) -> Result<Self> {
        let pool = persistence::connect(&config.database_url).await?;
        let jobs = Arc::new(SqliteJobRepository::new(pool.clone()).await?);
        let pipelines = Arc::new(SqlitePipelineRepository::new(pool.clone()).await?);
        let characters = Arc::new(SqliteCharacterRepository::new(pool).await?);

        let worker = Arc::new(WorkerClient::new(
            &config.worker_base_url,
            &config.worker_api_key,
        ));
        let storage = Arc::new(StorageClient::new(
            &config.storage_base_url,
            &config.storage_bucket,
            &config.storage_api_key,
        ));

        let dispatcher = Arc::new(JobDispatcher::new(
            worker,
            storage.clone(),
            jobs.clone(),
            config.poll_settings(),
        ));
        let graph_builder = Arc::new(GraphBuilder::new(storage.clone()));

        let generation_service = GenerationService::new(
            characters.clone(),
            graph_builder.clone(),
            dispatcher.clone(),
        );
        let training_service = Arc::new(TrainingPipelineService::new(
            dispatcher.clone(),
            graph_builder,
            storage,
            pipelines.clone(),
            characters.clone(),
            Arc::new(CaptioningClient::new(&config.captioning_base_url)),
            Arc::new(TrainingClient::new(&config.training_base_url)),
            Arc::new(EvaluationClient::new(&config.evaluation_base_url)),
            config.training_settings(),
        ));

        Ok(Self {
            config,
            generation_service,
            training_service,
            dispatcher,
            jobs,
            pipelines,
            characters,
            pollers: PollerRegistry::new(),
        })
    }
}
