//! Adapter pipeline API routes

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::application::ports::outbound::PipelineRepositoryPort;
use crate::domain::entities::{
    AdapterPipeline, DatasetCounts, DatasetImage, ImageSource, PipelineStatus,
};
use crate::domain::value_objects::{AdapterId, CharacterId};
use crate::infrastructure::state::AppState;

#[derive(Debug, Serialize)]
pub struct DatasetCountsResponse {
    pub total: u32,
    pub pending_eval: u32,
    pub passed: u32,
    pub captioned: u32,
}

#[derive(Debug, Serialize)]
pub struct AdapterResponse {
    pub id: String,
    pub character_id: String,
    pub status: String,
    pub training_attempt: u32,
    pub failure_reason: Option<String>,
    pub adapter_file: Option<String>,
    pub dataset: DatasetCountsResponse,
    pub created_at: String,
    pub updated_at: String,
}

impl AdapterResponse {
    fn from(pipeline: AdapterPipeline, counts: DatasetCounts) -> Self {
        Self {
            id: pipeline.id.to_string(),
            character_id: pipeline.character_id.to_string(),
            status: pipeline.status.as_str().to_string(),
            training_attempt: pipeline.training_attempt,
            failure_reason: pipeline.failure_reason,
            adapter_file: pipeline.adapter_file,
            dataset: DatasetCountsResponse {
                total: counts.total,
                pending_eval: counts.pending_eval,
                passed: counts.passed,
                captioned: counts.captioned,
            },
            created_at: pipeline.created_at.to_rfc3339(),
            updated_at: pipeline.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StartTrainingResponse {
    pub pipeline_id: String,
}

fn parse_adapter_id(id: &str) -> Result<AdapterId, (StatusCode, String)> {
    Uuid::parse_str(id)
        .map(AdapterId::from_uuid)
        .map_err(|_| (StatusCode::BAD_REQUEST, "Invalid adapter ID".to_string()))
}

/// Start a fresh training pipeline for a character. The run continues in a
/// background task; operators watch it through GET /api/adapters/{id}.
pub async fn start_training(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<StartTrainingResponse>), (StatusCode, String)> {
    let character_id = Uuid::parse_str(&id)
        .map(CharacterId::from_uuid)
        .map_err(|_| (StatusCode::BAD_REQUEST, "Invalid character ID".to_string()))?;

    let pipeline_id = state
        .training_service
        .start(character_id)
        .await
        .map_err(|e| (StatusCode::CONFLICT, e.to_string()))?;

    let service = state.training_service.clone();
    tokio::spawn(async move {
        if let Err(e) = service.run_fresh(pipeline_id).await {
            tracing::error!(pipeline = %pipeline_id, "training run ended with error: {e:#}");
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(StartTrainingResponse {
            pipeline_id: pipeline_id.to_string(),
        }),
    ))
}

/// Resume an interrupted or failed pipeline from its persisted state
pub async fn resume_pipeline(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    let adapter_id = parse_adapter_id(&id)?;
    state
        .pipelines
        .get(adapter_id)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or_else(|| (StatusCode::NOT_FOUND, "Pipeline not found".to_string()))?;

    let service = state.training_service.clone();
    tokio::spawn(async move {
        if let Err(e) = service.resume(adapter_id).await {
            tracing::error!(pipeline = %adapter_id, "resume ended with error: {e:#}");
        }
    });

    Ok(StatusCode::ACCEPTED)
}

/// Retire a deployed adapter
pub async fn archive_pipeline(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    let adapter_id = parse_adapter_id(&id)?;
    let archived = state
        .training_service
        .archive(adapter_id)
        .await
        .map_err(|e| match e.to_string().contains("not found") {
            true => (StatusCode::NOT_FOUND, e.to_string()),
            false => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        })?;
    if !archived {
        return Err((
            StatusCode::CONFLICT,
            "Only deployed adapters can be archived".to_string(),
        ));
    }
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
pub struct AddDatasetImageRequest {
    pub image_ref: String,
}

#[derive(Debug, Serialize)]
pub struct AddDatasetImageResponse {
    pub image_id: String,
}

/// Operator intake of an externally produced variation image. Variation
/// rows count toward the dataset target alongside generated ones, so a
/// failed run can be topped up before a resume.
pub async fn add_dataset_image(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<AddDatasetImageRequest>,
) -> Result<(StatusCode, Json<AddDatasetImageResponse>), (StatusCode, String)> {
    if req.image_ref.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "image_ref is required".to_string()));
    }

    let adapter_id = parse_adapter_id(&id)?;
    let pipeline = state
        .pipelines
        .get(adapter_id)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or_else(|| (StatusCode::NOT_FOUND, "Pipeline not found".to_string()))?;
    if matches!(
        pipeline.status,
        PipelineStatus::Deployed | PipelineStatus::Archived
    ) {
        return Err((
            StatusCode::CONFLICT,
            "Pipeline is no longer accepting dataset images".to_string(),
        ));
    }

    let image = DatasetImage::new(adapter_id, req.image_ref, ImageSource::Variation);
    state
        .pipelines
        .insert_dataset_image(&image)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok((
        StatusCode::CREATED,
        Json(AddDatasetImageResponse {
            image_id: image.id.to_string(),
        }),
    ))
}

/// Pipeline record plus aggregate dataset counts
pub async fn get_pipeline(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<AdapterResponse>, (StatusCode, String)> {
    let adapter_id = parse_adapter_id(&id)?;
    let pipeline = state
        .pipelines
        .get(adapter_id)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or_else(|| (StatusCode::NOT_FOUND, "Pipeline not found".to_string()))?;
    let counts = state
        .pipelines
        .dataset_counts(adapter_id)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(AdapterResponse::from(pipeline, counts)))
}
