//! Generation API routes

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::application::ports::outbound::JobRepositoryPort;
use crate::application::services::WorkflowKind;
use crate::domain::entities::{GenerationJobRecord, OutputChannel, SceneRequest};
use crate::domain::value_objects::{CharacterId, ContentLevel, JobId, SceneKind};
use crate::infrastructure::state::AppState;

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub text: String,
    pub channel: OutputChannel,
    #[serde(default)]
    pub primary_character_id: Option<String>,
    #[serde(default)]
    pub secondary_character_id: Option<String>,
    #[serde(default)]
    pub position: u32,
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub job_id: String,
    pub workflow: WorkflowKind,
    pub content_level: ContentLevel,
    pub scene_kind: SceneKind,
    pub dual_subject: bool,
}

#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub id: String,
    pub subject_id: String,
    pub request_type: String,
    pub status: String,
    pub remote_job_id: Option<String>,
    pub result_image: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<GenerationJobRecord> for JobResponse {
    fn from(r: GenerationJobRecord) -> Self {
        Self {
            id: r.id.to_string(),
            subject_id: r.subject_id,
            request_type: r.request_type.as_str().to_string(),
            status: r.status.as_str().to_string(),
            remote_job_id: r.remote_job_id,
            result_image: r.result_image,
            error: r.error,
            created_at: r.created_at.to_rfc3339(),
            updated_at: r.updated_at.to_rfc3339(),
        }
    }
}

fn parse_character(
    value: &Option<String>,
    label: &str,
) -> Result<Option<CharacterId>, (StatusCode, String)> {
    match value {
        Some(s) => Uuid::parse_str(s)
            .map(|u| Some(CharacterId::from_uuid(u)))
            .map_err(|_| (StatusCode::BAD_REQUEST, format!("Invalid {label} ID"))),
        None => Ok(None),
    }
}

fn parse_job_id(id: &str) -> Result<JobId, (StatusCode, String)> {
    Uuid::parse_str(id)
        .map(JobId::from_uuid)
        .map_err(|_| (StatusCode::BAD_REQUEST, "Invalid job ID".to_string()))
}

/// Run a scene request through classification, resource selection, prompt
/// decomposition, and dispatch; polling continues in the background
pub async fn generate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GenerateRequest>,
) -> Result<(StatusCode, Json<GenerateResponse>), (StatusCode, String)> {
    if req.text.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Scene text is required".to_string()));
    }

    let mut scene = SceneRequest::new(&req.text, req.channel).with_position(req.position);
    if let Some(id) = parse_character(&req.primary_character_id, "primary character")? {
        scene = scene.with_primary(id);
    }
    if let Some(id) = parse_character(&req.secondary_character_id, "secondary character")? {
        scene = scene.with_secondary(id);
    }

    let outcome = state
        .generation_service
        .generate(&scene)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    spawn_poll(&state, outcome.job_id).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(GenerateResponse {
            job_id: outcome.job_id.to_string(),
            workflow: outcome.workflow,
            content_level: outcome.classification.content_level,
            scene_kind: outcome.classification.scene_kind,
            dual_subject: outcome.classification.has_dual_subject,
        }),
    ))
}

/// Get a job record
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobResponse>, (StatusCode, String)> {
    let job_id = parse_job_id(&id)?;
    let record = state
        .jobs
        .get(job_id)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or_else(|| (StatusCode::NOT_FOUND, "Job not found".to_string()))?;
    Ok(Json(record.into()))
}

/// Reset a failed job and re-dispatch it
pub async fn retry_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobResponse>, (StatusCode, String)> {
    let job_id = parse_job_id(&id)?;
    let retried = state
        .dispatcher
        .retry(job_id)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    if !retried {
        return Err((
            StatusCode::CONFLICT,
            "Only failed jobs can be retried".to_string(),
        ));
    }

    spawn_poll(&state, job_id).await?;

    let record = state
        .jobs
        .get(job_id)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or_else(|| (StatusCode::NOT_FOUND, "Job not found".to_string()))?;
    Ok(Json(record.into()))
}

#[derive(Debug, Serialize)]
pub struct CancelPollResponse {
    pub cancelled: bool,
}

/// Cancel the local poll loop for a job. The remote job keeps running;
/// only our observation of it stops.
pub async fn cancel_poll(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CancelPollResponse>, (StatusCode, String)> {
    let job_id = parse_job_id(&id)?;
    let record = state
        .jobs
        .get(job_id)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or_else(|| (StatusCode::NOT_FOUND, "Job not found".to_string()))?;

    let cancelled = state.pollers.cancel(&record.poll_key());
    Ok(Json(CancelPollResponse { cancelled }))
}

/// Register the background poll loop for a dispatched job
async fn spawn_poll(state: &Arc<AppState>, job_id: JobId) -> Result<(), (StatusCode, String)> {
    let record = state
        .jobs
        .get(job_id)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or_else(|| (StatusCode::NOT_FOUND, "Job not found".to_string()))?;

    let dispatcher = state.dispatcher.clone();
    state.pollers.spawn(&record.poll_key(), async move {
        if let Err(e) = dispatcher.poll_until_done(job_id).await {
            tracing::warn!(job = %job_id, "poll loop ended with error: {e:#}");
        }
    });
    Ok(())
}
