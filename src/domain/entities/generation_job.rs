//! Generation job record - the persisted lifecycle of one remote job

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::value_objects::JobId;

/// Lifecycle status of a generation job. Only advances forward; the single
/// exception is an operator-triggered reset of `failed` back to `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Generating,
    Generated,
    Approved,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Generating => "generating",
            Self::Generated => "generated",
            Self::Approved => "approved",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "generating" => Some(Self::Generating),
            "generated" => Some(Self::Generated),
            "approved" => Some(Self::Approved),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Failed)
    }

    /// Forward-only advancement rule
    pub fn can_advance_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Generating)
                | (Self::Pending, Self::Failed)
                | (Self::Generating, Self::Generated)
                | (Self::Generating, Self::Failed)
                | (Self::Generated, Self::Approved)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What kind of image a job produces. Together with the subject id this
/// keys the job's poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    Scene,
    Portrait,
    DatasetImage,
    ValidationSample,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scene => "scene",
            Self::Portrait => "portrait",
            Self::DatasetImage => "dataset_image",
            Self::ValidationSample => "validation_sample",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scene" => Some(Self::Scene),
            "portrait" => Some(Self::Portrait),
            "dataset_image" => Some(Self::DatasetImage),
            "validation_sample" => Some(Self::ValidationSample),
            _ => None,
        }
    }
}

/// Persisted record of one generation job. Created at submission time and
/// mutated only by the poller (plus the operator retry reset).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationJobRecord {
    pub id: JobId,
    /// The entity this image is for (scene id, character id, ...)
    pub subject_id: String,
    pub request_type: RequestType,
    pub remote_job_id: Option<String>,
    pub status: JobStatus,
    /// Submitted job payload, kept so an operator retry can re-dispatch
    pub payload: Option<serde_json::Value>,
    /// Durable (or, on storage failure, ephemeral) URL of the result
    pub result_image: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GenerationJobRecord {
    pub fn new(subject_id: impl Into<String>, request_type: RequestType) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            subject_id: subject_id.into(),
            request_type,
            remote_job_id: None,
            status: JobStatus::Pending,
            payload: None,
            result_image: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Poll-loop key: independent loops never share state across keys
    pub fn poll_key(&self) -> String {
        format!("{}:{}", self.subject_id, self.request_type.as_str())
    }
}
