//! Remote generation worker client
//!
//! Speaks the serverless queue protocol: POST /run submits a job and
//! returns an id, GET /status/{id} reports queue state and, on completion,
//! the output image URLs.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::application::ports::outbound::{
    AdapterDownload, BinaryAsset, GenerationWorkerPort, RemoteJobStatus, WorkerError,
};

pub struct WorkerClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl WorkerClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    input: SubmitInput<'a>,
}

#[derive(Debug, Serialize)]
struct SubmitInput<'a> {
    workflow: &'a serde_json::Value,
    images: &'a [BinaryAsset],
    character_adapter_downloads: &'a [AdapterDownload],
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    output: Option<StatusOutput>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusOutput {
    #[serde(default)]
    images: Vec<String>,
}

#[async_trait]
impl GenerationWorkerPort for WorkerClient {
    async fn submit(
        &self,
        graph: serde_json::Value,
        assets: &[BinaryAsset],
        adapter_downloads: &[AdapterDownload],
    ) -> Result<String, WorkerError> {
        let request = SubmitRequest {
            input: SubmitInput {
                workflow: &graph,
                images: assets,
                character_adapter_downloads: adapter_downloads,
            },
        };

        let response = self
            .client
            .post(format!("{}/run", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(WorkerError::Api(format!("{status}: {body}")));
        }

        let submitted: SubmitResponse = response
            .json()
            .await
            .map_err(|e| WorkerError::Malformed(e.to_string()))?;
        Ok(submitted.id)
    }

    async fn poll_status(&self, remote_job_id: &str) -> Result<RemoteJobStatus, WorkerError> {
        let response = self
            .client
            .get(format!("{}/status/{}", self.base_url, remote_job_id))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(WorkerError::Api(format!("{status}: {body}")));
        }

        let status: StatusResponse = response
            .json()
            .await
            .map_err(|e| WorkerError::Malformed(e.to_string()))?;

        match status.status.as_str() {
            "IN_QUEUE" => Ok(RemoteJobStatus::Queued),
            "IN_PROGRESS" => Ok(RemoteJobStatus::Running),
            "COMPLETED" => {
                let images = status.output.map(|o| o.images).unwrap_or_default();
                if images.is_empty() {
                    return Err(WorkerError::Malformed(
                        "completed job reported no output images".to_string(),
                    ));
                }
                Ok(RemoteJobStatus::Completed { images })
            }
            "FAILED" | "CANCELLED" | "TIMED_OUT" => Ok(RemoteJobStatus::Failed {
                error: status
                    .error
                    .unwrap_or_else(|| format!("remote job {}", status.status.to_lowercase())),
            }),
            other => Err(WorkerError::Malformed(format!(
                "unknown remote status {other:?}"
            ))),
        }
    }
}
