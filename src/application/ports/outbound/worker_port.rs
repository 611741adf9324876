//! Generation worker port - the remote queue that executes job graphs

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A binary asset shipped alongside a job graph (reference images)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinaryAsset {
    /// Name the graph's load nodes refer to
    pub name: String,
    /// Base64-encoded image bytes
    pub data: String,
}

/// A per-character adapter file the worker should fetch and cache before
/// executing the graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterDownload {
    pub filename: String,
    pub url: String,
}

/// Remote job status as reported by the worker queue
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteJobStatus {
    Queued,
    Running,
    Completed { images: Vec<String> },
    Failed { error: String },
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("worker API error: {0}")]
    Api(String),
    #[error("malformed worker response: {0}")]
    Malformed(String),
}

/// The remote generation worker. Submission is fire-and-forget; results are
/// observed only through status polling.
#[async_trait]
pub trait GenerationWorkerPort: Send + Sync {
    /// Submit a job graph plus its binary assets. Returns the remote job id.
    async fn submit(
        &self,
        graph: serde_json::Value,
        assets: &[BinaryAsset],
        adapter_downloads: &[AdapterDownload],
    ) -> Result<String, WorkerError>;

    /// Check the status of a previously submitted job
    async fn poll_status(&self, remote_job_id: &str) -> Result<RemoteJobStatus, WorkerError>;
}
