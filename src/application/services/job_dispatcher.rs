//! Job dispatcher and poller
//!
//! Dispatch persists the job record as `pending` before the submit call so
//! a crash between submission and response can still be reconciled later.
//! Polling is a bounded loop with a fixed interval; every status change is
//! a conditional write against the expected prior status, which makes the
//! `generating -> generated` transition exactly-once even under concurrent
//! observers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::application::ports::outbound::{
    GenerationWorkerPort, JobRepositoryPort, ObjectStoragePort, RemoteJobStatus,
};
use crate::application::services::graph_builder::GenerationJobSpec;
use crate::domain::entities::{GenerationJobRecord, JobStatus, RequestType};
use crate::domain::value_objects::JobId;

/// Poll loop bounds. Tuning values, sourced from configuration.
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_attempts: 120,
        }
    }
}

pub struct JobDispatcher<W, S, J>
where
    W: GenerationWorkerPort,
    S: ObjectStoragePort,
    J: JobRepositoryPort,
{
    worker: Arc<W>,
    storage: Arc<S>,
    jobs: Arc<J>,
    settings: PollSettings,
}

impl<W, S, J> JobDispatcher<W, S, J>
where
    W: GenerationWorkerPort,
    S: ObjectStoragePort,
    J: JobRepositoryPort,
{
    pub fn new(worker: Arc<W>, storage: Arc<S>, jobs: Arc<J>, settings: PollSettings) -> Self {
        Self {
            worker,
            storage,
            jobs,
            settings,
        }
    }

    /// Submit a job spec to the remote worker. The record exists with
    /// status `pending` before the network call goes out.
    pub async fn dispatch(
        &self,
        spec: &GenerationJobSpec,
        subject_id: &str,
        request_type: RequestType,
    ) -> Result<JobId> {
        let mut record = GenerationJobRecord::new(subject_id, request_type);
        record.payload = Some(serde_json::to_value(spec).context("serializing job spec")?);
        let job_id = record.id;
        self.jobs.insert(&record).await?;

        tracing::info!(
            job = %job_id,
            subject = subject_id,
            workflow = ?spec.workflow,
            "submitting generation job"
        );

        match self
            .worker
            .submit(spec.graph.clone(), &spec.assets, &spec.adapter_downloads)
            .await
        {
            Ok(remote_job_id) => {
                self.jobs.set_remote_job_id(job_id, &remote_job_id).await?;
                self.jobs
                    .transition(job_id, JobStatus::Pending, JobStatus::Generating)
                    .await?;
                Ok(job_id)
            }
            Err(e) => {
                let reason = format!("submission failed: {e}");
                self.jobs.fail(job_id, JobStatus::Pending, &reason).await?;
                Err(anyhow!(reason))
            }
        }
    }

    /// Poll the remote worker until the job reaches a terminal state or the
    /// attempt budget runs out. Returns the final record.
    pub async fn poll_until_done(&self, job_id: JobId) -> Result<GenerationJobRecord> {
        let mut transient_errors = 0u32;
        // Small configured budgets still tolerate at least one error
        let error_budget = (self.settings.max_attempts / 4).max(1);

        for _ in 0..self.settings.max_attempts {
            let record = self
                .jobs
                .get(job_id)
                .await?
                .ok_or_else(|| anyhow!("job {job_id} not found"))?;

            // Another observer may already have finished this job
            if record.status != JobStatus::Generating {
                return Ok(record);
            }

            let remote_id = record
                .remote_job_id
                .clone()
                .ok_or_else(|| anyhow!("job {job_id} is generating without a remote id"))?;

            match self.worker.poll_status(&remote_id).await {
                Ok(RemoteJobStatus::Queued | RemoteJobStatus::Running) => {}
                Ok(RemoteJobStatus::Completed { images }) => {
                    self.reconcile_completed(&record, &images).await?;
                    return self
                        .jobs
                        .get(job_id)
                        .await?
                        .ok_or_else(|| anyhow!("job {job_id} vanished after completion"));
                }
                Ok(RemoteJobStatus::Failed { error }) => {
                    tracing::warn!(job = %job_id, error = %error, "remote job failed");
                    self.jobs
                        .fail(job_id, JobStatus::Generating, &error)
                        .await?;
                    return self
                        .jobs
                        .get(job_id)
                        .await?
                        .ok_or_else(|| anyhow!("job {job_id} vanished after failure"));
                }
                Err(e) => {
                    transient_errors += 1;
                    tracing::warn!(
                        job = %job_id,
                        attempt = transient_errors,
                        "status poll failed: {e}"
                    );
                    if transient_errors > error_budget {
                        let reason = format!("status polling kept failing: {e}");
                        self.jobs
                            .fail(job_id, JobStatus::Generating, &reason)
                            .await?;
                        return Err(anyhow!(reason));
                    }
                }
            }

            tokio::time::sleep(self.settings.interval).await;
        }

        let reason = format!(
            "timed out after {} status polls",
            self.settings.max_attempts
        );
        self.jobs
            .fail(job_id, JobStatus::Generating, &reason)
            .await?;
        Err(anyhow!(reason))
    }

    /// Copy the result into durable storage and apply the single
    /// `generating -> generated` transition. Storage being down degrades to
    /// the ephemeral URL; it never fails the job.
    pub async fn reconcile_completed(
        &self,
        record: &GenerationJobRecord,
        images: &[String],
    ) -> Result<()> {
        let ephemeral = images
            .first()
            .ok_or_else(|| anyhow!("remote job completed with no images"))?;

        let key = format!(
            "generated/{}/{}.png",
            record.request_type.as_str(),
            record.id
        );
        let result_url = match self.storage.store(ephemeral, &key).await {
            Ok(stable) => stable,
            Err(e) => {
                tracing::warn!(
                    job = %record.id,
                    "durable storage unavailable, keeping ephemeral url: {e}"
                );
                ephemeral.clone()
            }
        };

        let applied = self
            .jobs
            .complete(record.id, JobStatus::Generating, &result_url)
            .await?;
        if applied {
            tracing::info!(job = %record.id, "job generated: {result_url}");
        } else {
            tracing::debug!(job = %record.id, "completion already applied by another observer");
        }
        Ok(())
    }

    /// Dispatch and block until the result image URL is available
    pub async fn dispatch_and_wait(
        &self,
        spec: &GenerationJobSpec,
        subject_id: &str,
        request_type: RequestType,
    ) -> Result<String> {
        let job_id = self.dispatch(spec, subject_id, request_type).await?;
        let record = self.poll_until_done(job_id).await?;
        match record.status {
            JobStatus::Generated | JobStatus::Approved => record
                .result_image
                .ok_or_else(|| anyhow!("job {job_id} generated without a result image")),
            _ => Err(anyhow!(
                "job {job_id} ended {}: {}",
                record.status,
                record.error.unwrap_or_else(|| "no reason recorded".into())
            )),
        }
    }

    /// Operator retry: reset a failed job to `pending` and re-dispatch its
    /// stored payload. Returns false when the job was not in `failed`.
    pub async fn retry(&self, job_id: JobId) -> Result<bool> {
        if !self.jobs.reset_for_retry(job_id).await? {
            return Ok(false);
        }
        let record = self
            .jobs
            .get(job_id)
            .await?
            .ok_or_else(|| anyhow!("job {job_id} not found"))?;
        let spec: GenerationJobSpec = match &record.payload {
            Some(payload) => serde_json::from_value(payload.clone())
                .context("deserializing stored job payload")?,
            None => return Err(anyhow!("job {job_id} has no stored payload to retry")),
        };

        tracing::info!(job = %job_id, "re-dispatching failed job");
        match self
            .worker
            .submit(spec.graph.clone(), &spec.assets, &spec.adapter_downloads)
            .await
        {
            Ok(remote_job_id) => {
                self.jobs.set_remote_job_id(job_id, &remote_job_id).await?;
                self.jobs
                    .transition(job_id, JobStatus::Pending, JobStatus::Generating)
                    .await?;
                Ok(true)
            }
            Err(e) => {
                let reason = format!("resubmission failed: {e}");
                self.jobs.fail(job_id, JobStatus::Pending, &reason).await?;
                Err(anyhow!(reason))
            }
        }
    }

    pub fn settings(&self) -> PollSettings {
        self.settings
    }
}
