//! Clients for the captioning, training, and evaluation services

use async_trait::async_trait;
use base64::Engine as _;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::application::ports::outbound::{
    CaptioningPort, EvaluationPort, ServiceError, TrainingImage, TrainingParams, TrainingPort,
};
use crate::domain::entities::Gender;

async fn error_for(response: reqwest::Response) -> ServiceError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    ServiceError::Api(format!("{status}: {body}"))
}

/// Vision-language captioning service
pub struct CaptioningClient {
    client: Client,
    base_url: String,
}

impl CaptioningClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct CaptionRequest<'a> {
    image_url: &'a str,
    subject_gender: String,
}

#[derive(Debug, Deserialize)]
struct CaptionResponse {
    caption: String,
}

#[async_trait]
impl CaptioningPort for CaptioningClient {
    async fn caption(&self, image_ref: &str, gender: Gender) -> Result<String, ServiceError> {
        let response = self
            .client
            .post(format!("{}/caption", self.base_url))
            .json(&CaptionRequest {
                image_url: image_ref,
                subject_gender: gender.to_string(),
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_for(response).await);
        }
        let body: CaptionResponse = response.json().await?;
        Ok(body.caption)
    }
}

/// Adapter training service. The dataset ships inline, base64-encoded,
/// which is why payload size remediation exists upstream.
pub struct TrainingClient {
    client: Client,
    base_url: String,
}

impl TrainingClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct TrainRequest {
    subject: String,
    attempt: u32,
    learning_rate: f64,
    steps: u32,
    network_rank: u32,
    images: Vec<TrainImagePayload>,
}

#[derive(Debug, Serialize)]
struct TrainImagePayload {
    data: String,
    caption: String,
}

#[async_trait]
impl TrainingPort for TrainingClient {
    async fn train(
        &self,
        images: &[TrainingImage],
        subject_slug: &str,
        attempt: u32,
        params: TrainingParams,
    ) -> Result<Vec<u8>, ServiceError> {
        let request = TrainRequest {
            subject: subject_slug.to_string(),
            attempt,
            learning_rate: params.learning_rate,
            steps: params.steps,
            network_rank: params.network_rank,
            images: images
                .iter()
                .map(|i| TrainImagePayload {
                    data: base64::engine::general_purpose::STANDARD.encode(&i.bytes),
                    caption: i.caption.clone(),
                })
                .collect(),
        };

        let response = self
            .client
            .post(format!("{}/train", self.base_url))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_for(response).await);
        }

        // The response body is the trained weights blob
        Ok(response.bytes().await?.to_vec())
    }
}

/// Face/body consistency judge
pub struct EvaluationClient {
    client: Client,
    base_url: String,
}

impl EvaluationClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ScoreRequest<'a> {
    image_url: &'a str,
    reference_url: &'a str,
}

#[derive(Debug, Deserialize)]
struct ScoreResponse {
    score: f64,
}

#[async_trait]
impl EvaluationPort for EvaluationClient {
    async fn score(&self, image_ref: &str, reference_ref: &str) -> Result<f64, ServiceError> {
        let response = self
            .client
            .post(format!("{}/score", self.base_url))
            .json(&ScoreRequest {
                image_url: image_ref,
                reference_url: reference_ref,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_for(response).await);
        }
        let body: ScoreResponse = response.json().await?;
        Ok(body.score)
    }
}
