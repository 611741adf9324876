//! Ports for the external captioning, training, and evaluation services

use async_trait::async_trait;

use crate::domain::entities::Gender;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("service error: {0}")]
    Api(String),
}

/// Image captioning service used to label dataset images before training
#[async_trait]
pub trait CaptioningPort: Send + Sync {
    async fn caption(&self, image_ref: &str, gender: Gender) -> Result<String, ServiceError>;
}

/// One captioned image in a training payload
#[derive(Debug, Clone)]
pub struct TrainingImage {
    /// Re-encoded image bytes (compression tier chosen per attempt)
    pub bytes: Vec<u8>,
    pub caption: String,
}

/// Hyperparameters for one training attempt
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingParams {
    pub learning_rate: f64,
    pub steps: u32,
    pub network_rank: u32,
}

/// Adapter training service. Returns the trained weights blob.
#[async_trait]
pub trait TrainingPort: Send + Sync {
    async fn train(
        &self,
        images: &[TrainingImage],
        subject_slug: &str,
        attempt: u32,
        params: TrainingParams,
    ) -> Result<Vec<u8>, ServiceError>;
}

/// Face/body consistency judge. Scores a candidate image against the
/// character's approved reference portrait.
#[async_trait]
pub trait EvaluationPort: Send + Sync {
    async fn score(&self, image_ref: &str, reference_ref: &str) -> Result<f64, ServiceError>;
}
