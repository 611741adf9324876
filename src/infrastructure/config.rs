//! Application configuration

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::application::services::{PollSettings, TrainingSettings};

/// Application configuration loaded from environment
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// SQLite connection URL for job and pipeline state
    pub database_url: String,

    /// Remote generation worker queue base URL
    pub worker_base_url: String,
    /// Bearer token for the worker queue
    pub worker_api_key: String,

    /// Object storage base URL
    pub storage_base_url: String,
    /// Bucket holding references, generated images, and adapters
    pub storage_bucket: String,
    /// Bearer token for object storage writes
    pub storage_api_key: String,

    /// Captioning service base URL
    pub captioning_base_url: String,
    /// Adapter training service base URL
    pub training_base_url: String,
    /// Consistency evaluation service base URL
    pub evaluation_base_url: String,

    /// HTTP server port
    pub server_port: u16,

    /// Seconds between remote status polls
    pub poll_interval_secs: u64,
    /// Status polls before a job is timed out
    pub poll_max_attempts: u32,

    /// Target dataset size for adapter training
    pub dataset_size: u32,
    /// Minimum passed images for a fresh training run
    pub min_passed: u32,
    /// Lowered minimum applied when resuming an interrupted run
    pub min_passed_resume: u32,
    /// Consistency score a dataset image must reach to pass
    pub eval_pass_score: f64,
    /// Training attempts before a pipeline is declared diverged
    pub max_training_attempts: u32,
    /// Sample generations per validation round
    pub validation_samples: u32,
    /// Mean validation score required to deploy
    pub validation_threshold: f64,
    /// Concurrent dataset image generations
    pub dataset_concurrency: usize,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://sceneforge.db?mode=rwc".to_string()),

            worker_base_url: env::var("WORKER_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8000".to_string()),
            worker_api_key: env::var("WORKER_API_KEY")
                .context("WORKER_API_KEY environment variable is required")?,

            storage_base_url: env::var("STORAGE_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:54321/storage/v1".to_string()),
            storage_bucket: env::var("STORAGE_BUCKET")
                .unwrap_or_else(|_| "sceneforge".to_string()),
            storage_api_key: env::var("STORAGE_API_KEY")
                .context("STORAGE_API_KEY environment variable is required")?,

            captioning_base_url: env::var("CAPTIONING_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8001".to_string()),
            training_base_url: env::var("TRAINING_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8002".to_string()),
            evaluation_base_url: env::var("EVALUATION_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8003".to_string()),

            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .context("SERVER_PORT must be a valid port number")?,

            poll_interval_secs: parse_or("POLL_INTERVAL_SECS", 5)?,
            poll_max_attempts: parse_or("POLL_MAX_ATTEMPTS", 120)?,

            dataset_size: parse_or("DATASET_SIZE", 30)?,
            min_passed: parse_or("MIN_PASSED", 20)?,
            min_passed_resume: parse_or("MIN_PASSED_RESUME", 15)?,
            eval_pass_score: parse_or("EVAL_PASS_SCORE", 0.75)?,
            max_training_attempts: parse_or("MAX_TRAINING_ATTEMPTS", 3)?,
            validation_samples: parse_or("VALIDATION_SAMPLES", 4)?,
            validation_threshold: parse_or("VALIDATION_THRESHOLD", 0.7)?,
            dataset_concurrency: parse_or("DATASET_CONCURRENCY", 3)?,
        })
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            interval: Duration::from_secs(self.poll_interval_secs),
            max_attempts: self.poll_max_attempts,
        }
    }

    pub fn training_settings(&self) -> TrainingSettings {
        TrainingSettings {
            dataset_size: self.dataset_size,
            min_passed: self.min_passed,
            min_passed_resume: self.min_passed_resume,
            eval_pass_score: self.eval_pass_score,
            max_training_attempts: self.max_training_attempts,
            validation_samples: self.validation_samples,
            validation_threshold: self.validation_threshold,
            dataset_concurrency: self.dataset_concurrency,
        }
    }
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .parse()
            .with_context(|| format!("{key} must be a valid number")),
        Err(_) => Ok(default),
    }
}
