//! Identity adapter training pipeline - persisted state machine per character

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::value_objects::{AdapterId, CharacterId, DatasetImageId};

/// Lifecycle status of an adapter pipeline. Advances forward only, except
/// through an explicit resume that may re-enter an earlier stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    NoAdapter,
    Pending,
    GeneratingDataset,
    Evaluating,
    Captioning,
    Training,
    Validating,
    Deployed,
    Failed,
    Archived,
}

impl PipelineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoAdapter => "no_adapter",
            Self::Pending => "pending",
            Self::GeneratingDataset => "generating_dataset",
            Self::Evaluating => "evaluating",
            Self::Captioning => "captioning",
            Self::Training => "training",
            Self::Validating => "validating",
            Self::Deployed => "deployed",
            Self::Failed => "failed",
            Self::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "no_adapter" => Some(Self::NoAdapter),
            "pending" => Some(Self::Pending),
            "generating_dataset" => Some(Self::GeneratingDataset),
            "evaluating" => Some(Self::Evaluating),
            "captioning" => Some(Self::Captioning),
            "training" => Some(Self::Training),
            "validating" => Some(Self::Validating),
            "deployed" => Some(Self::Deployed),
            "failed" => Some(Self::Failed),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Deployed | Self::Failed | Self::Archived)
    }
}

impl std::fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One adapter training pipeline. State lives in the store, not in memory;
/// a run spans minutes to tens of minutes and survives process restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterPipeline {
    pub id: AdapterId,
    pub character_id: CharacterId,
    pub status: PipelineStatus,
    pub training_attempt: u32,
    /// Human-readable reason written on every failure transition
    pub failure_reason: Option<String>,
    /// Storage key of the trained weights, set by the training stage
    pub adapter_file: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AdapterPipeline {
    pub fn new(character_id: CharacterId) -> Self {
        let now = Utc::now();
        Self {
            id: AdapterId::new(),
            character_id,
            status: PipelineStatus::NoAdapter,
            training_attempt: 0,
            failure_reason: None,
            adapter_file: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Evaluation outcome for a dataset image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalStatus {
    Pending,
    Passed,
    Failed,
}

impl EvalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Passed => "passed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "passed" => Some(Self::Passed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Where a dataset image came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageSource {
    /// Produced by our own generation path
    Generated,
    /// Supplied by an external variation source
    Variation,
}

impl ImageSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generated => "generated",
            Self::Variation => "variation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "generated" => Some(Self::Generated),
            "variation" => Some(Self::Variation),
            _ => None,
        }
    }
}

/// A synthetic candidate image for adapter training. Child of a pipeline;
/// created during dataset generation, mutated by evaluation and captioning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetImage {
    pub id: DatasetImageId,
    pub pipeline_id: AdapterId,
    pub image_ref: String,
    pub source: ImageSource,
    pub eval_status: EvalStatus,
    pub eval_score: Option<f64>,
    pub caption: Option<String>,
}

impl DatasetImage {
    pub fn new(pipeline_id: AdapterId, image_ref: impl Into<String>, source: ImageSource) -> Self {
        Self {
            id: DatasetImageId::new(),
            pipeline_id,
            image_ref: image_ref.into(),
            source,
            eval_status: EvalStatus::Pending,
            eval_score: None,
            caption: None,
        }
    }
}

/// Aggregate dataset counts for a pipeline, used by resume logic and the
/// stage gates. Computed from the stored dataset image rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DatasetCounts {
    pub total: u32,
    pub pending_eval: u32,
    pub passed: u32,
    pub captioned: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_status_round_trips_through_strings() {
        for status in [
            PipelineStatus::NoAdapter,
            PipelineStatus::Pending,
            PipelineStatus::GeneratingDataset,
            PipelineStatus::Evaluating,
            PipelineStatus::Captioning,
            PipelineStatus::Training,
            PipelineStatus::Validating,
            PipelineStatus::Deployed,
            PipelineStatus::Failed,
            PipelineStatus::Archived,
        ] {
            assert_eq!(PipelineStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(PipelineStatus::parse("bogus"), None);
    }
}
