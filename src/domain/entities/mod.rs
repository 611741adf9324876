//! Domain entities

mod adapter_pipeline;
mod character;
mod generation_job;
mod scene;

pub use adapter_pipeline::{
    AdapterPipeline, DatasetCounts, DatasetImage, EvalStatus, ImageSource, PipelineStatus,
};
pub use character::{CharacterAttributes, CharacterIdentity, Gender};
pub use generation_job::{GenerationJobRecord, JobStatus, RequestType};
pub use scene::{OutputChannel, SceneRequest};
