//! Application services - the orchestration and pipeline logic

pub mod generation_service;
pub mod graph_builder;
pub mod job_dispatcher;
pub mod prompt_decomposer;
pub mod resource_selector;
pub mod resume;
pub mod scene_classifier;
pub mod training_pipeline;

pub use generation_service::{GenerationOutcome, GenerationService};
pub use graph_builder::{GenerationJobSpec, GraphBuilder, GraphInputs, WorkflowKind};
pub use job_dispatcher::{JobDispatcher, PollSettings};
pub use training_pipeline::{TrainingPipelineService, TrainingSettings};
