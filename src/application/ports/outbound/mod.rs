//! Outbound ports - Interfaces that the application requires from external systems

mod repository_port;
mod services_port;
mod storage_port;
mod worker_port;

pub use repository_port::{CharacterStorePort, JobRepositoryPort, PipelineRepositoryPort};
pub use services_port::{
    CaptioningPort, EvaluationPort, ServiceError, TrainingImage, TrainingParams, TrainingPort,
};
pub use storage_port::{ObjectStoragePort, StorageError};
pub use worker_port::{
    AdapterDownload, BinaryAsset, GenerationWorkerPort, RemoteJobStatus, WorkerError,
};
