//! Value objects - immutable domain values

mod classification;
mod ids;
mod prompt;
mod resources;

pub use classification::{ContentLevel, SceneClassification, SceneKind};
pub use ids::{AdapterId, CharacterId, DatasetImageId, JobId, SceneId};
pub use prompt::{DecomposedPrompt, RegionPrompt, SubjectRegion};
pub use resources::{BaseModel, DimensionPolicy, ResourceSelection, StyleAdapter};
