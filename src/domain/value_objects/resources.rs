//! Resource selection output - models, adapter stacks, and dimension policy

use serde::{Deserialize, Serialize};

/// Base diffusion checkpoint to load for a generation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseModel {
    RealisticGeneral,
    RealisticExplicit,
}

impl BaseModel {
    /// Checkpoint filename as known to the remote worker
    pub fn checkpoint_file(&self) -> &'static str {
        match self {
            Self::RealisticGeneral => "realvis_xl_v50.safetensors",
            Self::RealisticExplicit => "bigasp_xl_v20.safetensors",
        }
    }
}

/// A supplementary style adapter layered on top of the base model.
/// Disjoint from character identity adapters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleAdapter {
    pub name: String,
    pub file: String,
    pub weight: f32,
    /// Adapters that steer facial features must be dropped when a character
    /// identity adapter is active so the two never fight over the face.
    pub affects_faces: bool,
}

impl StyleAdapter {
    pub fn new(
        name: impl Into<String>,
        file: impl Into<String>,
        weight: f32,
        affects_faces: bool,
    ) -> Self {
        Self {
            name: name.into(),
            file: file.into(),
            weight,
            affects_faces,
        }
    }
}

/// Output dimensions for a generation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionPolicy {
    pub width: u32,
    pub height: u32,
}

impl DimensionPolicy {
    pub const SQUARE: Self = Self {
        width: 1024,
        height: 1024,
    };
    pub const PORTRAIT: Self = Self {
        width: 832,
        height: 1216,
    };
    pub const LANDSCAPE: Self = Self {
        width: 1216,
        height: 832,
    };
}

/// Everything the graph builder needs to know about which resources a
/// request should use. Derived per request, deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSelection {
    pub base_model: BaseModel,
    pub style_adapters: Vec<StyleAdapter>,
    pub negative_prompt: String,
    pub dimensions: DimensionPolicy,
    pub hires_fix: bool,
}
