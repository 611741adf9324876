//! Decomposed prompt shapes produced by the prompt decomposer

use serde::{Deserialize, Serialize};

/// Which horizontal half of the frame a subject occupies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectRegion {
    Left,
    Right,
}

impl SubjectRegion {
    /// Horizontal extent of the region as (start, end) fractions of width
    pub fn extent(&self) -> (f32, f32) {
        match self {
            Self::Left => (0.0, 0.5),
            Self::Right => (0.5, 1.0),
        }
    }
}

/// Prompt text bound to a spatial region, used by the coupled-attention
/// passes to keep two subjects visually separated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionPrompt {
    pub region: SubjectRegion,
    pub prompt: String,
}

/// Result of decomposing one scene's raw text. Exists only for the duration
/// of a single job build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecomposedPrompt {
    /// Scene text with character physical descriptions stripped out
    pub scene_prompt: String,
    /// Identity prompt for the primary subject (approved tags or attribute fallback)
    pub primary_identity_prompt: Option<String>,
    /// Identity prompt for the secondary subject
    pub secondary_identity_prompt: Option<String>,
    /// Scene description shared across per-subject passes
    pub shared_scene_prompt: Option<String>,
    /// Per-subject spatial region prompts for the multi-subject path
    pub region_prompts: Vec<RegionPrompt>,
    /// Single combined prompt for the simple one-pass path
    pub full_prompt: String,
}
