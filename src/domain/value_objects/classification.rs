//! Scene classification - content level and scene kind

use serde::{Deserialize, Serialize};

/// Content rating for a scene, ordered from most to least conservative
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentLevel {
    Safe,
    Suggestive,
    Explicit,
}

impl ContentLevel {
    /// Clamp this level to a channel-imposed ceiling. Lowering is always
    /// allowed; the classifier never raises a level through clamping.
    pub fn clamp_to(self, ceiling: ContentLevel) -> ContentLevel {
        self.min(ceiling)
    }
}

impl std::fmt::Display for ContentLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Safe => write!(f, "safe"),
            Self::Suggestive => write!(f, "suggestive"),
            Self::Explicit => write!(f, "explicit"),
        }
    }
}

/// What kind of scene the text describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneKind {
    Intimate,
    Action,
    Portrait,
    Establishing,
}

impl std::fmt::Display for SceneKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Intimate => write!(f, "intimate"),
            Self::Action => write!(f, "action"),
            Self::Portrait => write!(f, "portrait"),
            Self::Establishing => write!(f, "establishing"),
        }
    }
}

/// Derived classification for a scene request. Never persisted - recomputed
/// from the request each time it is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneClassification {
    pub content_level: ContentLevel,
    pub scene_kind: SceneKind,
    pub has_dual_subject: bool,
}
