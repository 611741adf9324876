//! Scene request - one narrative description to turn into an image

use serde::{Deserialize, Serialize};

use crate::domain::value_objects::{CharacterId, SceneId};

/// Where the generated image will be placed. Closed set; each placement
/// implies a dimension policy and a content ceiling or floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputChannel {
    CharacterPortrait,
    StoryCover,
    WebsiteSafe,
    WebsiteNsfw,
    WebsiteNsfwPaired,
    SocialTeaser,
}

impl OutputChannel {
    /// Channels whose placement is itself adult content
    pub fn is_nsfw(&self) -> bool {
        matches!(self, Self::WebsiteNsfw | Self::WebsiteNsfwPaired)
    }
}

impl std::fmt::Display for OutputChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::CharacterPortrait => "character_portrait",
            Self::StoryCover => "story_cover",
            Self::WebsiteSafe => "website_safe",
            Self::WebsiteNsfw => "website_nsfw",
            Self::WebsiteNsfwPaired => "website_nsfw_paired",
            Self::SocialTeaser => "social_teaser",
        };
        write!(f, "{}", s)
    }
}

/// One scene to generate. Immutable once created; produced by the external
/// authoring step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneRequest {
    pub id: SceneId,
    pub raw_text: String,
    pub channel: OutputChannel,
    pub primary_character: Option<CharacterId>,
    pub secondary_character: Option<CharacterId>,
    /// Position of this image within its story, used for seed derivation
    pub position: u32,
}

impl SceneRequest {
    pub fn new(raw_text: impl Into<String>, channel: OutputChannel) -> Self {
        Self {
            id: SceneId::new(),
            raw_text: raw_text.into(),
            channel,
            primary_character: None,
            secondary_character: None,
            position: 0,
        }
    }

    pub fn with_primary(mut self, character: CharacterId) -> Self {
        self.primary_character = Some(character);
        self
    }

    pub fn with_secondary(mut self, character: CharacterId) -> Self {
        self.secondary_character = Some(character);
        self
    }

    pub fn with_position(mut self, position: u32) -> Self {
        self.position = position;
        self
    }

    pub fn character_count(&self) -> usize {
        self.primary_character.iter().count() + self.secondary_character.iter().count()
    }
}
