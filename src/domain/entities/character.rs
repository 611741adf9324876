//! Character identity - the approved appearance record this core reads

use serde::{Deserialize, Serialize};

use crate::domain::value_objects::{AdapterId, CharacterId};

/// Subject gender, passed through to the captioning service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Female,
    Male,
    Nonbinary,
}

impl std::fmt::Display for Gender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Female => write!(f, "female"),
            Self::Male => write!(f, "male"),
            Self::Nonbinary => write!(f, "nonbinary"),
        }
    }
}

/// Structured physical attributes, used to synthesize a minimal identity
/// prompt when a character has no approved tags yet
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterAttributes {
    pub hair_color: Option<String>,
    pub hair_style: Option<String>,
    pub eye_color: Option<String>,
    pub skin_tone: Option<String>,
    pub build: Option<String>,
}

/// A recurring character whose appearance must stay consistent across
/// independently generated images.
///
/// Owned by the external character-approval workflow. This core only reads
/// the approved fields and writes `active_adapter_id` on deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterIdentity {
    pub id: CharacterId,
    pub name: String,
    /// Stable slug used in storage keys and adapter filenames
    pub slug: String,
    pub gender: Gender,
    /// Canonical age from the character record; overrides any age token
    /// embedded in approved tags
    pub canonical_age: Option<u8>,
    /// Approved prompt fragment describing the character's appearance
    pub approved_tags: Option<String>,
    /// Seed of the approved reference portrait; per-request seeds derive
    /// from this for reproducibility
    pub approved_seed: Option<i64>,
    /// Storage key of the approved reference portrait
    pub reference_image: Option<String>,
    /// Storage key of the deployed identity adapter, if one exists
    pub active_adapter_id: Option<AdapterId>,
    pub attributes: CharacterAttributes,
}

impl CharacterIdentity {
    pub fn new(name: impl Into<String>, slug: impl Into<String>, gender: Gender) -> Self {
        Self {
            id: CharacterId::new(),
            name: name.into(),
            slug: slug.into(),
            gender,
            canonical_age: None,
            approved_tags: None,
            approved_seed: None,
            reference_image: None,
            active_adapter_id: None,
            attributes: CharacterAttributes::default(),
        }
    }

    pub fn with_approved_tags(mut self, tags: impl Into<String>) -> Self {
        self.approved_tags = Some(tags.into());
        self
    }

    pub fn with_approved_seed(mut self, seed: i64) -> Self {
        self.approved_seed = Some(seed);
        self
    }

    pub fn with_reference_image(mut self, key: impl Into<String>) -> Self {
        self.reference_image = Some(key.into());
        self
    }

    pub fn with_canonical_age(mut self, age: u8) -> Self {
        self.canonical_age = Some(age);
        self
    }

    pub fn with_attributes(mut self, attributes: CharacterAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// Whether a trained identity adapter is deployed for this character
    pub fn has_deployed_adapter(&self) -> bool {
        self.active_adapter_id.is_some()
    }

    /// Derive a reproducible seed for the image at `position` in a story.
    /// Falls back to a random seed when no portrait was ever approved.
    pub fn seed_for_position(&self, position: u32) -> i64 {
        match self.approved_seed {
            Some(seed) => seed.wrapping_add(position as i64),
            None => rand::random::<u32>() as i64,
        }
    }
}
