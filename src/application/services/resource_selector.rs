//! Resource selector - deterministic decision table over classification
//! and output channel
//!
//! Idempotent by construction: the same inputs always produce the same
//! selection, which matters because a request may be rebuilt on retry.

use crate::domain::entities::{CharacterIdentity, OutputChannel};
use crate::domain::value_objects::{
    BaseModel, ContentLevel, DimensionPolicy, ResourceSelection, SceneClassification, StyleAdapter,
};

const NEGATIVE_BASE: &str =
    "child, underage, deformed hands, extra fingers, extra limbs, watermark, text, lowres";
const NEGATIVE_SAFE: &str = "nudity, nsfw, cleavage";
const NEGATIVE_EXPLICIT: &str = "bad anatomy, disconnected limbs, merged bodies";

fn dimensions_for(channel: OutputChannel, dual_subject: bool) -> DimensionPolicy {
    match channel {
        OutputChannel::CharacterPortrait => DimensionPolicy::PORTRAIT,
        OutputChannel::StoryCover => DimensionPolicy::LANDSCAPE,
        OutputChannel::SocialTeaser => DimensionPolicy::SQUARE,
        OutputChannel::WebsiteSafe | OutputChannel::WebsiteNsfw => {
            if dual_subject {
                DimensionPolicy::LANDSCAPE
            } else {
                DimensionPolicy::PORTRAIT
            }
        }
        // Two subjects need horizontal room for distinct regions
        OutputChannel::WebsiteNsfwPaired => DimensionPolicy::LANDSCAPE,
    }
}

fn style_stack(level: ContentLevel) -> Vec<StyleAdapter> {
    let mut stack = vec![StyleAdapter::new(
        "detail-enhancer",
        "add_detail_xl.safetensors",
        0.6,
        false,
    )];
    match level {
        ContentLevel::Safe => {}
        ContentLevel::Suggestive => {
            stack.push(StyleAdapter::new(
                "skin-texture",
                "realistic_skin_xl.safetensors",
                0.4,
                true,
            ));
        }
        ContentLevel::Explicit => {
            stack.push(StyleAdapter::new(
                "skin-texture",
                "realistic_skin_xl.safetensors",
                0.5,
                true,
            ));
            stack.push(StyleAdapter::new(
                "anatomy-fix",
                "anatomy_fix_xl.safetensors",
                0.35,
                false,
            ));
        }
    }
    stack
}

/// Select the base model, style adapter stack, negative prompt, dimensions,
/// and hires-fix flag for one request.
///
/// When either character has a deployed identity adapter, style adapters
/// that steer facial features are dropped so identity control is never
/// split between a trained adapter and a generic style adapter.
pub fn select_resources(
    classification: &SceneClassification,
    channel: OutputChannel,
    primary: Option<&CharacterIdentity>,
    secondary: Option<&CharacterIdentity>,
) -> ResourceSelection {
    let base_model = match classification.content_level {
        ContentLevel::Safe | ContentLevel::Suggestive => BaseModel::RealisticGeneral,
        ContentLevel::Explicit => BaseModel::RealisticExplicit,
    };

    let identity_adapter_active = primary.is_some_and(|c| c.has_deployed_adapter())
        || secondary.is_some_and(|c| c.has_deployed_adapter());

    let mut style_adapters = style_stack(classification.content_level);
    if identity_adapter_active {
        style_adapters.retain(|a| !a.affects_faces);
    }

    let mut negative_prompt = NEGATIVE_BASE.to_string();
    match classification.content_level {
        ContentLevel::Safe => {
            negative_prompt.push_str(", ");
            negative_prompt.push_str(NEGATIVE_SAFE);
        }
        ContentLevel::Suggestive => {}
        ContentLevel::Explicit => {
            negative_prompt.push_str(", ");
            negative_prompt.push_str(NEGATIVE_EXPLICIT);
        }
    }

    let hires_fix = matches!(
        channel,
        OutputChannel::StoryCover
            | OutputChannel::CharacterPortrait
            | OutputChannel::WebsiteNsfwPaired
    );

    ResourceSelection {
        base_model,
        style_adapters,
        negative_prompt,
        dimensions: dimensions_for(channel, classification.has_dual_subject),
        hires_fix,
    }
}
