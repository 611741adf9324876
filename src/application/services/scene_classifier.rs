//! Scene classifier - pure keyword/pattern classification of scene text
//!
//! Classification drives resource selection and dimension policy. It is
//! deterministic and has no side effects. Unmatched text yields the most
//! conservative level the channel allows; keyword matching can only raise
//! the level within what the channel justifies, never past it.

use std::sync::OnceLock;

use regex::Regex;

use crate::domain::entities::{OutputChannel, SceneRequest};
use crate::domain::value_objects::{ContentLevel, SceneClassification, SceneKind};

fn explicit_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(naked|nude|undress(?:ed|ing)?|sex|thrust|moan|climax|orgasm|penetrat\w*|straddl\w*|grind(?:s|ing)\b)",
        )
        .expect("explicit pattern")
    })
}

fn suggestive_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(kiss(?:es|ing)?|lingerie|seductive|sensual|caress\w*|bit(?:es|ing) (?:her|his|their) lip|low-cut|cleavage|strip(?:s|ping)?\b)",
        )
        .expect("suggestive pattern")
    })
}

fn dual_subject_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // "together" only counts with a plural subject in the same clause;
        // bare uses ("pulls herself together") are single-subject idioms
        Regex::new(
            r"(?i)\b(two (?:people|women|men|figures|lovers)|both of them|the two of them|a couple\b|each other|(?:they|we|both)\b[^.!?]*\btogether\b|side by side)",
        )
        .expect("dual subject pattern")
    })
}

fn intimate_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(kiss\w*|embrace\w*|cuddl\w*|in bed|bedroom|caress\w*|holds? (?:her|his|their) (?:face|waist|hand)|whisper\w* (?:in|into))",
        )
        .expect("intimate pattern")
    })
}

fn action_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(runs?|running|fight\w*|chas\w*|jump\w*|danc\w*|climb\w*|sprint\w*|swim\w*)")
            .expect("action pattern")
    })
}

fn portrait_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(close-?up|portrait|headshot|face (?:lit|framed|turned)|looks? (?:at|into) the camera)")
            .expect("portrait pattern")
    })
}

/// Most conservative level the channel allows: safe placements cap at
/// `safe`; the adult placements start at `suggestive` because the
/// placement itself is adult content.
fn channel_floor(channel: OutputChannel) -> ContentLevel {
    if channel.is_nsfw() {
        ContentLevel::Suggestive
    } else {
        ContentLevel::Safe
    }
}

fn channel_ceiling(channel: OutputChannel) -> ContentLevel {
    if channel.is_nsfw() {
        ContentLevel::Explicit
    } else {
        ContentLevel::Safe
    }
}

/// Classify a scene request. Pure and deterministic.
pub fn classify(request: &SceneRequest) -> SceneClassification {
    let text = request.raw_text.as_str();

    let keyword_level = if explicit_re().is_match(text) {
        ContentLevel::Explicit
    } else if suggestive_re().is_match(text) {
        ContentLevel::Suggestive
    } else {
        ContentLevel::Safe
    };

    let content_level = keyword_level
        .max(channel_floor(request.channel))
        .clamp_to(channel_ceiling(request.channel));

    let scene_kind = if request.channel == OutputChannel::CharacterPortrait {
        SceneKind::Portrait
    } else if intimate_re().is_match(text) {
        SceneKind::Intimate
    } else if action_re().is_match(text) {
        SceneKind::Action
    } else if portrait_re().is_match(text) {
        SceneKind::Portrait
    } else {
        SceneKind::Establishing
    };

    let has_dual_subject = (request.primary_character.is_some()
        && request.secondary_character.is_some())
        || dual_subject_re().is_match(text);

    SceneClassification {
        content_level,
        scene_kind,
        has_dual_subject,
    }
}
