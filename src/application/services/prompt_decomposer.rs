//! Prompt decomposer and composition augmenter
//!
//! Turns raw scene text plus approved character identities into the prompts
//! a job graph needs: a stripped scene prompt, per-subject identity prompts,
//! spatial composition cues for dual-subject frames, and a combined full
//! prompt for the one-pass path.
//!
//! Identity information always comes from the character record. Physical
//! descriptions that a scene accidentally re-describes are stripped so the
//! approved appearance and the scene text cannot drift apart.

use std::sync::OnceLock;

use regex::Regex;

use crate::domain::entities::CharacterIdentity;
use crate::domain::value_objects::{DecomposedPrompt, RegionPrompt, SubjectRegion};

/// Physical-descriptor vocabulary. A tag fragment counts as identity
/// description when it mentions one of these.
fn descriptor_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(hair|eyes?|skin|build|figure|freckle\w*|tattoo\w*|complexion|curv\w*|slender|athletic|petite|muscular|tall|short|year[- ]old|\d{1,3}\s*yo)\b",
        )
        .expect("descriptor pattern")
    })
}

fn age_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(\d{1,3})\s*(?:[- ]?years?[- ]old|yo|y/o)\b").expect("age pattern")
    })
}

fn spatial_framing_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(on the left|on the right|left side|right side|to (?:her|his|their) left|to (?:her|his|their) right|foreground|background|in front of|behind|side by side)\b",
        )
        .expect("spatial framing pattern")
    })
}

/// Fixed cue vocabulary for injected composition framing. Assignment is
/// deterministic: primary left, secondary right.
const CUE_PRIMARY: &str = "on the left side of the frame";
const CUE_SECONDARY: &str = "on the right side of the frame";

/// Replace a stale age token in approved tags with the canonical age from
/// the character record. Manually edited tags must not silently drift.
fn correct_age(tags: &str, canonical_age: Option<u8>) -> String {
    let Some(age) = canonical_age else {
        return tags.to_string();
    };
    age_token_re()
        .replace_all(tags, format!("{age} year old"))
        .into_owned()
}

/// Identity prompt for one character: corrected approved tags, or a minimal
/// description synthesized from structured attributes. A referenced subject
/// is never left completely undescribed.
pub fn identity_prompt(character: &CharacterIdentity) -> String {
    if let Some(tags) = &character.approved_tags {
        let corrected = correct_age(tags, character.canonical_age);
        if !corrected.trim().is_empty() {
            return corrected.trim().to_string();
        }
    }

    let attrs = &character.attributes;
    let mut parts: Vec<String> = Vec::new();
    match character.canonical_age {
        Some(age) => parts.push(format!("{age} year old {}", character.gender)),
        None => parts.push(character.gender.to_string()),
    }
    if let Some(color) = &attrs.hair_color {
        match &attrs.hair_style {
            Some(style) => parts.push(format!("{style} {color} hair")),
            None => parts.push(format!("{color} hair")),
        }
    }
    if let Some(eyes) = &attrs.eye_color {
        parts.push(format!("{eyes} eyes"));
    }
    if let Some(skin) = &attrs.skin_tone {
        parts.push(format!("{skin} skin"));
    }
    if let Some(build) = &attrs.build {
        parts.push(format!("{build} build"));
    }
    parts.join(", ")
}

/// Strip physical-description fragments belonging to described characters
/// out of the scene text. Idempotent: stripping an already-stripped prompt
/// changes nothing.
pub fn strip_identity_descriptions(raw_text: &str, characters: &[&CharacterIdentity]) -> String {
    let mut text = raw_text.to_string();

    for character in characters {
        let Some(tags) = &character.approved_tags else {
            continue;
        };
        for fragment in tags.split(',') {
            let fragment = fragment.trim();
            if fragment.is_empty() || !descriptor_re().is_match(fragment) {
                continue;
            }
            // Remove case-insensitive occurrences of the tag fragment
            let pattern = format!(r"(?i)\s*,?\s*\b{}\b", regex::escape(fragment));
            if let Ok(re) = Regex::new(&pattern) {
                text = re.replace_all(&text, "").into_owned();
            }
        }
    }

    normalize_whitespace(&text)
}

fn normalize_whitespace(text: &str) -> String {
    static RE_SPACES: OnceLock<Regex> = OnceLock::new();
    static RE_COMMAS: OnceLock<Regex> = OnceLock::new();
    let spaces = RE_SPACES.get_or_init(|| Regex::new(r"\s{2,}").expect("spaces pattern"));
    let commas = RE_COMMAS.get_or_init(|| Regex::new(r"(,\s*){2,}").expect("commas pattern"));

    let text = spaces.replace_all(text, " ");
    let text = commas.replace_all(&text, ", ");
    text.trim().trim_matches(',').trim().to_string()
}

/// Decompose raw scene text into the prompts one job build needs.
pub fn decompose(
    raw_text: &str,
    primary: Option<&CharacterIdentity>,
    secondary: Option<&CharacterIdentity>,
) -> DecomposedPrompt {
    let described: Vec<&CharacterIdentity> = primary.iter().chain(secondary.iter()).copied().collect();
    let scene_prompt = strip_identity_descriptions(raw_text, &described);

    let primary_identity = primary.map(identity_prompt);
    let secondary_identity = secondary.map(identity_prompt);

    let dual = primary.is_some() && secondary.is_some();
    let needs_cues = dual && !spatial_framing_re().is_match(&scene_prompt);

    let primary_cued = primary_identity.as_ref().map(|p| {
        if needs_cues {
            format!("{p}, {CUE_PRIMARY}")
        } else {
            p.clone()
        }
    });
    let secondary_cued = secondary_identity.as_ref().map(|p| {
        if needs_cues {
            format!("{p}, {CUE_SECONDARY}")
        } else {
            p.clone()
        }
    });

    let mut region_prompts = Vec::new();
    if dual {
        if let (Some(p), Some(s)) = (&primary_cued, &secondary_cued) {
            region_prompts.push(RegionPrompt {
                region: SubjectRegion::Left,
                prompt: p.clone(),
            });
            region_prompts.push(RegionPrompt {
                region: SubjectRegion::Right,
                prompt: s.clone(),
            });
        }
    }

    let full_prompt = {
        let mut parts: Vec<&str> = Vec::new();
        if let Some(p) = primary_cued.as_deref() {
            parts.push(p);
        }
        if let Some(s) = secondary_cued.as_deref() {
            parts.push(s);
        }
        if !scene_prompt.is_empty() {
            parts.push(&scene_prompt);
        }
        parts.join(", ")
    };

    DecomposedPrompt {
        shared_scene_prompt: (!described.is_empty() && !scene_prompt.is_empty())
            .then(|| scene_prompt.clone()),
        scene_prompt,
        primary_identity_prompt: primary_cued,
        secondary_identity_prompt: secondary_cued,
        region_prompts,
        full_prompt,
    }
}
