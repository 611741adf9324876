//! Generation graph builder
//!
//! Assembles the declarative job graph (numbered nodes, worker-side
//! execution) for one request. The workflow kind is a state machine over
//! the request's characters: a deployed identity adapter always wins over
//! image-conditioning, reference anchoring covers characters without one,
//! and dual subjects get explicit spatial regions so the two faces never
//! bleed into each other.

use std::sync::Arc;

use anyhow::{Context, Result};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::application::ports::outbound::{AdapterDownload, BinaryAsset, ObjectStoragePort};
use crate::domain::entities::CharacterIdentity;
use crate::domain::value_objects::{DecomposedPrompt, ResourceSelection, SubjectRegion};

/// Which job graph shape a request gets. Mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    /// No character attached; plain synthesis
    Portrait,
    /// One subject anchored through an image-conditioning reference pass
    SingleCharacter,
    /// Two subjects, reference anchoring plus explicit spatial regions
    DualCharacter,
    /// A trained identity adapter routes identity; per-subject face
    /// refinement replaces image-conditioning
    MultiPass,
}

/// Pick the workflow for a request. A deployed adapter on the primary
/// character is preferred regardless of subject count.
pub fn select_workflow(
    primary: Option<&CharacterIdentity>,
    secondary: Option<&CharacterIdentity>,
) -> WorkflowKind {
    match (primary, secondary) {
        (Some(p), _) if p.has_deployed_adapter() => WorkflowKind::MultiPass,
        (Some(_), Some(_)) => WorkflowKind::DualCharacter,
        (Some(_), None) => WorkflowKind::SingleCharacter,
        (None, _) => WorkflowKind::Portrait,
    }
}

/// The assembled job specification. Submitted once, immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationJobSpec {
    pub workflow: WorkflowKind,
    /// Node graph in the worker's wire format
    pub graph: Value,
    /// Base64-encoded reference images the graph's load nodes refer to
    pub assets: Vec<BinaryAsset>,
    /// Identity adapter files the worker must fetch and cache before running
    pub adapter_downloads: Vec<AdapterDownload>,
}

/// Everything the builder needs besides reference image bytes
#[derive(Debug, Clone, Copy)]
pub struct GraphInputs<'a> {
    pub prompt: &'a DecomposedPrompt,
    pub resources: &'a ResourceSelection,
    pub seed: i64,
    pub primary: Option<&'a CharacterIdentity>,
    pub secondary: Option<&'a CharacterIdentity>,
}

/// Adapter filename as known to the worker's cache
pub fn adapter_filename_for(slug: &str, id: crate::domain::value_objects::AdapterId) -> String {
    format!("characters/{}_{}.safetensors", slug, id.as_uuid().simple())
}

/// Storage key of a trained adapter as known to the worker's cache
pub fn adapter_filename(character: &CharacterIdentity) -> Option<String> {
    character
        .active_adapter_id
        .map(|id| adapter_filename_for(&character.slug, id))
}

/// Builds job graphs. Pure given its inputs, except that image-conditioning
/// workflows fetch the character's approved reference image once.
pub struct GraphBuilder<S: ObjectStoragePort> {
    storage: Arc<S>,
}

impl<S: ObjectStoragePort> GraphBuilder<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    pub async fn build(&self, inputs: GraphInputs<'_>) -> Result<GenerationJobSpec> {
        let workflow = select_workflow(inputs.primary, inputs.secondary);

        let mut assets = Vec::new();
        if matches!(
            workflow,
            WorkflowKind::SingleCharacter | WorkflowKind::DualCharacter
        ) {
            for character in [inputs.primary, inputs.secondary].into_iter().flatten() {
                if let Some(reference) = &character.reference_image {
                    let bytes = self
                        .storage
                        .fetch(reference)
                        .await
                        .with_context(|| format!("fetching reference image for {}", character.slug))?;
                    assets.push(BinaryAsset {
                        name: format!("ref_{}.png", character.slug),
                        data: base64::engine::general_purpose::STANDARD.encode(bytes),
                    });
                } else {
                    tracing::warn!(
                        character = %character.slug,
                        "no approved reference image; anchoring pass will be skipped"
                    );
                }
            }
        }

        let mut adapter_downloads = Vec::new();
        if workflow == WorkflowKind::MultiPass {
            for character in [inputs.primary, inputs.secondary].into_iter().flatten() {
                if let Some(filename) = adapter_filename(character) {
                    adapter_downloads.push(AdapterDownload {
                        url: self.storage.public_url(&format!("adapters/{filename}")),
                        filename,
                    });
                }
            }
        }

        let graph = assemble_graph(workflow, &inputs, &assets);

        Ok(GenerationJobSpec {
            workflow,
            graph,
            assets,
            adapter_downloads,
        })
    }
}

/// Incrementally numbered node graph in the worker's wire format
struct GraphAssembler {
    nodes: Map<String, Value>,
    next_id: u32,
}

impl GraphAssembler {
    fn new() -> Self {
        Self {
            nodes: Map::new(),
            next_id: 1,
        }
    }

    fn add(&mut self, class_type: &str, inputs: Value) -> String {
        let id = self.next_id.to_string();
        self.next_id += 1;
        self.nodes.insert(
            id.clone(),
            json!({ "class_type": class_type, "inputs": inputs }),
        );
        id
    }

    fn finish(self) -> Value {
        Value::Object(self.nodes)
    }
}

fn link(node_id: &str, output: u32) -> Value {
    json!([node_id, output])
}

/// Assemble the node graph. Pure; exercised directly by the unit tests.
pub fn assemble_graph(
    workflow: WorkflowKind,
    inputs: &GraphInputs<'_>,
    assets: &[BinaryAsset],
) -> Value {
    let mut g = GraphAssembler::new();
    let res = inputs.resources;
    let prompt = inputs.prompt;

    let checkpoint = g.add(
        "CheckpointLoaderSimple",
        json!({ "ckpt_name": res.base_model.checkpoint_file() }),
    );
    let mut model = link(&checkpoint, 0);
    let mut clip = link(&checkpoint, 1);
    let vae = link(&checkpoint, 2);

    // Style adapter stack, chained in selection order
    for adapter in &res.style_adapters {
        let loader = g.add(
            "LoraLoader",
            json!({
                "lora_name": adapter.file,
                "strength_model": adapter.weight,
                "strength_clip": adapter.weight,
                "model": model,
                "clip": clip,
            }),
        );
        model = link(&loader, 0);
        clip = link(&loader, 1);
    }

    // Trained identity adapters load like style adapters but from the
    // worker's character cache
    if workflow == WorkflowKind::MultiPass {
        for character in [inputs.primary, inputs.secondary].into_iter().flatten() {
            if let Some(filename) = adapter_filename(character) {
                let loader = g.add(
                    "LoraLoader",
                    json!({
                        "lora_name": filename,
                        "strength_model": 0.85,
                        "strength_clip": 0.85,
                        "model": model,
                        "clip": clip,
                    }),
                );
                model = link(&loader, 0);
                clip = link(&loader, 1);
            }
        }
    }

    let negative = g.add(
        "CLIPTextEncode",
        json!({ "text": res.negative_prompt, "clip": clip }),
    );
    let negative_cond = link(&negative, 0);

    // Positive conditioning: a single full prompt, except for dual subjects
    // where the shared scene prompt is coupled with per-region prompts
    let dual_regions = matches!(workflow, WorkflowKind::DualCharacter)
        || (workflow == WorkflowKind::MultiPass && prompt.region_prompts.len() == 2);

    let positive_cond = if dual_regions && prompt.region_prompts.len() == 2 {
        let shared = prompt
            .shared_scene_prompt
            .clone()
            .unwrap_or_else(|| prompt.scene_prompt.clone());
        let base = g.add("CLIPTextEncode", json!({ "text": shared, "clip": clip }));

        let mut couple_inputs = json!({
            "model": model,
            "base_conditioning": link(&base, 0),
        });
        for (i, region) in prompt.region_prompts.iter().enumerate() {
            let (start, end) = region.region.extent();
            let cond = g.add(
                "CLIPTextEncode",
                json!({ "text": region.prompt, "clip": clip }),
            );
            let mask = g.add(
                "CreateSoftRegionMask",
                json!({
                    "width": res.dimensions.width,
                    "height": res.dimensions.height,
                    "start_pct": start,
                    "end_pct": end,
                    "feather_pct": 0.1,
                }),
            );
            couple_inputs[format!("conditioning_{}", i + 1)] = link(&cond, 0);
            couple_inputs[format!("mask_{}", i + 1)] = link(&mask, 0);
        }
        let couple = g.add("AttentionCouple", couple_inputs);
        model = link(&couple, 0);
        link(&couple, 1)
    } else {
        let positive = g.add(
            "CLIPTextEncode",
            json!({ "text": prompt.full_prompt, "clip": clip }),
        );
        link(&positive, 0)
    };

    // Reference anchoring: each shipped reference image conditions the
    // model on the approved appearance
    if matches!(
        workflow,
        WorkflowKind::SingleCharacter | WorkflowKind::DualCharacter
    ) && !assets.is_empty()
    {
        let ip_loader = g.add(
            "IPAdapterUnifiedLoader",
            json!({ "preset": "PLUS FACE (portraits)", "model": model }),
        );
        let ip_model = link(&ip_loader, 0);
        let ip_pipeline = link(&ip_loader, 1);
        let mut anchored = ip_model;

        for (i, asset) in assets.iter().enumerate() {
            let image = g.add("ETN_LoadImageBase64", json!({ "image": asset.name }));
            let mut apply_inputs = json!({
                "model": anchored,
                "ipadapter": ip_pipeline,
                "image": link(&image, 0),
                "weight": 0.8,
                "start_at": 0.0,
                "end_at": 0.9,
            });
            // Dual anchoring confines each reference to its subject's region
            if workflow == WorkflowKind::DualCharacter && assets.len() == 2 {
                let (start, end) = if i == 0 {
                    SubjectRegion::Left.extent()
                } else {
                    SubjectRegion::Right.extent()
                };
                let mask = g.add(
                    "CreateSoftRegionMask",
                    json!({
                        "width": res.dimensions.width,
                        "height": res.dimensions.height,
                        "start_pct": start,
                        "end_pct": end,
                        "feather_pct": 0.1,
                    }),
                );
                apply_inputs["attn_mask"] = link(&mask, 0);
            }
            let apply = g.add("IPAdapterAdvanced", apply_inputs);
            anchored = link(&apply, 0);
        }
        model = anchored;
    }

    let latent = g.add(
        "EmptyLatentImage",
        json!({
            "width": res.dimensions.width,
            "height": res.dimensions.height,
            "batch_size": 1,
        }),
    );

    let sampler = g.add(
        "KSampler",
        json!({
            "model": model,
            "positive": positive_cond,
            "negative": negative_cond,
            "latent_image": link(&latent, 0),
            "seed": inputs.seed,
            "steps": 30,
            "cfg": 6.5,
            "sampler_name": "dpmpp_2m_sde",
            "scheduler": "karras",
            "denoise": 1.0,
        }),
    );
    let mut latent_out = link(&sampler, 0);

    if res.hires_fix {
        let upscale = g.add(
            "LatentUpscaleBy",
            json!({ "samples": latent_out, "upscale_method": "nearest-exact", "scale_by": 1.5 }),
        );
        let second = g.add(
            "KSampler",
            json!({
                "model": model,
                "positive": positive_cond,
                "negative": negative_cond,
                "latent_image": link(&upscale, 0),
                "seed": inputs.seed,
                "steps": 18,
                "cfg": 6.5,
                "sampler_name": "dpmpp_2m_sde",
                "scheduler": "karras",
                "denoise": 0.45,
            }),
        );
        latent_out = link(&second, 0);
    }

    let decode = g.add("VAEDecode", json!({ "samples": latent_out, "vae": vae }));
    let mut image_out = link(&decode, 0);

    // Per-subject face refinement for the adapter-driven path
    if workflow == WorkflowKind::MultiPass {
        let subject_prompts: Vec<String> = if prompt.region_prompts.is_empty() {
            prompt.primary_identity_prompt.iter().cloned().collect()
        } else {
            prompt.region_prompts.iter().map(|r| r.prompt.clone()).collect()
        };
        for subject_prompt in subject_prompts {
            let refine = g.add(
                "FaceDetailer",
                json!({
                    "image": image_out,
                    "model": model,
                    "clip": clip,
                    "vae": vae,
                    "positive": positive_cond,
                    "negative": negative_cond,
                    "wildcard": subject_prompt,
                    "seed": inputs.seed,
                    "denoise": 0.4,
                }),
            );
            image_out = link(&refine, 0);
        }
    }

    g.add(
        "SaveImage",
        json!({ "images": image_out, "filename_prefix": "sceneforge" }),
    );

    g.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::services::{prompt_decomposer, resource_selector, scene_classifier};
    use crate::domain::entities::{Gender, OutputChannel, SceneRequest};
    use crate::domain::value_objects::AdapterId;

    fn character(slug: &str, adapter: bool) -> CharacterIdentity {
        let mut c = CharacterIdentity::new(slug, slug, Gender::Female)
            .with_approved_tags("25 year old woman, long black hair")
            .with_reference_image(format!("references/{slug}.png"));
        if adapter {
            c.active_adapter_id = Some(AdapterId::new());
        }
        c
    }

    fn graph_inputs<'a>(
        prompt: &'a DecomposedPrompt,
        resources: &'a ResourceSelection,
        primary: Option<&'a CharacterIdentity>,
        secondary: Option<&'a CharacterIdentity>,
    ) -> GraphInputs<'a> {
        GraphInputs {
            prompt,
            resources,
            seed: 42,
            primary,
            secondary,
        }
    }

    fn resources_for(text: &str, channel: OutputChannel) -> ResourceSelection {
        let request = SceneRequest::new(text, channel);
        let classification = scene_classifier::classify(&request);
        resource_selector::select_resources(&classification, channel, None, None)
    }

    #[test]
    fn deployed_adapter_always_selects_multi_pass() {
        let with_adapter = character("zanele", true);
        let plain = character("marcus", false);

        assert_eq!(
            select_workflow(Some(&with_adapter), None),
            WorkflowKind::MultiPass
        );
        // Even with two subjects, the trained adapter wins
        assert_eq!(
            select_workflow(Some(&with_adapter), Some(&plain)),
            WorkflowKind::MultiPass
        );
        assert_ne!(
            select_workflow(Some(&with_adapter), None),
            WorkflowKind::SingleCharacter
        );
    }

    #[test]
    fn workflow_fallbacks_without_adapters() {
        let a = character("zanele", false);
        let b = character("marcus", false);
        assert_eq!(select_workflow(Some(&a), Some(&b)), WorkflowKind::DualCharacter);
        assert_eq!(select_workflow(Some(&a), None), WorkflowKind::SingleCharacter);
        assert_eq!(select_workflow(None, None), WorkflowKind::Portrait);
    }

    #[test]
    fn dual_graph_contains_region_masks_and_coupled_attention() {
        let a = character("zanele", false);
        let b = character("marcus", false);
        let prompt = prompt_decomposer::decompose("two people at a table", Some(&a), Some(&b));
        let resources = resources_for("two people at a table", OutputChannel::WebsiteNsfwPaired);
        let assets = vec![
            BinaryAsset { name: "ref_zanele.png".into(), data: "aaa".into() },
            BinaryAsset { name: "ref_marcus.png".into(), data: "bbb".into() },
        ];

        let graph = assemble_graph(
            WorkflowKind::DualCharacter,
            &graph_inputs(&prompt, &resources, Some(&a), Some(&b)),
            &assets,
        );
        let rendered = graph.to_string();
        assert!(rendered.contains("CreateSoftRegionMask"));
        assert!(rendered.contains("AttentionCouple"));
        assert!(rendered.contains("IPAdapterAdvanced"));
    }

    #[test]
    fn multi_pass_graph_loads_the_identity_adapter_and_refines_faces() {
        let a = character("zanele", true);
        let prompt = prompt_decomposer::decompose("reading in the garden", Some(&a), None);
        let resources = resources_for("reading in the garden", OutputChannel::WebsiteSafe);

        let graph = assemble_graph(
            WorkflowKind::MultiPass,
            &graph_inputs(&prompt, &resources, Some(&a), None),
            &[],
        );
        let rendered = graph.to_string();
        assert!(rendered.contains(&adapter_filename(&a).unwrap()));
        assert!(rendered.contains("FaceDetailer"));
        // Adapter path never uses image-conditioning
        assert!(!rendered.contains("IPAdapterAdvanced"));
    }

    #[test]
    fn portrait_graph_is_plain_synthesis() {
        let prompt = prompt_decomposer::decompose("a rainy alley at night", None, None);
        let resources = resources_for("a rainy alley at night", OutputChannel::WebsiteSafe);

        let graph = assemble_graph(
            WorkflowKind::Portrait,
            &graph_inputs(&prompt, &resources, None, None),
            &[],
        );
        let rendered = graph.to_string();
        assert!(rendered.contains("KSampler"));
        assert!(!rendered.contains("IPAdapter"));
        assert!(!rendered.contains("FaceDetailer"));
    }

    #[test]
    fn hires_fix_adds_a_second_sampler_pass() {
        let prompt = prompt_decomposer::decompose("city skyline", None, None);
        let resources = resources_for("city skyline", OutputChannel::StoryCover);
        assert!(resources.hires_fix);

        let graph = assemble_graph(
            WorkflowKind::Portrait,
            &graph_inputs(&prompt, &resources, None, None),
            &[],
        );
        let rendered = graph.to_string();
        assert!(rendered.contains("LatentUpscaleBy"));
        assert_eq!(rendered.matches("KSampler").count(), 2);
    }
}
