use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::types::GenerationRequest;

/// One candidate request-body shape the endpoint's deployment may accept.
///
/// Each variant is a pure transform from [`GenerationRequest`] to a JSON
/// payload. Negative seeds are passed through untouched; resolve them with
/// [`GenerationRequest::with_resolved_seed`] first when a concrete seed is
/// needed (the negotiator does).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum SchemaVariant {
    /// `{"input": {prompt, negative_prompt, ...}}`
    Input,
    /// `{"input": {"api_name": "txt2img", prompt, ...}}`
    ApiName,
    /// `{"input": {"endpoint": "txt2img", "params": {prompt, ...}}}`
    EndpointParams,
    /// `{prompt, negative_prompt, ...}` with no wrapper.
    Flat,
    /// `{"input": {"workflow": <ComfyUI node graph>}}`
    Workflow { checkpoint: String },
}

impl SchemaVariant {
    /// Short stable name used in logs and events.
    pub fn name(&self) -> &'static str {
        match self {
            SchemaVariant::Input => "input",
            SchemaVariant::ApiName => "api_name",
            SchemaVariant::EndpointParams => "endpoint_params",
            SchemaVariant::Flat => "flat",
            SchemaVariant::Workflow { .. } => "workflow",
        }
    }

    /// Build the wire payload for `req`.
    pub fn build(&self, req: &GenerationRequest) -> Value {
        match self {
            SchemaVariant::Input => json!({ "input": sd_params(req) }),
            SchemaVariant::ApiName => {
                let mut params = sd_params(req);
                params.insert("api_name".into(), json!("txt2img"));
                json!({ "input": params })
            }
            SchemaVariant::EndpointParams => json!({
                "input": {
                    "endpoint": "txt2img",
                    "params": sd_params(req),
                }
            }),
            SchemaVariant::Flat => Value::Object(sd_params(req)),
            SchemaVariant::Workflow { checkpoint } => json!({
                "input": { "workflow": txt2img_workflow(req, checkpoint) }
            }),
        }
    }
}

/// Automatic1111-style txt2img parameters shared by the non-graph variants.
fn sd_params(req: &GenerationRequest) -> Map<String, Value> {
    let mut params = Map::new();
    params.insert("prompt".into(), json!(req.prompt));
    params.insert(
        "negative_prompt".into(),
        json!(req.negative_prompt.as_deref().unwrap_or("")),
    );
    params.insert("width".into(), json!(req.width));
    params.insert("height".into(), json!(req.height));
    params.insert("steps".into(), json!(req.steps));
    params.insert("cfg_scale".into(), json!(req.guidance_scale));
    params.insert("sampler_name".into(), json!(req.sampler_name));
    params.insert("seed".into(), json!(req.seed));
    params
}

/// Seven-node txt2img graph: CheckpointLoader → CLIP encoders → KSampler
/// → VAEDecode → SaveImage.
fn txt2img_workflow(req: &GenerationRequest, checkpoint: &str) -> Value {
    json!({
        "1": {
            "class_type": "CheckpointLoaderSimple",
            "inputs": { "ckpt_name": checkpoint }
        },
        "2": {
            "class_type": "EmptyLatentImage",
            "inputs": { "width": req.width, "height": req.height, "batch_size": 1 }
        },
        "3": {
            "class_type": "CLIPTextEncode",
            "inputs": { "text": req.prompt, "clip": ["1", 1] }
        },
        "4": {
            "class_type": "CLIPTextEncode",
            "inputs": {
                "text": req.negative_prompt.as_deref().unwrap_or(""),
                "clip": ["1", 1]
            }
        },
        "5": {
            "class_type": "KSampler",
            "inputs": {
                // KSampler has no "random" sentinel.
                "seed": req.seed.max(0),
                "steps": req.steps,
                "cfg": req.guidance_scale,
                "sampler_name": comfy_sampler(&req.sampler_name),
                "scheduler": comfy_scheduler(&req.sampler_name),
                "denoise": 1.0,
                "model": ["1", 0],
                "positive": ["3", 0],
                "negative": ["4", 0],
                "latent_image": ["2", 0]
            }
        },
        "6": {
            "class_type": "VAEDecode",
            "inputs": { "samples": ["5", 0], "vae": ["1", 2] }
        },
        "7": {
            "class_type": "SaveImage",
            "inputs": { "filename_prefix": "runpod", "images": ["6", 0] }
        }
    })
}

/// Map an A1111 sampler label ("DPM++ 2M Karras") to ComfyUI's sampler id.
fn comfy_sampler(name: &str) -> String {
    let base = name.trim().trim_end_matches(" Karras").to_ascii_lowercase();
    match base.as_str() {
        "euler a" => "euler_ancestral".to_string(),
        other => other.replace("++", "pp").replace(' ', "_"),
    }
}

fn comfy_scheduler(name: &str) -> &'static str {
    if name.trim().ends_with("Karras") {
        "karras"
    } else {
        "normal"
    }
}

/// Ordered set of schema variants tried during negotiation.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaCatalog {
    variants: Vec<SchemaVariant>,
}

impl SchemaCatalog {
    /// Catalog with variants in priority order. Duplicates are dropped,
    /// keeping the first occurrence.
    pub fn new(variants: impl IntoIterator<Item = SchemaVariant>) -> Self {
        let mut unique: Vec<SchemaVariant> = Vec::new();
        for v in variants {
            if !unique.contains(&v) {
                unique.push(v);
            }
        }
        Self { variants: unique }
    }

    /// The standard order: input, api_name, endpoint_params, flat, workflow.
    pub fn standard(workflow_checkpoint: impl Into<String>) -> Self {
        Self::new([
            SchemaVariant::Input,
            SchemaVariant::ApiName,
            SchemaVariant::EndpointParams,
            SchemaVariant::Flat,
            SchemaVariant::Workflow {
                checkpoint: workflow_checkpoint.into(),
            },
        ])
    }

    pub fn variants(&self) -> &[SchemaVariant] {
        &self.variants
    }

    pub fn contains(&self, variant: &SchemaVariant) -> bool {
        self.variants.contains(variant)
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_request() -> GenerationRequest {
        GenerationRequest::new("anime girl with black hair")
            .negative("lowres")
            .size(512, 768)
            .steps(20)
            .guidance_scale(7.5)
            .seed(12345)
    }

    #[test]
    fn test_input_variant() {
        let payload = SchemaVariant::Input.build(&make_request());
        assert_eq!(payload["input"]["prompt"], "anime girl with black hair");
        assert_eq!(payload["input"]["negative_prompt"], "lowres");
        assert_eq!(payload["input"]["height"], 768);
        assert_eq!(payload["input"]["cfg_scale"], 7.5);
        assert_eq!(payload["input"]["seed"], 12345);
        assert!(payload["input"].get("api_name").is_none());
    }

    #[test]
    fn test_api_name_variant() {
        let payload = SchemaVariant::ApiName.build(&make_request());
        assert_eq!(payload["input"]["api_name"], "txt2img");
        assert_eq!(payload["input"]["steps"], 20);
    }

    #[test]
    fn test_endpoint_params_variant() {
        let payload = SchemaVariant::EndpointParams.build(&make_request());
        assert_eq!(payload["input"]["endpoint"], "txt2img");
        assert_eq!(payload["input"]["params"]["prompt"], "anime girl with black hair");
        assert_eq!(payload["input"]["params"]["width"], 512);
    }

    #[test]
    fn test_flat_variant() {
        let payload = SchemaVariant::Flat.build(&make_request());
        assert!(payload.get("input").is_none());
        assert_eq!(payload["prompt"], "anime girl with black hair");
        assert_eq!(payload["sampler_name"], "Euler a");
    }

    #[test]
    fn test_missing_negative_prompt_is_empty_string() {
        let payload = SchemaVariant::Flat.build(&GenerationRequest::new("x"));
        assert_eq!(payload["negative_prompt"], "");
    }

    #[test]
    fn test_workflow_variant_graph() {
        let variant = SchemaVariant::Workflow {
            checkpoint: "dreamshaper_8.safetensors".into(),
        };
        let payload = variant.build(&make_request());
        let graph = &payload["input"]["workflow"];
        for i in 1..=7 {
            assert!(graph.get(i.to_string()).is_some(), "Missing node {}", i);
        }
        assert_eq!(graph["1"]["inputs"]["ckpt_name"], "dreamshaper_8.safetensors");
        assert_eq!(graph["2"]["inputs"]["height"], 768);
        assert_eq!(graph["4"]["inputs"]["text"], "lowres");
        assert_eq!(graph["5"]["inputs"]["seed"], 12345);
        assert_eq!(graph["5"]["inputs"]["sampler_name"], "euler_ancestral");
        assert_eq!(graph["5"]["inputs"]["positive"], json!(["3", 0]));
        assert_eq!(graph["7"]["inputs"]["images"], json!(["6", 0]));
    }

    #[test]
    fn test_sampler_mapping() {
        assert_eq!(comfy_sampler("DPM++ 2M Karras"), "dpmpp_2m");
        assert_eq!(comfy_scheduler("DPM++ 2M Karras"), "karras");
        assert_eq!(comfy_sampler("Euler"), "euler");
        assert_eq!(comfy_sampler("DPM++ 2M SDE"), "dpmpp_2m_sde");
        assert_eq!(comfy_scheduler("Euler a"), "normal");
    }

    #[test]
    fn test_variants_are_pure() {
        let req = make_request();
        for v in SchemaCatalog::standard("model.safetensors").variants() {
            assert_eq!(v.build(&req), v.build(&req), "{} not deterministic", v.name());
        }
    }

    #[test]
    fn test_standard_order() {
        let catalog = SchemaCatalog::standard("model.safetensors");
        let names: Vec<_> = catalog.variants().iter().map(|v| v.name()).collect();
        assert_eq!(
            names,
            ["input", "api_name", "endpoint_params", "flat", "workflow"]
        );
    }

    #[test]
    fn test_catalog_dedups() {
        let catalog = SchemaCatalog::new([
            SchemaVariant::Flat,
            SchemaVariant::Input,
            SchemaVariant::Flat,
        ]);
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.variants()[0], SchemaVariant::Flat);
        assert!(catalog.contains(&SchemaVariant::Input));
        assert!(!catalog.contains(&SchemaVariant::ApiName));
    }
}
