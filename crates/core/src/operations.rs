//! Image operations and their job graph templates.
//!
//! Each operation is a fixed topology `load -> transform chain -> save`
//! declared as a [`GraphTemplate`]. Building an operation encodes the
//! source image as base64 PNG, fills the template's parameter slots and
//! returns a validated [`JobGraph`] whose single terminal node is
//! [`OUTPUT_NODE_ID`].
//!
//! Sampler seeds are drawn fresh on every build, so two builds from the
//! same inputs differ in their `seed` fields. This is intentional: repeated
//! requests produce varied results.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::graph::{JobGraph, LOAD_IMAGE_BASE64_CLASS, SAVE_IMAGE_WEBSOCKET_CLASS};
use crate::source_image::{fit_long_side, SourceImage};
use crate::template::{GraphTemplate, NodeSpec, TemplateParams};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Id of the terminal node in every operation graph.
pub const OUTPUT_NODE_ID: &str = "save_image_websocket_node";

/// Checkpoint used for stylization and background generation.
pub const SDXL_CHECKPOINT: &str = "sd_xl_base_1.0.safetensors";

/// Photoreal checkpoint used for portrait enhancement.
pub const PORTRAIT_CHECKPOINT: &str = "realisticVisionV60B1_v51VAE.safetensors";

/// Background-removal model selector for the rembg node.
const REMBG_MODE: &str = "default";

/// Long side, in pixels, that SDXL inputs are scaled to.
pub const SDXL_RESOLUTION: u32 = 1024;

/// Seeds are drawn uniformly from `0..=SEED_MAX`.
pub const SEED_MAX: u64 = (1 << 50) - 1;

/// Denoise applied by style transfer when the caller gives no strength.
pub const DEFAULT_STYLE_STRENGTH: f64 = 0.6;

/// Maximum length of a free-text prompt field.
pub const MAX_PROMPT_LENGTH: usize = 1000;

const NEGATIVE_PROMPT: &str =
    "blurry, low quality, distorted, deformed, watermark, text, jpeg artifacts";

const PORTRAIT_POSITIVE_PROMPT: &str = "professional portrait photo, sharp focus, natural skin \
     texture, detailed eyes, soft studio lighting, high quality";

const PORTRAIT_NEGATIVE_PROMPT: &str = "blurry, plastic skin, oversmoothed, cartoon, \
     deformed face, extra limbs, low quality, watermark";

// ---------------------------------------------------------------------------
// Enhancement policy
// ---------------------------------------------------------------------------

/// Named portrait enhancement strength.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnhancementLevel {
    Light,
    #[default]
    Medium,
    Heavy,
}

impl EnhancementLevel {
    pub const ALL: [EnhancementLevel; 3] = [Self::Light, Self::Medium, Self::Heavy];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Medium => "medium",
            Self::Heavy => "heavy",
        }
    }

    /// Sampler denoise strength for this level.
    pub fn denoise(self) -> f64 {
        match self {
            Self::Light => 0.20,
            Self::Medium => 0.35,
            Self::Heavy => 0.50,
        }
    }

    /// Lenient lookup: unrecognized names map to [`EnhancementLevel::Medium`].
    pub fn from_name_or_default(name: &str) -> Self {
        name.parse().unwrap_or_default()
    }
}

impl FromStr for EnhancementLevel {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                CoreError::Validation(format!(
                    "enhancement_level must be one of: light, medium, heavy (got '{s}')"
                ))
            })
    }
}

impl fmt::Display for EnhancementLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// A requested image operation with its typed parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    StyleTransfer { style_prompt: String, strength: f64 },
    PortraitEnhancement { level: EnhancementLevel },
    BackgroundRemoval,
    BackgroundSwap { background_prompt: String },
}

impl Operation {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::StyleTransfer { .. } => "style_transfer",
            Self::PortraitEnhancement { .. } => "portrait_enhancement",
            Self::BackgroundRemoval => "background_removal",
            Self::BackgroundSwap { .. } => "background_swap",
        }
    }

    /// Node whose first image is the operation's result.
    pub fn output_node(&self) -> &'static str {
        OUTPUT_NODE_ID
    }

    /// Build the job graph for this operation on `source`.
    ///
    /// Not idempotent: a fresh seed is drawn on every call.
    pub fn build(&self, source: &SourceImage) -> Result<JobGraph, CoreError> {
        let image = source.to_base64_png()?;
        let (template, params) = match self {
            Self::StyleTransfer {
                style_prompt,
                strength,
            } => {
                let (width, height) =
                    fit_long_side(source.width(), source.height(), SDXL_RESOLUTION);
                let params = TemplateParams::new()
                    .set("image", image)
                    .set("width", width)
                    .set("height", height)
                    .set("positive_prompt", style_positive_prompt(style_prompt))
                    .set("denoise", *strength)
                    .set("seed", random_seed());
                (style_transfer_template(), params)
            }
            Self::PortraitEnhancement { level } => {
                let params = TemplateParams::new()
                    .set("image", image)
                    .set("denoise", level.denoise())
                    .set("seed", random_seed());
                (portrait_enhancement_template(), params)
            }
            Self::BackgroundRemoval => (
                background_removal_template(),
                TemplateParams::new().set("image", image),
            ),
            Self::BackgroundSwap { background_prompt } => {
                let (width, height) =
                    fit_long_side(source.width(), source.height(), SDXL_RESOLUTION);
                let params = TemplateParams::new()
                    .set("image", image)
                    .set("width", width)
                    .set("height", height)
                    .set("background_prompt", background_positive_prompt(background_prompt))
                    .set("seed", random_seed());
                (background_swap_template(), params)
            }
        };
        template.instantiate(&params)
    }
}

// ---------------------------------------------------------------------------
// Parameter validation
// ---------------------------------------------------------------------------

/// Validate a free-text prompt field and return it trimmed.
pub fn validate_prompt(field: &str, value: &str) -> Result<String, CoreError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CoreError::Validation(format!("{field} must not be empty")));
    }
    if trimmed.chars().count() > MAX_PROMPT_LENGTH {
        return Err(CoreError::Validation(format!(
            "{field} must be at most {MAX_PROMPT_LENGTH} characters"
        )));
    }
    Ok(trimmed.to_string())
}

/// Parse and range-check a style strength in `0.0..=1.0`.
pub fn parse_strength(value: &str) -> Result<f64, CoreError> {
    let strength: f64 = value
        .trim()
        .parse()
        .map_err(|_| CoreError::Validation(format!("strength must be a number (got '{value}')")))?;
    if !(0.0..=1.0).contains(&strength) {
        return Err(CoreError::Validation(
            "strength must be between 0.0 and 1.0".to_string(),
        ));
    }
    Ok(strength)
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

/// SDXL img2img restyle of the source image.
pub fn style_transfer_template() -> GraphTemplate {
    GraphTemplate {
        name: "style_transfer",
        nodes: vec![
            NodeSpec::new("1", LOAD_IMAGE_BASE64_CLASS).param("image", "image"),
            NodeSpec::new("2", "ImageScale")
                .link("image", "1", 0)
                .literal("upscale_method", "lanczos")
                .param("width", "width")
                .param("height", "height")
                .literal("crop", "disabled"),
            NodeSpec::new("3", "CheckpointLoaderSimple").literal("ckpt_name", SDXL_CHECKPOINT),
            NodeSpec::new("4", "VAEEncode")
                .link("pixels", "2", 0)
                .link("vae", "3", 2),
            NodeSpec::new("5", "CLIPTextEncode")
                .param("text", "positive_prompt")
                .link("clip", "3", 1),
            NodeSpec::new("6", "CLIPTextEncode")
                .literal("text", NEGATIVE_PROMPT)
                .link("clip", "3", 1),
            NodeSpec::new("7", "KSampler")
                .param("seed", "seed")
                .literal("steps", 30)
                .literal("cfg", 7.0)
                .literal("sampler_name", "dpmpp_2m")
                .literal("scheduler", "karras")
                .param("denoise", "denoise")
                .link("model", "3", 0)
                .link("positive", "5", 0)
                .link("negative", "6", 0)
                .link("latent_image", "4", 0),
            NodeSpec::new("8", "VAEDecode")
                .link("samples", "7", 0)
                .link("vae", "3", 2),
            NodeSpec::new(OUTPUT_NODE_ID, SAVE_IMAGE_WEBSOCKET_CLASS).link("images", "8", 0),
        ],
        output: OUTPUT_NODE_ID,
    }
}

/// Low-denoise photoreal img2img pass; strength comes from the level policy.
pub fn portrait_enhancement_template() -> GraphTemplate {
    GraphTemplate {
        name: "portrait_enhancement",
        nodes: vec![
            NodeSpec::new("1", LOAD_IMAGE_BASE64_CLASS).param("image", "image"),
            NodeSpec::new("2", "CheckpointLoaderSimple").literal("ckpt_name", PORTRAIT_CHECKPOINT),
            NodeSpec::new("3", "VAEEncode")
                .link("pixels", "1", 0)
                .link("vae", "2", 2),
            NodeSpec::new("4", "CLIPTextEncode")
                .literal("text", PORTRAIT_POSITIVE_PROMPT)
                .link("clip", "2", 1),
            NodeSpec::new("5", "CLIPTextEncode")
                .literal("text", PORTRAIT_NEGATIVE_PROMPT)
                .link("clip", "2", 1),
            NodeSpec::new("6", "KSampler")
                .param("seed", "seed")
                .literal("steps", 25)
                .literal("cfg", 5.5)
                .literal("sampler_name", "dpmpp_2m_sde")
                .literal("scheduler", "karras")
                .param("denoise", "denoise")
                .link("model", "2", 0)
                .link("positive", "4", 0)
                .link("negative", "5", 0)
                .link("latent_image", "3", 0),
            NodeSpec::new("7", "VAEDecode")
                .link("samples", "6", 0)
                .link("vae", "2", 2),
            NodeSpec::new(OUTPUT_NODE_ID, SAVE_IMAGE_WEBSOCKET_CLASS).link("images", "7", 0),
        ],
        output: OUTPUT_NODE_ID,
    }
}

/// Foreground extraction; the result carries an alpha channel.
pub fn background_removal_template() -> GraphTemplate {
    GraphTemplate {
        name: "background_removal",
        nodes: vec![
            NodeSpec::new("1", LOAD_IMAGE_BASE64_CLASS).param("image", "image"),
            NodeSpec::new("2", "InspyrenetRembg")
                .link("image", "1", 0)
                .literal("torchscript_jit", REMBG_MODE),
            NodeSpec::new(OUTPUT_NODE_ID, SAVE_IMAGE_WEBSOCKET_CLASS).link("images", "2", 0),
        ],
        output: OUTPUT_NODE_ID,
    }
}

/// Foreground extraction composited over a generated background.
///
/// The source is scaled to SDXL resolution first so that the generated
/// background, the foreground and its mask share one size.
pub fn background_swap_template() -> GraphTemplate {
    GraphTemplate {
        name: "background_swap",
        nodes: vec![
            NodeSpec::new("1", LOAD_IMAGE_BASE64_CLASS).param("image", "image"),
            NodeSpec::new("2", "ImageScale")
                .link("image", "1", 0)
                .literal("upscale_method", "lanczos")
                .param("width", "width")
                .param("height", "height")
                .literal("crop", "disabled"),
            NodeSpec::new("3", "InspyrenetRembg")
                .link("image", "2", 0)
                .literal("torchscript_jit", REMBG_MODE),
            NodeSpec::new("4", "CheckpointLoaderSimple").literal("ckpt_name", SDXL_CHECKPOINT),
            NodeSpec::new("5", "CLIPTextEncode")
                .param("text", "background_prompt")
                .link("clip", "4", 1),
            NodeSpec::new("6", "CLIPTextEncode")
                .literal("text", NEGATIVE_PROMPT)
                .link("clip", "4", 1),
            NodeSpec::new("7", "EmptyLatentImage")
                .param("width", "width")
                .param("height", "height")
                .literal("batch_size", 1),
            NodeSpec::new("8", "KSampler")
                .param("seed", "seed")
                .literal("steps", 30)
                .literal("cfg", 7.0)
                .literal("sampler_name", "dpmpp_2m")
                .literal("scheduler", "karras")
                .literal("denoise", 1.0)
                .link("model", "4", 0)
                .link("positive", "5", 0)
                .link("negative", "6", 0)
                .link("latent_image", "7", 0),
            NodeSpec::new("9", "VAEDecode")
                .link("samples", "8", 0)
                .link("vae", "4", 2),
            NodeSpec::new("10", "ImageCompositeMasked")
                .link("destination", "9", 0)
                .link("source", "2", 0)
                .literal("x", 0)
                .literal("y", 0)
                .literal("resize_source", false)
                .link("mask", "3", 1),
            NodeSpec::new(OUTPUT_NODE_ID, SAVE_IMAGE_WEBSOCKET_CLASS).link("images", "10", 0),
        ],
        output: OUTPUT_NODE_ID,
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn style_positive_prompt(style: &str) -> String {
    format!("{style} style, artistic rendition, high quality, detailed")
}

fn background_positive_prompt(background: &str) -> String {
    format!("{background}, background scenery, no people, high quality, detailed")
}

fn random_seed() -> u64 {
    rand::rng().random_range(0..=SEED_MAX)
}
