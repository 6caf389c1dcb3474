// SYNOID Vid2Vid Configuration
// Copyright (c) 2026 Xing_The_Creator | SYNOID
//
// Everything the stream transformer is constructed with, plus the two
// pieces the driver resolves itself: the seed sentinel and the target
// resolution derived from the scale factor.

use crate::error::{Result, Vid2VidError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Seed value that asks the driver to pick a fresh random seed.
pub const RANDOM_SEED: i64 = -1;

/// Range random seeds are drawn from.
pub const RANDOM_SEED_RANGE: std::ops::RangeInclusive<i64> = 1..=10_000;

pub const DEFAULT_MODEL_ID: &str = "KBlueLeaf/kohaku-v2.1";

// ─────────────────────────────────────────────────────────────────────────────
// Acceleration
// ─────────────────────────────────────────────────────────────────────────────

/// How the transformer executes its denoising network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccelerationMode {
    /// Plain eager execution.
    None,
    /// Vectorized attention kernels.
    Xformers,
    /// Ahead-of-time compiled engine graph (NVIDIA only).
    TensorRt,
}

impl AccelerationMode {
    pub fn label(&self) -> &'static str {
        match self {
            AccelerationMode::None => "none",
            AccelerationMode::Xformers => "xformers",
            AccelerationMode::TensorRt => "tensorrt",
        }
    }
}

impl fmt::Display for AccelerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for AccelerationMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "off" => Ok(Self::None),
            "xformers" => Ok(Self::Xformers),
            "tensorrt" | "trt" => Ok(Self::TensorRt),
            other => Err(format!(
                "unknown acceleration '{}' (expected none, xformers or tensorrt)",
                other
            )),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// LoRA weights
// ─────────────────────────────────────────────────────────────────────────────

/// LoRA adapters to fuse into the model, keyed by name.
///
/// Keys are HuggingFace repo ids or local paths: non-empty, without
/// whitespace or control characters. Scales must be finite. All scales are
/// applied multiplicatively; an empty map leaves the pipeline default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoraWeights(BTreeMap<String, f32>);

impl LoraWeights {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, scale: f32) {
        self.0.insert(name.into(), scale);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Product of all scales; 1.0 when no LoRA is loaded.
    pub fn combined_scale(&self) -> f32 {
        self.0.values().product()
    }

    /// Checks the key domain and scale values. Called by transformer
    /// builders at construction time.
    pub fn validate(&self) -> std::result::Result<(), String> {
        for (name, scale) in &self.0 {
            if name.is_empty() {
                return Err("LoRA name cannot be empty".to_string());
            }
            if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
                return Err(format!("LoRA name '{}' contains whitespace", name.escape_debug()));
            }
            if !scale.is_finite() {
                return Err(format!("LoRA '{}' has non-finite scale {}", name, scale));
            }
        }
        Ok(())
    }
}

/// Parses one `name=scale` CLI entry.
pub fn parse_lora_entry(s: &str) -> std::result::Result<(String, f32), String> {
    let (name, scale) = s
        .rsplit_once('=')
        .ok_or_else(|| format!("expected NAME=SCALE, got '{}'", s))?;
    let scale: f32 = scale
        .trim()
        .parse()
        .map_err(|_| format!("invalid LoRA scale in '{}'", s))?;
    Ok((name.trim().to_string(), scale))
}

impl FromIterator<(String, f32)> for LoraWeights {
    fn from_iter<I: IntoIterator<Item = (String, f32)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// StreamOptions (user-facing) and StreamConfig (resolved, per run)
// ─────────────────────────────────────────────────────────────────────────────

/// Transformer options as supplied by the user or a `--config` file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamOptions {
    pub model_id: String,
    pub lora: LoraWeights,
    /// Denoising step indices the stream keeps in flight.
    pub t_index_list: Vec<usize>,
    pub frame_buffer_size: usize,
    pub warmup: usize,
    pub acceleration: AccelerationMode,
    pub use_denoising_batch: bool,
    pub enable_similar_image_filter: bool,
    pub similar_image_filter_threshold: f64,
    pub similar_image_filter_max_skip_frame: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            lora: LoraWeights::new(),
            t_index_list: vec![35, 45],
            frame_buffer_size: 1,
            warmup: 10,
            acceleration: AccelerationMode::Xformers,
            use_denoising_batch: true,
            enable_similar_image_filter: true,
            similar_image_filter_threshold: 0.98,
            similar_image_filter_max_skip_frame: 10,
        }
    }
}

impl StreamOptions {
    /// Loads options from a JSON file; missing fields keep their defaults.
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Reading stream config {:?}", path))?;
        let options = serde_json::from_str(&json)
            .with_context(|| format!("Parsing stream config {:?}", path))?;
        Ok(options)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    Img2Img,
}

/// Similar-image filter settings; absent when the filter is disabled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarFilterConfig {
    pub threshold: f64,
    pub max_skip_frame: usize,
}

/// Fully resolved construction parameters for one stream transformer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub model_id: String,
    pub lora: LoraWeights,
    pub t_index_list: Vec<usize>,
    pub width: u32,
    pub height: u32,
    pub warmup: usize,
    pub frame_buffer_size: usize,
    pub acceleration: AccelerationMode,
    pub use_denoising_batch: bool,
    pub similar_filter: Option<SimilarFilterConfig>,
    pub seed: i64,
    pub mode: StreamMode,
    pub do_add_noise: bool,
}

impl StreamConfig {
    /// Driver-side construction: image-to-image, no fresh noise injection,
    /// already-resolved seed and resolution.
    pub fn for_video(options: &StreamOptions, width: u32, height: u32, seed: i64) -> Self {
        let similar_filter = options
            .enable_similar_image_filter
            .then_some(SimilarFilterConfig {
                threshold: options.similar_image_filter_threshold,
                max_skip_frame: options.similar_image_filter_max_skip_frame,
            });

        Self {
            model_id: options.model_id.clone(),
            lora: options.lora.clone(),
            t_index_list: options.t_index_list.clone(),
            width,
            height,
            warmup: options.warmup,
            frame_buffer_size: options.frame_buffer_size,
            acceleration: options.acceleration,
            use_denoising_batch: options.use_denoising_batch,
            similar_filter,
            seed,
            mode: StreamMode::Img2Img,
            do_add_noise: false,
        }
    }

    /// Batch width implied by this configuration: every in-flight denoising
    /// step holds a full frame buffer when denoising batch is on.
    pub fn implied_batch_size(&self) -> usize {
        if self.use_denoising_batch {
            self.t_index_list.len() * self.frame_buffer_size
        } else {
            self.frame_buffer_size
        }
    }

    /// Structural checks shared by every transformer backend.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.model_id.trim().is_empty() {
            return Err("model identifier cannot be empty".to_string());
        }
        if self.width == 0 || self.height == 0 {
            return Err(format!("degenerate resolution {}x{}", self.width, self.height));
        }
        if self.t_index_list.is_empty() {
            return Err("t_index_list cannot be empty".to_string());
        }
        if self.frame_buffer_size == 0 {
            return Err("frame_buffer_size must be at least 1".to_string());
        }
        if let Some(filter) = &self.similar_filter {
            if !(filter.threshold > 0.0 && filter.threshold <= 1.0) {
                return Err(format!(
                    "similar image filter threshold {} must be in (0, 1]",
                    filter.threshold
                ));
            }
        }
        self.lora.validate()
    }
}

/// Text conditioning handed to `prepare`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptConfig {
    pub prompt: String,
    pub negative_prompt: String,
    pub num_inference_steps: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// Driver-side resolution
// ─────────────────────────────────────────────────────────────────────────────

/// Replaces the `-1` sentinel with a fresh random seed.
pub fn resolve_seed(seed: i64) -> i64 {
    resolve_seed_with(seed, &mut rand::thread_rng())
}

pub fn resolve_seed_with<R: Rng>(seed: i64, rng: &mut R) -> i64 {
    if seed == RANDOM_SEED {
        rng.gen_range(RANDOM_SEED_RANGE)
    } else {
        seed
    }
}

pub fn validate_scale(scale: f64) -> Result<()> {
    if !scale.is_finite() || scale <= 0.0 {
        return Err(Vid2VidError::InvalidConfig(format!(
            "scale must be a positive number, got {}",
            scale
        )));
    }
    Ok(())
}

/// `(floor(height * scale), floor(width * scale))`.
pub fn target_resolution(native_height: usize, native_width: usize, scale: f64) -> Result<(u32, u32)> {
    validate_scale(scale)?;
    let height = (native_height as f64 * scale).floor();
    let width = (native_width as f64 * scale).floor();

    if height < 1.0 || width < 1.0 {
        return Err(Vid2VidError::InvalidConfig(format!(
            "scale {} turns {}x{} into a zero-sized frame",
            scale, native_width, native_height
        )));
    }
    if height > u32::MAX as f64 || width > u32::MAX as f64 {
        return Err(Vid2VidError::InvalidConfig(format!(
            "scale {} overflows the target resolution",
            scale
        )));
    }

    Ok((height as u32, width as u32))
}
