// SYNOID Vid2Vid Preview Transformer
// Copyright (c) 2026 Xing_The_Creator | SYNOID
//
// CPU reference implementation of the stream transformer contract. It has
// no model weights: each output is the oldest in-flight frame blended with a
// seeded noise field, which is enough to exercise priming, output latency,
// the similar-image filter and seed determinism end to end.

use super::{SimilarImageFilter, StreamTransformer, TransformerBuilder};
use crate::config::{AccelerationMode, PromptConfig, StreamConfig};
use anyhow::{bail, Context, Result};
use candle_core::{Device, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use tracing::{debug, info};

/// Output dimensions are snapped down to this multiple (latent grid).
pub const RESOLUTION_ALIGN: usize = 8;

pub struct PreviewTransformer {
    width: usize,
    height: usize,
    batch_size: usize,
    t_index_list: Vec<usize>,
    lora_scale: f64,
    filter: Option<SimilarImageFilter>,
    rng: StdRng,
    in_flight: VecDeque<Tensor>,
    noise: Option<Tensor>,
    strength: f64,
    last_output: Option<Tensor>,
}

impl PreviewTransformer {
    pub fn new(config: &StreamConfig) -> Result<Self> {
        config.validate().map_err(anyhow::Error::msg)?;
        if config.acceleration == AccelerationMode::TensorRt {
            bail!("compiled-graph acceleration (tensorrt) is not available for the preview backend");
        }

        let width = align_down(config.width as usize);
        let height = align_down(config.height as usize);
        let batch_size = config.implied_batch_size();

        info!(
            "[PREVIEW] Stream ready: {}x{} (requested {}x{}), batch {}, seed {}",
            width, height, config.width, config.height, batch_size, config.seed
        );
        for (name, scale) in config.lora.iter() {
            debug!("[PREVIEW] LoRA '{}' x{}", name, scale);
        }

        Ok(Self {
            width,
            height,
            batch_size,
            t_index_list: config.t_index_list.clone(),
            lora_scale: config.lora.combined_scale() as f64,
            filter: config.similar_filter.as_ref().map(SimilarImageFilter::from_config),
            // i64 -> u64 keeps negative seeds distinct
            rng: StdRng::seed_from_u64(config.seed as u64),
            in_flight: VecDeque::with_capacity(batch_size + 1),
            noise: None,
            strength: 0.0,
            last_output: None,
        })
    }

    /// Resolution every output frame has.
    pub fn output_resolution(&self) -> (usize, usize) {
        (self.height, self.width)
    }
}

fn align_down(dim: usize) -> usize {
    (dim / RESOLUTION_ALIGN * RESOLUTION_ALIGN).max(RESOLUTION_ALIGN)
}

impl StreamTransformer for PreviewTransformer {
    fn prepare(&mut self, prompt: &PromptConfig) -> Result<()> {
        if self.noise.is_some() {
            bail!("stream is already prepared");
        }
        let steps = prompt.num_inference_steps;
        if let Some(&t) = self.t_index_list.iter().find(|&&t| t >= steps) {
            bail!("t_index {} is out of range for {} inference steps", t, steps);
        }

        // later step indices leave less noise in the output
        let mean_t = self.t_index_list.iter().sum::<usize>() as f64 / self.t_index_list.len() as f64;
        self.strength = ((1.0 - mean_t / steps as f64) * self.lora_scale).clamp(0.0, 1.0);

        let len = 3 * self.height * self.width;
        let noise: Vec<f32> = (0..len).map(|_| self.rng.gen::<f32>()).collect();
        self.noise = Some(Tensor::from_vec(noise, (3, self.height, self.width), &Device::Cpu)?);

        info!(
            "[PREVIEW] Prepared: {} steps, strength {:.3}, prompt {:?}, negative {:?}",
            steps, self.strength, prompt.prompt, prompt.negative_prompt
        );
        Ok(())
    }

    fn transform(&mut self, frame: &Tensor) -> Result<Tensor> {
        let noise = self.noise.as_ref().context("transform called before prepare")?;

        let (channels, _, _) = frame.dims3().context("expected a (C, H, W) frame")?;
        if channels != 3 {
            bail!("expected 3 channels, got {}", channels);
        }

        let resized = frame
            .unsqueeze(0)?
            .upsample_nearest2d(self.height, self.width)?
            .squeeze(0)?;

        if let Some(filter) = self.filter.as_mut() {
            let sample: f64 = self.rng.gen();
            if filter.should_skip(&resized, sample)? {
                if let Some(previous) = &self.last_output {
                    return Ok(previous.clone());
                }
            }
        }

        self.in_flight.push_back(resized);
        while self.in_flight.len() > self.batch_size {
            self.in_flight.pop_front();
        }
        let oldest = self.in_flight.front().context("empty stream buffer")?;

        let output = oldest
            .affine(1.0 - self.strength, 0.0)?
            .add(&noise.affine(self.strength, 0.0)?)?
            .clamp(0f32, 1f32)?;
        self.last_output = Some(output.clone());
        Ok(output)
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }
}

/// Builds a [`PreviewTransformer`] per run.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreviewBuilder;

impl TransformerBuilder for PreviewBuilder {
    fn build(&self, config: &StreamConfig) -> Result<Box<dyn StreamTransformer>> {
        Ok(Box::new(PreviewTransformer::new(config)?))
    }
}
