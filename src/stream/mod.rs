// SYNOID Vid2Vid Stream Transformers
// Copyright (c) 2026 Xing_The_Creator | SYNOID
//
// The driver only sees the narrow contract below. Backends:
//
//   • Preview – in-process CPU reference pipeline (no model weights)
//   • Worker  – external diffusion process driven over stdin/stdout

pub mod preview;
pub mod similar_filter;
pub mod worker;

pub use preview::{PreviewBuilder, PreviewTransformer};
pub use similar_filter::SimilarImageFilter;
pub use worker::{WorkerBuilder, WorkerTransformer};

use crate::config::{PromptConfig, StreamConfig};
use candle_core::Tensor;

/// Leading output frames that lag behind the source with the default
/// two-step denoising configuration.
pub const DEFAULT_OUTPUT_LAG: usize = 2;

/// A stateful, latency-bearing image-to-image pipeline.
///
/// Calls must be strictly sequential: every call, priming included,
/// advances internal state that cannot be rewound.
pub trait StreamTransformer: Send {
    /// Configures prompts and the denoising schedule. Called exactly once,
    /// before the first `transform`.
    fn prepare(&mut self, prompt: &PromptConfig) -> anyhow::Result<()>;

    /// Transforms one `(C, H, W)` frame with values in `[0, 1]`.
    fn transform(&mut self, frame: &Tensor) -> anyhow::Result<Tensor>;

    /// Number of frames held in flight; equals the number of priming calls.
    fn batch_size(&self) -> usize;

    /// Leading steady-state outputs the caller must discard.
    fn output_lag(&self) -> usize {
        DEFAULT_OUTPUT_LAG
    }
}

/// Constructs one transformer per run.
pub trait TransformerBuilder: Send + Sync {
    fn build(&self, config: &StreamConfig) -> anyhow::Result<Box<dyn StreamTransformer>>;
}

impl<F> TransformerBuilder for F
where
    F: Fn(&StreamConfig) -> anyhow::Result<Box<dyn StreamTransformer>> + Send + Sync,
{
    fn build(&self, config: &StreamConfig) -> anyhow::Result<Box<dyn StreamTransformer>> {
        self(config)
    }
}
