// SYNOID Vid2Vid Streaming Driver
// Copyright (c) 2026 Xing_The_Creator | SYNOID
//
// Feeds a decoded video through a latency-bearing stream transformer:
//
//   decode → resolve seed → build stream → prepare
//          → probe (frame 0) → prime (frame 0 × batch) → every frame
//          → drop the lagging head → ×255 → encode
//
// Every transform call advances the stream state, priming included, so the
// call sequence above is fixed and strictly sequential.

use crate::config::{
    resolve_seed, target_resolution, validate_scale, PromptConfig, StreamConfig, StreamOptions,
};
use crate::error::{Result, Vid2VidError};
use crate::frame_rate::FrameRate;
use crate::media::{to_hwc, FfmpegSink, FfmpegSource, FrameSink, FrameSource};
use crate::stream::{StreamTransformer, TransformerBuilder};
use candle_core::Tensor;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

pub const DEFAULT_SEED: i64 = 2;
pub const DEFAULT_INFERENCE_STEPS: usize = 50;
pub const DEFAULT_OUTPUT: &str = "images/outputs/output.mp4";

/// Steady-state frames between progress reports.
const PROGRESS_EVERY: usize = 25;

pub type ProgressCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Everything one conversion needs.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Multiplier on the native resolution; must be finite and > 0.
    pub scale: f64,
    /// `-1` picks a fresh random seed.
    pub seed: i64,
    pub prompt: String,
    pub negative_prompt: String,
    pub num_inference_steps: usize,
    pub stream: StreamOptions,
}

impl Default for RunRequest {
    fn default() -> Self {
        Self {
            input: PathBuf::new(),
            output: PathBuf::from(DEFAULT_OUTPUT),
            scale: 1.0,
            seed: DEFAULT_SEED,
            prompt: String::new(),
            negative_prompt: String::new(),
            num_inference_steps: DEFAULT_INFERENCE_STEPS,
            stream: StreamOptions::default(),
        }
    }
}

impl RunRequest {
    pub fn prompt_config(&self) -> PromptConfig {
        PromptConfig {
            prompt: self.prompt.clone(),
            negative_prompt: self.negative_prompt.clone(),
            num_inference_steps: self.num_inference_steps,
        }
    }
}

/// What a finished run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub output: PathBuf,
    /// Seed the stream was built with (never the `-1` sentinel).
    pub seed: i64,
    /// Stabilized `(height, width)` discovered by the probe call.
    pub resolution: (usize, usize),
    /// Probe + priming + steady-state calls.
    pub transform_calls: usize,
    pub frames_written: usize,
    pub frame_rate: FrameRate,
}

pub struct StreamingDriver {
    source: Box<dyn FrameSource>,
    sink: Box<dyn FrameSink>,
    builder: Box<dyn TransformerBuilder>,
    progress_callback: Option<ProgressCallback>,
}

impl StreamingDriver {
    pub fn new(
        source: impl FrameSource + 'static,
        sink: impl FrameSink + 'static,
        builder: impl TransformerBuilder + 'static,
    ) -> Self {
        Self::from_boxed(Box::new(source), Box::new(sink), Box::new(builder))
    }

    pub fn from_boxed(
        source: Box<dyn FrameSource>,
        sink: Box<dyn FrameSink>,
        builder: Box<dyn TransformerBuilder>,
    ) -> Self {
        Self {
            source,
            sink,
            builder,
            progress_callback: None,
        }
    }

    /// ffmpeg on both ends, default encoder settings.
    pub fn with_ffmpeg(builder: impl TransformerBuilder + 'static) -> Self {
        Self::new(FfmpegSource::new(), FfmpegSink::default(), builder)
    }

    pub fn with_sink(mut self, sink: impl FrameSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    fn report_progress(&self, msg: &str) {
        info!("[DRIVER] {}", msg);
        if let Some(ref callback) = self.progress_callback {
            callback(msg);
        }
    }

    /// Runs one conversion end to end. Nothing is written unless every
    /// frame was transformed.
    pub fn run(&self, request: &RunRequest) -> Result<RunReport> {
        validate_scale(request.scale)?;

        let video = self.source.decode(&request.input)?;
        let frame_count = video.frame_count();
        self.report_progress(&format!(
            "Decoded {} frames {}x{} @ {} fps",
            frame_count,
            video.width(),
            video.height(),
            video.frame_rate()
        ));

        let seed = resolve_seed(request.seed);
        if seed != request.seed {
            info!("[DRIVER] Random seed resolved to {}", seed);
        }
        let (height, width) = target_resolution(video.height(), video.width(), request.scale)?;
        let config = StreamConfig::for_video(&request.stream, width, height, seed);

        let mut stream = self.builder.build(&config).map_err(init_error)?;
        let batch_size = stream.batch_size();
        let output_lag = stream.output_lag();
        if batch_size == 0 {
            return Err(Vid2VidError::TransformerInit(
                "stream reported a batch size of 0".to_string(),
            ));
        }
        let minimum = output_lag
            .checked_add(batch_size)
            .and_then(|n| n.checked_add(1))
            .ok_or_else(|| {
                Vid2VidError::TransformerInit(format!(
                    "stream reported an unusable output lag {} / batch size {}",
                    output_lag, batch_size
                ))
            })?;
        if frame_count < minimum {
            return Err(Vid2VidError::InvalidConfig(format!(
                "input has {} frames; at least {} are needed (output lag {} + batch {} + 1)",
                frame_count, minimum, output_lag, batch_size
            )));
        }

        stream.prepare(&request.prompt_config()).map_err(init_error)?;

        let first = video.frame_chw(0).map_err(init_error)?;
        let (probe_shape, mut transform_calls) = prime(stream.as_mut(), &first, batch_size)?;
        let resolution = (probe_shape.1, probe_shape.2);
        self.report_progress(&format!(
            "Stream primed: {}x{} output, batch {}, lag {}, seed {}",
            resolution.1, resolution.0, batch_size, output_lag, seed
        ));

        let mut outputs: Vec<Tensor> = Vec::with_capacity(frame_count);
        for index in 0..frame_count {
            let frame = video.frame_chw(index).map_err(|e| transform_error(index, e))?;
            let output = stream
                .transform(&frame)
                .map_err(|e| transform_error(index, e))?;
            transform_calls += 1;

            if output.dims() != [probe_shape.0, probe_shape.1, probe_shape.2] {
                return Err(Vid2VidError::Transform {
                    index,
                    reason: format!(
                        "output shape {:?} differs from probed shape {:?}",
                        output.dims(),
                        probe_shape
                    ),
                });
            }
            outputs.push(to_hwc(&output).map_err(|e| transform_error(index, e))?);

            if (index + 1) % PROGRESS_EVERY == 0 {
                self.report_progress(&format!("Transformed {}/{} frames", index + 1, frame_count));
            }
        }
        drop(stream);

        // the first outputs still show the priming frame
        outputs.drain(..output_lag);
        let frames_written = outputs.len();
        let frames = Tensor::stack(&outputs, 0)
            .and_then(|t| t.affine(255.0, 0.0))
            .map_err(|e| Vid2VidError::sink_write(&request.output, e))?;

        let frame_rate = video.frame_rate().limit_denominator(FrameRate::MAX_DENOMINATOR);
        debug!("[DRIVER] Output frame rate {} (source {})", frame_rate, video.frame_rate());

        let output = self.sink.encode(&frames, frame_rate, &request.output)?;
        self.report_progress(&format!(
            "✅ Wrote {} frames to {:?} ({} transform calls)",
            frames_written, output, transform_calls
        ));

        Ok(RunReport {
            output,
            seed,
            resolution,
            transform_calls,
            frames_written,
            frame_rate,
        })
    }
}

/// Probe call, then `batch_size` priming calls, all with the first frame.
/// Returns the probed `(C, H, W)` and the number of calls made.
fn prime(
    stream: &mut dyn StreamTransformer,
    first: &Tensor,
    batch_size: usize,
) -> Result<((usize, usize, usize), usize)> {
    let probe = stream.transform(first).map_err(init_error)?;
    let shape = probe.dims3().map_err(init_error)?;
    debug!("[DRIVER] Probe output shape {:?}", shape);

    for _ in 0..batch_size {
        stream.transform(first).map_err(init_error)?;
    }
    Ok((shape, batch_size + 1))
}

fn init_error(e: impl Into<anyhow::Error>) -> Vid2VidError {
    Vid2VidError::TransformerInit(format!("{:#}", e.into()))
}

fn transform_error(index: usize, e: impl Into<anyhow::Error>) -> Vid2VidError {
    Vid2VidError::Transform {
        index,
        reason: format!("{:#}", e.into()),
    }
}
