// SYNOID Vid2Vid Media Boundary
// Copyright (c) 2026 Xing_The_Creator | SYNOID
//
// Decoded videos live in memory as one (N, H, W, C) f32 tensor in [0, 1].
// The transformer speaks channel-first (C, H, W); conversions happen
// explicitly through `to_chw` / `to_hwc` at each boundary.

pub mod sink;
pub mod source;

pub use sink::{FfmpegSink, FrameSink, SinkOptions};
pub use source::{probe_video, FfmpegSource, FrameSource, VideoProbe};

use crate::frame_rate::FrameRate;
use candle_core::{DType, Device, Tensor};

/// RGB channel count every frame is decoded to.
pub const CHANNELS: usize = 3;

/// A decoded, normalized source video.
#[derive(Debug, Clone)]
pub struct Video {
    frames: Tensor,
    frame_rate: FrameRate,
}

impl Video {
    /// Wraps an `(N, H, W, C)` tensor of values in `[0, 1]`.
    pub fn new(frames: Tensor, frame_rate: FrameRate) -> candle_core::Result<Self> {
        frames.dims4()?;
        let frames = frames.to_dtype(DType::F32)?;
        Ok(Self { frames, frame_rate })
    }

    /// Builds a video from packed `rgb24` bytes, normalizing to `[0, 1]`.
    pub fn from_rgb24(
        bytes: Vec<u8>,
        frame_count: usize,
        height: usize,
        width: usize,
        frame_rate: FrameRate,
    ) -> candle_core::Result<Self> {
        let frames = Tensor::from_vec(bytes, (frame_count, height, width, CHANNELS), &Device::Cpu)?
            .to_dtype(DType::F32)?
            .affine(1.0 / 255.0, 0.0)?;
        Self::new(frames, frame_rate)
    }

    pub fn frame_count(&self) -> usize {
        self.frames.dims()[0]
    }

    pub fn height(&self) -> usize {
        self.frames.dims()[1]
    }

    pub fn width(&self) -> usize {
        self.frames.dims()[2]
    }

    pub fn channels(&self) -> usize {
        self.frames.dims()[3]
    }

    pub fn frame_rate(&self) -> FrameRate {
        self.frame_rate
    }

    pub fn frames(&self) -> &Tensor {
        &self.frames
    }

    /// Frame `index` in channel-last layout.
    pub fn frame_hwc(&self, index: usize) -> candle_core::Result<Tensor> {
        self.frames.get(index)
    }

    /// Frame `index` in the transformer's channel-first layout.
    pub fn frame_chw(&self, index: usize) -> candle_core::Result<Tensor> {
        to_chw(&self.frames.get(index)?)
    }
}

/// `(H, W, C)` -> `(C, H, W)`.
pub fn to_chw(frame: &Tensor) -> candle_core::Result<Tensor> {
    frame.permute((2, 0, 1))?.contiguous()
}

/// `(C, H, W)` -> `(H, W, C)`.
pub fn to_hwc(frame: &Tensor) -> candle_core::Result<Tensor> {
    frame.permute((1, 2, 0))?.contiguous()
}
