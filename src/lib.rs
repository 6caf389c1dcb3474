// SYNOID Vid2Vid Library Root
// Copyright (c) 2026 Xing_The_Creator | SYNOID

pub mod config;
pub mod driver;
pub mod error;
pub mod frame_rate;
pub mod gpu_backend;
pub mod health;
pub mod media;
pub mod stream;

pub use config::{AccelerationMode, LoraWeights, PromptConfig, StreamConfig, StreamOptions};
pub use driver::{RunReport, RunRequest, StreamingDriver};
pub use error::{Result, Vid2VidError};
pub use frame_rate::FrameRate;
