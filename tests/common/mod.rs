// Shared fixtures for driver integration tests: in-memory source and sink
// plus a scripted transformer that records every call it sees.
#![allow(dead_code)]

use anyhow::bail;
use candle_core::{Device, Tensor};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use synoid_vid2vid::config::{PromptConfig, StreamConfig};
use synoid_vid2vid::media::{FrameSink, FrameSource, Video};
use synoid_vid2vid::stream::{StreamTransformer, TransformerBuilder};
use synoid_vid2vid::{FrameRate, Result, Vid2VidError};

/// `count` frames of `height x width`; frame `i` is filled with `i / 20`.
pub fn ramp_video(count: usize, height: usize, width: usize, rate: FrameRate) -> Video {
    let frames: Vec<Tensor> = (0..count)
        .map(|i| Tensor::full(i as f32 / 20.0, (height, width, 3), &Device::Cpu).unwrap())
        .collect();
    Video::new(Tensor::stack(&frames, 0).unwrap(), rate).unwrap()
}

pub fn fps(num: u64, den: u64) -> FrameRate {
    FrameRate::new(num, den).unwrap()
}

pub fn first_value(t: &Tensor) -> f32 {
    t.flatten_all().unwrap().get(0).unwrap().to_scalar::<f32>().unwrap()
}

// ─────────────────────────────────────────────────────────────────────────────
// Source / sink
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct MemorySource {
    video: Option<Video>,
    pub decodes: Arc<AtomicUsize>,
}

impl MemorySource {
    pub fn new(video: Video) -> Self {
        Self {
            video: Some(video),
            decodes: Arc::default(),
        }
    }

    /// A source whose every decode fails.
    pub fn unreadable() -> Self {
        Self {
            video: None,
            decodes: Arc::default(),
        }
    }
}

impl FrameSource for MemorySource {
    fn decode(&self, path: &Path) -> Result<Video> {
        self.decodes.fetch_add(1, Ordering::SeqCst);
        self.video
            .clone()
            .ok_or_else(|| Vid2VidError::source_read(path, "corrupt container"))
    }
}

pub struct Encoded {
    pub frames: Tensor,
    pub frame_rate: FrameRate,
    pub path: PathBuf,
}

#[derive(Clone, Default)]
pub struct MemorySink {
    pub encoded: Arc<Mutex<Vec<Encoded>>>,
}

impl MemorySink {
    pub fn count(&self) -> usize {
        self.encoded.lock().unwrap().len()
    }
}

impl FrameSink for MemorySink {
    fn encode(&self, frames: &Tensor, frame_rate: FrameRate, path: &Path) -> Result<PathBuf> {
        self.encoded.lock().unwrap().push(Encoded {
            frames: frames.clone(),
            frame_rate,
            path: path.to_path_buf(),
        });
        Ok(path.to_path_buf())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scripted transformer
// ─────────────────────────────────────────────────────────────────────────────

/// Identity transformer with configurable latency metadata and failures.
#[derive(Clone, Default)]
pub struct Script {
    pub batch_size: usize,
    pub output_lag: Option<usize>,
    /// Zero-based transform call that fails.
    pub fail_at_call: Option<usize>,
    /// Zero-based transform call that returns a half-width frame.
    pub reshape_at_call: Option<usize>,
    pub fail_build: bool,
}

impl Script {
    pub fn batch(batch_size: usize) -> Self {
        Self {
            batch_size,
            ..Self::default()
        }
    }
}

/// One transformer call, in the order the driver made it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Prepare,
    Transform,
}

#[derive(Default)]
pub struct CallLog {
    pub events: Vec<Event>,
    pub configs: Vec<StreamConfig>,
    pub prompts: Vec<PromptConfig>,
    /// First pixel value of every frame handed to `transform`.
    pub inputs: Vec<f32>,
}

struct ScriptedTransformer {
    script: Script,
    log: Arc<Mutex<CallLog>>,
}

impl StreamTransformer for ScriptedTransformer {
    fn prepare(&mut self, prompt: &PromptConfig) -> anyhow::Result<()> {
        let mut log = self.log.lock().unwrap();
        log.events.push(Event::Prepare);
        log.prompts.push(prompt.clone());
        Ok(())
    }

    fn transform(&mut self, frame: &Tensor) -> anyhow::Result<Tensor> {
        let call = {
            let mut log = self.log.lock().unwrap();
            log.events.push(Event::Transform);
            log.inputs.push(first_value(frame));
            log.inputs.len() - 1
        };
        if self.script.fail_at_call == Some(call) {
            bail!("scripted failure at call {}", call);
        }
        if self.script.reshape_at_call == Some(call) {
            let (_, _, w) = frame.dims3()?;
            return Ok(frame.narrow(2, 0, w / 2)?);
        }
        Ok(frame.clone())
    }

    fn batch_size(&self) -> usize {
        self.script.batch_size
    }

    fn output_lag(&self) -> usize {
        self.script
            .output_lag
            .unwrap_or(synoid_vid2vid::stream::DEFAULT_OUTPUT_LAG)
    }
}

#[derive(Clone, Default)]
pub struct ScriptedBuilder {
    pub script: Script,
    pub log: Arc<Mutex<CallLog>>,
}

impl ScriptedBuilder {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            log: Arc::default(),
        }
    }

    pub fn builds(&self) -> usize {
        self.log.lock().unwrap().configs.len()
    }

    pub fn calls(&self) -> usize {
        self.log.lock().unwrap().inputs.len()
    }
}

impl TransformerBuilder for ScriptedBuilder {
    fn build(&self, config: &StreamConfig) -> anyhow::Result<Box<dyn StreamTransformer>> {
        self.log.lock().unwrap().configs.push(config.clone());
        if self.script.fail_build {
            bail!("model weights not found");
        }
        Ok(Box::new(ScriptedTransformer {
            script: self.script.clone(),
            log: self.log.clone(),
        }))
    }
}
