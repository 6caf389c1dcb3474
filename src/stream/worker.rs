// SYNOID Vid2Vid Worker Transformer
// Copyright (c) 2026 Xing_The_Creator | SYNOID
//
// Drives an external diffusion process (typically a Python stream server)
// over its stdin/stdout. Every request is one JSON line; `transform`
// requests and responses are followed by the frame as raw little-endian
// f32 values in (C, H, W) order.
//
//   -> {"op":"init","config":{...}}          <- {"ok":true,"batch_size":2,"output_lag":2}
//   -> {"op":"prepare","prompt":"..",...}    <- {"ok":true}
//   -> {"op":"transform","shape":[3,H,W]}    <- {"ok":true,"shape":[3,H',W']}
//      <3*H*W*4 bytes>                          <3*H'*W'*4 bytes>
//   -> {"op":"shutdown"}

use super::{StreamTransformer, TransformerBuilder, DEFAULT_OUTPUT_LAG};
use crate::config::{PromptConfig, StreamConfig};
use crate::gpu_backend;
use anyhow::{anyhow, bail, Context, Result};
use candle_core::{DType, Device, Tensor};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Largest `H * W` a worker may return (about 16k x 16k).
pub const MAX_FRAME_PIXELS: usize = 1 << 28;

/// Upper bound on the batch size and output lag a worker may report.
pub const MAX_STREAM_DEPTH: usize = 256;

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WorkerRequest<'a> {
    Init {
        config: &'a StreamConfig,
    },
    Prepare {
        #[serde(flatten)]
        prompt: &'a PromptConfig,
    },
    Transform {
        shape: [usize; 3],
    },
    Shutdown,
}

#[derive(Debug, Default, Deserialize)]
pub struct WorkerResponse {
    #[serde(default)]
    pub ok: bool,
    pub error: Option<String>,
    pub batch_size: Option<usize>,
    pub output_lag: Option<usize>,
    pub shape: Option<[usize; 3]>,
}

/// Line-framed JSON plus raw tensor payloads over any byte pipe.
pub struct WorkerChannel<R, W> {
    reader: R,
    writer: W,
}

impl<R: BufRead, W: Write> WorkerChannel<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    /// Sends one request (and optional payload) without waiting for a reply.
    pub fn send(&mut self, request: &WorkerRequest<'_>, payload: Option<&[u8]>) -> Result<()> {
        let mut line = serde_json::to_vec(request)?;
        line.push(b'\n');
        self.writer.write_all(&line)?;
        if let Some(bytes) = payload {
            self.writer.write_all(bytes)?;
        }
        self.writer.flush()?;
        Ok(())
    }

    /// Reads one response line; worker-reported failures become errors.
    pub fn receive(&mut self) -> Result<WorkerResponse> {
        let mut line = String::new();
        let read = self.reader.read_line(&mut line)?;
        if read == 0 {
            bail!("worker closed its output");
        }
        let response: WorkerResponse = serde_json::from_str(line.trim())
            .with_context(|| format!("malformed worker response: {}", line.trim()))?;
        if !response.ok {
            bail!(
                "worker error: {}",
                response.error.as_deref().unwrap_or("unspecified failure")
            );
        }
        Ok(response)
    }

    pub fn request(&mut self, request: &WorkerRequest<'_>, payload: Option<&[u8]>) -> Result<WorkerResponse> {
        self.send(request, payload)?;
        self.receive()
    }

    pub fn read_frame(&mut self, shape: [usize; 3]) -> Result<Tensor> {
        let len = payload_len(shape)?;
        let mut bytes = vec![0u8; len * 4];
        self.reader
            .read_exact(&mut bytes)
            .context("worker frame payload truncated")?;
        Ok(Tensor::from_vec(decode_f32(&bytes), (shape[0], shape[1], shape[2]), &Device::Cpu)?)
    }
}

/// Number of f32 values in a `(3, H, W)` frame the worker announced.
fn payload_len(shape: [usize; 3]) -> Result<usize> {
    let [c, h, w] = shape;
    if c != 3 {
        bail!("worker frame has {} channels, expected 3", c);
    }
    let pixels = h
        .checked_mul(w)
        .filter(|&p| p > 0 && p <= MAX_FRAME_PIXELS)
        .ok_or_else(|| anyhow!("worker frame shape {:?} is out of range", shape))?;
    Ok(pixels * c)
}

pub fn encode_f32(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn decode_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Stream transformer backed by a worker process (or any channel in tests).
pub struct WorkerTransformer<R: BufRead = BufReader<ChildStdout>, W: Write = ChildStdin> {
    channel: WorkerChannel<R, W>,
    child: Option<Child>,
    batch_size: usize,
    output_lag: usize,
}

impl WorkerTransformer {
    /// Spawns `program` and performs the `init` handshake.
    pub fn spawn(program: &str, args: &[String], config: &StreamConfig) -> Result<Self> {
        info!("[WORKER] Spawning {} {}", program, args.join(" "));
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("Spawning stream worker '{}'", program))?;

        let stdin = child.stdin.take().context("worker stdin unavailable")?;
        let stdout = child.stdout.take().context("worker stdout unavailable")?;
        let channel = WorkerChannel::new(BufReader::new(stdout), stdin);

        match Self::connect(channel, config) {
            Ok(mut transformer) => {
                transformer.child = Some(child);
                Ok(transformer)
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                Err(e)
            }
        }
    }
}

impl<R: BufRead, W: Write> WorkerTransformer<R, W> {
    /// Sends the construction config over an already-open channel.
    pub fn connect(mut channel: WorkerChannel<R, W>, config: &StreamConfig) -> Result<Self> {
        let response = channel
            .request(&WorkerRequest::Init { config }, None)
            .context("worker rejected stream config")?;

        let batch_size = match response.batch_size {
            Some(size) => size,
            None => {
                let implied = config.implied_batch_size();
                warn!("[WORKER] Worker did not report batch_size; assuming {}", implied);
                implied
            }
        };
        if batch_size == 0 || batch_size > MAX_STREAM_DEPTH {
            bail!("worker reported batch size {}, expected 1..={}", batch_size, MAX_STREAM_DEPTH);
        }
        let output_lag = response.output_lag.unwrap_or(DEFAULT_OUTPUT_LAG);
        if output_lag > MAX_STREAM_DEPTH {
            bail!("worker reported output lag {}, expected at most {}", output_lag, MAX_STREAM_DEPTH);
        }

        info!("[WORKER] Stream ready: batch {}, output lag {}", batch_size, output_lag);
        Ok(Self {
            channel,
            child: None,
            batch_size,
            output_lag,
        })
    }
}

impl<R: BufRead + Send, W: Write + Send> StreamTransformer for WorkerTransformer<R, W> {
    fn prepare(&mut self, prompt: &PromptConfig) -> Result<()> {
        self.channel.request(&WorkerRequest::Prepare { prompt }, None)?;
        Ok(())
    }

    fn transform(&mut self, frame: &Tensor) -> Result<Tensor> {
        let (c, h, w) = frame.dims3().context("expected a (C, H, W) frame")?;
        let values = frame.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;

        let payload = encode_f32(&values);
        let response = self
            .channel
            .request(&WorkerRequest::Transform { shape: [c, h, w] }, Some(payload.as_slice()))?;
        let shape = response
            .shape
            .ok_or_else(|| anyhow!("worker response is missing the frame shape"))?;
        self.channel.read_frame(shape)
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn output_lag(&self) -> usize {
        self.output_lag
    }
}

impl<R: BufRead, W: Write> Drop for WorkerTransformer<R, W> {
    fn drop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        if let Err(e) = self.channel.send(&WorkerRequest::Shutdown, None) {
            debug!("[WORKER] Shutdown request not delivered: {}", e);
        }

        let deadline = Instant::now() + SHUTDOWN_GRACE;
        while Instant::now() < deadline {
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!("[WORKER] Exited with {}", status);
                    return;
                }
                Ok(None) => std::thread::sleep(Duration::from_millis(50)),
                Err(_) => break,
            }
        }
        warn!("[WORKER] Worker did not exit in time; killing it");
        let _ = child.kill();
        let _ = child.wait();
    }
}

/// Builds a [`WorkerTransformer`] per run from a worker command line.
#[derive(Debug, Clone)]
pub struct WorkerBuilder {
    program: String,
    args: Vec<String>,
}

impl WorkerBuilder {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Splits a whitespace-separated command such as
    /// `python3 stream_worker.py --device cuda`.
    pub fn from_command_line(command: &str) -> Result<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next().context("empty worker command")?;
        Ok(Self::new(program, parts.collect()))
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl TransformerBuilder for WorkerBuilder {
    fn build(&self, config: &StreamConfig) -> Result<Box<dyn StreamTransformer>> {
        config.validate().map_err(anyhow::Error::msg)?;
        gpu_backend::get_gpu_backend()
            .check_acceleration(config.acceleration)
            .map_err(anyhow::Error::msg)?;
        Ok(Box::new(WorkerTransformer::spawn(&self.program, &self.args, config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StreamOptions;
    use std::io::Cursor;

    fn config() -> StreamConfig {
        StreamConfig::for_video(&StreamOptions::default(), 64, 32, 2)
    }

    fn prompt() -> PromptConfig {
        PromptConfig {
            prompt: "oil painting".to_string(),
            negative_prompt: String::new(),
            num_inference_steps: 50,
        }
    }

    fn scripted(lines: &[&str], payloads: &[Vec<f32>]) -> Cursor<Vec<u8>> {
        let mut bytes = Vec::new();
        let mut payloads = payloads.iter();
        for line in lines {
            bytes.extend_from_slice(line.as_bytes());
            bytes.push(b'\n');
            if line.contains("\"shape\"") {
                if let Some(p) = payloads.next() {
                    bytes.extend_from_slice(&encode_f32(p));
                }
            }
        }
        Cursor::new(bytes)
    }

    #[test]
    fn test_request_framing() {
        let mut channel = WorkerChannel::new(Cursor::new(Vec::new()), Vec::new());
        channel
            .send(&WorkerRequest::Transform { shape: [3, 1, 1] }, Some(encode_f32(&[0.5, 0.25, 1.0]).as_slice()))
            .unwrap();
        channel.send(&WorkerRequest::Shutdown, None).unwrap();

        let written = channel.writer;
        let newline = written.iter().position(|&b| b == b'\n').unwrap();
        let header: serde_json::Value = serde_json::from_slice(&written[..newline]).unwrap();
        assert_eq!(header["op"], "transform");
        assert_eq!(header["shape"], serde_json::json!([3, 1, 1]));
        assert_eq!(decode_f32(&written[newline + 1..newline + 13]), vec![0.5, 0.25, 1.0]);
        assert_eq!(&written[newline + 13..], b"{\"op\":\"shutdown\"}\n");
    }

    #[test]
    fn test_prepare_flattens_prompt() {
        let p = prompt();
        let json = serde_json::to_value(WorkerRequest::Prepare { prompt: &p }).unwrap();
        assert_eq!(json["op"], "prepare");
        assert_eq!(json["prompt"], "oil painting");
        assert_eq!(json["num_inference_steps"], 50);
    }

    #[test]
    fn test_handshake_and_transform() {
        let reader = scripted(
            &[
                r#"{"ok":true,"batch_size":2,"output_lag":3}"#,
                r#"{"ok":true}"#,
                r#"{"ok":true,"shape":[3,1,2]}"#,
            ],
            &[vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6]],
        );
        let channel = WorkerChannel::new(reader, Vec::new());
        let mut stream = WorkerTransformer::connect(channel, &config()).unwrap();
        assert_eq!(stream.batch_size(), 2);
        assert_eq!(stream.output_lag(), 3);

        stream.prepare(&prompt()).unwrap();
        let frame = Tensor::zeros((3, 2, 2), DType::F32, &Device::Cpu).unwrap();
        let out = stream.transform(&frame).unwrap();
        assert_eq!(out.dims(), &[3, 1, 2]);
        let values: Vec<f32> = out.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(values, vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6]);
    }

    #[test]
    fn test_missing_batch_size_uses_config() {
        let reader = scripted(&[r#"{"ok":true}"#], &[]);
        let stream = WorkerTransformer::connect(WorkerChannel::new(reader, Vec::new()), &config()).unwrap();
        assert_eq!(stream.batch_size(), 2);
        assert_eq!(stream.output_lag(), DEFAULT_OUTPUT_LAG);
    }

    #[test]
    fn test_worker_errors_surface() {
        let reader = scripted(&[r#"{"ok":false,"error":"unknown model id"}"#], &[]);
        let err = WorkerTransformer::connect(WorkerChannel::new(reader, Vec::new()), &config())
            .err()
            .unwrap();
        assert!(format!("{:#}", err).contains("unknown model id"));

        let reader = scripted(&[], &[]);
        assert!(WorkerTransformer::connect(WorkerChannel::new(reader, Vec::new()), &config()).is_err());
    }

    #[test]
    fn test_truncated_payload() {
        let reader = scripted(
            &[r#"{"ok":true,"batch_size":1}"#, r#"{"ok":true,"shape":[3,2,2]}"#],
            &[vec![0.0; 4]],
        );
        let mut stream = WorkerTransformer::connect(WorkerChannel::new(reader, Vec::new()), &config()).unwrap();
        let frame = Tensor::zeros((3, 2, 2), DType::F32, &Device::Cpu).unwrap();
        assert!(stream.transform(&frame).is_err());
    }

    #[test]
    fn test_out_of_range_shape_is_an_error() {
        let frame = Tensor::zeros((3, 2, 2), DType::F32, &Device::Cpu).unwrap();
        for shape in ["[18446744073709551615,2,1]", "[3,18446744073709551615,2]", "[3,65536,65536]", "[1,2,2]", "[3,0,4]"] {
            let reader = scripted(
                &[r#"{"ok":true,"batch_size":1}"#, format!(r#"{{"ok":true,"shape":{}}}"#, shape).as_str()],
                &[vec![0.0; 12]],
            );
            let mut stream = WorkerTransformer::connect(WorkerChannel::new(reader, Vec::new()), &config()).unwrap();
            assert!(stream.transform(&frame).is_err(), "shape {}", shape);
        }
    }

    #[test]
    fn test_unbounded_stream_depth_rejected() {
        for init in [
            r#"{"ok":true,"batch_size":18446744073709551615}"#,
            r#"{"ok":true,"batch_size":1,"output_lag":18446744073709551615}"#,
            r#"{"ok":true,"batch_size":0}"#,
        ] {
            let reader = scripted(&[init], &[]);
            assert!(
                WorkerTransformer::connect(WorkerChannel::new(reader, Vec::new()), &config()).is_err(),
                "{}",
                init
            );
        }
    }

    #[test]
    fn test_command_line_split() {
        let builder = WorkerBuilder::from_command_line("python3 stream_worker.py --device cuda").unwrap();
        assert_eq!(builder.program(), "python3");
        assert_eq!(builder.args, vec!["stream_worker.py", "--device", "cuda"]);
        assert!(WorkerBuilder::from_command_line("   ").is_err());
    }
}
