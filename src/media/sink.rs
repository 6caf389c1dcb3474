// SYNOID Vid2Vid Frame Sink
// Copyright (c) 2026 Xing_The_Creator | SYNOID
//
// Encodes an in-memory frame sequence with ffmpeg. The container is written
// to a sibling temp file and renamed into place, so a failed encode never
// leaves a partial video at the output path.

use super::CHANNELS;
use crate::error::{Result, Vid2VidError};
use crate::frame_rate::FrameRate;
use candle_core::{DType, Tensor};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{info, warn};

/// Writes `(N, H, W, C)` frames with values in `[0, 255]` to a container.
pub trait FrameSink: Send + Sync {
    fn encode(&self, frames: &Tensor, frame_rate: FrameRate, path: &Path) -> Result<PathBuf>;
}

/// Encoder settings for the output container.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkOptions {
    pub codec: String,
    /// CRF quality (lower = better quality, larger file).
    pub crf: u32,
    pub preset: String,
    pub pix_fmt: String,
}

impl Default for SinkOptions {
    fn default() -> Self {
        Self {
            codec: "libx264".to_string(),
            crf: 18,
            preset: "medium".to_string(),
            pix_fmt: "yuv420p".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FfmpegSink {
    options: SinkOptions,
}

impl FfmpegSink {
    pub fn new(options: SinkOptions) -> Self {
        Self { options }
    }

    fn build_command(&self, width: usize, height: usize, rate: FrameRate, target: &Path) -> Command {
        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-y", "-v", "error"])
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24"])
            .args(["-s", &format!("{}x{}", width, height)])
            .args(["-framerate", &rate.to_string()])
            .args(["-i", "pipe:0"]);

        // yuv420p needs even dimensions
        if width % 2 != 0 || height % 2 != 0 {
            cmd.args(["-vf", "pad=ceil(iw/2)*2:ceil(ih/2)*2"]);
        }

        cmd.args(["-c:v", &self.options.codec])
            .args(["-preset", &self.options.preset])
            .args(["-crf", &self.options.crf.to_string()])
            .args(["-pix_fmt", &self.options.pix_fmt])
            // identical input must give identical bytes
            .args(["-map_metadata", "-1", "-fflags", "+bitexact", "-flags:v", "+bitexact"])
            .arg(target)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        cmd
    }
}

/// Sibling of `path` that keeps the extension, so ffmpeg still picks the
/// right muxer: `out/clip.mp4` -> `out/.clip.partial.mp4`.
fn partial_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let name = match path.extension() {
        Some(ext) => format!(".{}.partial.{}", stem, ext.to_string_lossy()),
        None => format!(".{}.partial", stem),
    };
    path.with_file_name(name)
}

/// Flattens `[0, 255]` float frames into packed `rgb24` bytes.
pub fn to_rgb24_bytes(frames: &Tensor) -> candle_core::Result<Vec<u8>> {
    frames
        .clamp(0f32, 255f32)?
        .round()?
        .to_dtype(DType::U8)?
        .flatten_all()?
        .to_vec1::<u8>()
}

impl FrameSink for FfmpegSink {
    fn encode(&self, frames: &Tensor, frame_rate: FrameRate, path: &Path) -> Result<PathBuf> {
        let (count, height, width, channels) = frames
            .dims4()
            .map_err(|e| Vid2VidError::sink_write(path, e))?;
        if count == 0 {
            return Err(Vid2VidError::sink_write(path, "no frames to encode"));
        }
        if channels != CHANNELS {
            return Err(Vid2VidError::sink_write(
                path,
                format!("expected {} channels, got {}", CHANNELS, channels),
            ));
        }
        if frame_rate.numerator() > i32::MAX as u64 || frame_rate.denominator() > i32::MAX as u64 {
            return Err(Vid2VidError::sink_write(
                path,
                format!("frame rate {} is not representable by the encoder", frame_rate),
            ));
        }

        let bytes = to_rgb24_bytes(frames).map_err(|e| Vid2VidError::sink_write(path, e))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| Vid2VidError::sink_write(path, e))?;
        }

        let partial = partial_path(path);
        info!(
            "[SINK] Encoding {} frames {}x{} @ {} fps -> {:?}",
            count, width, height, frame_rate, path
        );

        let result = (|| -> std::result::Result<(), String> {
            let mut child = self
                .build_command(width, height, frame_rate, &partial)
                .spawn()
                .map_err(|e| format!("ffmpeg could not run: {}", e))?;

            // stdin is dropped at the end of this statement, closing the pipe
            let piped = match child.stdin.take() {
                Some(mut stdin) => stdin.write_all(&bytes),
                None => Ok(()),
            };

            let output = child
                .wait_with_output()
                .map_err(|e| format!("waiting for ffmpeg: {}", e))?;
            if !output.status.success() {
                return Err(format!(
                    "ffmpeg encode failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ));
            }
            piped.map_err(|e| format!("piping frames to ffmpeg: {}", e))?;

            std::fs::rename(&partial, path).map_err(|e| format!("moving output into place: {}", e))
        })();

        if let Err(reason) = result {
            if partial.exists() {
                if let Err(e) = std::fs::remove_file(&partial) {
                    warn!("[SINK] Could not remove partial output {:?}: {}", partial, e);
                }
            }
            return Err(Vid2VidError::sink_write(path, reason));
        }

        info!("[SINK] ✅ Wrote {:?}", path);
        Ok(path.to_path_buf())
    }
}
