// SYNOID Vid2Vid Frame Source
// Copyright (c) 2026 Xing_The_Creator | SYNOID
//
// Decodes a whole video into memory through ffprobe + ffmpeg rawvideo.

use super::{Video, CHANNELS};
use crate::error::{Result, Vid2VidError};
use crate::frame_rate::FrameRate;
use serde::Deserialize;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::{debug, info};

/// Turns a video file into normalized frames plus an exact frame rate.
pub trait FrameSource: Send + Sync {
    fn decode(&self, path: &Path) -> Result<Video>;
}

/// Stream properties needed before decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoProbe {
    pub width: usize,
    pub height: usize,
    pub frame_rate: FrameRate,
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Deserialize)]
struct ProbeStream {
    width: Option<usize>,
    height: Option<usize>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
}

/// Reads width, height and frame rate of the first video stream.
pub fn probe_video(path: &Path) -> Result<VideoProbe> {
    let output = Command::new("ffprobe")
        .args([
            "-v", "error",
            "-select_streams", "v:0",
            "-show_entries", "stream=width,height,r_frame_rate,avg_frame_rate",
            "-of", "json",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| Vid2VidError::source_read(path, format!("ffprobe could not run: {}", e)))?;

    if !output.status.success() {
        return Err(Vid2VidError::source_read(
            path,
            format!("ffprobe failed: {}", String::from_utf8_lossy(&output.stderr).trim()),
        ));
    }

    parse_probe(&output.stdout).map_err(|reason| Vid2VidError::source_read(path, reason))
}

fn parse_probe(json: &[u8]) -> std::result::Result<VideoProbe, String> {
    let probe: ProbeOutput =
        serde_json::from_slice(json).map_err(|e| format!("unreadable ffprobe output: {}", e))?;
    let stream = probe
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| "no video stream".to_string())?;

    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err("video stream has no dimensions".to_string()),
    };

    // r_frame_rate is "0/0" for some variable-rate streams
    let frame_rate = [stream.r_frame_rate, stream.avg_frame_rate]
        .into_iter()
        .flatten()
        .find_map(|s| s.parse::<FrameRate>().ok())
        .ok_or_else(|| "video stream has no usable frame rate".to_string())?;

    Ok(VideoProbe {
        width,
        height,
        frame_rate,
    })
}

/// Decodes through the `ffmpeg`/`ffprobe` binaries on PATH.
#[derive(Debug, Clone, Default)]
pub struct FfmpegSource;

impl FfmpegSource {
    pub fn new() -> Self {
        Self
    }
}

impl FrameSource for FfmpegSource {
    fn decode(&self, path: &Path) -> Result<Video> {
        if !path.is_file() {
            return Err(Vid2VidError::source_read(path, "file does not exist"));
        }

        let probe = probe_video(path)?;
        info!(
            "[SOURCE] {:?}: {}x{} @ {} fps",
            path, probe.width, probe.height, probe.frame_rate
        );

        let output = Command::new("ffmpeg")
            .args(["-v", "error", "-nostdin", "-noautorotate", "-i"])
            .arg(path)
            .args([
                "-map", "0:v:0",
                "-vsync", "passthrough",
                "-f", "rawvideo",
                "-pix_fmt", "rgb24",
                "pipe:1",
            ])
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Vid2VidError::source_read(path, format!("ffmpeg could not run: {}", e)))?;

        if !output.status.success() {
            return Err(Vid2VidError::source_read(
                path,
                format!("ffmpeg decode failed: {}", String::from_utf8_lossy(&output.stderr).trim()),
            ));
        }

        let frame_bytes = probe.width * probe.height * CHANNELS;
        let mut bytes = output.stdout;
        let frame_count = bytes.len() / frame_bytes;
        if frame_count == 0 {
            return Err(Vid2VidError::source_read(path, "video contains no frames"));
        }
        if bytes.len() % frame_bytes != 0 {
            debug!(
                "[SOURCE] Dropping {} trailing bytes of a partial frame",
                bytes.len() % frame_bytes
            );
            bytes.truncate(frame_count * frame_bytes);
        }

        info!("[SOURCE] Decoded {} frames", frame_count);
        Video::from_rgb24(bytes, frame_count, probe.height, probe.width, probe.frame_rate)
            .map_err(|e| Vid2VidError::source_read(path, e))
    }
}
