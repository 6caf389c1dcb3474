// ffmpeg-backed source/sink tests. Skipped when ffmpeg/ffprobe are missing.

mod common;

use common::*;
use synoid_vid2vid::health;
use synoid_vid2vid::media::{FfmpegSink, FfmpegSource, FrameSink, FrameSource};
use synoid_vid2vid::stream::PreviewBuilder;
use synoid_vid2vid::{RunRequest, StreamingDriver, Vid2VidError};

fn ffmpeg_available() -> bool {
    if health::check_dependencies().is_empty() {
        true
    } else {
        eprintln!("ffmpeg/ffprobe not on PATH, skipping");
        false
    }
}

/// `(N, H, W, 3)` frames in `[0, 255]`.
fn test_frames(count: usize, height: usize, width: usize) -> candle_core::Tensor {
    ramp_video(count, height, width, fps(30, 1))
        .frames()
        .affine(255.0, 0.0)
        .unwrap()
}

#[test]
fn test_encoding_is_reproducible() {
    if !ffmpeg_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let sink = FfmpegSink::default();
    let frames = test_frames(6, 32, 32);

    let a = sink.encode(&frames, fps(30, 1), &dir.path().join("a.mp4")).unwrap();
    let b = sink.encode(&frames, fps(30, 1), &dir.path().join("b.mp4")).unwrap();
    assert_eq!(std::fs::read(a).unwrap(), std::fs::read(b).unwrap());
}

#[test]
fn test_encode_then_decode_keeps_shape_and_rate() {
    if !ffmpeg_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested/clip.mp4");
    FfmpegSink::default()
        .encode(&test_frames(6, 32, 48), fps(30_000, 1_001), &path)
        .unwrap();

    // no temp file left next to the output
    let siblings: Vec<_> = std::fs::read_dir(dir.path().join("nested")).unwrap().collect();
    assert_eq!(siblings.len(), 1);

    let video = FfmpegSource::new().decode(&path).unwrap();
    assert_eq!(video.frame_count(), 6);
    assert_eq!((video.height(), video.width()), (32, 48));
    assert_eq!(video.frame_rate(), fps(30_000, 1_001));
}

#[test]
fn test_odd_dimensions_are_padded() {
    if !ffmpeg_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("odd.mp4");
    FfmpegSink::default()
        .encode(&test_frames(3, 15, 21), fps(24, 1), &path)
        .unwrap();

    let video = FfmpegSource::new().decode(&path).unwrap();
    assert_eq!((video.height(), video.width()), (16, 22));
}

#[test]
fn test_missing_input_is_source_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = FfmpegSource::new()
        .decode(&dir.path().join("missing.mp4"))
        .unwrap_err();
    assert!(matches!(err, Vid2VidError::SourceRead { .. }));
}

#[test]
fn test_driver_end_to_end_with_preview() {
    if !ffmpeg_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input.mp4");
    FfmpegSink::default()
        .encode(&test_frames(10, 32, 32), fps(25, 1), &input)
        .unwrap();

    let output = dir.path().join("out/styled.mp4");
    let report = StreamingDriver::with_ffmpeg(PreviewBuilder)
        .run(&RunRequest {
            input,
            output: output.clone(),
            prompt: "ink sketch".to_string(),
            ..RunRequest::default()
        })
        .unwrap();
    assert_eq!(report.frames_written, 8);

    let video = FfmpegSource::new().decode(&output).unwrap();
    assert_eq!(video.frame_count(), 8);
    assert_eq!(video.frame_rate(), fps(25, 1));
}

#[test]
fn test_unreadable_input_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let garbage = dir.path().join("garbage.mp4");
    std::fs::write(&garbage, b"not a video").unwrap();
    let output = dir.path().join("never.mp4");

    let err = StreamingDriver::with_ffmpeg(PreviewBuilder)
        .run(&RunRequest {
            input: garbage,
            output: output.clone(),
            ..RunRequest::default()
        })
        .unwrap_err();
    assert!(matches!(err, Vid2VidError::SourceRead { .. }));
    assert!(!output.exists());
}
