// SYNOID Vid2Vid Main Entry Point
// Copyright (c) 2026 Xing_The_Creator | SYNOID

use synoid_vid2vid::config::{parse_lora_entry, AccelerationMode, StreamOptions};
use synoid_vid2vid::driver::{RunRequest, StreamingDriver, DEFAULT_OUTPUT};
use synoid_vid2vid::media::{FfmpegSink, FfmpegSource, SinkOptions};
use synoid_vid2vid::stream::{PreviewBuilder, TransformerBuilder, WorkerBuilder};
use synoid_vid2vid::{gpu_backend, health};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use dotenv::dotenv;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "synoid-vid2vid")]
#[command(about = "SYNOID Vid2Vid - stream a video through a diffusion img2img pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Backend {
    /// In-process CPU reference pipeline (no model weights)
    Preview,
    /// External diffusion worker process (see --worker-cmd)
    Worker,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a video frame by frame
    Convert {
        /// Input video path
        #[arg(short, long)]
        input: PathBuf,

        /// Prompt describing the target style
        #[arg(short, long, default_value = "")]
        prompt: String,

        /// Output video path
        #[arg(short, long, default_value = DEFAULT_OUTPUT)]
        output: PathBuf,

        /// Negative prompt
        #[arg(long, default_value = "")]
        negative_prompt: String,

        /// Resolution multiplier on the source size
        #[arg(long, default_value_t = 1.0)]
        scale: f64,

        /// Seed; -1 picks a random one
        #[arg(long, default_value_t = 2, allow_negative_numbers = true)]
        seed: i64,

        /// Number of inference steps
        #[arg(long, default_value_t = 50)]
        steps: usize,

        /// JSON file with stream options; flags below override it
        #[arg(long)]
        config: Option<PathBuf>,

        /// Model identifier (HuggingFace id or local path)
        #[arg(long)]
        model: Option<String>,

        /// LoRA adapter as name=scale (repeatable)
        #[arg(long = "lora", value_parser = parse_lora_entry)]
        lora: Vec<(String, f32)>,

        /// Denoising step indices, comma separated (e.g. 35,45)
        #[arg(long, value_delimiter = ',')]
        t_index: Option<Vec<usize>>,

        /// Acceleration: none, xformers, tensorrt
        #[arg(long)]
        acceleration: Option<AccelerationMode>,

        /// Frame buffer size
        #[arg(long)]
        frame_buffer_size: Option<usize>,

        /// Warmup steps
        #[arg(long)]
        warmup: Option<usize>,

        /// Disable denoising batch
        #[arg(long)]
        no_denoising_batch: bool,

        /// Disable the similar image filter
        #[arg(long)]
        no_similar_filter: bool,

        /// Similar image filter threshold
        #[arg(long)]
        similar_threshold: Option<f64>,

        /// Max consecutive frames the filter may skip
        #[arg(long)]
        similar_max_skip: Option<usize>,

        /// Transformer backend
        #[arg(long, value_enum, default_value = "preview")]
        backend: Backend,

        /// Worker command line (defaults to $VID2VID_WORKER)
        #[arg(long)]
        worker_cmd: Option<String>,

        /// x264 CRF (lower = better quality)
        #[arg(long, default_value_t = 18)]
        crf: u32,
    },

    /// Show GPU / acceleration status
    Gpu,

    /// Check external tools (ffmpeg, ffprobe, worker)
    Doctor,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    tracing_subscriber::fmt::init();

    // Global panic handler: log panics instead of crashing silently
    std::panic::set_hook(Box::new(|panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());
        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };
        eprintln!("🚨 [SYNOID PANIC] at {}: {}", location, message);
    }));

    let args = Cli::parse();

    match args.command {
        Commands::Gpu => {
            gpu_backend::print_gpu_status();
        }
        Commands::Doctor => {
            let worker = std::env::var("VID2VID_WORKER").ok();
            if !health::print_doctor_report(worker.as_deref()) {
                bail!("required tools are missing");
            }
        }
        Commands::Convert {
            input,
            prompt,
            output,
            negative_prompt,
            scale,
            seed,
            steps,
            config,
            model,
            lora,
            t_index,
            acceleration,
            frame_buffer_size,
            warmup,
            no_denoising_batch,
            no_similar_filter,
            similar_threshold,
            similar_max_skip,
            backend,
            worker_cmd,
            crf,
        } => {
            info!("--- SYNOID VID2VID v{} ---", env!("CARGO_PKG_VERSION"));

            let missing = health::check_dependencies();
            if !missing.is_empty() {
                warn!("⚠️ Missing dependencies: {:?}. Decoding/encoding will fail.", missing);
            }

            let mut stream = match config {
                Some(path) => StreamOptions::from_json_file(&path)?,
                None => StreamOptions::default(),
            };
            if let Some(model) = model {
                stream.model_id = model;
            }
            for (name, weight) in lora {
                stream.lora.insert(name, weight);
            }
            if let Some(t_index) = t_index {
                stream.t_index_list = t_index;
            }
            if let Some(mode) = acceleration {
                stream.acceleration = mode;
            }
            if let Some(size) = frame_buffer_size {
                stream.frame_buffer_size = size;
            }
            if let Some(steps) = warmup {
                stream.warmup = steps;
            }
            if no_denoising_batch {
                stream.use_denoising_batch = false;
            }
            if no_similar_filter {
                stream.enable_similar_image_filter = false;
            }
            if let Some(threshold) = similar_threshold {
                stream.similar_image_filter_threshold = threshold;
            }
            if let Some(max_skip) = similar_max_skip {
                stream.similar_image_filter_max_skip_frame = max_skip;
            }

            let builder: Box<dyn TransformerBuilder> = match backend {
                Backend::Preview => Box::new(PreviewBuilder),
                Backend::Worker => {
                    let command = worker_cmd
                        .or_else(|| std::env::var("VID2VID_WORKER").ok())
                        .context("worker backend needs --worker-cmd or VID2VID_WORKER")?;
                    Box::new(WorkerBuilder::from_command_line(&command)?)
                }
            };

            let sink = FfmpegSink::new(SinkOptions {
                crf,
                ..SinkOptions::default()
            });
            let driver = StreamingDriver::from_boxed(Box::new(FfmpegSource::new()), Box::new(sink), builder);

            let request = RunRequest {
                input,
                output,
                scale,
                seed,
                prompt,
                negative_prompt,
                num_inference_steps: steps,
                stream,
            };

            // CPU-bound and strictly sequential: keep it off the async workers
            let report = tokio::task::spawn_blocking(move || driver.run(&request))
                .await
                .context("conversion task panicked")??;

            info!(
                "✅ {:?}: {} frames @ {} fps, {}x{}, seed {}",
                report.output,
                report.frames_written,
                report.frame_rate,
                report.resolution.1,
                report.resolution.0,
                report.seed
            );
        }
    }

    Ok(())
}
