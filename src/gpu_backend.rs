// SYNOID GPU Backend - Acceleration Capability Probe
// Copyright (c) 2026 Xing_The_Creator | SYNOID
//
// Detects an NVIDIA GPU via nvidia-smi so compiled-graph (tensorrt)
// acceleration can be refused up front on hosts that cannot run it.

use crate::config::AccelerationMode;
use std::process::Command;
use std::sync::OnceLock;
use tracing::{info, warn};

/// Compute backend available to the stream transformer.
#[derive(Debug, Clone, PartialEq)]
pub enum GpuBackend {
    /// NVIDIA GPU (detected via nvidia-smi)
    Nvidia { name: String, driver_version: String },
    /// CPU fallback
    Cpu { threads: usize },
}

impl std::fmt::Display for GpuBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GpuBackend::Nvidia { name, driver_version } => {
                write!(f, "NVIDIA: {} (Driver {})", name, driver_version)
            }
            GpuBackend::Cpu { threads } => write!(f, "CPU ({} threads)", threads),
        }
    }
}

impl GpuBackend {
    pub fn has_gpu(&self) -> bool {
        !matches!(self, GpuBackend::Cpu { .. })
    }

    /// Whether a stream built with `mode` can run on this backend.
    pub fn supports(&self, mode: AccelerationMode) -> bool {
        match mode {
            AccelerationMode::None => true,
            AccelerationMode::Xformers | AccelerationMode::TensorRt => self.has_gpu(),
        }
    }

    /// Host check run before a model backend is started.
    pub fn check_acceleration(&self, mode: AccelerationMode) -> Result<(), String> {
        if self.supports(mode) {
            Ok(())
        } else {
            Err(format!(
                "{} acceleration requires an NVIDIA GPU, none detected on this host (use --acceleration none)",
                mode
            ))
        }
    }

    /// Fastest mode this backend supports.
    pub fn recommended_acceleration(&self) -> AccelerationMode {
        if self.has_gpu() {
            AccelerationMode::TensorRt
        } else {
            AccelerationMode::None
        }
    }
}

/// First GPU line of `nvidia-smi --query-gpu=name,driver_version --format=csv,noheader`.
fn parse_nvidia_smi(stdout: &str) -> Option<GpuBackend> {
    let line = stdout.lines().find(|l| !l.trim().is_empty())?;
    let mut parts = line.split(',').map(str::trim);
    let name = parts.next().filter(|s| !s.is_empty())?.to_string();
    let driver_version = parts.next().filter(|s| !s.is_empty())?.to_string();
    Some(GpuBackend::Nvidia { name, driver_version })
}

/// Probes nvidia-smi. `None` when it is missing or reports no device.
pub fn detect_nvidia() -> Option<GpuBackend> {
    let output = Command::new("nvidia-smi")
        .args(["--query-gpu=name,driver_version", "--format=csv,noheader"])
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let backend = parse_nvidia_smi(&String::from_utf8_lossy(&output.stdout))?;
    info!("[GPU] ✓ {}", backend);
    Some(backend)
}

static GPU_BACKEND: OnceLock<GpuBackend> = OnceLock::new();

/// Detected once per process.
pub fn get_gpu_backend() -> &'static GpuBackend {
    GPU_BACKEND.get_or_init(|| {
        detect_nvidia().unwrap_or_else(|| {
            let threads = num_cpus::get();
            warn!("[GPU] No GPU detected. Falling back to CPU ({} threads)", threads);
            GpuBackend::Cpu { threads }
        })
    })
}

/// Print GPU status (for CLI `gpu` command)
pub fn print_gpu_status() {
    let backend = get_gpu_backend();

    println!("=== SYNOID Vid2Vid GPU Status ===");
    println!("Backend: {}", backend);
    println!("Hardware Acceleration: {}", if backend.has_gpu() { "✓ ENABLED" } else { "✗ DISABLED" });
    for mode in [AccelerationMode::None, AccelerationMode::Xformers, AccelerationMode::TensorRt] {
        println!(
            "  {:<9} {}",
            mode.label(),
            if backend.supports(mode) { "✓" } else { "✗" }
        );
    }
    println!("Recommended: --acceleration {}", backend.recommended_acceleration());
}
