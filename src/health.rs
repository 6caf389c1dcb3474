// SYNOID Health Check
// Copyright (c) 2026 Xing_The_Creator | SYNOID
//
// Startup probe for the external tools the pipeline shells out to.

use std::path::PathBuf;
use tracing::{debug, info};

/// Executables every conversion needs.
pub const REQUIRED_TOOLS: [&str; 2] = ["ffmpeg", "ffprobe"];

/// Check whether an executable exists on PATH without spawning it.
pub fn which_exists(name: &str) -> bool {
    which_in(name, std::env::var_os("PATH"))
}

fn which_in(name: &str, path_env: Option<std::ffi::OsString>) -> bool {
    let Some(path_env) = path_env else {
        return false;
    };
    std::env::split_paths(&path_env).any(|dir| {
        let candidate: PathBuf = dir.join(name);
        candidate.is_file() || (cfg!(windows) && candidate.with_extension("exe").is_file())
    })
}

/// Names of required tools that are missing from PATH.
pub fn check_dependencies() -> Vec<&'static str> {
    let missing: Vec<&'static str> = REQUIRED_TOOLS
        .iter()
        .copied()
        .filter(|tool| !which_exists(tool))
        .collect();
    debug!("[HEALTH] Missing tools: {:?}", missing);
    missing
}

/// Print a dependency report (for CLI `doctor` command). Returns whether
/// every required tool was found.
pub fn print_doctor_report(worker_command: Option<&str>) -> bool {
    println!("=== SYNOID Vid2Vid Doctor ===");
    let mut ok = true;
    for tool in REQUIRED_TOOLS {
        let found = which_exists(tool);
        ok &= found;
        println!("  {:<9} {}", tool, if found { "✓ found" } else { "✗ missing" });
    }

    match worker_command.and_then(|cmd| cmd.split_whitespace().next()) {
        Some(program) => {
            let found = which_exists(program) || std::path::Path::new(program).is_file();
            println!("  worker    {} ({})", if found { "✓" } else { "✗" }, program);
        }
        None => println!("  worker    - not configured (preview backend only)"),
    }

    let backend = crate::gpu_backend::get_gpu_backend();
    println!("  gpu       {}", backend);
    info!("[HEALTH] Doctor finished: {}", if ok { "OK" } else { "missing tools" });
    ok
}
