// =============================================================================
// WAVEFIELD - GPU wave simulation on a Vulkan grid
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  System (winit window, surface, event loop)                     │
// │    └── Compositor (frame orchestration, swapchain, sync)        │
// │          ├── Compute  (wave equation, ping-pong height buffer)  │
// │          └── Renderer (grid mesh, transfers, draw commands)     │
// │                └── Backend (Controller, Commands, pipelines)    │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Wait for the previous frame
// 2. Dispatch the wave step
// 3. Copy uniforms, heights and normals into render buffers
// 4. Acquire swapchain image
// 5. Draw the grid
// 6. Present
//
// =============================================================================

mod backend;
mod camera;
mod compositor;
mod compute;
mod config;
mod mesh;
mod renderer;
mod system;

use anyhow::{Context, Result};
use config::Config;
use std::fs::{File, OpenOptions};
use std::io::Write;
use winit::event_loop::EventLoop;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(&config_path)?;

    init_logging(&config);
    log::info!("Starting wavefield (config: {})", config_path);
    if !std::path::Path::new(&config_path).exists() {
        log::info!("Config file not found at {}, using defaults", config_path);
    }
    log::info!(
        "Window: {}x{}, grid: {}x{} @ {}",
        config.window.width,
        config.window.height,
        config.grid.width,
        config.grid.height,
        config.grid.spacing
    );
    log::info!("Present mode: {}", config.graphics.present_mode);

    config.validate().context("Invalid configuration")?;

    let event_loop = EventLoop::new()?;
    let mut app = system::App::new(config);
    event_loop.run_app(&mut app)?;

    match app.take_error() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Initialize logging, optionally writing to the configured log file
/// instead of stderr
fn init_logging(config: &Config) {
    use env_logger::{Builder, Env, Target};

    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));

    let mut file_error = None;
    if config.debug.log_to_file {
        match open_log_file(&config.debug.log_file) {
            Ok(file) => {
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(e) => file_error = Some(e),
        }
    }

    builder.init();

    if let Some(e) = file_error {
        log::warn!("Logging to stderr, could not open {}: {:#}", config.debug.log_file, e);
    }
}

fn open_log_file(path: &str) -> Result<File> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path))?;

    writeln!(file, "=== Wavefield Log ===")?;
    writeln!(file, "Started: {:?}", std::time::SystemTime::now())?;
    writeln!(file)?;

    Ok(file)
}
