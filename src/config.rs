// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every section falls back to defaults, so a missing file or a partial file
// still produces a runnable configuration. A file that does not parse is an
// error. `validate` rejects settings the simulation cannot run with.

use anyhow::{Context, Result};
use glam::Vec3;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub grid: GridConfig,
    pub wave: WaveConfig,
    pub camera: CameraConfig,
    pub shaders: ShaderConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Wavefield".to_string(),
            width: 800,
            height: 600,
            resizable: true,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub present_mode: String,
    pub clear_color: [f32; 4],
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "fifo".to_string(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

/// Grid dimensions in vertices, and distance between neighbouring vertices
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct GridConfig {
    pub width: u32,
    pub height: u32,
    pub spacing: f32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            width: 64,
            height: 64,
            spacing: 0.5,
        }
    }
}

/// Wave simulation settings
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct WaveConfig {
    /// Propagation speed in world units per second
    pub speed: f32,
    /// Simulated seconds per frame
    pub time_step: f32,
    /// Multiplier applied to every new height, 1.0 = no damping
    pub damping: f32,
    /// Height of the initial drop
    pub drop_amplitude: f32,
    /// Radius of the initial drop, in grid cells
    pub drop_radius: f32,
}

impl Default for WaveConfig {
    fn default() -> Self {
        Self {
            speed: 4.0,
            time_step: 1.0 / 60.0,
            damping: 0.998,
            drop_amplitude: 1.5,
            drop_radius: 4.0,
        }
    }
}

/// Camera and light placement
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct CameraConfig {
    pub eye: [f32; 3],
    pub target: [f32; 3],
    pub fov_degrees: f32,
    pub near: f32,
    pub far: f32,
    pub light_position: [f32; 3],
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            eye: [0.0, 6.0, 10.0],
            target: [0.0, 0.0, 0.0],
            fov_degrees: 90.0,
            near: 0.1,
            far: 100.0,
            light_position: [10.0, 10.0, 0.0],
        }
    }
}

/// Where the compiled SPIR-V files live
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    pub directory: PathBuf,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("shaders"),
        }
    }
}

impl ShaderConfig {
    pub fn path(&self, name: &str) -> PathBuf {
        self.directory.join(name)
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_to_file: bool,
    pub log_file: String,
    pub show_fps: bool,
    /// Log height statistics of the first simulation step
    pub inspect_first_step: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_to_file: false,
            log_file: "wavefield.log".to_string(),
            show_fps: true,
            inspect_first_step: false,
        }
    }
}

impl Config {
    /// Load configuration from a file.
    ///
    /// A missing file gives the defaults; an unreadable or malformed one is an
    /// error.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Check the settings the GPU simulation depends on
    pub fn validate(&self) -> Result<()> {
        if self.grid.width < 2 || self.grid.height < 2 {
            anyhow::bail!(
                "Grid must be at least 2x2 vertices, got {}x{}",
                self.grid.width,
                self.grid.height
            );
        }
        if crate::compute::grid_vertex_count(&self.grid).is_none() {
            anyhow::bail!(
                "Grid {}x{} is too large, at most {} vertices are supported",
                self.grid.width,
                self.grid.height,
                crate::compute::MAX_GRID_VERTICES
            );
        }
        if self.grid.spacing <= 0.0 {
            anyhow::bail!("Grid spacing must be positive, got {}", self.grid.spacing);
        }
        if self.wave.time_step <= 0.0 {
            anyhow::bail!("Wave time step must be positive, got {}", self.wave.time_step);
        }
        if !(self.wave.damping > 0.0 && self.wave.damping <= 1.0) {
            anyhow::bail!("Wave damping must be in (0, 1], got {}", self.wave.damping);
        }
        if self.camera.near <= 0.0 || self.camera.far <= self.camera.near {
            anyhow::bail!(
                "Camera planes must satisfy 0 < near < far, got near={} far={}",
                self.camera.near,
                self.camera.far
            );
        }

        if !(self.camera.fov_degrees > 0.0 && self.camera.fov_degrees < 180.0) {
            anyhow::bail!(
                "Camera fov must be in (0, 180) degrees, got {}",
                self.camera.fov_degrees
            );
        }
        let forward = Vec3::from(self.camera.target) - Vec3::from(self.camera.eye);
        if forward.length_squared() <= f32::EPSILON {
            anyhow::bail!("Camera eye and target must differ, both are {:?}", self.camera.eye);
        }
        if forward.normalize().cross(Vec3::Y).length_squared() <= f32::EPSILON {
            anyhow::bail!(
                "Camera must not look straight up or down (eye {:?}, target {:?})",
                self.camera.eye,
                self.camera.target
            );
        }

        crate::compute::WaveParams::new(&self.wave, &self.grid).check_stability()
    }

    /// Get present mode as Vulkan enum
    pub fn present_mode(&self) -> ash::vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => ash::vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => ash::vk::PresentModeKHR::MAILBOX,
            "fifo" => ash::vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => ash::vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to FIFO",
                    self.graphics.present_mode
                );
                ash::vk::PresentModeKHR::FIFO
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.grid.width, 64);
        assert_eq!(config.window.title, "Wavefield");
        assert_eq!(config.shaders.path("wave.comp.spv"), PathBuf::from("shaders/wave.comp.spv"));
        config.validate().unwrap();
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::parse(
            r#"
            [grid]
            width = 10

            [wave]
            damping = 0.9
            "#,
        )
        .unwrap();

        assert_eq!(config.grid.width, 10);
        assert_eq!(config.grid.height, 64);
        assert_eq!(config.wave.damping, 0.9);
        assert_eq!(config.wave.speed, WaveConfig::default().speed);
    }

    #[test]
    fn rejects_degenerate_grid() {
        let mut config = Config::default();
        config.grid.height = 1;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("at least 2x2"));
    }

    #[test]
    fn rejects_bad_damping_and_spacing() {
        let mut config = Config::default();
        config.wave.damping = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.grid.spacing = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unstable_wave_speed() {
        let mut config = Config::default();
        config.wave.speed = 100.0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("unstable"));
    }

    #[test]
    fn rejects_inverted_camera_planes() {
        let mut config = Config::default();
        config.camera.far = 0.05;
        assert!(config.validate().is_err());
    }

    #[test]
    fn present_mode_names() {
        let mut config = Config::default();
        assert_eq!(config.present_mode(), vk::PresentModeKHR::FIFO);

        config.graphics.present_mode = "Mailbox".to_string();
        assert_eq!(config.present_mode(), vk::PresentModeKHR::MAILBOX);

        config.graphics.present_mode = "vsync-please".to_string();
        assert_eq!(config.present_mode(), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(Config::parse("[grid\nwidth = 3").is_err());
    }

    fn temp_config_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("wavefield-{}-{}.toml", name, std::process::id()))
    }

    #[test]
    fn malformed_file_is_reported_not_replaced() {
        let path = temp_config_path("malformed");
        std::fs::write(&path, "[grid\nwidth = 3").unwrap();

        let result = Config::load(&path);
        std::fs::remove_file(&path).unwrap();

        let err = result.unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse config file"));
    }

    #[test]
    fn missing_file_gives_defaults() {
        let path = temp_config_path("missing");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.grid.width, GridConfig::default().width);
    }

    #[test]
    fn file_values_are_loaded() {
        let path = temp_config_path("valid");
        std::fs::write(&path, "[grid]\nwidth = 3\n").unwrap();

        let result = Config::load(&path);
        std::fs::remove_file(&path).unwrap();

        assert_eq!(result.unwrap().grid.width, 3);
    }

    #[test]
    fn rejects_oversized_grid() {
        let mut config = Config::default();
        config.grid.width = 70_000;
        config.grid.height = 70_000;
        config.grid.spacing = 50.0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("too large"));

        // Fits in u32 but exceeds the vertex cap
        config.grid.width = 8192;
        config.grid.height = 8192;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_degenerate_camera() {
        let mut config = Config::default();
        config.camera.target = config.camera.eye;
        assert!(config.validate().unwrap_err().to_string().contains("must differ"));

        let mut config = Config::default();
        config.camera.eye = [0.0, 10.0, 0.0];
        config.camera.target = [0.0, 0.0, 0.0];
        assert!(config.validate().unwrap_err().to_string().contains("straight up or down"));

        for fov in [0.0, 180.0, -30.0, f32::NAN] {
            let mut config = Config::default();
            config.camera.fov_degrees = fov;
            assert!(config.validate().is_err(), "fov {} accepted", fov);
        }
    }
}
