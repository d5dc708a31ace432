// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// This module handles loading and parsing configuration from config.toml.
// Every field has a default, so a missing or partial file is fine.
//
// The number of frames in flight is NOT here: it is the compile-time
// constant `frame::FRAME_COUNT`.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
    pub shaders: ShaderConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Kindle".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    /// Preferred present mode; FIFO is used when the surface lacks it
    pub present_mode: String,
    pub clear_color: [f32; 4],
    /// Upper bound on any fence wait. Exceeding it is treated as a hang.
    pub fence_timeout_ms: u64,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "mailbox".to_string(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            fence_timeout_ms: 10_000,
        }
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
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_to_file: false,
            log_file: "kindle.log".to_string(),
            show_fps: true,
        }
    }
}

/// Precompiled SPIR-V locations
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            vertex: PathBuf::from("shaders/basic.vert.spv"),
            fragment: PathBuf::from("shaders/basic.frag.spv"),
        }
    }
}

/// Where the active configuration came from.
///
/// Loading happens before the logger exists, so the outcome is returned
/// and reported later with `log`.
#[derive(Debug)]
pub enum ConfigSource {
    File(PathBuf),
    /// No file at this path; all defaults
    Missing(PathBuf),
    /// The file could not be read or parsed; all defaults
    Invalid(anyhow::Error),
}

impl ConfigSource {
    pub fn log(&self) {
        match self {
            Self::File(path) => log::info!("Loaded configuration from {:?}", path),
            Self::Missing(path) => {
                log::info!("Config file not found at {:?}, using defaults", path)
            }
            Self::Invalid(e) => log::warn!("Failed to load config: {:#}. Using defaults.", e),
        }
    }
}

impl Config {
    /// Load `config.toml` from the working directory, falling back to
    /// defaults if it is missing or malformed
    pub fn load() -> (Self, ConfigSource) {
        Self::load_from_path("config.toml")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> (Self, ConfigSource) {
        let path = path.as_ref();

        if !path.exists() {
            return (Config::default(), ConfigSource::Missing(path.to_path_buf()));
        }

        match Self::read(path) {
            Ok(config) => (config, ConfigSource::File(path.to_path_buf())),
            Err(e) => (Config::default(), ConfigSource::Invalid(e)),
        }
    }

    fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::parse(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Get present mode as Vulkan enum
    pub fn get_present_mode(&self) -> vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => vk::PresentModeKHR::MAILBOX,
            "fifo" => vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to FIFO",
                    self.graphics.present_mode
                );
                vk::PresentModeKHR::FIFO
            }
        }
    }

    pub fn fence_timeout(&self) -> Duration {
        Duration::from_millis(self.graphics.fence_timeout_ms)
    }

    /// Fence timeout in the unit Vulkan expects.
    pub fn fence_timeout_ns(&self) -> u64 {
        u64::try_from(self.fence_timeout().as_nanos()).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.graphics.present_mode, "mailbox");
        assert_eq!(config.graphics.fence_timeout_ms, 10_000);
        assert_eq!(
            config.shaders.vertex,
            PathBuf::from("shaders/basic.vert.spv")
        );
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::parse(
            r#"
            [window]
            title = "Test"

            [graphics]
            present_mode = "fifo"
            "#,
        )
        .unwrap();

        assert_eq!(config.window.title, "Test");
        assert_eq!(config.window.height, 720);
        assert_eq!(config.get_present_mode(), vk::PresentModeKHR::FIFO);
        assert_eq!(config.graphics.clear_color, [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn present_mode_names_are_case_insensitive() {
        let mut config = Config::default();
        for (name, mode) in [
            ("Immediate", vk::PresentModeKHR::IMMEDIATE),
            ("MAILBOX", vk::PresentModeKHR::MAILBOX),
            ("fifo_relaxed", vk::PresentModeKHR::FIFO_RELAXED),
            ("vsync-please", vk::PresentModeKHR::FIFO),
        ] {
            config.graphics.present_mode = name.to_string();
            assert_eq!(config.get_present_mode(), mode, "{name}");
        }
    }

    #[test]
    fn fence_timeout_converts_to_nanoseconds() {
        let mut config = Config::default();
        config.graphics.fence_timeout_ms = 250;
        assert_eq!(config.fence_timeout_ns(), 250_000_000);
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(Config::parse("[window\nwidth = ").is_err());
        assert!(Config::parse("[window]\nwidth = \"wide\"").is_err());
    }

    #[test]
    fn missing_file_means_defaults() {
        let (config, source) = Config::load_from_path("does/not/exist.toml");
        assert_eq!(config.window.title, "Kindle");
        assert!(matches!(source, ConfigSource::Missing(_)));
    }

    fn write_temp(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("kindle-{}-{name}", std::process::id()));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn malformed_file_falls_back_and_keeps_the_error() {
        let path = write_temp("malformed.toml", "[graphics]\nfence_timeout_ms = \"soon\"");
        let (config, source) = Config::load_from_path(&path);
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.graphics.fence_timeout_ms, 10_000);
        match source {
            ConfigSource::Invalid(e) => {
                assert!(format!("{e:#}").contains("Failed to parse config file"))
            }
            other => panic!("expected an invalid source, got {other:?}"),
        }
    }

    #[test]
    fn valid_file_is_reported_by_path() {
        let path = write_temp("valid.toml", "[window]\nwidth = 640");
        let (config, source) = Config::load_from_path(&path);
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.window.width, 640);
        assert!(matches!(source, ConfigSource::File(p) if p == path));
    }
}
