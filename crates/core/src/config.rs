//! Application configuration.
//!
//! Defaults describe the stock demo: an 800x600 resizable window titled
//! "Vulkan Test", shaders under `shaders/`, validation in debug builds.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const DEFAULT_WIDTH: u32 = 800;
pub const DEFAULT_HEIGHT: u32 = 600;
pub const DEFAULT_TITLE: &str = "Vulkan Test";

const LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            title: DEFAULT_TITLE.to_string(),
        }
    }
}

/// Locations of the compiled SPIR-V binaries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderPaths {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

impl ShaderPaths {
    /// `vert.spv` and `frag.spv` inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            vertex: dir.join("vert.spv"),
            fragment: dir.join("frag.spv"),
        }
    }
}

impl Default for ShaderPaths {
    fn default() -> Self {
        Self::in_dir("shaders")
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppConfig {
    pub window: WindowConfig,
    pub shaders: ShaderPaths,
    /// Enables the Khronos validation layer and the debug messenger.
    pub validation: bool,
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            window: WindowConfig::default(),
            shaders: ShaderPaths::default(),
            validation: cfg!(debug_assertions),
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Rejects values no window or swapchain can be built from.
    pub fn validate(&self) -> Result<()> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(Error::Config(format!(
                "window size must be nonzero, got {}x{}",
                self.window.width, self.window.height
            )));
        }

        if self.window.title.trim().is_empty() {
            return Err(Error::Config("window title must not be empty".to_string()));
        }

        if !LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            return Err(Error::Config(format!(
                "unknown log level '{}', expected one of {}",
                self.log_level,
                LOG_LEVELS.join(", ")
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.window.title, "Vulkan Test");
        assert_eq!(config.shaders.vertex, Path::new("shaders/vert.spv"));
        assert_eq!(config.shaders.fragment, Path::new("shaders/frag.spv"));
        assert_eq!(config.validation, cfg!(debug_assertions));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_shader_paths_in_dir() {
        let paths = ShaderPaths::in_dir("/opt/triangle/spv");
        assert_eq!(paths.vertex, Path::new("/opt/triangle/spv/vert.spv"));
        assert_eq!(paths.fragment, Path::new("/opt/triangle/spv/frag.spv"));
    }

    #[test]
    fn test_validate_rejects_zero_size() {
        let mut config = AppConfig::default();
        config.window.height = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_blank_title() {
        let mut config = AppConfig::default();
        config.window.title = "   ".to_string();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = AppConfig::default();
        config.log_level = "DEBUG".to_string();
        assert!(config.validate().is_ok());

        config.log_level = "chatty".to_string();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
