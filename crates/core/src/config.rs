//! Renderer configuration.
//!
//! Configuration is read from a TOML file. Every field has a default, so an
//! empty file (or no file at all) yields a working setup:
//!
//! ```toml
//! frames_in_flight = 2
//! retained_capacity = 64
//! retained_growth = false
//! suboptimal = "tolerate"
//! present_mode = "mailbox"
//! validation = true
//! clear_color = [0.02, 0.02, 0.04, 1.0]
//!
//! [window]
//! width = 1280
//! height = 720
//! title = "strand"
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{Error, Result};

/// What to do when acquire or present reports a suboptimal surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuboptimalPolicy {
    /// Keep rendering with the current swapchain until it goes out of date.
    #[default]
    Tolerate,
    /// Rebuild the swapchain right after the frame is presented.
    Rebuild,
}

/// Preferred presentation mode. FIFO is used when the preference is unsupported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresentModePreference {
    /// Vsync, always available.
    Fifo,
    /// Triple-buffered low latency.
    #[default]
    Mailbox,
    /// No vsync, may tear.
    Immediate,
}

/// Window parameters used by the binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            title: "strand".to_string(),
        }
    }
}

/// Tunables for the frame loop and resource tracking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Number of frame ring slots, i.e. how far the CPU may run ahead of the GPU.
    pub frames_in_flight: usize,
    /// Initial number of resources a command buffer can retain per recording.
    pub retained_capacity: usize,
    /// Grow the retained list instead of failing once it is full.
    pub retained_growth: bool,
    pub suboptimal: SuboptimalPolicy,
    pub present_mode: PresentModePreference,
    /// Enable the Khronos validation layer when it is installed.
    pub validation: bool,
    pub clear_color: [f32; 4],
    pub window: WindowConfig,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            retained_capacity: 64,
            retained_growth: false,
            suboptimal: SuboptimalPolicy::default(),
            present_mode: PresentModePreference::default(),
            validation: cfg!(debug_assertions),
            clear_color: [0.02, 0.02, 0.04, 1.0],
            window: WindowConfig::default(),
        }
    }
}

impl RendererConfig {
    /// Parse a configuration from TOML text and validate it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigParse`] for malformed TOML and
    /// [`Error::Config`] for out-of-range values.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or fails validation.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        debug!("Loaded renderer config from {:?}", path);
        Ok(config)
    }

    /// Load `path` if it exists, otherwise return the defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            debug!("No config at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Check that the values can drive a frame loop.
    pub fn validate(&self) -> Result<()> {
        if self.frames_in_flight == 0 {
            return Err(Error::Config("frames_in_flight must be at least 1".into()));
        }
        if self.frames_in_flight == 1 {
            warn!("frames_in_flight = 1: the CPU will wait for the GPU every frame");
        }
        if self.retained_capacity == 0 {
            return Err(Error::Config("retained_capacity must be at least 1".into()));
        }
        Ok(())
    }

    /// Serialize back to TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_is_default() {
        let config = RendererConfig::from_toml_str("").unwrap();
        assert_eq!(config, RendererConfig::default());
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.suboptimal, SuboptimalPolicy::Tolerate);
    }

    #[test]
    fn test_partial_config() {
        let config = RendererConfig::from_toml_str(
            r#"
            frames_in_flight = 3
            suboptimal = "rebuild"
            present_mode = "fifo"

            [window]
            width = 640
            "#,
        )
        .unwrap();
        assert_eq!(config.frames_in_flight, 3);
        assert_eq!(config.suboptimal, SuboptimalPolicy::Rebuild);
        assert_eq!(config.present_mode, PresentModePreference::Fifo);
        assert_eq!(config.window.width, 640);
        assert_eq!(config.window.height, 720);
        assert_eq!(config.retained_capacity, 64);
    }

    #[test]
    fn test_zero_frames_rejected() {
        let err = RendererConfig::from_toml_str("frames_in_flight = 0").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = RendererConfig::from_toml_str("retained_capacity = 0").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_unknown_policy_is_parse_error() {
        let err = RendererConfig::from_toml_str("suboptimal = \"sometimes\"").unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = RendererConfig::default();
        config.retained_growth = true;
        let text = config.to_toml_string().unwrap();
        assert_eq!(RendererConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = RendererConfig::load_or_default("does/not/exist/strand.toml").unwrap();
        assert_eq!(config, RendererConfig::default());
    }
}
