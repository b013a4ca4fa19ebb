//! Core utilities shared by every strand crate.
//!
//! This crate provides:
//! - The workspace error type and result alias
//! - Logging initialization
//! - Frame timing
//! - Renderer configuration loaded from TOML

mod config;
mod error;
mod logging;
mod timer;

pub use config::{PresentModePreference, RendererConfig, SuboptimalPolicy, WindowConfig};
pub use error::{Error, Result};
pub use logging::init_logging;
pub use timer::{FpsCounter, Timer};
