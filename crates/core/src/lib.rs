//! Core utilities shared across the triangle crates.
//!
//! - Error types and result aliases
//! - Logging initialization
//! - Application configuration
//! - Frame timing

mod config;
mod error;
mod logging;
mod timer;

pub use config::{AppConfig, ShaderPaths, WindowConfig};
pub use error::{Error, Result};
pub use logging::{default_directive, init_logging};
pub use timer::{FpsCounter, FrameStats, Timer};
