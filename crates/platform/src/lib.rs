//! Platform layer.
//!
//! - Window creation via winit
//! - Vulkan surface creation and the instance extensions it needs

mod window;

pub use window::{Surface, Window, window_attributes};
