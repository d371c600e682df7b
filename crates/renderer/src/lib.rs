//! Frame loop and Vulkan backend.
//!
//! - [`frame_manager`]: the per-frame synchronization protocol and swapchain
//!   recreation, independent of Vulkan
//! - [`Renderer`]: the Vulkan objects those protocols drive

pub mod frame_manager;
mod renderer;

pub use frame_manager::{FrameManager, FrameOutcome, FramebufferSource};
pub use renderer::{CLEAR_COLOR, Renderer};

pub use triangle_rhi::sync::MAX_FRAMES_IN_FLIGHT;
