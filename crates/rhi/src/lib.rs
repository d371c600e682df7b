//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! A thin, safe layer over `ash`. Every GPU object is an RAII wrapper that
//! holds an `Arc<Device>` and destroys its handle on drop. It covers:
//! - Instance creation and validation layers
//! - Physical device selection and queue families
//! - Logical device, queues and memory allocation
//! - Swapchain, render pass and framebuffers
//! - Pipeline and shader modules
//! - Command pools and buffers
//! - Synchronization primitives

mod error;

pub mod buffer;
pub mod command;
pub mod device;
pub mod instance;
pub mod physical_device;
pub mod pipeline;
pub mod render_pass;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod vertex;

pub use error::{RhiError, RhiResult};

// Re-export ash types that users might need
pub use ash::vk;
