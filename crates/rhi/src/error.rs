//! RHI-specific error types.

use std::path::PathBuf;

use ash::vk;
use thiserror::Error;

/// RHI-specific error type.
///
/// Setup failures (instance, device, swapchain, render pass, pipeline,
/// shader loading) are raised once during initialization or recreation.
/// The acquire/submit/present variants are raised from the frame loop and
/// only for results that the swapchain recreation path cannot absorb.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] vk::Result),

    /// Failed to load Vulkan
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// No physical device passed the eligibility checks
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// Required extensions are not supported
    #[error("Missing required extensions: {}", .0.join(", "))]
    MissingExtensions(Vec<String>),

    /// Requested layers are not available
    #[error("Missing required layers: {}", .0.join(", "))]
    MissingLayers(Vec<String>),

    /// Surface creation or query error
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// The platform rejected the swapchain configuration
    #[error("Failed to create swapchain: {0}")]
    SwapchainCreationError(String),

    /// Render pass or framebuffer creation failed
    #[error("Failed to create render pass: {0}")]
    RenderPassCreationError(vk::Result),

    /// Pipeline or pipeline layout creation failed
    #[error("Failed to create pipeline: {0}")]
    PipelineCreationError(String),

    /// A shader binary could not be read from disk
    #[error("Failed to load shader {}: {source}", path.display())]
    ShaderLoadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed SPIR-V or shader module creation failure
    #[error("Shader error: {0}")]
    ShaderError(String),

    /// Unexpected result from image acquisition
    #[error("Failed to acquire swapchain image: {0}")]
    SwapchainAcquireError(vk::Result),

    /// Queue submission failed
    #[error("Failed to submit draw command buffer: {0}")]
    SubmissionError(vk::Result),

    /// Unexpected result from presentation
    #[error("Failed to present swapchain image: {0}")]
    PresentationError(vk::Result),

    /// An object was used outside its lifetime
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_extensions_message_lists_names() {
        let err = RhiError::MissingExtensions(vec![
            "VK_KHR_swapchain".to_string(),
            "VK_EXT_debug_utils".to_string(),
        ]);
        assert_eq!(
            err.to_string(),
            "Missing required extensions: VK_KHR_swapchain, VK_EXT_debug_utils"
        );
    }

    #[test]
    fn test_shader_load_error_mentions_path() {
        let err = RhiError::ShaderLoadError {
            path: PathBuf::from("shaders/vert.spv"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        let message = err.to_string();
        assert!(message.contains("shaders/vert.spv"));
        assert!(message.contains("not found"));
    }

    #[test]
    fn test_vk_result_converts() {
        let err: RhiError = vk::Result::ERROR_DEVICE_LOST.into();
        assert!(matches!(err, RhiError::VulkanError(vk::Result::ERROR_DEVICE_LOST)));
    }
}
