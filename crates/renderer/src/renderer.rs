//! Vulkan backend of the frame loop.
//!
//! [`Renderer`] owns every GPU object and implements [`FrameBackend`] on top
//! of them.
//!
//! # Resource ownership
//!
//! Objects tied to one swapchain generation live in [`SwapchainResources`]
//! and are rebuilt together. Everything else is created once.
//!
//! Fields drop in declaration order, which is the reverse of creation:
//! 1. Swapchain generation (framebuffers, image views, swapchain, render
//!    pass, pipeline, pipeline layout, frame sync)
//! 2. Vertex buffer and shader modules
//! 3. Command pools
//! 4. Logical device (after its last `Arc` holder)
//! 5. Surface
//! 6. Instance

use std::sync::Arc;

use ash::vk;
use tracing::{debug, error, info};

use triangle_core::AppConfig;
use triangle_platform::{Surface, Window};
use triangle_rhi::buffer::{Buffer, BufferUsage, upload_device_local};
use triangle_rhi::command::{CommandBuffer, CommandPool, full_scissor, full_viewport};
use triangle_rhi::device::Device;
use triangle_rhi::instance::Instance;
use triangle_rhi::physical_device::select_physical_device;
use triangle_rhi::pipeline::{Pipeline, PipelineLayout, create_triangle_pipeline};
use triangle_rhi::render_pass::{Framebuffer, RenderPass, create_framebuffers};
use triangle_rhi::shader::{Shader, ShaderStage};
use triangle_rhi::swapchain::Swapchain;
use triangle_rhi::sync::{FrameSync, MAX_FRAMES_IN_FLIGHT};
use triangle_rhi::vertex::TRIANGLE_VERTICES;
use triangle_rhi::{RhiError, RhiResult};

use crate::frame_manager::{AcquireOutcome, FrameBackend, PresentOutcome};

/// Opaque black.
pub const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

const SHADER_ENTRY_POINT: &str = "main";

/// Maps the result of `vkAcquireNextImageKHR`.
pub fn acquire_outcome(result: Result<(u32, bool), vk::Result>) -> RhiResult<AcquireOutcome> {
    match result {
        Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Ready {
            image_index,
            suboptimal,
        }),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
        Err(e) => Err(RhiError::SwapchainAcquireError(e)),
    }
}

/// Maps the result of `vkQueuePresentKHR`.
pub fn present_outcome(result: Result<bool, vk::Result>) -> RhiResult<PresentOutcome> {
    match result {
        Ok(false) => Ok(PresentOutcome::Presented),
        Ok(true) | Err(vk::Result::SUBOPTIMAL_KHR) => Ok(PresentOutcome::Suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
        Err(e) => Err(RhiError::PresentationError(e)),
    }
}

/// Objects that belong to one swapchain generation.
///
/// Field order is teardown order.
struct SwapchainResources {
    framebuffers: Vec<Framebuffer>,
    swapchain: Swapchain,
    render_pass: RenderPass,
    pipeline: Pipeline,
    pipeline_layout: PipelineLayout,
    frame_syncs: Vec<FrameSync>,
}

impl SwapchainResources {
    fn build(
        instance: &Instance,
        device: &Arc<Device>,
        surface: &Surface,
        shaders: (&Shader, &Shader),
        framebuffer_size: (u32, u32),
    ) -> RhiResult<Self> {
        let swapchain = Swapchain::new(instance, device.clone(), surface.handle(), framebuffer_size)?;
        let render_pass = RenderPass::new(device.clone(), swapchain.format())?;
        let (pipeline, pipeline_layout) =
            create_triangle_pipeline(device, &render_pass, shaders.0, shaders.1)?;
        let framebuffers = create_framebuffers(
            device,
            &render_pass,
            swapchain.image_views(),
            swapchain.extent(),
        )?;
        let frame_syncs = FrameSync::for_all_slots(device)?;

        Ok(Self {
            framebuffers,
            swapchain,
            render_pass,
            pipeline,
            pipeline_layout,
            frame_syncs,
        })
    }
}

/// Owns every Vulkan object of the application.
pub struct Renderer {
    /// `None` only between teardown and rebuild of a swapchain generation.
    resources: Option<SwapchainResources>,
    /// One per frame slot, re-recorded every frame.
    command_buffers: Vec<CommandBuffer>,
    vertex_buffer: Buffer,
    vertex_count: u32,
    vertex_shader: Shader,
    fragment_shader: Shader,
    graphics_pool: CommandPool,
    transfer_pool: CommandPool,
    device: Arc<Device>,
    surface: Surface,
    instance: Instance,
}

impl Renderer {
    /// Brings up the instance, device and first swapchain generation for
    /// `window`, loads the shaders and uploads the triangle.
    ///
    /// # Errors
    ///
    /// Every failure here is a setup error and fatal.
    pub fn new(window: &Window, config: &AppConfig) -> RhiResult<Self> {
        let framebuffer_size = window.framebuffer_size();
        info!(
            "Initializing Vulkan renderer ({}x{}, validation {})",
            framebuffer_size.0,
            framebuffer_size.1,
            if config.validation { "on" } else { "off" }
        );

        let surface_extensions = window
            .required_extensions()
            .map_err(|e| RhiError::SurfaceError(e.to_string()))?;
        let instance = Instance::new(config.validation, &surface_extensions)?;

        let surface = window
            .create_surface(instance.entry(), instance.handle())
            .map_err(|e| RhiError::SurfaceError(e.to_string()))?;

        let physical_device_info =
            select_physical_device(instance.handle(), surface.handle(), surface.loader())?;
        let device = Device::new(&instance, &physical_device_info)?;
        let families = *device.queue_families();

        let vertex_shader = Shader::from_spirv_file(
            device.clone(),
            &config.shaders.vertex,
            ShaderStage::Vertex,
            SHADER_ENTRY_POINT,
        )?;
        let fragment_shader = Shader::from_spirv_file(
            device.clone(),
            &config.shaders.fragment,
            ShaderStage::Fragment,
            SHADER_ENTRY_POINT,
        )?;

        let graphics_pool = CommandPool::new(device.clone(), families.graphics)?;
        let transfer_pool = CommandPool::new_transient(device.clone(), families.transfer)?;

        let vertex_buffer = upload_device_local(
            &device,
            &transfer_pool,
            BufferUsage::Vertex,
            bytemuck::cast_slice(&TRIANGLE_VERTICES),
        )?;

        let resources = SwapchainResources::build(
            &instance,
            &device,
            &surface,
            (&vertex_shader, &fragment_shader),
            framebuffer_size,
        )?;

        let command_buffers =
            CommandBuffer::allocate(&device, &graphics_pool, MAX_FRAMES_IN_FLIGHT as u32)?;

        info!(
            "Renderer initialized on {}: {} swapchain images, {} frames in flight",
            physical_device_info.device_name(),
            resources.swapchain.image_count(),
            MAX_FRAMES_IN_FLIGHT
        );

        Ok(Self {
            resources: Some(resources),
            command_buffers,
            vertex_buffer,
            vertex_count: TRIANGLE_VERTICES.len() as u32,
            vertex_shader,
            fragment_shader,
            graphics_pool,
            transfer_pool,
            device,
            surface,
            instance,
        })
    }

    fn resources(&self) -> RhiResult<&SwapchainResources> {
        self.resources
            .as_ref()
            .ok_or_else(|| RhiError::InvalidHandle("swapchain resources not built".to_string()))
    }

    fn frame_sync(&self, slot: usize) -> RhiResult<&FrameSync> {
        self.resources()?
            .frame_syncs
            .get(slot)
            .ok_or_else(|| RhiError::InvalidHandle(format!("no frame slot {slot}")))
    }

    fn command_buffer(&self, slot: usize) -> RhiResult<&CommandBuffer> {
        self.command_buffers
            .get(slot)
            .ok_or_else(|| RhiError::InvalidHandle(format!("no command buffer for slot {slot}")))
    }

    /// Current swapchain extent, if a generation is built.
    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.resources.as_ref().map(|r| r.swapchain.extent())
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl FrameBackend for Renderer {
    fn wait_for_slot(&mut self, slot: usize) -> RhiResult<()> {
        self.frame_sync(slot)?.in_flight().wait(u64::MAX)
    }

    fn acquire_image(&mut self, slot: usize) -> RhiResult<AcquireOutcome> {
        let resources = self.resources()?;
        let semaphore = self.frame_sync(slot)?.image_available().handle();
        acquire_outcome(resources.swapchain.acquire_next_image(semaphore))
    }

    fn reset_slot(&mut self, slot: usize) -> RhiResult<()> {
        self.frame_sync(slot)?.in_flight().reset()
    }

    fn record(&mut self, slot: usize, image_index: u32) -> RhiResult<()> {
        let resources = self.resources()?;
        let cmd = self.command_buffer(slot)?;
        let framebuffer = resources
            .framebuffers
            .get(image_index as usize)
            .ok_or_else(|| {
                RhiError::InvalidHandle(format!("no framebuffer for image {image_index}"))
            })?;
        let extent = resources.swapchain.extent();

        cmd.reset()?;
        cmd.begin()?;

        cmd.begin_render_pass(
            resources.render_pass.handle(),
            framebuffer.handle(),
            extent,
            CLEAR_COLOR,
        );
        cmd.bind_pipeline(resources.pipeline.bind_point(), resources.pipeline.handle());
        cmd.bind_vertex_buffers(0, &[self.vertex_buffer.handle()], &[0]);
        cmd.set_viewport(&full_viewport(extent));
        cmd.set_scissor(&full_scissor(extent));
        cmd.draw(self.vertex_count, 1, 0, 0);
        cmd.end_render_pass();

        cmd.end()
    }

    fn submit(&mut self, slot: usize) -> RhiResult<()> {
        let sync = self.frame_sync(slot)?;
        let cmd = self.command_buffer(slot)?;

        let wait_semaphores = [sync.image_available().handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [sync.render_finished().handle()];
        let command_buffers = [cmd.handle()];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        // SAFETY: the command buffer was recorded in `record` and the fence
        // was reset in `reset_slot` for this iteration.
        unsafe {
            self.device
                .submit_graphics(&[submit_info], sync.in_flight().handle())
                .map_err(|e| {
                    error!("Graphics queue submission failed: {e}");
                    RhiError::SubmissionError(e)
                })
        }
    }

    fn present(&mut self, slot: usize, image_index: u32) -> RhiResult<PresentOutcome> {
        let resources = self.resources()?;
        let wait_semaphore = self.frame_sync(slot)?.render_finished().handle();
        present_outcome(resources.swapchain.present(
            self.device.present_queue(),
            image_index,
            wait_semaphore,
        ))
    }

    fn wait_idle(&mut self) -> RhiResult<()> {
        self.device.wait_idle()
    }

    fn destroy_swapchain_resources(&mut self) {
        if self.resources.take().is_some() {
            debug!("Swapchain generation destroyed");
        }
    }

    fn build_swapchain_resources(&mut self, framebuffer_size: (u32, u32)) -> RhiResult<()> {
        let resources = SwapchainResources::build(
            &self.instance,
            &self.device,
            &self.surface,
            (&self.vertex_shader, &self.fragment_shader),
            framebuffer_size,
        )?;
        debug!(
            "Swapchain generation built: {} images, {:?}",
            resources.swapchain.image_count(),
            resources.swapchain.extent()
        );
        self.resources = Some(resources);
        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            error!("Failed to wait for device idle during renderer drop: {e}");
        }

        self.resources = None;
        debug!(
            "Releasing command pools (graphics family {}, transfer family {})",
            self.graphics_pool.queue_family_index(),
            self.transfer_pool.queue_family_index()
        );
        // Remaining fields drop in declaration order.
        info!("Renderer destroyed");
    }
}
