//! GPU buffer management.
//!
//! - [`BufferUsage`] picks usage flags and memory location.
//! - [`Buffer`] wraps a VkBuffer with gpu-allocator managed memory.
//! - [`upload_device_local`] fills a device-local buffer through a staging
//!   copy on the transfer queue.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use triangle_rhi::device::Device;
//! use triangle_rhi::buffer::{upload_device_local, BufferUsage};
//! use triangle_rhi::command::CommandPool;
//! use triangle_rhi::vertex::TRIANGLE_VERTICES;
//!
//! # fn example(device: Arc<Device>) -> Result<(), triangle_rhi::RhiError> {
//! let transfer_pool = CommandPool::new_transient(device.clone(), device.queue_families().transfer)?;
//! let vertex_buffer = upload_device_local(
//!     &device,
//!     &transfer_pool,
//!     BufferUsage::Vertex,
//!     bytemuck::cast_slice(&TRIANGLE_VERTICES),
//! )?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error, info};

use crate::command::{CommandBuffer, CommandPool};
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::physical_device::QueueFamilies;
use crate::sync::Fence;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    /// Device-local vertex data, filled by a transfer.
    Vertex,
    /// Host-visible transfer source.
    Staging,
}

impl BufferUsage {
    pub fn to_vk_usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferUsage::Vertex => {
                vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
        }
    }

    pub fn memory_location(self) -> MemoryLocation {
        match self {
            BufferUsage::Vertex => MemoryLocation::GpuOnly,
            BufferUsage::Staging => MemoryLocation::CpuToGpu,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Vertex => "vertex",
            BufferUsage::Staging => "staging",
        }
    }
}

/// Sharing mode for a buffer read by graphics and written by transfer.
///
/// CONCURRENT over both families when they differ, EXCLUSIVE otherwise.
pub fn transfer_sharing(families: &QueueFamilies) -> (vk::SharingMode, Vec<u32>) {
    if families.graphics != families.transfer {
        (
            vk::SharingMode::CONCURRENT,
            vec![families.graphics, families.transfer],
        )
    } else {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    }
}

/// GPU buffer with its memory allocation.
pub struct Buffer {
    device: Arc<Device>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
    usage: BufferUsage,
}

impl Buffer {
    /// Creates an unfilled buffer of `size` bytes.
    ///
    /// # Errors
    ///
    /// A zero size is [`RhiError::InvalidHandle`]. Allocation and binding
    /// failures propagate; nothing is leaked on the error path.
    pub fn new(device: Arc<Device>, usage: BufferUsage, size: vk::DeviceSize) -> RhiResult<Self> {
        if size == 0 {
            return Err(RhiError::InvalidHandle(
                "Buffer size must be greater than 0".to_string(),
            ));
        }

        let (sharing_mode, queue_family_indices) = match usage {
            BufferUsage::Vertex => transfer_sharing(device.queue_families()),
            BufferUsage::Staging => (vk::SharingMode::EXCLUSIVE, Vec::new()),
        };

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage.to_vk_usage())
            .sharing_mode(sharing_mode)
            .queue_family_indices(&queue_family_indices);

        let buffer = unsafe { device.handle().create_buffer(&buffer_info, None)? };
        let requirements = unsafe { device.handle().get_buffer_memory_requirements(buffer) };

        let allocation = device.allocator().and_then(|mut allocator| {
            allocator
                .allocate(&AllocationCreateDesc {
                    name: usage.name(),
                    requirements,
                    location: usage.memory_location(),
                    linear: true,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(RhiError::from)
        });

        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.handle().destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let (memory, memory_offset) = unsafe { (allocation.memory(), allocation.offset()) };

        // From here on Drop releases both the allocation and the buffer.
        let created = Self {
            device,
            buffer,
            allocation: Some(allocation),
            size,
            usage,
        };

        unsafe {
            created
                .device
                .handle()
                .bind_buffer_memory(buffer, memory, memory_offset)?;
        }

        debug!(
            "Created {} buffer: {} bytes ({:?})",
            usage.name(),
            size,
            sharing_mode
        );

        Ok(created)
    }

    /// Creates a host-visible buffer holding `data`.
    pub fn new_with_data(device: Arc<Device>, usage: BufferUsage, data: &[u8]) -> RhiResult<Self> {
        let buffer = Self::new(device, usage, data.len() as vk::DeviceSize)?;
        buffer.write_data(0, data)?;
        Ok(buffer)
    }

    /// Copies `data` into mapped memory at `offset`.
    ///
    /// # Errors
    ///
    /// Fails if the memory is not host-visible or the write runs past the end.
    pub fn write_data(&self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }

        let end = offset + data.len() as vk::DeviceSize;
        if end > self.size {
            return Err(RhiError::InvalidHandle(format!(
                "Write exceeds buffer size: offset {} + data {} > buffer {}",
                offset,
                data.len(),
                self.size
            )));
        }

        let allocation = self.allocation.as_ref().ok_or_else(|| {
            RhiError::InvalidHandle("Buffer allocation is not available".to_string())
        })?;

        let mapped_ptr = allocation
            .mapped_ptr()
            .ok_or_else(|| RhiError::InvalidHandle("Buffer memory is not mapped".to_string()))?;

        unsafe {
            let dst = mapped_ptr.as_ptr().add(offset as usize);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst as *mut u8, data.len());
        }

        Ok(())
    }

    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            match self.device.allocator() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        error!("Failed to free {} buffer allocation: {:?}", self.usage.name(), e);
                    }
                }
                Err(e) => error!("Allocator unavailable while freeing buffer: {e}"),
            }
        }

        unsafe {
            self.device.handle().destroy_buffer(self.buffer, None);
        }

        debug!("Destroyed {} buffer", self.usage.name());
    }
}

/// Creates a device-local buffer and fills it with `data`.
///
/// The bytes go through a staging buffer and a one-shot copy on the
/// transfer queue. This call blocks on a fence until the copy completes, so
/// the staging buffer can be released on return.
pub fn upload_device_local(
    device: &Arc<Device>,
    transfer_pool: &CommandPool,
    usage: BufferUsage,
    data: &[u8],
) -> RhiResult<Buffer> {
    let size = data.len() as vk::DeviceSize;
    let staging = Buffer::new_with_data(device.clone(), BufferUsage::Staging, data)?;
    let target = Buffer::new(device.clone(), usage, size)?;

    let cmd = CommandBuffer::new(device.clone(), transfer_pool)?;
    let copied = copy_and_wait(device, &cmd, &staging, &target, size);
    transfer_pool.free(&cmd);
    copied?;

    info!(
        "Uploaded {} bytes into device-local {} buffer",
        size,
        usage.name()
    );

    Ok(target)
}

fn copy_and_wait(
    device: &Arc<Device>,
    cmd: &CommandBuffer,
    src: &Buffer,
    dst: &Buffer,
    size: vk::DeviceSize,
) -> RhiResult<()> {
    cmd.begin()?;
    cmd.copy_buffer(
        src.handle(),
        dst.handle(),
        &[vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        }],
    );
    cmd.end()?;

    let fence = Fence::new(device.clone(), false)?;
    let command_buffers = [cmd.handle()];
    let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);

    unsafe {
        device
            .submit_transfer(&[submit_info], fence.handle())
            .map_err(RhiError::SubmissionError)?;
    }

    fence.wait(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_usage_to_vk_usage() {
        let vertex = BufferUsage::Vertex.to_vk_usage();
        assert!(vertex.contains(vk::BufferUsageFlags::VERTEX_BUFFER));
        assert!(vertex.contains(vk::BufferUsageFlags::TRANSFER_DST));
        assert_eq!(
            BufferUsage::Staging.to_vk_usage(),
            vk::BufferUsageFlags::TRANSFER_SRC
        );
    }

    #[test]
    fn test_buffer_usage_memory_location() {
        assert_eq!(
            BufferUsage::Vertex.memory_location(),
            MemoryLocation::GpuOnly
        );
        assert_eq!(
            BufferUsage::Staging.memory_location(),
            MemoryLocation::CpuToGpu
        );
    }

    #[test]
    fn test_transfer_sharing_exclusive_when_shared_family() {
        let families = QueueFamilies {
            graphics: 0,
            transfer: 0,
            present: 1,
        };
        let (mode, indices) = transfer_sharing(&families);
        assert_eq!(mode, vk::SharingMode::EXCLUSIVE);
        assert!(indices.is_empty());
    }

    #[test]
    fn test_transfer_sharing_concurrent_when_families_differ() {
        let families = QueueFamilies {
            graphics: 0,
            transfer: 2,
            present: 0,
        };
        let (mode, indices) = transfer_sharing(&families);
        assert_eq!(mode, vk::SharingMode::CONCURRENT);
        assert_eq!(indices, vec![0, 2]);
    }
}
