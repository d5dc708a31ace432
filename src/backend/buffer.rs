// GPU buffers for vertex, index, uniform and staging data
//
// Memory comes from gpu-allocator instead of hand-picked memory types.
// The kind decides both usage flags and where the memory lives.

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use super::VulkanDevice;
use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// Device-local, filled by a transfer from a staging buffer
    Vertex,
    /// Device-local, filled by a transfer from a staging buffer
    Index,
    /// Host-visible, rewritten every frame
    Uniform,
    /// Host-visible transfer source
    Staging,
}

impl BufferKind {
    pub fn usage(self) -> vk::BufferUsageFlags {
        match self {
            Self::Vertex => {
                vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            Self::Index => vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            Self::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            Self::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
        }
    }

    pub fn location(self) -> MemoryLocation {
        match self {
            Self::Vertex | Self::Index => MemoryLocation::GpuOnly,
            Self::Uniform | Self::Staging => MemoryLocation::CpuToGpu,
        }
    }

    #[inline]
    pub fn is_host_visible(self) -> bool {
        self.location() != MemoryLocation::GpuOnly
    }
}

pub struct GpuBuffer {
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
    kind: BufferKind,
    device: Arc<VulkanDevice>,
}

impl GpuBuffer {
    pub fn new(
        device: Arc<VulkanDevice>,
        kind: BufferKind,
        size: vk::DeviceSize,
        name: &str,
    ) -> EngineResult<Self> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(kind.usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
            .map_err(EngineError::creation("buffer"))?;

        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

        let allocation = device.allocator().allocate(&AllocationCreateDesc {
            name,
            requirements,
            location: kind.location(),
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_buffer(buffer, None) };
                return Err(e.into());
            }
        };

        let bound = unsafe {
            device
                .device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };
        if let Err(e) = bound {
            if let Err(free_error) = device.allocator().free(allocation) {
                log::warn!("Failed to free buffer allocation: {}", free_error);
            }
            unsafe { device.device.destroy_buffer(buffer, None) };
            return Err(EngineError::creation("buffer memory binding")(e));
        }

        log::debug!("Created {:?} buffer '{}' ({} bytes)", kind, name, size);

        Ok(Self {
            buffer,
            allocation: Some(allocation),
            size,
            kind,
            device,
        })
    }

    /// Create a buffer sized for `data` and fill it. Host-visible kinds only.
    pub fn with_data<T: bytemuck::Pod>(
        device: Arc<VulkanDevice>,
        kind: BufferKind,
        data: &[T],
        name: &str,
    ) -> EngineResult<Self> {
        let size = std::mem::size_of_val(data) as vk::DeviceSize;
        let mut buffer = Self::new(device, kind, size, name)?;
        buffer.write(data)?;
        Ok(buffer)
    }

    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Copy `data` into the start of the buffer through its persistent mapping.
    pub fn write<T: bytemuck::Pod>(&mut self, data: &[T]) -> EngineResult<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);

        if !self.kind.is_host_visible() {
            return Err(EngineError::BufferWrite("memory not host visible"));
        }
        if bytes.len() as vk::DeviceSize > self.size {
            return Err(EngineError::BufferWrite("data larger than buffer"));
        }

        let mapped = self
            .allocation
            .as_mut()
            .and_then(|allocation| allocation.mapped_slice_mut())
            .ok_or(EngineError::BufferWrite("memory not mapped"))?;

        mapped[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.device.allocator().free(allocation) {
                log::warn!("Failed to free buffer allocation: {}", e);
            }
        }
        unsafe { self.device.device.destroy_buffer(self.buffer, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_buffers_are_device_local_transfer_targets() {
        for kind in [BufferKind::Vertex, BufferKind::Index] {
            assert_eq!(kind.location(), MemoryLocation::GpuOnly);
            assert!(kind.usage().contains(vk::BufferUsageFlags::TRANSFER_DST));
            assert!(!kind.is_host_visible());
        }
        assert!(BufferKind::Vertex
            .usage()
            .contains(vk::BufferUsageFlags::VERTEX_BUFFER));
        assert!(BufferKind::Index
            .usage()
            .contains(vk::BufferUsageFlags::INDEX_BUFFER));
    }

    #[test]
    fn uniform_and_staging_are_host_visible() {
        assert!(BufferKind::Uniform.is_host_visible());
        assert!(BufferKind::Staging.is_host_visible());
        assert_eq!(
            BufferKind::Uniform.usage(),
            vk::BufferUsageFlags::UNIFORM_BUFFER
        );
        assert_eq!(
            BufferKind::Staging.usage(),
            vk::BufferUsageFlags::TRANSFER_SRC
        );
    }
}
