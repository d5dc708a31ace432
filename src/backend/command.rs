// Command recording
//
// One pool per recorder, one primary buffer per pool. The pool is created
// with RESET_COMMAND_BUFFER so a single buffer can be reset cheaply before
// every re-record.

use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;
use crate::error::{EngineError, EngineResult};

pub struct CommandRecorder {
    device: Arc<VulkanDevice>,
    pool: vk::CommandPool,
    buffer: vk::CommandBuffer,
}

impl CommandRecorder {
    pub fn new(device: Arc<VulkanDevice>) -> EngineResult<Self> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(device.graphics_queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .map_err(EngineError::PoolCreation)?;

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffer = match unsafe { device.device.allocate_command_buffers(&alloc_info) } {
            Ok(buffers) => buffers[0],
            Err(e) => {
                unsafe { device.device.destroy_command_pool(pool, None) };
                return Err(EngineError::Allocation(e));
            }
        };

        Ok(Self {
            device,
            pool,
            buffer,
        })
    }

    #[inline]
    pub fn buffer(&self) -> vk::CommandBuffer {
        self.buffer
    }

    /// Reset the buffer for re-recording. The caller must have waited on the
    /// fence of the last submission that used it.
    pub fn reset(&mut self) -> EngineResult<()> {
        unsafe {
            self.device
                .device
                .reset_command_buffer(self.buffer, vk::CommandBufferResetFlags::empty())
        }
        .map_err(EngineError::Recording)
    }

    /// Reset the whole pool, releasing everything recorded into it.
    pub fn reset_pool(&mut self) -> EngineResult<()> {
        unsafe {
            self.device
                .device
                .reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty())
        }
        .map_err(EngineError::Recording)
    }

    pub fn begin(&mut self, flags: vk::CommandBufferUsageFlags) -> EngineResult<vk::CommandBuffer> {
        let info = vk::CommandBufferBeginInfo::default().flags(flags);
        unsafe { self.device.device.begin_command_buffer(self.buffer, &info) }
            .map_err(EngineError::Recording)?;
        Ok(self.buffer)
    }

    pub fn end(&mut self) -> EngineResult<()> {
        unsafe { self.device.device.end_command_buffer(self.buffer) }
            .map_err(EngineError::Recording)
    }
}

impl Drop for CommandRecorder {
    fn drop(&mut self) {
        // Destroying the pool frees the buffer allocated from it
        unsafe { self.device.device.destroy_command_pool(self.pool, None) };
    }
}
