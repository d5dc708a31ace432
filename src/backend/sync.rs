// Synchronization primitives
//
// Fences for GPU -> CPU completion, semaphores for GPU -> GPU ordering.
// A frame slot bundles one of each semaphore, a fence and a command recorder.

use ash::vk;
use std::sync::Arc;

use super::command::CommandRecorder;
use super::VulkanDevice;
use crate::error::{EngineError, EngineResult};

/// Host-waitable completion flag signaled by a queue submission.
pub struct Fence {
    device: Arc<VulkanDevice>,
    fence: vk::Fence,
}

impl Fence {
    /// Create a fence. Pass `signaled = true` for fences that are waited on
    /// before their first submission, otherwise that first wait never returns.
    pub fn new(device: Arc<VulkanDevice>, signaled: bool) -> EngineResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let info = vk::FenceCreateInfo::default().flags(flags);

        let fence = unsafe { device.device.create_fence(&info, None) }
            .map_err(EngineError::creation("fence"))?;

        Ok(Self { device, fence })
    }

    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Block until the fence is signaled. Running past `timeout_ns` is a
    /// device hang and surfaces as `FenceTimeout`, never as a retry.
    pub fn wait(&self, timeout_ns: u64) -> EngineResult<()> {
        match unsafe {
            self.device
                .device
                .wait_for_fences(&[self.fence], true, timeout_ns)
        } {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(EngineError::FenceTimeout { timeout_ns }),
            Err(e) => Err(EngineError::Submission(e)),
        }
    }

    /// Return the fence to the unsignaled state. The fence must not be
    /// referenced by any pending submission.
    pub fn reset(&self) -> EngineResult<()> {
        unsafe { self.device.device.reset_fences(&[self.fence]) }
            .map_err(EngineError::Submission)
    }

    /// Non-blocking status query.
    pub fn is_signaled(&self) -> bool {
        matches!(
            unsafe { self.device.device.get_fence_status(self.fence) },
            Ok(true)
        )
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_fence(self.fence, None) };
    }
}

/// Device-side wait/signal handle. Not visible to the host.
pub struct Semaphore {
    device: Arc<VulkanDevice>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    pub fn new(device: Arc<VulkanDevice>) -> EngineResult<Self> {
        let info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { device.device.create_semaphore(&info, None) }
            .map_err(EngineError::creation("semaphore"))?;

        Ok(Self { device, semaphore })
    }

    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_semaphore(self.semaphore, None) };
    }
}

/// Per-frame recording and synchronization objects.
///
/// Created once at renderer init and never reallocated. Swapchain rebuilds
/// leave slots untouched.
pub struct FrameSlot {
    pub commands: CommandRecorder,
    /// Signaled by acquire, waited on by submit
    pub image_available: Semaphore,
    /// Signaled by submit, waited on by present
    pub render_finished: Semaphore,
    /// Signaled when this slot's last submission retires
    pub in_flight: Fence,
}

impl FrameSlot {
    pub fn new(device: &Arc<VulkanDevice>) -> EngineResult<Self> {
        Ok(Self {
            commands: CommandRecorder::new(device.clone())?,
            image_available: Semaphore::new(device.clone())?,
            render_finished: Semaphore::new(device.clone())?,
            // Start signaled so the first wait on a fresh slot returns immediately
            in_flight: Fence::new(device.clone(), true)?,
        })
    }
}
