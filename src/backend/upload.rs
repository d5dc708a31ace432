// Upload context - blocking one-shot GPU work
//
// A dedicated command recorder + fence pair outside the frame slots. Used for
// copies that must be complete before the render loop touches the data
// (mesh upload at startup). Only one upload is ever in flight, and nothing
// else is submitted while it is.
//
// SEQUENCE (submit_blocking):
// ┌──────────────────────────────────────────────────────────────────────┐
// │ begin          ONE_TIME_SUBMIT                                       │
// │ record         caller's copy commands                                │
// │ end                                                                  │
// │ submit         signals the upload fence                              │
// │ wait           bounded; running past the bound is FenceTimeout       │
// │ reset_fence    back to unsignaled for the next upload                │
// │ reset_pool     releases the recorded commands                        │
// └──────────────────────────────────────────────────────────────────────┘

use ash::vk;
use std::sync::Arc;

use super::command::CommandRecorder;
use super::sync::Fence;
use super::VulkanDevice;
use crate::error::{EngineError, EngineResult};

/// Device-side steps of one blocking submission.
///
/// `submit_blocking` decides the order; implementations only do the work.
pub trait UploadQueue {
    /// Begin the one-shot command buffer.
    fn begin(&mut self) -> EngineResult<vk::CommandBuffer>;

    fn end(&mut self) -> EngineResult<()>;

    /// Submit the recorded buffer, signaling the upload fence.
    fn submit(&mut self) -> EngineResult<()>;

    /// Block on the upload fence for at most the configured timeout.
    fn wait(&mut self) -> EngineResult<()>;

    fn reset_fence(&mut self) -> EngineResult<()>;

    fn reset_pool(&mut self) -> EngineResult<()>;
}

/// Record with `record`, submit, and block until the work has retired.
///
/// Any error stops the sequence where it happened. In particular a timed
/// out wait never resets the fence, since the submission may still be
/// pending.
pub fn submit_blocking<Q, F>(queue: &mut Q, record: F) -> EngineResult<()>
where
    Q: UploadQueue + ?Sized,
    F: FnOnce(vk::CommandBuffer),
{
    let cmd = queue.begin()?;
    record(cmd);
    queue.end()?;

    queue.submit()?;
    queue.wait()?;

    queue.reset_fence()?;
    queue.reset_pool()
}

pub struct UploadContext {
    commands: CommandRecorder,
    fence: Fence,
    timeout_ns: u64,
    device: Arc<VulkanDevice>,
}

impl UploadContext {
    pub fn new(device: Arc<VulkanDevice>, timeout_ns: u64) -> EngineResult<Self> {
        Ok(Self {
            commands: CommandRecorder::new(device.clone())?,
            // Unsignaled: the first wait happens after the first submit
            fence: Fence::new(device.clone(), false)?,
            timeout_ns,
            device,
        })
    }

    /// Record `record` into the one-shot buffer, submit it and block until
    /// the device has finished executing it.
    ///
    /// On return every effect of the recorded commands is complete and
    /// visible to later submissions on any queue.
    pub fn submit_and_wait<F>(&mut self, record: F) -> EngineResult<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let device = self.device.clone();
        submit_blocking(self, |cmd| record(&device.device, cmd))?;

        log::debug!("Upload submission complete");
        Ok(())
    }
}

impl UploadQueue for UploadContext {
    fn begin(&mut self) -> EngineResult<vk::CommandBuffer> {
        self.commands
            .begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
    }

    fn end(&mut self) -> EngineResult<()> {
        self.commands.end()
    }

    fn submit(&mut self) -> EngineResult<()> {
        let command_buffers = [self.commands.buffer()];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);

        unsafe {
            self.device.device.queue_submit(
                self.device.graphics_queue,
                &[submit_info],
                self.fence.handle(),
            )
        }
        .map_err(EngineError::Submission)
    }

    fn wait(&mut self) -> EngineResult<()> {
        self.fence.wait(self.timeout_ns)
    }

    fn reset_fence(&mut self) -> EngineResult<()> {
        self.fence.reset()
    }

    fn reset_pool(&mut self) -> EngineResult<()> {
        self.commands.reset_pool()
    }
}
