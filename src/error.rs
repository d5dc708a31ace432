// Engine error taxonomy
//
// Every variant here is fatal. The two recoverable presentation states
// (out of date, suboptimal) are not errors; see `frame::AcquireOutcome`
// and `frame::PresentOutcome`.

use ash::vk;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Capability query returned empty or unusable data
    #[error("device query failed: {0}")]
    DeviceQuery(String),

    /// The device rejected an object creation call
    #[error("failed to create {what}: {result}")]
    ResourceCreation {
        what: &'static str,
        result: vk::Result,
    },

    /// Acquire returned something other than success, suboptimal or out of date
    #[error("surface error during image acquisition: {0}")]
    Surface(vk::Result),

    #[error("command recording failed: {0}")]
    Recording(vk::Result),

    #[error("queue submission failed: {0}")]
    Submission(vk::Result),

    #[error("presentation failed: {0}")]
    Present(vk::Result),

    #[error("failed to create command pool: {0}")]
    PoolCreation(vk::Result),

    #[error("failed to allocate command buffer: {0}")]
    Allocation(vk::Result),

    /// A fence wait ran past its bound. Treated as a device hang.
    #[error("fence wait exceeded {timeout_ns} ns")]
    FenceTimeout { timeout_ns: u64 },

    #[error("failed to load Vulkan: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("allocator error: {0}")]
    Allocator(#[from] gpu_allocator::AllocationError),

    #[error("shader error: {0}")]
    Shader(String),

    /// Host write into a buffer that is too small or not mappable
    #[error("invalid buffer write: {0}")]
    BufferWrite(&'static str),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Shorthand for mapping a rejected `vkCreate*` call.
    pub fn creation(what: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| Self::ResourceCreation { what, result }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creation_error_names_the_object() {
        let err = EngineError::creation("framebuffer")(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        let message = err.to_string();
        assert!(message.contains("framebuffer"));
        assert!(matches!(
            err,
            EngineError::ResourceCreation {
                what: "framebuffer",
                result: vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
            }
        ));
    }

    #[test]
    fn fence_timeout_reports_bound() {
        let err = EngineError::FenceTimeout { timeout_ns: 42 };
        assert_eq!(err.to_string(), "fence wait exceeded 42 ns");
    }
}
