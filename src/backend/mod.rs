// Backend module - Vulkan abstraction layer
//
// Design: thin RAII wrappers around ash. Every device object is destroyed
// by its owner's Drop, and every wrapper holds an Arc to the device context
// so the device always outlives it.

pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod upload;

pub use device::VulkanDevice;
pub use swapchain::Swapchain;
