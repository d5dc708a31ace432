// Kindle - a minimal Vulkan engine core
//
// Frame lifecycle and GPU synchronization: swapchain management, a
// double-buffered acquire/record/submit/present loop, fence and semaphore
// coordination, and blocking uploads outside the loop.

pub mod app;
pub mod backend;
pub mod config;
pub mod error;
pub mod event;
pub mod frame;
pub mod mesh;
pub mod renderer;

pub use error::{EngineError, EngineResult};
pub use frame::{FrameDriver, FrameLoop, FRAME_COUNT};
