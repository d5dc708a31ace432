// =============================================================================
// RENDERER - Vulkan implementation of the frame protocol
// =============================================================================
//
// Owns every GPU object the frame loop needs and implements `FrameDriver`
// on top of them. The orchestration itself (which slot, when to rebuild,
// when to skip) lives in `frame::FrameLoop`.
//
// IMPORTANT: field order matters for Drop. Fields drop top to bottom, after
// `Drop::drop` has waited for the device to go idle. Everything holds an
// Arc to the device, so the device context itself is always last.

use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::sync::Arc;
use std::time::Instant;
use winit::window::Window;

use crate::backend::buffer::{BufferKind, GpuBuffer};
use crate::backend::descriptor::{DescriptorSetLayout, Descriptors};
use crate::backend::pipeline::{PipelineBuilder, PipelineId, PipelineSet};
use crate::backend::shader::ShaderModule;
use crate::backend::sync::FrameSlot;
use crate::backend::upload::UploadContext;
use crate::backend::{Swapchain, VulkanDevice};
use crate::config::Config;
use crate::error::{EngineError, EngineResult};
use crate::frame::{AcquireOutcome, FrameDriver, PresentOutcome, FRAME_COUNT};
use crate::mesh::{Mesh, MeshData, UniformBufferObject, Vertex};

pub struct Renderer {
    // ─────────────────────────────────────────────────────────────────────────
    // SCENE
    // ─────────────────────────────────────────────────────────────────────────
    mesh: Mesh,
    /// One per frame slot, rewritten after that slot's fence wait
    uniforms: Vec<GpuBuffer>,
    descriptors: Descriptors,
    _descriptor_layout: DescriptorSetLayout,
    pipelines: PipelineSet,

    // ─────────────────────────────────────────────────────────────────────────
    // COMMANDS & SYNCHRONIZATION
    // ─────────────────────────────────────────────────────────────────────────
    _upload: UploadContext,
    slots: Vec<FrameSlot>,

    // ─────────────────────────────────────────────────────────────────────────
    // PRESENTATION
    // ─────────────────────────────────────────────────────────────────────────
    swapchain: Swapchain,
    window: Arc<Window>,

    // ─────────────────────────────────────────────────────────────────────────
    // SETTINGS
    // ─────────────────────────────────────────────────────────────────────────
    clear_color: [f32; 4],
    fence_timeout_ns: u64,
    started: Instant,

    device: Arc<VulkanDevice>,
}

impl Renderer {
    /// Build every GPU object for `window`.
    ///
    /// 1. Device context (instance, surface, queues, allocator)
    /// 2. Swapchain, render pass, framebuffers
    /// 3. Frame slots and the upload context
    /// 4. Uniform buffers and descriptor sets
    /// 5. Pipelines
    /// 6. Mesh upload (blocking)
    pub fn new(window: Arc<Window>, config: &Config) -> Result<Self> {
        log::info!("Initializing Vulkan...");

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Device context
        // ─────────────────────────────────────────────────────────────────────
        let enable_validation = cfg!(debug_assertions) && config.debug.validation_layers;
        let display_handle = window
            .display_handle()
            .context("Failed to get display handle")?
            .as_raw();
        let window_handle = window
            .window_handle()
            .context("Failed to get window handle")?
            .as_raw();

        let device = VulkanDevice::new(
            &config.window.title,
            enable_validation,
            display_handle,
            window_handle,
        )?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Swapchain
        // ─────────────────────────────────────────────────────────────────────
        let swapchain = Swapchain::new(
            device.clone(),
            config.get_present_mode(),
            drawable_extent(&window),
        )
        .context("Failed to create swapchain")?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Frame slots and upload context
        // ─────────────────────────────────────────────────────────────────────
        let slots = (0..FRAME_COUNT)
            .map(|_| FrameSlot::new(&device))
            .collect::<EngineResult<Vec<_>>>()
            .context("Failed to create frame slots")?;

        let fence_timeout_ns = config.fence_timeout_ns();
        let mut upload = UploadContext::new(device.clone(), fence_timeout_ns)
            .context("Failed to create upload context")?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 4: Uniforms and descriptors
        // ─────────────────────────────────────────────────────────────────────
        let uniforms = (0..FRAME_COUNT)
            .map(|i| {
                GpuBuffer::new(
                    device.clone(),
                    BufferKind::Uniform,
                    UniformBufferObject::SIZE as vk::DeviceSize,
                    &format!("uniforms[{i}]"),
                )
            })
            .collect::<EngineResult<Vec<_>>>()
            .context("Failed to create uniform buffers")?;

        let descriptor_layout = DescriptorSetLayout::uniform_buffer(device.clone())?;
        let descriptors = Descriptors::new(device.clone(), &descriptor_layout, &uniforms)
            .context("Failed to create descriptor sets")?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 5: Pipelines
        // ─────────────────────────────────────────────────────────────────────
        let pipelines = build_pipelines(&device, &swapchain, &descriptor_layout, config)
            .context("Failed to build pipelines")?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 6: Geometry
        // ─────────────────────────────────────────────────────────────────────
        let mesh = Mesh::upload(&device, &mut upload, &MeshData::quad())
            .context("Failed to upload mesh")?;

        log::info!("Vulkan initialized ({} frames in flight)", FRAME_COUNT);

        Ok(Self {
            mesh,
            uniforms,
            descriptors,
            _descriptor_layout: descriptor_layout,
            pipelines,
            _upload: upload,
            slots,
            swapchain,
            window,
            clear_color: config.graphics.clear_color,
            fence_timeout_ns,
            started: Instant::now(),
            device,
        })
    }

    /// Block until all submitted work has finished.
    pub fn wait_idle(&self) -> EngineResult<()> {
        self.device.wait_idle().map_err(EngineError::Submission)
    }
}

/// Window's current size in pixels.
fn drawable_extent(window: &Window) -> vk::Extent2D {
    let size = window.inner_size();
    vk::Extent2D {
        width: size.width,
        height: size.height,
    }
}

fn build_pipelines(
    device: &Arc<VulkanDevice>,
    swapchain: &Swapchain,
    descriptor_layout: &DescriptorSetLayout,
    config: &Config,
) -> EngineResult<PipelineSet> {
    // Modules are only needed until the pipelines exist
    let vertex = ShaderModule::load(device.clone(), &config.shaders.vertex)?;
    let fragment = ShaderModule::load(device.clone(), &config.shaders.fragment)?;

    let mesh = PipelineBuilder::new()
        .shaders(&vertex, &fragment)
        .vertex_input(&Vertex::binding_descriptions(), &Vertex::attribute_descriptions())
        // The quad is visible from both sides as it spins
        .rasterization(
            vk::PolygonMode::FILL,
            vk::CullModeFlags::NONE,
            vk::FrontFace::COUNTER_CLOCKWISE,
        )
        .layout(&[descriptor_layout.handle()], &[])
        .build(device.clone(), swapchain.render_pass)?;

    Ok(PipelineSet::new([mesh]))
}

// =============================================================================
// FRAME DRIVER
// =============================================================================

impl FrameDriver for Renderer {
    fn wait_for_slot(&mut self, slot: usize) -> EngineResult<()> {
        self.slots[slot].in_flight.wait(self.fence_timeout_ns)
    }

    fn acquire_image(&mut self, slot: usize) -> EngineResult<AcquireOutcome> {
        let semaphore = self.slots[slot].image_available.handle();
        match self.swapchain.acquire_next_image(u64::MAX, semaphore) {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Ready {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(EngineError::Surface(e)),
        }
    }

    fn reset_slot(&mut self, slot: usize) -> EngineResult<()> {
        let frame = &mut self.slots[slot];
        // Only a retired slot may be reset; wait_for_slot guarantees it
        debug_assert!(
            frame.in_flight.is_signaled(),
            "reset of slot {slot} before its fence signaled"
        );
        frame.in_flight.reset()?;
        frame.commands.reset()
    }

    fn record(&mut self, slot: usize, image_index: u32) -> EngineResult<()> {
        let extent = self.swapchain.extent();

        // The slot's fence has been waited on, so its uniform buffer is free
        let ubo = UniformBufferObject::compute(self.started.elapsed().as_secs_f32(), extent);
        self.uniforms[slot].write(std::slice::from_ref(&ubo))?;

        let frame = &mut self.slots[slot];
        let cmd = frame.commands.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
        let device = &self.device.device;

        // ─────────────────────────────────────────────────────────────────────
        // Render pass: clear, then draw the mesh
        // ─────────────────────────────────────────────────────────────────────
        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: self.clear_color,
            },
        }];
        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        let render_pass_info = vk::RenderPassBeginInfo::default()
            .render_pass(self.swapchain.render_pass)
            .framebuffer(self.swapchain.framebuffers[image_index as usize])
            .render_area(render_area)
            .clear_values(&clear_values);

        let pipeline = self.pipelines.get(PipelineId::Mesh);
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };

        unsafe {
            device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline.handle());
            device.cmd_set_viewport(cmd, 0, &[viewport]);
            device.cmd_set_scissor(cmd, 0, &[render_area]);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline.layout(),
                0,
                &[self.descriptors.set(slot)],
                &[],
            );
        }
        self.mesh.draw(device, cmd);
        unsafe { device.cmd_end_render_pass(cmd) };

        frame.commands.end()
    }

    fn submit(&mut self, slot: usize) -> EngineResult<()> {
        let frame = &self.slots[slot];

        let wait_semaphores = [frame.image_available.handle()];
        // Color output must not start before the image is acquired
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [frame.commands.buffer()];
        let signal_semaphores = [frame.render_finished.handle()];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device.device.queue_submit(
                self.device.graphics_queue,
                &[submit_info],
                frame.in_flight.handle(),
            )
        }
        .map_err(EngineError::Submission)
    }

    fn present(&mut self, slot: usize, image_index: u32) -> EngineResult<PresentOutcome> {
        let wait = [self.slots[slot].render_finished.handle()];
        match self
            .swapchain
            .present(self.device.present_queue, image_index, &wait)
        {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(EngineError::Present(e)),
        }
    }

    fn recreate_swapchain(&mut self) -> EngineResult<bool> {
        let drawable = drawable_extent(&self.window);
        if drawable.width == 0 || drawable.height == 0 {
            return Ok(false);
        }
        log::info!(
            "Rebuilding swapchain for {}x{}",
            drawable.width,
            drawable.height
        );
        let rebuilt = self.swapchain.recreate(drawable)?;
        if rebuilt {
            log::debug!(
                "Swapchain rebuilt with {} images at {:?}",
                self.swapchain.image_count(),
                self.swapchain.extent()
            );
        }
        Ok(rebuilt)
    }
}

// =============================================================================
// CLEANUP
// =============================================================================

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");
        // Nothing may be destroyed while the GPU still references it
        if let Err(e) = self.device.wait_idle() {
            log::error!("Device wait idle failed during shutdown: {}", e);
        }
    }
}
