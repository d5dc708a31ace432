// Swapchain - Window presentation
//
// Owns the chain of presentable images, one view and one framebuffer per
// image, and the single render pass every framebuffer is bound to.
// Rebuilds tear down views, framebuffers and the chain but keep the render
// pass, so pipelines built against it stay compatible.

use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;
use crate::error::{EngineError, EngineResult};

/// Surface format we ask for before falling back to whatever comes first
pub const PREFERRED_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_SRGB,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Everything reported by the surface for one physical device
#[derive(Debug, Clone)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    pub fn query(device: &VulkanDevice) -> EngineResult<Self> {
        let loader = &device.surface_loader;
        let pd = device.physical_device;
        let surface = device.surface;

        let capabilities =
            unsafe { loader.get_physical_device_surface_capabilities(pd, surface) }
                .map_err(|e| EngineError::DeviceQuery(format!("surface capabilities: {e}")))?;
        let formats = unsafe { loader.get_physical_device_surface_formats(pd, surface) }
            .map_err(|e| EngineError::DeviceQuery(format!("surface formats: {e}")))?;
        let present_modes =
            unsafe { loader.get_physical_device_surface_present_modes(pd, surface) }
                .map_err(|e| EngineError::DeviceQuery(format!("present modes: {e}")))?;

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }
}

/// Settings chosen for one build of the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainSettings {
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
}

impl SwapchainSettings {
    /// Pick format, present mode, extent and image count from what the
    /// surface reports. `drawable` is the window's size in pixels and is only
    /// consulted when the surface leaves the extent up to us.
    pub fn select(
        support: &SurfaceSupport,
        preferred_mode: vk::PresentModeKHR,
        drawable: vk::Extent2D,
    ) -> EngineResult<Self> {
        Ok(Self {
            format: choose_surface_format(&support.formats)?,
            present_mode: choose_present_mode(&support.present_modes, preferred_mode)?,
            extent: choose_extent(&support.capabilities, drawable),
            image_count: choose_image_count(&support.capabilities),
        })
    }
}

pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
) -> EngineResult<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == PREFERRED_FORMAT.format && f.color_space == PREFERRED_FORMAT.color_space
        })
        .or_else(|| formats.first().copied())
        .ok_or_else(|| EngineError::DeviceQuery("surface reports no formats".into()))
}

/// FIFO is always supported, so it is the fallback.
pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> EngineResult<vk::PresentModeKHR> {
    if modes.is_empty() {
        return Err(EngineError::DeviceQuery(
            "surface reports no present modes".into(),
        ));
    }
    if modes.contains(&preferred) {
        Ok(preferred)
    } else {
        Ok(vk::PresentModeKHR::FIFO)
    }
}

pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, drawable: vk::Extent2D) -> vk::Extent2D {
    // u32::MAX means the surface size is decided by the swapchain
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: drawable
            .width
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: drawable
            .height
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = caps.min_image_count + 1;
    // max_image_count == 0 means no upper limit
    if caps.max_image_count > 0 && count > caps.max_image_count {
        caps.max_image_count
    } else {
        count
    }
}

pub struct Swapchain {
    swapchain: vk::SwapchainKHR,
    swapchain_loader: ash::khr::swapchain::Device,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub render_pass: vk::RenderPass,
    pub settings: SwapchainSettings,
    preferred_mode: vk::PresentModeKHR,
    device: Arc<VulkanDevice>,
}

impl Swapchain {
    /// Query the surface, pick settings and build the chain, views, render
    /// pass and framebuffers.
    pub fn new(
        device: Arc<VulkanDevice>,
        preferred_mode: vk::PresentModeKHR,
        drawable: vk::Extent2D,
    ) -> EngineResult<Self> {
        let support = SurfaceSupport::query(&device)?;
        let settings = SwapchainSettings::select(&support, preferred_mode, drawable)?;
        let swapchain_loader = ash::khr::swapchain::Device::new(&device.instance, &device.device);

        let render_pass = create_render_pass(&device, settings.format.format)?;

        let mut swapchain = Self {
            swapchain: vk::SwapchainKHR::null(),
            swapchain_loader,
            images: Vec::new(),
            image_views: Vec::new(),
            framebuffers: Vec::new(),
            render_pass,
            settings,
            preferred_mode,
            device,
        };
        // On failure, Drop cleans up whatever was created so far
        swapchain.build(&support)?;

        Ok(swapchain)
    }

    /// Tear down and rebuild after a resize or an out-of-date signal.
    ///
    /// Blocks until the device is idle. The render pass survives, so the
    /// new framebuffers are compatible with every existing pipeline.
    ///
    /// Returns `Ok(false)` without touching the current chain when the
    /// surface has zero area (the window is minimized); the caller retries
    /// later.
    pub fn recreate(&mut self, drawable: vk::Extent2D) -> EngineResult<bool> {
        self.device
            .wait_idle()
            .map_err(EngineError::creation("swapchain (device wait idle)"))?;

        let support = SurfaceSupport::query(&self.device)?;
        let settings = SwapchainSettings::select(&support, self.preferred_mode, drawable)?;
        if settings.extent.width == 0 || settings.extent.height == 0 {
            log::debug!("Surface has zero area, deferring swapchain rebuild");
            return Ok(false);
        }

        self.teardown();

        if settings.format != self.settings.format {
            // Render pass would need rebuilding too; out of scope
            log::warn!(
                "Surface format changed from {:?} to {:?}; keeping the existing render pass",
                self.settings.format.format,
                settings.format.format
            );
        }
        self.settings = SwapchainSettings {
            format: self.settings.format,
            ..settings
        };

        self.build(&support)?;
        Ok(true)
    }

    fn build(&mut self, support: &SurfaceSupport) -> EngineResult<()> {
        let settings = self.settings;

        let family_indices = [
            self.device.graphics_queue_family,
            self.device.present_queue_family,
        ];
        let mut create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.device.surface)
            .min_image_count(settings.image_count)
            .image_format(settings.format.format)
            .image_color_space(settings.format.color_space)
            .image_extent(settings.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(settings.present_mode)
            .clipped(true);

        create_info = if family_indices[0] != family_indices[1] {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&family_indices)
        } else {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        self.swapchain = unsafe { self.swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(EngineError::creation("swapchain"))?;

        self.images = unsafe { self.swapchain_loader.get_swapchain_images(self.swapchain) }
            .map_err(EngineError::creation("swapchain images"))?;

        for &image in &self.images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(settings.format.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });

            let view = unsafe { self.device.device.create_image_view(&view_info, None) }
                .map_err(EngineError::creation("swapchain image view"))?;
            self.image_views.push(view);
        }

        for &view in &self.image_views {
            let attachments = [view];
            let framebuffer_info = vk::FramebufferCreateInfo::default()
                .render_pass(self.render_pass)
                .attachments(&attachments)
                .width(settings.extent.width)
                .height(settings.extent.height)
                .layers(1);

            let framebuffer =
                unsafe { self.device.device.create_framebuffer(&framebuffer_info, None) }
                    .map_err(EngineError::creation("framebuffer"))?;
            self.framebuffers.push(framebuffer);
        }

        log::info!(
            "Swapchain ready: {} images, {}x{}, {:?}, {:?}",
            self.images.len(),
            settings.extent.width,
            settings.extent.height,
            settings.format.format,
            settings.present_mode
        );

        Ok(())
    }

    /// Destroy framebuffers, views and the chain. The render pass is left
    /// alone; it only goes away when the swapchain itself is dropped.
    fn teardown(&mut self) {
        unsafe {
            for framebuffer in self.framebuffers.drain(..) {
                self.device.device.destroy_framebuffer(framebuffer, None);
            }
            for view in self.image_views.drain(..) {
                self.device.device.destroy_image_view(view, None);
            }
            if self.swapchain != vk::SwapchainKHR::null() {
                self.swapchain_loader.destroy_swapchain(self.swapchain, None);
                self.swapchain = vk::SwapchainKHR::null();
            }
        }
        self.images.clear();
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.settings.extent
    }

    #[inline]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Acquire the next presentable image, signaling `semaphore` when the
    /// presentation engine is done with it.
    ///
    /// Returns the raw result so the caller can tell out-of-date apart from
    /// real failures.
    pub fn acquire_next_image(
        &self,
        timeout: u64,
        semaphore: vk::Semaphore,
    ) -> Result<(u32, bool), vk::Result> {
        unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                timeout,
                semaphore,
                vk::Fence::null(),
            )
        }
    }

    /// Present an image once `wait_semaphores` are signaled. `Ok(true)` means
    /// suboptimal.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool, vk::Result> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe { self.swapchain_loader.queue_present(queue, &present_info) }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.teardown();
        unsafe {
            self.device.device.destroy_render_pass(self.render_pass, None);
        }
    }
}

/// One color attachment cleared on load and stored, one subpass.
fn create_render_pass(device: &VulkanDevice, format: vk::Format) -> EngineResult<vk::RenderPass> {
    let color_attachment = vk::AttachmentDescription::default()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR);

    let color_attachment_refs = [vk::AttachmentReference::default()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];

    let subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_attachment_refs);

    // Color writes wait for the acquire semaphore's stage
    let dependency = vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE);

    let attachments = [color_attachment];
    let subpasses = [subpass];
    let dependencies = [dependency];

    let render_pass_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    unsafe { device.device.create_render_pass(&render_pass_info, None) }
        .map_err(EngineError::creation("render pass"))
}
