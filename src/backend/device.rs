// Vulkan Device - explicit GPU context
//
// Responsibilities:
// - Instance creation with validation layers
// - Window surface creation
// - Physical device selection (graphics + present support, prefer discrete GPU)
// - Logical device + queue creation
// - Memory allocator setup
//
// One of these is built at startup and shared by `Arc` with every object
// that needs device access. There is no global state.

use anyhow::{Context, Result};
use ash::{vk, Entry};
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use parking_lot::Mutex;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::{c_char, CStr, CString};
use std::mem::ManuallyDrop;
use std::sync::Arc;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub instance: ash::Instance,
    _entry: Entry,

    /// Dropped by hand before the device is destroyed
    allocator: ManuallyDrop<Mutex<Allocator>>,

    // Surface the swapchain presents to
    pub surface: vk::SurfaceKHR,
    pub surface_loader: ash::khr::surface::Instance,

    // Queue handles (the two families are often the same)
    pub graphics_queue: vk::Queue,
    pub graphics_queue_family: u32,
    pub present_queue: vk::Queue,
    pub present_queue_family: u32,

    // Debug utils (if validation enabled)
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

/// Queue families picked for one physical device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    /// Pick a graphics family and a present family, preferring one family
    /// that can do both.
    pub fn select(graphics_capable: &[bool], present_capable: &[bool]) -> Option<Self> {
        let shared = graphics_capable
            .iter()
            .zip(present_capable)
            .position(|(&g, &p)| g && p);
        if let Some(index) = shared {
            return Some(Self {
                graphics: index as u32,
                present: index as u32,
            });
        }

        let graphics = graphics_capable.iter().position(|&g| g)?;
        let present = present_capable.iter().position(|&p| p)?;
        Some(Self {
            graphics: graphics as u32,
            present: present as u32,
        })
    }

    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }
}

impl VulkanDevice {
    /// Create the Vulkan context for a window.
    ///
    /// # Arguments
    /// * `app_name` - Application name for debugging
    /// * `enable_validation` - Enable Vulkan validation layers (debug only)
    /// * `display_handle` / `window_handle` - Raw handles of the target window
    pub fn new(
        app_name: &str,
        enable_validation: bool,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
    ) -> Result<Arc<Self>> {
        log::info!("Creating Vulkan device: {}", app_name);

        // Step 1: Load Vulkan library
        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        // Step 2: Create instance
        let validation = validation_active(
            enable_validation,
            enable_validation && Self::validation_layer_available(&entry),
        );
        let instance = Self::create_instance(&entry, app_name, validation, display_handle)?;

        // Step 3: Setup debug messenger, only if the instance enabled debug utils
        let debug_utils = if validation {
            Some(Self::setup_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        // Step 4: Create surface for the window
        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);
        let surface = unsafe {
            ash_window::create_surface(&entry, &instance, display_handle, window_handle, None)
        }
        .context("Failed to create window surface")?;

        // Step 5: Pick physical device (GPU)
        let (physical_device, families) =
            Self::pick_physical_device(&instance, &surface_loader, surface)?;

        // Step 6: Create logical device
        let (device, graphics_queue, present_queue) =
            Self::create_logical_device(&instance, physical_device, families)?;

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };

        log::info!(
            "Selected GPU: {}",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy()
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );
        log::info!(
            "Queue families: graphics={} present={}",
            families.graphics,
            families.present
        );

        // Step 7: Create memory allocator
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .context("Failed to create memory allocator")?;

        Ok(Arc::new(Self {
            device,
            physical_device,
            instance,
            _entry: entry,
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            surface,
            surface_loader,
            graphics_queue,
            graphics_queue_family: families.graphics,
            present_queue,
            present_queue_family: families.present,
            debug_utils,
        }))
    }

    /// `validation` turns on both the Khronos layer and `VK_EXT_debug_utils`;
    /// the caller has already checked that the layer is installed.
    fn create_instance(
        entry: &Entry,
        app_name: &str,
        validation: bool,
        display_handle: RawDisplayHandle,
    ) -> Result<ash::Instance> {
        let app_name_cstr = CString::new(app_name)?;
        let engine_name = c"Kindle";

        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_2);

        // Surface extensions for whatever platform the window lives on
        let mut extensions: Vec<*const c_char> =
            ash_window::enumerate_required_extensions(display_handle)
                .context("Unsupported windowing system")?
                .to_vec();

        let layer_names = if validation {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        Ok(instance)
    }

    fn validation_layer_available(entry: &Entry) -> bool {
        let layers = match unsafe { entry.enumerate_instance_layer_properties() } {
            Ok(layers) => layers,
            Err(_) => return false,
        };
        layers.iter().any(|layer| {
            layer.layer_name_as_c_str().map_or(false, |name| name == VALIDATION_LAYER)
        })
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ash::ext::debug_utils::Instance::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .context("Failed to set up debug messenger")?;

        Ok((debug_utils, messenger))
    }

    fn pick_physical_device(
        instance: &ash::Instance,
        surface_loader: &ash::khr::surface::Instance,
        surface: vk::SurfaceKHR,
    ) -> Result<(vk::PhysicalDevice, QueueFamilies)> {
        let devices = unsafe { instance.enumerate_physical_devices() }?;

        if devices.is_empty() {
            anyhow::bail!("No Vulkan-capable GPU found");
        }

        // Score each device
        let mut best_device = None;
        let mut best_score = 0;

        for device in devices {
            let props = unsafe { instance.get_physical_device_properties(device) };

            if !Self::supports_swapchain(instance, device) {
                continue;
            }

            // The surface must report at least one format and present mode
            let has_formats = unsafe {
                surface_loader.get_physical_device_surface_formats(device, surface)
            }
            .map_or(false, |formats| !formats.is_empty());
            let has_modes = unsafe {
                surface_loader.get_physical_device_surface_present_modes(device, surface)
            }
            .map_or(false, |modes| !modes.is_empty());
            if !has_formats || !has_modes {
                continue;
            }

            let queue_families =
                unsafe { instance.get_physical_device_queue_family_properties(device) };
            let graphics_capable: Vec<bool> = queue_families
                .iter()
                .map(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
                .collect();
            let present_capable: Vec<bool> = (0..queue_families.len() as u32)
                .map(|index| unsafe {
                    surface_loader
                        .get_physical_device_surface_support(device, index, surface)
                        .unwrap_or(false)
                })
                .collect();

            if let Some(families) = QueueFamilies::select(&graphics_capable, &present_capable) {
                // Score device (prefer discrete GPU, then a shared queue family)
                let mut score = match props.device_type {
                    vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
                    vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
                    _ => 1,
                };
                if families.is_shared() {
                    score += 10;
                }

                if score > best_score {
                    best_score = score;
                    best_device = Some((device, families));
                }
            }
        }

        best_device.ok_or_else(|| anyhow::anyhow!("No suitable GPU found"))
    }

    fn supports_swapchain(instance: &ash::Instance, device: vk::PhysicalDevice) -> bool {
        let extensions = match unsafe { instance.enumerate_device_extension_properties(device) } {
            Ok(extensions) => extensions,
            Err(_) => return false,
        };
        extensions.iter().any(|ext| {
            ext.extension_name_as_c_str()
                .map_or(false, |name| name == ash::khr::swapchain::NAME)
        })
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        families: QueueFamilies,
    ) -> Result<(ash::Device, vk::Queue, vk::Queue)> {
        let queue_priorities = [1.0];
        let mut queue_create_infos = vec![vk::DeviceQueueCreateInfo::default()
            .queue_family_index(families.graphics)
            .queue_priorities(&queue_priorities)];
        if !families.is_shared() {
            queue_create_infos.push(
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(families.present)
                    .queue_priorities(&queue_priorities),
            );
        }

        let extensions = [ash::khr::swapchain::NAME.as_ptr()];
        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }
            .context("Failed to create logical device")?;

        let graphics_queue = unsafe { device.get_device_queue(families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(families.present, 0) };

        Ok((device, graphics_queue, present_queue))
    }

    /// Exclusive access to the memory allocator
    pub fn allocator(&self) -> parking_lot::MutexGuard<'_, Allocator> {
        self.allocator.lock()
    }

    /// Wait for device to be idle (e.g., before cleanup or swapchain rebuild)
    pub fn wait_idle(&self) -> Result<(), vk::Result> {
        unsafe { self.device.device_wait_idle() }
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        // Nothing may still be executing when the handles go away
        let _ = self.wait_idle();

        unsafe {
            // Allocator frees its memory blocks through the device
            ManuallyDrop::drop(&mut self.allocator);

            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);

            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

/// Whether validation (and with it the debug messenger) can be turned on.
///
/// The debug utils entry points are only loadable from an instance that
/// enabled the extension, so a missing layer disables both.
fn validation_active(requested: bool, layer_installed: bool) -> bool {
    if requested && !layer_installed {
        log::warn!("Validation layers requested but not installed, continuing without");
    }
    requested && layer_installed
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_family_with_both_capabilities() {
        let graphics = [true, true, false];
        let present = [false, true, true];
        let families = QueueFamilies::select(&graphics, &present).unwrap();
        assert_eq!(families, QueueFamilies { graphics: 1, present: 1 });
        assert!(families.is_shared());
    }

    #[test]
    fn falls_back_to_split_families() {
        let graphics = [true, false];
        let present = [false, true];
        let families = QueueFamilies::select(&graphics, &present).unwrap();
        assert_eq!(families, QueueFamilies { graphics: 0, present: 1 });
        assert!(!families.is_shared());
    }

    #[test]
    fn missing_layer_disables_validation() {
        assert!(validation_active(true, true));
        assert!(!validation_active(true, false));
        assert!(!validation_active(false, true));
        assert!(!validation_active(false, false));
    }

    #[test]
    fn no_present_support_means_no_families() {
        assert_eq!(QueueFamilies::select(&[true, true], &[false, false]), None);
        assert_eq!(QueueFamilies::select(&[false], &[true]), None);
    }
}
