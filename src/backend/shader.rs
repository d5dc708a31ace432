// Shader module loading
//
// Vulkan consumes SPIR-V. Modules are read from disk at pipeline-build time
// and can be dropped as soon as the pipeline exists.

use ash::vk;
use std::path::Path;
use std::sync::Arc;

use super::VulkanDevice;
use crate::error::{EngineError, EngineResult};

pub struct ShaderModule {
    module: vk::ShaderModule,
    device: Arc<VulkanDevice>,
}

impl ShaderModule {
    /// Load a SPIR-V binary from `path`.
    ///
    /// Unreadable or malformed files are `Shader` errors naming the path; a
    /// module the device rejects is `ResourceCreation`, as everywhere else.
    pub fn load(device: Arc<VulkanDevice>, path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let code = read_spirv_file(path)?;

        let module = Self::from_code(device, &code)?;
        log::debug!("Loaded shader {}", path.display());
        Ok(module)
    }

    fn from_code(device: Arc<VulkanDevice>, code: &[u32]) -> EngineResult<Self> {
        let create_info = vk::ShaderModuleCreateInfo::default().code(code);
        let module = unsafe { device.device.create_shader_module(&create_info, None) }
            .map_err(EngineError::creation("shader module"))?;

        Ok(Self { module, device })
    }

    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }
}

// read_spv handles alignment and endianness, and rejects odd sizes
fn decode_spirv(bytes: &[u8]) -> std::io::Result<Vec<u32>> {
    ash::util::read_spv(&mut std::io::Cursor::new(bytes))
}

fn read_spirv_file(path: &Path) -> EngineResult<Vec<u32>> {
    let bytes = std::fs::read(path)
        .map_err(|e| EngineError::Shader(format!("failed to read {}: {e}", path.display())))?;
    decode_spirv(&bytes)
        .map_err(|e| EngineError::Shader(format!("{}: invalid SPIR-V: {e}", path.display())))
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_shader_module(self.module, None) };
    }
}
