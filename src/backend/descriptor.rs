// Descriptor sets for per-frame uniform buffers
//
// One layout (a single uniform buffer at binding 0, vertex stage), one pool
// sized for exactly one set per frame slot.

use ash::vk;
use std::sync::Arc;

use super::buffer::GpuBuffer;
use super::VulkanDevice;
use crate::error::{EngineError, EngineResult};

pub struct DescriptorSetLayout {
    layout: vk::DescriptorSetLayout,
    device: Arc<VulkanDevice>,
}

impl DescriptorSetLayout {
    /// Layout with one uniform buffer visible to the vertex stage.
    pub fn uniform_buffer(device: Arc<VulkanDevice>) -> EngineResult<Self> {
        let bindings = [vk::DescriptorSetLayoutBinding::default()
            .binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::VERTEX)];

        let info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        let layout = unsafe { device.device.create_descriptor_set_layout(&info, None) }
            .map_err(EngineError::creation("descriptor set layout"))?;

        Ok(Self { layout, device })
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .device
                .destroy_descriptor_set_layout(self.layout, None)
        };
    }
}

/// Pool plus one set per uniform buffer, written once at creation.
pub struct Descriptors {
    pool: vk::DescriptorPool,
    sets: Vec<vk::DescriptorSet>,
    device: Arc<VulkanDevice>,
}

impl Descriptors {
    pub fn new(
        device: Arc<VulkanDevice>,
        layout: &DescriptorSetLayout,
        uniforms: &[GpuBuffer],
    ) -> EngineResult<Self> {
        let count = uniforms.len() as u32;

        let pool_sizes = [vk::DescriptorPoolSize::default()
            .ty(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(count)];
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .pool_sizes(&pool_sizes)
            .max_sets(count);

        let pool = unsafe { device.device.create_descriptor_pool(&pool_info, None) }
            .map_err(EngineError::creation("descriptor pool"))?;

        let layouts = vec![layout.handle(); uniforms.len()];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);

        let sets = match unsafe { device.device.allocate_descriptor_sets(&alloc_info) } {
            Ok(sets) => sets,
            Err(e) => {
                unsafe { device.device.destroy_descriptor_pool(pool, None) };
                return Err(EngineError::creation("descriptor sets")(e));
            }
        };

        for (&set, uniform) in sets.iter().zip(uniforms) {
            let buffer_info = [vk::DescriptorBufferInfo::default()
                .buffer(uniform.handle())
                .offset(0)
                .range(uniform.size())];

            let write = vk::WriteDescriptorSet::default()
                .dst_set(set)
                .dst_binding(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(&buffer_info);

            unsafe { device.device.update_descriptor_sets(&[write], &[]) };
        }

        Ok(Self { pool, sets, device })
    }

    #[inline]
    pub fn set(&self, index: usize) -> vk::DescriptorSet {
        self.sets[index]
    }
}

impl Drop for Descriptors {
    fn drop(&mut self) {
        // Sets are freed with the pool
        unsafe { self.device.device.destroy_descriptor_pool(self.pool, None) };
    }
}
