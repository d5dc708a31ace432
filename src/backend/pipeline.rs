// Graphics pipeline creation and management
//
// Pipelines are built once at startup and never mutated. Viewport and
// scissor are dynamic, so a swapchain rebuild never invalidates a pipeline.
// Lookup goes through a closed `PipelineId` enum, not names.

use ash::vk;
use std::sync::Arc;

use super::shader::ShaderModule;
use super::VulkanDevice;
use crate::error::{EngineError, EngineResult};

/// Every pipeline the renderer knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineId {
    /// Vertex-colored geometry with the per-frame uniform block
    Mesh,
}

impl PipelineId {
    pub const COUNT: usize = 1;

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Opaque color writes; the single attachment is overwritten.
fn opaque_blend_attachment() -> vk::PipelineColorBlendAttachmentState {
    vk::PipelineColorBlendAttachmentState::default()
        .blend_enable(false)
        .color_write_mask(vk::ColorComponentFlags::RGBA)
}

/// A pipeline and the layout it was built with.
pub struct Pipeline {
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    device: Arc<VulkanDevice>,
}

impl Pipeline {
    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    #[inline]
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_pipeline(self.pipeline, None);
            self.device
                .device
                .destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// Fixed-size table of built pipelines, indexed by `PipelineId`.
pub struct PipelineSet {
    pipelines: [Pipeline; PipelineId::COUNT],
}

impl PipelineSet {
    pub fn new(pipelines: [Pipeline; PipelineId::COUNT]) -> Self {
        Self { pipelines }
    }

    #[inline]
    pub fn get(&self, id: PipelineId) -> &Pipeline {
        &self.pipelines[id.index()]
    }
}

/// Fixed-function state for one graphics pipeline.
///
/// Fixed: triangle list, one sample, opaque writes, no depth. Rasterization
/// defaults to filled polygons with back-face culling and counter-clockwise
/// front faces.
pub struct PipelineBuilder<'a> {
    vertex_shader: Option<&'a ShaderModule>,
    fragment_shader: Option<&'a ShaderModule>,
    vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    polygon_mode: vk::PolygonMode,
    cull_mode: vk::CullModeFlags,
    front_face: vk::FrontFace,
    set_layouts: Vec<vk::DescriptorSetLayout>,
    push_constants: Vec<vk::PushConstantRange>,
}

impl<'a> Default for PipelineBuilder<'a> {
    fn default() -> Self {
        Self {
            vertex_shader: None,
            fragment_shader: None,
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            set_layouts: Vec::new(),
            push_constants: Vec::new(),
        }
    }
}

impl<'a> PipelineBuilder<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shaders(mut self, vertex: &'a ShaderModule, fragment: &'a ShaderModule) -> Self {
        self.vertex_shader = Some(vertex);
        self.fragment_shader = Some(fragment);
        self
    }

    pub fn vertex_input(
        mut self,
        bindings: &[vk::VertexInputBindingDescription],
        attributes: &[vk::VertexInputAttributeDescription],
    ) -> Self {
        self.vertex_bindings = bindings.to_vec();
        self.vertex_attributes = attributes.to_vec();
        self
    }

    pub fn rasterization(
        mut self,
        polygon_mode: vk::PolygonMode,
        cull_mode: vk::CullModeFlags,
        front_face: vk::FrontFace,
    ) -> Self {
        self.polygon_mode = polygon_mode;
        self.cull_mode = cull_mode;
        self.front_face = front_face;
        self
    }

    pub fn layout(
        mut self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constants: &[vk::PushConstantRange],
    ) -> Self {
        self.set_layouts = set_layouts.to_vec();
        self.push_constants = push_constants.to_vec();
        self
    }

    /// Build against subpass 0 of `render_pass`.
    pub fn build(
        self,
        device: Arc<VulkanDevice>,
        render_pass: vk::RenderPass,
    ) -> EngineResult<Pipeline> {
        let (Some(vertex), Some(fragment)) = (self.vertex_shader, self.fragment_shader) else {
            return Err(EngineError::Shader(
                "pipeline needs a vertex and a fragment shader".into(),
            ));
        };

        // ─────────────────────────────────────────────────────────────────────
        // Shader stages
        // ─────────────────────────────────────────────────────────────────────
        let entry_point = c"main";
        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex.handle())
                .name(entry_point),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment.handle())
                .name(entry_point),
        ];

        // ─────────────────────────────────────────────────────────────────────
        // Fixed function
        // ─────────────────────────────────────────────────────────────────────
        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&self.vertex_bindings)
            .vertex_attribute_descriptions(&self.vertex_attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // Counts only; the actual rectangles are set per frame
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(self.polygon_mode)
            .line_width(1.0)
            .cull_mode(self.cull_mode)
            .front_face(self.front_face)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let color_blend_attachments = [opaque_blend_attachment()];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        // ─────────────────────────────────────────────────────────────────────
        // Layout
        // ─────────────────────────────────────────────────────────────────────
        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&self.set_layouts)
            .push_constant_ranges(&self.push_constants);

        let layout = unsafe { device.device.create_pipeline_layout(&layout_info, None) }
            .map_err(EngineError::creation("pipeline layout"))?;

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(0);

        let pipelines = unsafe {
            device
                .device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        };

        let pipeline = match pipelines {
            Ok(pipelines) => pipelines[0],
            Err((_, e)) => {
                unsafe { device.device.destroy_pipeline_layout(layout, None) };
                return Err(EngineError::creation("graphics pipeline")(e));
            }
        };

        Ok(Pipeline {
            pipeline,
            layout,
            device,
        })
    }
}
