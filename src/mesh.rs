// =============================================================================
// MESH - Geometry and per-frame uniforms
// =============================================================================
//
// Geometry lives in device-local buffers filled once through the upload
// context. Uniforms live in host-visible buffers, one per frame slot, and
// are rewritten after that slot's fence wait.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use std::sync::Arc;

use crate::backend::buffer::{BufferKind, GpuBuffer};
use crate::backend::upload::UploadContext;
use crate::backend::VulkanDevice;
use crate::error::EngineResult;

// ─────────────────────────────────────────────────────────────────────────────
// VERTEX FORMAT
// ─────────────────────────────────────────────────────────────────────────────

/// Interleaved position / normal / color, 36 bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub color: Vec3,
}

impl Vertex {
    #[inline]
    pub const fn new(position: Vec3, normal: Vec3, color: Vec3) -> Self {
        Self {
            position,
            normal,
            color,
        }
    }

    pub fn binding_descriptions() -> [vk::VertexInputBindingDescription; 1] {
        [vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }]
    }

    /// Locations 0, 1, 2 match the vertex shader inputs.
    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
        [
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: std::mem::offset_of!(Vertex, position) as u32,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 1,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: std::mem::offset_of!(Vertex, normal) as u32,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 2,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: std::mem::offset_of!(Vertex, color) as u32,
            },
        ]
    }
}

/// Host-side geometry, ready for upload.
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Option<Vec<u32>>,
}

impl MeshData {
    /// Unit quad in the XY plane, one color per corner.
    pub fn quad() -> Self {
        let normal = Vec3::Z;
        Self {
            vertices: vec![
                Vertex::new(Vec3::new(-0.5, -0.5, 0.0), normal, Vec3::new(1.0, 0.0, 0.0)),
                Vertex::new(Vec3::new(0.5, -0.5, 0.0), normal, Vec3::new(0.0, 1.0, 0.0)),
                Vertex::new(Vec3::new(0.5, 0.5, 0.0), normal, Vec3::new(0.0, 0.0, 1.0)),
                Vertex::new(Vec3::new(-0.5, 0.5, 0.0), normal, Vec3::new(1.0, 1.0, 1.0)),
            ],
            indices: Some(vec![0, 1, 2, 2, 3, 0]),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// GPU MESH
// ─────────────────────────────────────────────────────────────────────────────

pub struct Mesh {
    vertex_buffer: GpuBuffer,
    vertex_count: u32,
    index_buffer: Option<GpuBuffer>,
    index_count: u32,
}

impl Mesh {
    /// Copy `data` into device-local buffers.
    ///
    /// Blocks until the copy has completed on the device, so the mesh can be
    /// drawn by the very next frame.
    pub fn upload(
        device: &Arc<VulkanDevice>,
        upload: &mut UploadContext,
        data: &MeshData,
    ) -> EngineResult<Self> {
        let vertex_staging =
            GpuBuffer::with_data(device.clone(), BufferKind::Staging, &data.vertices, "vertex staging")?;
        let vertex_buffer = GpuBuffer::new(
            device.clone(),
            BufferKind::Vertex,
            vertex_staging.size(),
            "vertices",
        )?;

        let index_staging = data
            .indices
            .as_deref()
            .map(|indices| {
                GpuBuffer::with_data(device.clone(), BufferKind::Staging, indices, "index staging")
            })
            .transpose()?;
        let index_buffer = index_staging
            .as_ref()
            .map(|staging| {
                GpuBuffer::new(device.clone(), BufferKind::Index, staging.size(), "indices")
            })
            .transpose()?;

        upload.submit_and_wait(|vk_device, cmd| {
            copy_whole(vk_device, cmd, &vertex_staging, &vertex_buffer);
            if let (Some(src), Some(dst)) = (&index_staging, &index_buffer) {
                copy_whole(vk_device, cmd, src, dst);
            }
        })?;

        // Staging buffers drop here; the copy has already retired
        log::info!(
            "Uploaded mesh: {} vertices, {} indices",
            data.vertices.len(),
            data.indices.as_ref().map_or(0, Vec::len)
        );

        Ok(Self {
            vertex_buffer,
            vertex_count: data.vertices.len() as u32,
            index_buffer,
            index_count: data.indices.as_ref().map_or(0, |i| i.len() as u32),
        })
    }

    /// Bind buffers and issue the draw. Expects a bound pipeline.
    pub fn draw(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        unsafe {
            device.cmd_bind_vertex_buffers(cmd, 0, &[self.vertex_buffer.handle()], &[0]);
            match &self.index_buffer {
                Some(indices) => {
                    device.cmd_bind_index_buffer(cmd, indices.handle(), 0, vk::IndexType::UINT32);
                    device.cmd_draw_indexed(cmd, self.index_count, 1, 0, 0, 0);
                }
                None => device.cmd_draw(cmd, self.vertex_count, 1, 0, 0),
            }
        }
    }
}

fn copy_whole(device: &ash::Device, cmd: vk::CommandBuffer, src: &GpuBuffer, dst: &GpuBuffer) {
    let region = vk::BufferCopy {
        src_offset: 0,
        dst_offset: 0,
        size: src.size(),
    };
    unsafe { device.cmd_copy_buffer(cmd, src.handle(), dst.handle(), &[region]) };
}

// ─────────────────────────────────────────────────────────────────────────────
// UNIFORMS
// ─────────────────────────────────────────────────────────────────────────────

/// Per-frame transforms, `set = 0, binding = 0` in the vertex shader.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct UniformBufferObject {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}

impl UniformBufferObject {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Transforms for `elapsed` seconds since start on a target of `extent`.
    ///
    /// The model spins at 90 degrees per second around +Z, the camera sits
    /// at (2, 2, 2) looking at the origin with +Z up.
    pub fn compute(elapsed: f32, extent: vk::Extent2D) -> Self {
        let model = Mat4::from_rotation_z(elapsed * 90f32.to_radians());
        let view = Mat4::look_at_rh(Vec3::splat(2.0), Vec3::ZERO, Vec3::Z);

        let aspect = if extent.height == 0 {
            1.0
        } else {
            extent.width as f32 / extent.height as f32
        };
        let mut proj = Mat4::perspective_rh(45f32.to_radians(), aspect, 0.1, 10.0);
        // GL-style projection has Y up; Vulkan clip space has Y down
        proj.y_axis.y *= -1.0;

        Self { model, view, proj }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn vertex_layout_matches_shader_inputs() {
        assert_eq!(std::mem::size_of::<Vertex>(), 36);

        let binding = Vertex::binding_descriptions()[0];
        assert_eq!(binding.stride, 36);

        let offsets: Vec<u32> = Vertex::attribute_descriptions()
            .iter()
            .map(|a| a.offset)
            .collect();
        assert_eq!(offsets, vec![0, 12, 24]);

        let locations: Vec<u32> = Vertex::attribute_descriptions()
            .iter()
            .map(|a| a.location)
            .collect();
        assert_eq!(locations, vec![0, 1, 2]);
    }

    #[test]
    fn quad_indices_stay_in_range() {
        let quad = MeshData::quad();
        let indices = quad.indices.expect("quad is indexed");
        assert_eq!(indices.len(), 6);
        assert!(indices.iter().all(|&i| (i as usize) < quad.vertices.len()));
    }

    #[test]
    fn ubo_is_three_matrices() {
        assert_eq!(UniformBufferObject::SIZE, 3 * 64);
    }

    #[test]
    fn model_rotates_quarter_turn_per_second() {
        let ubo = UniformBufferObject::compute(1.0, extent(800, 600));
        let rotated = ubo.model * Vec4::new(1.0, 0.0, 0.0, 1.0);
        assert!((rotated.x).abs() < 1e-5);
        assert!((rotated.y - 1.0).abs() < 1e-5);
        assert!((rotated.z).abs() < 1e-5);
    }

    #[test]
    fn aspect_is_width_over_height() {
        let wide = UniformBufferObject::compute(0.0, extent(1600, 800));
        let square = UniformBufferObject::compute(0.0, extent(800, 800));
        // x scale = f / aspect, y scale = f
        let ratio = square.proj.x_axis.x / wide.proj.x_axis.x;
        assert!((ratio - 2.0).abs() < 1e-5);
    }

    #[test]
    fn zero_height_falls_back_to_square_aspect() {
        let degenerate = UniformBufferObject::compute(0.0, extent(800, 0));
        let square = UniformBufferObject::compute(0.0, extent(600, 600));
        assert_eq!(degenerate.proj, square.proj);
    }

    #[test]
    fn projection_flips_y_for_vulkan() {
        let ubo = UniformBufferObject::compute(0.0, extent(800, 800));
        assert!(ubo.proj.y_axis.y < 0.0);
        assert!(ubo.proj.x_axis.x > 0.0);
    }
}
