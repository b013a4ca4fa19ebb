//! Default vertex format.
//!
//! [`Mesh`](crate::Mesh) accepts any `bytemuck::Pod` vertex type. [`Vertex`]
//! is the one used when nothing more specific is needed: position, normal
//! and texture coordinates, tightly packed.
//!
//! # Memory Layout
//!
//! `#[repr(C)]`, 32 bytes:
//! - Offset 0: position (12 bytes), location 0
//! - Offset 12: normal (12 bytes), location 1
//! - Offset 24: uv (8 bytes), location 2

use std::mem::{offset_of, size_of};

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};
use strand_rhi::vk;

/// Position, normal and texture coordinates.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    /// Object-space position.
    pub position: Vec3,
    /// Surface normal, expected to be normalized.
    pub normal: Vec3,
    pub uv: Vec2,
}

impl Vertex {
    #[inline]
    pub const fn new(position: Vec3, normal: Vec3, uv: Vec2) -> Self {
        Self {
            position,
            normal,
            uv,
        }
    }

    /// Vertex input binding 0, per-vertex rate.
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
        [
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Self, position) as u32,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 1,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Self, normal) as u32,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 2,
                format: vk::Format::R32G32_SFLOAT,
                offset: offset_of!(Self, uv) as u32,
            },
        ]
    }

    /// A unit quad in the XY plane facing +Z, as four vertices and two
    /// counter-clockwise triangles.
    pub fn quad() -> ([Vertex; 4], [u32; 6]) {
        let normal = Vec3::Z;
        (
            [
                Vertex::new(Vec3::new(-0.5, -0.5, 0.0), normal, Vec2::new(0.0, 1.0)),
                Vertex::new(Vec3::new(0.5, -0.5, 0.0), normal, Vec2::new(1.0, 1.0)),
                Vertex::new(Vec3::new(0.5, 0.5, 0.0), normal, Vec2::new(1.0, 0.0)),
                Vertex::new(Vec3::new(-0.5, 0.5, 0.0), normal, Vec2::new(0.0, 0.0)),
            ],
            [0, 1, 2, 2, 3, 0],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_size() {
        // Vec3 (12) + Vec3 (12) + Vec2 (8)
        assert_eq!(size_of::<Vertex>(), 32);
        assert_eq!(Vertex::binding_description().stride, 32);
    }

    #[test]
    fn test_vertex_attribute_descriptions() {
        let attrs = Vertex::attribute_descriptions();
        let offsets: Vec<u32> = attrs.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 24]);
        for (location, attr) in attrs.iter().enumerate() {
            assert_eq!(attr.location, location as u32);
            assert_eq!(attr.binding, 0);
        }
        assert_eq!(attrs[2].format, vk::Format::R32G32_SFLOAT);
    }

    #[test]
    fn test_vertex_bytes() {
        let vertex = Vertex::new(Vec3::new(1.0, 2.0, 3.0), Vec3::Y, Vec2::ONE);
        let floats: &[f32] = bytemuck::cast_slice(bytemuck::bytes_of(&vertex));
        assert_eq!(floats, &[1.0, 2.0, 3.0, 0.0, 1.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_quad_indices_in_range() {
        let (vertices, indices) = Vertex::quad();
        assert!(indices.iter().all(|&i| (i as usize) < vertices.len()));
    }
}
