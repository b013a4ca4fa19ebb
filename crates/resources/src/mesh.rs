//! Indexed meshes in device-local memory.
//!
//! A [`Mesh`] owns a vertex buffer and a 32-bit index buffer. Both are
//! uploaded through a [`TransferContext`] when the mesh is created and are
//! immutable afterwards.
//!
//! # Example
//!
//! ```no_run
//! use strand_resources::{Mesh, Vertex};
//! use strand_rhi::transfer::TransferContext;
//!
//! # fn example(transfer: &mut TransferContext) -> strand_resources::ResourceResult<()> {
//! let (vertices, indices) = Vertex::quad();
//! let quad = Mesh::from_vertices(transfer, "quad", &vertices, &indices)?;
//! assert_eq!(quad.index_count(), 6);
//! # Ok(())
//! # }
//! ```

use glam::Vec3;
use tracing::debug;

use strand_rhi::buffer::{Buffer, BufferUsage};
use strand_rhi::command::CommandBuffer;
use strand_rhi::transfer::TransferContext;
use strand_rhi::{Resource, ResourceKind, RhiResult, Shared, vk};

use crate::error::{ResourceError, ResourceResult};
use crate::vertex::Vertex;

/// Vertex and index buffers plus draw parameters.
pub struct Mesh {
    name: String,
    vertex_buffer: Shared<Buffer>,
    index_buffer: Shared<Buffer>,
    vertex_count: usize,
    index_count: u32,
    /// Axis-aligned bounds, when the vertex type has known positions.
    bounds: Option<(Vec3, Vec3)>,
}

impl Mesh {
    /// Uploads vertices of any plain-data type and their indices.
    ///
    /// # Errors
    ///
    /// - [`ResourceError::EmptyMesh`] if either slice is empty
    /// - [`ResourceError::IndexOutOfRange`] if an index has no vertex
    /// - [`ResourceError::Rhi`] if an upload fails
    pub fn upload<V: bytemuck::Pod>(
        transfer: &mut TransferContext,
        name: &str,
        vertices: &[V],
        indices: &[u32],
    ) -> ResourceResult<Shared<Self>> {
        Self::create(transfer, name, vertices, indices, None)
    }

    /// Uploads [`Vertex`] data and records the mesh's bounds.
    pub fn from_vertices(
        transfer: &mut TransferContext,
        name: &str,
        vertices: &[Vertex],
        indices: &[u32],
    ) -> ResourceResult<Shared<Self>> {
        let bounds = compute_bounds(vertices);
        Self::create(transfer, name, vertices, indices, bounds)
    }

    fn create<V: bytemuck::Pod>(
        transfer: &mut TransferContext,
        name: &str,
        vertices: &[V],
        indices: &[u32],
        bounds: Option<(Vec3, Vec3)>,
    ) -> ResourceResult<Shared<Self>> {
        if vertices.is_empty() || indices.is_empty() {
            return Err(ResourceError::EmptyMesh(name.to_string()));
        }
        if let Some(&index) = indices.iter().find(|&&i| i as usize >= vertices.len()) {
            return Err(ResourceError::IndexOutOfRange {
                index,
                vertex_count: vertices.len(),
            });
        }

        let vertex_buffer =
            transfer.upload_buffer(bytemuck::cast_slice(vertices), BufferUsage::Vertex)?;
        let index_buffer =
            transfer.upload_buffer(bytemuck::cast_slice(indices), BufferUsage::Index)?;

        debug!(
            "Created mesh '{}': {} vertices, {} triangles",
            name,
            vertices.len(),
            indices.len() / 3
        );
        Ok(Shared::new(Self {
            name: name.to_string(),
            vertex_buffer,
            index_buffer,
            vertex_count: vertices.len(),
            index_count: indices.len() as u32,
            bounds,
        }))
    }

    /// Records an indexed draw of `mesh`.
    ///
    /// The command buffer retains the mesh, and through it both buffers,
    /// until its next reset.
    pub fn draw(
        mesh: &Shared<Self>,
        command_buffer: &mut CommandBuffer,
        instance_count: u32,
    ) -> RhiResult<()> {
        command_buffer.use_resource(mesh)?;
        command_buffer.bind_vertex_buffer(0, &mesh.vertex_buffer, 0)?;
        command_buffer.bind_index_buffer(&mesh.index_buffer, 0, vk::IndexType::UINT32)?;
        command_buffer.draw_indexed(mesh.index_count, instance_count, 0, 0)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn vertex_buffer(&self) -> &Shared<Buffer> {
        &self.vertex_buffer
    }

    #[inline]
    pub fn index_buffer(&self) -> &Shared<Buffer> {
        &self.index_buffer
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    #[inline]
    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn triangle_count(&self) -> u32 {
        self.index_count / 3
    }

    /// Minimum and maximum corner of the bounding box, if known.
    pub fn bounds(&self) -> Option<(Vec3, Vec3)> {
        self.bounds
    }
}

impl Resource for Mesh {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Mesh
    }
}

impl Drop for Mesh {
    fn drop(&mut self) {
        debug!("Destroyed mesh '{}'", self.name);
    }
}

fn compute_bounds(vertices: &[Vertex]) -> Option<(Vec3, Vec3)> {
    let first = vertices.first()?.position;
    Some(vertices.iter().fold((first, first), |(min, max), v| {
        (min.min(v.position), max.max(v.position))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec2;

    #[test]
    fn test_bounds_of_quad() {
        let (vertices, _) = Vertex::quad();
        let (min, max) = compute_bounds(&vertices).unwrap();
        assert_eq!(min, Vec3::new(-0.5, -0.5, 0.0));
        assert_eq!(max, Vec3::new(0.5, 0.5, 0.0));
    }

    #[test]
    fn test_bounds_of_nothing() {
        assert!(compute_bounds(&[]).is_none());
    }

    #[test]
    fn test_bounds_single_point() {
        let point = Vertex::new(Vec3::new(1.0, -2.0, 3.0), Vec3::Y, Vec2::ZERO);
        assert_eq!(
            compute_bounds(&[point]),
            Some((point.position, point.position))
        );
    }
}
