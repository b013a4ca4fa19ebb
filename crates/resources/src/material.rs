//! Textured materials.
//!
//! A [`Material`] combines a base colour factor with a texture and a
//! sampler, written into a descriptor set as one combined image sampler at
//! binding 0. The material holds every child; binding it retains the
//! material, so the texture, sampler and set stay alive for as long as any
//! recording that used them.
//!
//! # Example
//!
//! ```no_run
//! use glam::Vec4;
//! use strand_resources::Material;
//! use strand_rhi::descriptor::DescriptorPool;
//! use strand_rhi::image::Texture;
//! use strand_rhi::sampler::Sampler;
//! use strand_rhi::{BackendRef, Shared, vk};
//!
//! # fn example(
//! #     backend: BackendRef,
//! #     texture: Shared<Texture>,
//! #     layout: vk::DescriptorSetLayout,
//! # ) -> strand_resources::ResourceResult<()> {
//! let pool = DescriptorPool::for_samplers(backend.clone(), 16)?;
//! let sampler = Sampler::linear(backend)?;
//! let material = Material::new(&pool, layout, texture, sampler, Vec4::ONE)?;
//! # Ok(())
//! # }
//! ```

use bytemuck::{Pod, Zeroable};
use glam::Vec4;
use tracing::debug;

use strand_rhi::command::CommandBuffer;
use strand_rhi::descriptor::{DescriptorPool, DescriptorSet};
use strand_rhi::image::Texture;
use strand_rhi::pipeline::Pipeline;
use strand_rhi::sampler::Sampler;
use strand_rhi::{Resource, ResourceKind, RhiResult, Shared, vk};

use crate::error::ResourceResult;

/// Binding of the combined image sampler within the material's set.
pub const TEXTURE_BINDING: u32 = 0;

/// Per-material shader constants.
///
/// 16 bytes, valid for both push constants and std140 uniform buffers.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct MaterialUniform {
    pub base_color: Vec4,
}

/// Texture, sampler and descriptor set for one surface appearance.
pub struct Material {
    base_color: Vec4,
    texture: Shared<Texture>,
    sampler: Shared<Sampler>,
    descriptor_set: Shared<DescriptorSet>,
}

impl Material {
    /// Allocates a descriptor set from `pool` and points it at `texture`
    /// and `sampler`.
    ///
    /// # Arguments
    ///
    /// * `pool` - Pool with room for a combined image sampler
    /// * `layout` - Set layout with a combined image sampler at [`TEXTURE_BINDING`]
    /// * `texture` - Sampled texture, in `SHADER_READ_ONLY_OPTIMAL`
    /// * `sampler` - Sampler used with the texture
    /// * `base_color` - Colour factor multiplied with the texture
    ///
    /// # Errors
    ///
    /// Returns an error if the descriptor set cannot be allocated.
    pub fn new(
        pool: &Shared<DescriptorPool>,
        layout: vk::DescriptorSetLayout,
        texture: Shared<Texture>,
        sampler: Shared<Sampler>,
        base_color: Vec4,
    ) -> ResourceResult<Shared<Self>> {
        let descriptor_set = DescriptorSet::allocate(pool, layout)?;
        descriptor_set.write_image_sampler(TEXTURE_BINDING, texture.view(), &sampler);
        debug!(
            "Created material: {}x{} texture, base colour {:?}",
            texture.extent().width,
            texture.extent().height,
            base_color
        );
        Ok(Shared::new(Self {
            base_color,
            texture,
            sampler,
            descriptor_set,
        }))
    }

    /// Binds the material's descriptor set at `set_index` of `pipeline`'s
    /// layout, retaining the material for the rest of the recording.
    pub fn bind(
        material: &Shared<Self>,
        command_buffer: &mut CommandBuffer,
        pipeline: &Shared<Pipeline>,
        set_index: u32,
    ) -> RhiResult<()> {
        command_buffer.use_resource(material)?;
        command_buffer.bind_descriptor_set(pipeline, set_index, &material.descriptor_set)
    }

    #[inline]
    pub fn base_color(&self) -> Vec4 {
        self.base_color
    }

    pub fn uniform(&self) -> MaterialUniform {
        MaterialUniform {
            base_color: self.base_color,
        }
    }

    #[inline]
    pub fn texture(&self) -> &Shared<Texture> {
        &self.texture
    }

    #[inline]
    pub fn sampler(&self) -> &Shared<Sampler> {
        &self.sampler
    }

    #[inline]
    pub fn descriptor_set(&self) -> &Shared<DescriptorSet> {
        &self.descriptor_set
    }
}

impl Resource for Material {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Material
    }
}
