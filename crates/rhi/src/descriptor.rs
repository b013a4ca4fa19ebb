//! Descriptor pools and sets.
//!
//! Set layouts are compiled elsewhere and passed in as raw handles. A
//! [`DescriptorSet`] holds its pool and returns itself to it on release;
//! the pool is destroyed once its last set is gone.

use ash::vk;
use tracing::debug;

use crate::backend::{BackendRef, DescriptorPoolDesc};
use crate::error::RhiResult;
use crate::image::ImageView;
use crate::resource::{Resource, ResourceKind, Shared};
use crate::sampler::Sampler;

/// Descriptor pool resource. Sets can be freed individually.
pub struct DescriptorPool {
    backend: BackendRef,
    pool: vk::DescriptorPool,
    max_sets: u32,
}

impl DescriptorPool {
    /// Creates a pool.
    ///
    /// # Arguments
    ///
    /// * `backend` - The device backend
    /// * `max_sets` - Maximum number of sets allocated at once
    /// * `pool_sizes` - Descriptor counts per type
    pub fn new(
        backend: BackendRef,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<Shared<Self>> {
        let pool = backend.create_descriptor_pool(&DescriptorPoolDesc {
            max_sets,
            pool_sizes,
        })?;
        debug!("Created descriptor pool for {} sets", max_sets);
        Ok(Shared::new(Self {
            backend,
            pool,
            max_sets,
        }))
    }

    /// A pool sized for `max_sets` single combined-image-sampler sets.
    pub fn for_samplers(backend: BackendRef, max_sets: u32) -> RhiResult<Shared<Self>> {
        let sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: max_sets,
        }];
        Self::new(backend, max_sets, &sizes)
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }
}

impl Resource for DescriptorPool {
    fn kind(&self) -> ResourceKind {
        ResourceKind::DescriptorPool
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        self.backend.destroy_descriptor_pool(self.pool);
        debug!("Destroyed descriptor pool");
    }
}

/// Descriptor set resource.
pub struct DescriptorSet {
    set: vk::DescriptorSet,
    pool: Shared<DescriptorPool>,
}

impl DescriptorSet {
    /// Allocates a set with `layout` from `pool`.
    pub fn allocate(
        pool: &Shared<DescriptorPool>,
        layout: vk::DescriptorSetLayout,
    ) -> RhiResult<Shared<Self>> {
        let set = pool.backend.allocate_descriptor_set(pool.handle(), layout)?;
        Ok(Shared::new(Self {
            set,
            pool: pool.acquire(),
        }))
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorSet {
        self.set
    }

    /// Points `binding` at a combined image sampler.
    ///
    /// The set does not hold the view or sampler; the owner of the set
    /// (a material, for instance) keeps them alive.
    pub fn write_image_sampler(&self, binding: u32, view: &ImageView, sampler: &Sampler) {
        self.pool
            .backend
            .write_image_sampler(self.set, binding, view.handle(), sampler.handle());
    }
}

impl Resource for DescriptorSet {
    fn kind(&self) -> ResourceKind {
        ResourceKind::DescriptorSet
    }
}

impl Drop for DescriptorSet {
    fn drop(&mut self) {
        self.pool
            .backend
            .free_descriptor_set(self.pool.handle(), self.set);
    }
}
