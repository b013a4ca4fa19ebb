//! Texture samplers.

use ash::vk;
use tracing::debug;

use crate::backend::{BackendRef, SamplerDesc};
use crate::error::RhiResult;
use crate::resource::{Resource, ResourceKind, Shared};

/// Sampler resource.
pub struct Sampler {
    backend: BackendRef,
    sampler: vk::Sampler,
    desc: SamplerDesc,
}

impl Sampler {
    pub fn new(backend: BackendRef, desc: SamplerDesc) -> RhiResult<Shared<Self>> {
        let sampler = backend.create_sampler(&desc)?;
        debug!(
            "Created sampler ({:?}, {:?})",
            desc.filter, desc.address_mode
        );
        Ok(Shared::new(Self {
            backend,
            sampler,
            desc,
        }))
    }

    /// Linear filtering with repeat addressing.
    pub fn linear(backend: BackendRef) -> RhiResult<Shared<Self>> {
        Self::new(backend, SamplerDesc::default())
    }

    /// Nearest filtering with edge clamping, for pixel-exact lookups.
    pub fn nearest_clamped(backend: BackendRef) -> RhiResult<Shared<Self>> {
        Self::new(
            backend,
            SamplerDesc {
                filter: vk::Filter::NEAREST,
                address_mode: vk::SamplerAddressMode::CLAMP_TO_EDGE,
                max_anisotropy: None,
            },
        )
    }

    #[inline]
    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }

    pub fn desc(&self) -> &SamplerDesc {
        &self.desc
    }
}

impl Resource for Sampler {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Sampler
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.backend.destroy_sampler(self.sampler);
        debug!("Destroyed sampler");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockBackend, ObjectKind};

    #[test]
    fn test_sampler_presets() {
        let mock = MockBackend::new();
        let linear = Sampler::linear(mock.backend()).unwrap();
        let nearest = Sampler::nearest_clamped(mock.backend()).unwrap();
        assert_eq!(linear.desc().filter, vk::Filter::LINEAR);
        assert_eq!(
            nearest.desc().address_mode,
            vk::SamplerAddressMode::CLAMP_TO_EDGE
        );
        assert_eq!(mock.live(ObjectKind::Sampler), 2);
        drop((linear, nearest));
        assert_eq!(mock.live(ObjectKind::Sampler), 0);
    }
}
