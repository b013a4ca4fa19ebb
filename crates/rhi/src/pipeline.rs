//! Pipeline resources.
//!
//! Pipeline state construction (vertex layout, blend and raster tables)
//! lives outside the engine core. Whoever builds a pipeline hands the
//! handles to [`Pipeline::adopt`], after which the pipeline is an ordinary
//! shared resource: command buffers that bind it keep it alive, and the
//! last release destroys the pipeline and its layout.
//!
//! # Example
//!
//! ```no_run
//! use strand_rhi::pipeline::Pipeline;
//! use strand_rhi::{BackendRef, vk};
//!
//! # fn example(backend: BackendRef, built: vk::Pipeline, layout: vk::PipelineLayout) {
//! let pipeline = Pipeline::adopt(backend, built, layout, vk::PipelineBindPoint::GRAPHICS);
//! # }
//! ```

use ash::vk;
use tracing::debug;

use crate::backend::BackendRef;
use crate::resource::{Resource, ResourceKind, Shared};

/// Pipeline resource owning a pipeline and its layout.
///
/// # Thread Safety
///
/// The pipeline is immutable after creation and can be shared between
/// threads.
pub struct Pipeline {
    backend: BackendRef,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    bind_point: vk::PipelineBindPoint,
}

impl Pipeline {
    /// Takes ownership of an externally created pipeline and layout.
    pub fn adopt(
        backend: BackendRef,
        pipeline: vk::Pipeline,
        layout: vk::PipelineLayout,
        bind_point: vk::PipelineBindPoint,
    ) -> Shared<Self> {
        debug!("Adopted {:?} pipeline", bind_point);
        Shared::new(Self {
            backend,
            pipeline,
            layout,
            bind_point,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    #[inline]
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    /// Returns the pipeline bind point (graphics or compute).
    #[inline]
    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        self.bind_point
    }
}

impl Resource for Pipeline {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Pipeline
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.backend.destroy_pipeline(self.pipeline);
        self.backend.destroy_pipeline_layout(self.layout);
        debug!("{:?} pipeline destroyed", self.bind_point);
    }
}
