//! Reference-counted GPU resources.
//!
//! Every GPU-backed object is handed out as a [`Shared<T>`]. The count
//! starts at one when the factory returns, [`Shared::acquire`] adds a
//! holder and [`Shared::release`] removes one. When the last holder goes
//! away the object's `Drop` runs on the releasing thread, destroys the
//! backend handle and releases any child resources it owns, so
//! destruction cascades.
//!
//! Releasing consumes the handle, so a release without a matching acquire
//! cannot be expressed.
//!
//! # Example
//!
//! ```no_run
//! use strand_rhi::buffer::{Buffer, BufferUsage};
//! use strand_rhi::BackendRef;
//!
//! # fn example(backend: BackendRef) -> strand_rhi::RhiResult<()> {
//! let buffer = Buffer::new(backend, 256, BufferUsage::Uniform)?;
//! let holder = buffer.acquire();
//! assert_eq!(buffer.ref_count(), 2);
//!
//! buffer.release();
//! assert_eq!(holder.ref_count(), 1);
//! holder.release(); // destroyed here
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// The kind of a GPU-backed object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Buffer,
    Image,
    ImageView,
    Texture,
    Sampler,
    ShaderModule,
    RenderPass,
    Framebuffer,
    Pipeline,
    DescriptorPool,
    DescriptorSet,
    CommandPool,
    Swapchain,
    Mesh,
    Material,
}

/// Anything a command buffer can keep alive.
pub trait Resource: Send + Sync + 'static {
    fn kind(&self) -> ResourceKind;
}

/// Shared ownership of a GPU resource.
pub struct Shared<T: ?Sized>(Arc<T>);

impl<T: Resource> Shared<T> {
    /// Wrap a freshly created resource with a count of one.
    pub fn new(resource: T) -> Self {
        Self(Arc::new(resource))
    }

    /// Type-erased strong reference, used for command buffer retention.
    pub fn erase(&self) -> Arc<dyn Resource> {
        self.0.clone()
    }
}

impl<T: ?Sized> Shared<T> {
    /// Add a holder. Never fails.
    #[inline]
    pub fn acquire(&self) -> Self {
        Self(Arc::clone(&self.0))
    }

    /// Drop this holder. The resource is finalized if it was the last one.
    #[inline]
    pub fn release(self) {
        drop(self);
    }

    /// Current number of holders, including command buffer retentions.
    #[inline]
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Whether two handles refer to the same resource.
    #[inline]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }
}

impl<T: ?Sized> Clone for Shared<T> {
    fn clone(&self) -> Self {
        self.acquire()
    }
}

impl<T: ?Sized> Deref for Shared<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("ref_count", &self.ref_count())
            .field("resource", &&*self.0)
            .finish()
    }
}

/// Address of a resource allocation, used to compare erased references.
pub(crate) fn identity(resource: &Arc<dyn Resource>) -> *const () {
    Arc::as_ptr(resource) as *const ()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Probe {
        finalized: Arc<AtomicUsize>,
        _child: Option<Shared<Probe>>,
    }

    impl Probe {
        fn new(finalized: &Arc<AtomicUsize>) -> Self {
            Self {
                finalized: finalized.clone(),
                _child: None,
            }
        }
    }

    impl Resource for Probe {
        fn kind(&self) -> ResourceKind {
            ResourceKind::Buffer
        }
    }

    impl Drop for Probe {
        fn drop(&mut self) {
            self.finalized.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_new_starts_at_one() {
        let finalized = Arc::new(AtomicUsize::new(0));
        let probe = Shared::new(Probe::new(&finalized));
        assert_eq!(probe.ref_count(), 1);
    }

    #[test]
    fn test_acquire_release_nets_to_original() {
        let finalized = Arc::new(AtomicUsize::new(0));
        let probe = Shared::new(Probe::new(&finalized));

        let holders: Vec<_> = (0..8).map(|_| probe.acquire()).collect();
        assert_eq!(probe.ref_count(), 9);
        for holder in holders {
            holder.release();
        }
        assert_eq!(probe.ref_count(), 1);
        assert_eq!(finalized.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_finalized_once_at_zero() {
        let finalized = Arc::new(AtomicUsize::new(0));
        let probe = Shared::new(Probe::new(&finalized));
        let other = probe.acquire();

        probe.release();
        assert_eq!(finalized.load(Ordering::SeqCst), 0);
        other.release();
        assert_eq!(finalized.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_release_cascades_to_children() {
        let finalized = Arc::new(AtomicUsize::new(0));
        let child = Shared::new(Probe::new(&finalized));
        let parent = Shared::new(Probe {
            finalized: finalized.clone(),
            _child: Some(child.acquire()),
        });

        child.release();
        assert_eq!(finalized.load(Ordering::SeqCst), 0);
        parent.release();
        assert_eq!(finalized.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_erased_reference_keeps_alive() {
        let finalized = Arc::new(AtomicUsize::new(0));
        let probe = Shared::new(Probe::new(&finalized));
        let erased = probe.erase();
        assert_eq!(erased.kind(), ResourceKind::Buffer);

        probe.release();
        assert_eq!(finalized.load(Ordering::SeqCst), 0);
        drop(erased);
        assert_eq!(finalized.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_ptr_eq() {
        let finalized = Arc::new(AtomicUsize::new(0));
        let a = Shared::new(Probe::new(&finalized));
        let b = Shared::new(Probe::new(&finalized));
        assert!(Shared::ptr_eq(&a, &a.acquire()));
        assert!(!Shared::ptr_eq(&a, &b));
    }

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_shared_is_send_sync() {
        assert_send_sync::<Shared<Probe>>();
    }
}
