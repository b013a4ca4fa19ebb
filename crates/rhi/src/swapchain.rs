//! Swapchain management.
//!
//! The [`Swapchain`] owns the presentable textures of a surface and the
//! acquire/present protocol around them.
//!
//! # Overview
//!
//! - [`Swapchain::acquire_next_image`] returns [`Acquired::OutOfDate`]
//!   when the surface no longer matches; the caller rebuilds and retries.
//! - [`Swapchain::present`] reports [`SurfaceStatus`] the same way.
//! - [`Swapchain::recreate`] rebuilds in place. The [`Swapchain`] value
//!   keeps its identity, while the backend handle is replaced and the
//!   generation counter advances.
//! - Image indices carry the generation they were acquired from;
//!   presenting one from an older generation is an error.
//!
//! The backend handle itself is a shared [`SwapchainHandle`] held by every
//! presentable image, so a retired swapchain is destroyed only once the
//! last texture or framebuffer built on its images has been released.
//!
//! # Example
//!
//! ```no_run
//! use strand_core::PresentModePreference;
//! use strand_rhi::swapchain::{Acquired, Swapchain};
//! use strand_rhi::sync::Semaphore;
//! use strand_rhi::{BackendRef, vk};
//!
//! # fn example(backend: BackendRef) -> strand_rhi::RhiResult<()> {
//! let extent = vk::Extent2D { width: 1280, height: 720 };
//! let mut swapchain = Swapchain::new(backend.clone(), extent, PresentModePreference::Mailbox)?;
//! let image_available = Semaphore::new(backend)?;
//!
//! match swapchain.acquire_next_image(&image_available)? {
//!     Acquired::Image { image, .. } => {
//!         // record, submit, then present `image`
//!         let _ = image;
//!     }
//!     Acquired::OutOfDate => swapchain.recreate(extent)?,
//! }
//! # Ok(())
//! # }
//! ```

use ash::vk;
use strand_core::PresentModePreference;
use tracing::{debug, info, warn};

use crate::backend::{BackendRef, SurfaceStatus, SurfaceSupport, SwapchainDesc};
use crate::error::{RhiError, RhiResult};
use crate::image::{Image, Texture};
use crate::resource::{Resource, ResourceKind, Shared};
use crate::sync::Semaphore;

/// Backend swapchain handle, destroyed when its last image is released.
pub struct SwapchainHandle {
    backend: BackendRef,
    swapchain: vk::SwapchainKHR,
    generation: u64,
}

impl SwapchainHandle {
    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Resource for SwapchainHandle {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Swapchain
    }
}

impl Drop for SwapchainHandle {
    fn drop(&mut self) {
        self.backend.destroy_swapchain(self.swapchain);
        debug!("Destroyed swapchain generation {}", self.generation);
    }
}

/// An acquired image index, tagged with the swapchain generation it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainImage {
    pub index: u32,
    pub generation: u64,
}

/// Result of an acquire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquired {
    /// An image is ready once the signal semaphore fires.
    Image {
        image: SwapchainImage,
        suboptimal: bool,
    },
    /// The swapchain no longer matches the surface. Nothing was signaled.
    OutOfDate,
}

/// Swapchain wrapper.
pub struct Swapchain {
    backend: BackendRef,
    preference: PresentModePreference,
    handle: Shared<SwapchainHandle>,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
    textures: Vec<Shared<Texture>>,
    generation: u64,
}

struct Built {
    handle: Shared<SwapchainHandle>,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
    textures: Vec<Shared<Texture>>,
}

impl Swapchain {
    /// Creates a swapchain for the backend's surface.
    ///
    /// # Arguments
    ///
    /// * `backend` - The device backend owning the surface
    /// * `requested` - Window size, used when the surface leaves the extent to us
    /// * `preference` - Preferred present mode, FIFO if unsupported
    ///
    /// # Errors
    ///
    /// Returns an error if the surface is unusable or has zero extent.
    pub fn new(
        backend: BackendRef,
        requested: vk::Extent2D,
        preference: PresentModePreference,
    ) -> RhiResult<Self> {
        let built = build(&backend, requested, preference, vk::SwapchainKHR::null(), 0)?;
        info!(
            "Swapchain created: {}x{}, {} images, {:?}, {:?}",
            built.extent.width,
            built.extent.height,
            built.textures.len(),
            built.format.format,
            built.present_mode
        );
        Ok(Self {
            backend,
            preference,
            handle: built.handle,
            format: built.format,
            extent: built.extent,
            present_mode: built.present_mode,
            textures: built.textures,
            generation: 0,
        })
    }

    /// Rebuilds the swapchain in place against the current surface.
    ///
    /// The caller must have waited for the device to go idle. Image
    /// indices acquired before this call become invalid.
    ///
    /// # Errors
    ///
    /// On failure the previous swapchain is left in place.
    pub fn recreate(&mut self, requested: vk::Extent2D) -> RhiResult<()> {
        let generation = self.generation + 1;
        let built = build(
            &self.backend,
            requested,
            self.preference,
            self.handle.handle(),
            generation,
        )?;

        // Old textures go now; the old handle goes with its last user.
        self.handle = built.handle;
        self.format = built.format;
        self.extent = built.extent;
        self.present_mode = built.present_mode;
        self.textures = built.textures;
        self.generation = generation;

        info!(
            "Swapchain recreated: {}x{}, {} images (generation {})",
            self.extent.width,
            self.extent.height,
            self.textures.len(),
            self.generation
        );
        Ok(())
    }

    /// The extent a build would use right now, without building.
    ///
    /// A zero area means the window is minimized.
    pub fn surface_extent(backend: &BackendRef, requested: vk::Extent2D) -> RhiResult<vk::Extent2D> {
        let support = backend.surface_support()?;
        Ok(choose_extent(
            &support.capabilities,
            requested.width,
            requested.height,
        ))
    }

    /// Acquires the next image, signaling `signal` when it is ready.
    ///
    /// Waits without timeout; a surface that never yields an image is
    /// treated as a hung device.
    pub fn acquire_next_image(&self, signal: &Semaphore) -> RhiResult<Acquired> {
        let (index, status) =
            self.backend
                .acquire_next_image(self.handle.handle(), u64::MAX, signal.handle())?;
        Ok(match status {
            SurfaceStatus::OutOfDate => Acquired::OutOfDate,
            status => Acquired::Image {
                image: SwapchainImage {
                    index,
                    generation: self.generation,
                },
                suboptimal: status == SurfaceStatus::Suboptimal,
            },
        })
    }

    /// Presents `image` once `wait` signals.
    ///
    /// # Errors
    ///
    /// [`RhiError::StaleSwapchainImage`] if `image` was acquired before the
    /// last rebuild.
    pub fn present(&self, image: SwapchainImage, wait: &Semaphore) -> RhiResult<SurfaceStatus> {
        if image.generation != self.generation {
            return Err(RhiError::StaleSwapchainImage {
                index: image.index,
                image_generation: image.generation,
                current_generation: self.generation,
            });
        }
        if image.index as usize >= self.textures.len() {
            return Err(RhiError::SwapchainError(format!(
                "image index {} out of range ({} images)",
                image.index,
                self.textures.len()
            )));
        }
        self.backend
            .queue_present(self.handle.handle(), image.index, wait.handle())
    }

    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle.handle()
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format.format
    }

    #[inline]
    pub fn surface_format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    #[inline]
    pub fn image_count(&self) -> usize {
        self.textures.len()
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Presentable textures, indexed by acquired image index.
    pub fn textures(&self) -> &[Shared<Texture>] {
        &self.textures
    }

    pub fn texture(&self, image: SwapchainImage) -> Option<&Shared<Texture>> {
        if image.generation != self.generation {
            return None;
        }
        self.textures.get(image.index as usize)
    }
}

fn build(
    backend: &BackendRef,
    requested: vk::Extent2D,
    preference: PresentModePreference,
    old_swapchain: vk::SwapchainKHR,
    generation: u64,
) -> RhiResult<Built> {
    let support: SurfaceSupport = backend.surface_support()?;
    if !support.is_adequate() {
        return Err(RhiError::SwapchainError(
            "surface reports no formats or present modes".into(),
        ));
    }

    let format = choose_surface_format(&support.formats);
    let present_mode = choose_present_mode(&support.present_modes, preference);
    let extent = choose_extent(&support.capabilities, requested.width, requested.height);
    if extent.width == 0 || extent.height == 0 {
        return Err(RhiError::SwapchainError(format!(
            "surface extent is {}x{}",
            extent.width, extent.height
        )));
    }
    let image_count = determine_image_count(&support.capabilities);

    let swapchain = backend.create_swapchain(
        &SwapchainDesc {
            format,
            extent,
            present_mode,
            image_count,
            pre_transform: support.capabilities.current_transform,
        },
        old_swapchain,
    )?;
    let handle = Shared::new(SwapchainHandle {
        backend: backend.clone(),
        swapchain,
        generation,
    });

    let textures = backend
        .swapchain_images(swapchain)?
        .into_iter()
        .map(|image| {
            Texture::from_image(Image::from_swapchain(
                backend.clone(),
                &handle,
                image,
                extent,
                format.format,
            ))
        })
        .collect::<RhiResult<Vec<_>>>()?;

    Ok(Built {
        handle,
        format,
        extent,
        present_mode,
        textures,
    })
}

/// Chooses the best surface format from the available formats.
///
/// Prefers B8G8R8A8_SRGB with SRGB_NONLINEAR color space.
/// Falls back to the first available format if the preferred format is not available.
fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    // Prefer SRGB format for correct gamma handling
    let preferred = formats.iter().find(|f| {
        f.format == vk::Format::B8G8R8A8_SRGB && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    });

    if let Some(&format) = preferred {
        debug!("Selected preferred surface format: B8G8R8A8_SRGB with SRGB_NONLINEAR");
        return format;
    }

    // Second choice: B8G8R8A8_UNORM with SRGB color space
    let alternative = formats.iter().find(|f| {
        f.format == vk::Format::B8G8R8A8_UNORM && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    });

    if let Some(&format) = alternative {
        warn!("Using fallback surface format: B8G8R8A8_UNORM with SRGB_NONLINEAR");
        return format;
    }

    // Last resort: use the first available format
    warn!(
        "Using first available surface format: {:?}",
        formats[0].format
    );
    formats[0]
}

/// Chooses the present mode.
///
/// Uses the configured preference when the surface supports it and falls
/// back to FIFO, which every surface supports.
fn choose_present_mode(
    present_modes: &[vk::PresentModeKHR],
    preference: PresentModePreference,
) -> vk::PresentModeKHR {
    let preferred = match preference {
        PresentModePreference::Fifo => vk::PresentModeKHR::FIFO,
        PresentModePreference::Mailbox => vk::PresentModeKHR::MAILBOX,
        PresentModePreference::Immediate => vk::PresentModeKHR::IMMEDIATE,
    };

    if present_modes.contains(&preferred) {
        debug!("Selected {:?} present mode", preferred);
        return preferred;
    }

    warn!("{:?} present mode unsupported, using FIFO", preferred);
    vk::PresentModeKHR::FIFO
}

/// Chooses the swapchain extent (resolution).
///
/// If the current extent is not set (width/height are u32::MAX),
/// clamps the requested size to the surface's min/max extents.
fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    // If current extent is defined, use it
    if capabilities.current_extent.width != u32::MAX {
        debug!(
            "Using current surface extent: {}x{}",
            capabilities.current_extent.width, capabilities.current_extent.height
        );
        return capabilities.current_extent;
    }

    // Otherwise, clamp the requested size to the surface's limits
    let extent = vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    };

    debug!(
        "Calculated extent: {}x{} (requested: {}x{}, min: {}x{}, max: {}x{})",
        extent.width,
        extent.height,
        width,
        height,
        capabilities.min_image_extent.width,
        capabilities.min_image_extent.height,
        capabilities.max_image_extent.width,
        capabilities.max_image_extent.height
    );

    extent
}

/// Determines the optimal number of swapchain images.
///
/// Prefers one more than the minimum (for triple buffering),
/// but respects the maximum if set.
fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;

    // If max_image_count is 0, there's no maximum
    let image_count = if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    };

    debug!(
        "Image count: {} (min: {}, max: {})",
        image_count,
        capabilities.min_image_count,
        if capabilities.max_image_count == 0 {
            "unlimited".to_string()
        } else {
            capabilities.max_image_count.to_string()
        }
    );

    image_count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockBackend, ObjectKind};

    #[test]
    fn test_choose_surface_format_prefers_srgb() {
        let formats = vec![
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];

        let selected = choose_surface_format(&formats);
        assert_eq!(selected.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(selected.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn test_choose_surface_format_fallback() {
        let formats = vec![vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];

        let selected = choose_surface_format(&formats);
        assert_eq!(selected.format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn test_choose_present_mode_uses_preference() {
        let modes = vec![
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
        ];

        assert_eq!(
            choose_present_mode(&modes, PresentModePreference::Mailbox),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&modes, PresentModePreference::Immediate),
            vk::PresentModeKHR::IMMEDIATE
        );
    }

    #[test]
    fn test_choose_present_mode_fallback_to_fifo() {
        let modes = vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];

        let selected = choose_present_mode(&modes, PresentModePreference::Mailbox);
        assert_eq!(selected, vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_choose_extent_uses_current() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        };

        let extent = choose_extent(&capabilities, 800, 600);
        assert_eq!(extent.width, 1920);
        assert_eq!(extent.height, 1080);
    }

    #[test]
    fn test_choose_extent_clamps_to_limits() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 100,
                height: 100,
            },
            max_image_extent: vk::Extent2D {
                width: 2000,
                height: 2000,
            },
            ..Default::default()
        };

        // Test clamping to max
        let extent = choose_extent(&capabilities, 3000, 3000);
        assert_eq!(extent.width, 2000);
        assert_eq!(extent.height, 2000);

        // Test clamping to min
        let extent = choose_extent(&capabilities, 50, 50);
        assert_eq!(extent.width, 100);
        assert_eq!(extent.height, 100);

        // Test within range
        let extent = choose_extent(&capabilities, 800, 600);
        assert_eq!(extent.width, 800);
        assert_eq!(extent.height, 600);
    }

    #[test]
    fn test_determine_image_count() {
        // Test with max limit
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&capabilities), 3);

        // Test with higher max limit
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 8,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&capabilities), 3);

        // Test with no max limit
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0, // 0 means no limit
            ..Default::default()
        };
        assert_eq!(determine_image_count(&capabilities), 3);
    }

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn test_new_builds_textures() {
        let mock = MockBackend::new();
        let swapchain =
            Swapchain::new(mock.backend(), extent(800, 600), PresentModePreference::Mailbox)
                .unwrap();
        // min_image_count 2 + 1
        assert_eq!(swapchain.image_count(), 3);
        assert_eq!(swapchain.extent(), extent(800, 600));
        assert_eq!(swapchain.present_mode(), vk::PresentModeKHR::MAILBOX);
        assert_eq!(swapchain.format(), vk::Format::B8G8R8A8_SRGB);
        assert_eq!(mock.live(ObjectKind::ImageView), 3);
        // Presentable images are not separately allocated.
        assert_eq!(mock.live(ObjectKind::Image), 0);
    }

    #[test]
    fn test_zero_extent_fails() {
        let mock = MockBackend::new();
        mock.set_surface_extent(0, 0);
        let result = Swapchain::new(mock.backend(), extent(0, 0), PresentModePreference::Fifo);
        assert!(matches!(result, Err(RhiError::SwapchainError(_))));
        assert_eq!(mock.live(ObjectKind::Swapchain), 0);
    }

    #[test]
    fn test_recreate_bumps_generation_and_retires_old() {
        let mock = MockBackend::new();
        let mut swapchain =
            Swapchain::new(mock.backend(), extent(800, 600), PresentModePreference::Fifo)
                .unwrap();
        let old_handle = swapchain.handle();

        mock.set_surface_extent(1024, 768);
        swapchain.recreate(extent(1024, 768)).unwrap();

        assert_eq!(swapchain.generation(), 1);
        assert_eq!(swapchain.extent(), extent(1024, 768));
        assert_ne!(swapchain.handle(), old_handle);
        assert_eq!(mock.live(ObjectKind::Swapchain), 1);
        assert_eq!(mock.live(ObjectKind::ImageView), 3);
        assert!(mock.errors().is_empty());
    }

    #[test]
    fn test_retired_swapchain_outlives_held_texture() {
        let mock = MockBackend::new();
        let mut swapchain =
            Swapchain::new(mock.backend(), extent(800, 600), PresentModePreference::Fifo)
                .unwrap();
        let held = swapchain.textures()[0].acquire();

        swapchain.recreate(extent(800, 600)).unwrap();
        assert_eq!(mock.live(ObjectKind::Swapchain), 2);

        held.release();
        assert_eq!(mock.live(ObjectKind::Swapchain), 1);
        assert!(mock.errors().is_empty());
    }

    #[test]
    fn test_present_rejects_stale_image() {
        let mock = MockBackend::new();
        let backend = mock.backend();
        let mut swapchain =
            Swapchain::new(backend.clone(), extent(800, 600), PresentModePreference::Fifo)
                .unwrap();
        let semaphore = Semaphore::new(backend).unwrap();

        let Acquired::Image { image, suboptimal } =
            swapchain.acquire_next_image(&semaphore).unwrap()
        else {
            panic!("expected an image");
        };
        assert!(!suboptimal);
        assert!(swapchain.texture(image).is_some());

        swapchain.recreate(extent(800, 600)).unwrap();
        assert!(swapchain.texture(image).is_none());
        assert!(matches!(
            swapchain.present(image, &semaphore),
            Err(RhiError::StaleSwapchainImage { .. })
        ));
    }

    #[test]
    fn test_acquire_reports_out_of_date_and_suboptimal() {
        let mock = MockBackend::new();
        let backend = mock.backend();
        let swapchain =
            Swapchain::new(backend.clone(), extent(800, 600), PresentModePreference::Fifo)
                .unwrap();
        let semaphore = Semaphore::new(backend).unwrap();
        mock.script_acquire([SurfaceStatus::OutOfDate, SurfaceStatus::Suboptimal]);

        assert_eq!(
            swapchain.acquire_next_image(&semaphore).unwrap(),
            Acquired::OutOfDate
        );
        assert!(matches!(
            swapchain.acquire_next_image(&semaphore).unwrap(),
            Acquired::Image {
                suboptimal: true,
                ..
            }
        ));
    }
}
