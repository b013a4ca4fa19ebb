//! Frame orchestration on top of the RHI.
//!
//! This crate drives the per-frame protocol:
//! - [`frame_ring::FrameRing`] - N frame slots, each with a command buffer,
//!   two semaphores and an in-flight fence
//! - [`render_target::RenderTarget`] - swapchain, render pass, depth buffer
//!   and framebuffers, rebuilt together when the surface changes
//! - [`depth_buffer::DepthBuffer`] - the depth attachment

pub mod depth_buffer;
pub mod frame_ring;
pub mod render_target;

pub use depth_buffer::DepthBuffer;
pub use frame_ring::{FrameRing, FrameSlot};
pub use render_target::{ActiveFrame, FrameStats, RebuildEvent, RenderTarget};
