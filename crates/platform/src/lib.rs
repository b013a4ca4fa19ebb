//! Platform layer.
//!
//! This crate provides the window system side of the renderer:
//! - Window management via winit
//! - Surface extensions and surface creation via ash-window

mod window;

pub use window::Window;

// Re-export winit types that users might need
pub use winit::event::WindowEvent;
pub use winit::event_loop::EventLoop;
