//! Composite GPU resources.
//!
//! This crate builds on the RHI's reference-counted objects:
//! - [`Mesh`] - vertex and index buffers uploaded in one step
//! - [`Material`] - a texture, a sampler and the descriptor set binding them
//! - [`decode`] - PNG/JPEG decoding to RGBA8 pixels
//!
//! Meshes and materials are resources themselves: a command buffer that
//! draws a mesh or binds a material retains it, and through it every
//! child object, until the command buffer is reset.

mod error;

pub mod decode;
pub mod material;
pub mod mesh;
pub mod vertex;

pub use decode::{DecodedImage, decode_rgba8, load_rgba8};
pub use error::{ResourceError, ResourceResult};
pub use material::{Material, MaterialUniform};
pub use mesh::Mesh;
pub use vertex::Vertex;
