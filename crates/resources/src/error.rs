//! Error types for resource creation.

use std::path::PathBuf;

use strand_rhi::RhiError;
use thiserror::Error;

/// Error type for resource operations.
#[derive(Error, Debug)]
pub enum ResourceError {
    /// A mesh was given no vertices or no indices.
    #[error("Mesh '{0}' has no geometry")]
    EmptyMesh(String),

    /// An index refers past the end of the vertex data.
    #[error("Index {index} out of range for {vertex_count} vertices")]
    IndexOutOfRange { index: u32, vertex_count: usize },

    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding error.
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// File not found.
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// GPU-side failure while creating or uploading a resource.
    #[error(transparent)]
    Rhi(#[from] RhiError),
}

/// Result type alias for resource operations.
pub type ResourceResult<T> = Result<T, ResourceError>;
