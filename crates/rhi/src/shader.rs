//! Shader modules.
//!
//! SPIR-V arrives as an opaque byte buffer (from disk or embedded in the
//! binary). [`ShaderModule`] validates the framing, creates the backend
//! module and remembers the stage and entry point needed to build a
//! pipeline stage.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use strand_rhi::shader::{ShaderModule, ShaderStage};
//! use strand_rhi::BackendRef;
//!
//! # fn example(backend: BackendRef) -> strand_rhi::RhiResult<()> {
//! let vertex = ShaderModule::from_spirv_file(
//!     backend,
//!     Path::new("shaders/fullscreen.vert.spv"),
//!     ShaderStage::Vertex,
//!     "main",
//! )?;
//! let _stage_info = vertex.stage_create_info();
//! # Ok(())
//! # }
//! ```

use std::ffi::{CStr, CString};
use std::path::Path;

use ash::vk;
use tracing::{debug, info};

use crate::backend::BackendRef;
use crate::error::{RhiError, RhiResult};
use crate::resource::{Resource, ResourceKind, Shared};

/// First word of every SPIR-V module.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Shader stage type.
///
/// Defines which stage of the graphics or compute pipeline
/// the shader will be used in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    /// Vertex shader stage - processes each vertex
    Vertex,
    /// Fragment (pixel) shader stage - processes each fragment
    Fragment,
    /// Compute shader stage - general-purpose GPU computation
    Compute,
    /// Geometry shader stage - processes primitives
    Geometry,
    /// Tessellation control shader stage
    TessControl,
    /// Tessellation evaluation shader stage
    TessEvaluation,
}

impl ShaderStage {
    /// Converts the shader stage to Vulkan shader stage flags.
    ///
    /// # Returns
    ///
    /// The corresponding `vk::ShaderStageFlags` for this stage.
    pub fn to_vk_stage(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
            ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
            ShaderStage::Geometry => vk::ShaderStageFlags::GEOMETRY,
            ShaderStage::TessControl => vk::ShaderStageFlags::TESSELLATION_CONTROL,
            ShaderStage::TessEvaluation => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
        }
    }

    /// Returns a human-readable name for the shader stage.
    pub fn name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
            ShaderStage::Compute => "compute",
            ShaderStage::Geometry => "geometry",
            ShaderStage::TessControl => "tessellation control",
            ShaderStage::TessEvaluation => "tessellation evaluation",
        }
    }
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Shader module resource.
pub struct ShaderModule {
    backend: BackendRef,
    module: vk::ShaderModule,
    stage: ShaderStage,
    entry_point: CString,
}

impl ShaderModule {
    /// Creates a shader module from a SPIR-V file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid SPIR-V.
    pub fn from_spirv_file(
        backend: BackendRef,
        path: &Path,
        stage: ShaderStage,
        entry_point: &str,
    ) -> RhiResult<Shared<Self>> {
        debug!("Loading {} shader from {:?}", stage, path);

        let bytes = std::fs::read(path).map_err(|e| {
            RhiError::ShaderError(format!("Failed to read shader file {:?}: {}", path, e))
        })?;

        Self::from_spirv_bytes(backend, &bytes, stage, entry_point)
    }

    /// Creates a shader module from SPIR-V bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The byte length is not a multiple of 4
    /// - The first word is not the SPIR-V magic number
    /// - The entry point name contains null bytes
    /// - Shader module creation fails
    pub fn from_spirv_bytes(
        backend: BackendRef,
        bytes: &[u8],
        stage: ShaderStage,
        entry_point: &str,
    ) -> RhiResult<Shared<Self>> {
        let code = spirv_words(bytes)?;

        let entry_point = CString::new(entry_point)
            .map_err(|e| RhiError::ShaderError(format!("Invalid entry point name: {}", e)))?;

        let module = backend.create_shader_module(&code)?;

        info!(
            "Created {} shader module with entry point '{}'",
            stage,
            entry_point.to_string_lossy()
        );

        Ok(Shared::new(Self {
            backend,
            module,
            stage,
            entry_point,
        }))
    }

    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    #[inline]
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    #[inline]
    pub fn entry_point(&self) -> &CStr {
        &self.entry_point
    }

    /// Stage description for pipeline creation. Borrows from this module.
    pub fn stage_create_info(&self) -> vk::PipelineShaderStageCreateInfo<'_> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(self.stage.to_vk_stage())
            .module(self.module)
            .name(&self.entry_point)
    }
}

impl Resource for ShaderModule {
    fn kind(&self) -> ResourceKind {
        ResourceKind::ShaderModule
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        self.backend.destroy_shader_module(self.module);
        debug!("Destroyed {} shader module", self.stage);
    }
}

/// Converts SPIR-V bytes to little-endian words, checking alignment and magic.
pub fn spirv_words(bytes: &[u8]) -> RhiResult<Vec<u32>> {
    if bytes.is_empty() || !bytes.len().is_multiple_of(4) {
        return Err(RhiError::ShaderError(format!(
            "SPIR-V code must be a non-empty multiple of 4 bytes, got {} bytes",
            bytes.len()
        )));
    }

    // Copies, so the input need not be 4-byte aligned.
    let code: Vec<u32> = bytemuck::pod_collect_to_vec(bytes);

    if code[0] != SPIRV_MAGIC {
        return Err(RhiError::ShaderError(format!(
            "Missing SPIR-V magic number, found {:#010x}",
            code[0]
        )));
    }
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockBackend, ObjectKind};

    fn minimal_spirv() -> Vec<u8> {
        [SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]
            .iter()
            .flat_map(|word| word.to_le_bytes())
            .collect()
    }

    #[test]
    fn test_shader_stage_to_vk_stage() {
        assert_eq!(
            ShaderStage::Vertex.to_vk_stage(),
            vk::ShaderStageFlags::VERTEX
        );
        assert_eq!(
            ShaderStage::Fragment.to_vk_stage(),
            vk::ShaderStageFlags::FRAGMENT
        );
        assert_eq!(
            ShaderStage::Compute.to_vk_stage(),
            vk::ShaderStageFlags::COMPUTE
        );
        assert_eq!(
            ShaderStage::Geometry.to_vk_stage(),
            vk::ShaderStageFlags::GEOMETRY
        );
        assert_eq!(
            ShaderStage::TessControl.to_vk_stage(),
            vk::ShaderStageFlags::TESSELLATION_CONTROL
        );
        assert_eq!(
            ShaderStage::TessEvaluation.to_vk_stage(),
            vk::ShaderStageFlags::TESSELLATION_EVALUATION
        );
    }

    #[test]
    fn test_shader_stage_name() {
        assert_eq!(ShaderStage::Vertex.name(), "vertex");
        assert_eq!(ShaderStage::Fragment.name(), "fragment");
        assert_eq!(ShaderStage::Compute.name(), "compute");
        assert_eq!(ShaderStage::Geometry.name(), "geometry");
        assert_eq!(ShaderStage::TessControl.name(), "tessellation control");
        assert_eq!(
            ShaderStage::TessEvaluation.name(),
            "tessellation evaluation"
        );
    }

    #[test]
    fn test_shader_stage_display() {
        assert_eq!(format!("{}", ShaderStage::Vertex), "vertex");
        assert_eq!(format!("{}", ShaderStage::Fragment), "fragment");
    }

    #[test]
    fn test_invalid_spirv_alignment() {
        assert!(spirv_words(&[0u8; 5]).is_err());
        assert!(spirv_words(&[]).is_err());
    }

    #[test]
    fn test_missing_magic_rejected() {
        assert!(spirv_words(&[0u8; 8]).is_err());
    }

    #[test]
    fn test_spirv_words() {
        let words = spirv_words(&minimal_spirv()).unwrap();
        assert_eq!(words.len(), 5);
        assert_eq!(words[0], SPIRV_MAGIC);
    }

    #[test]
    fn test_spirv_words_from_unaligned_slice() {
        let mut padded = vec![0u8];
        padded.extend(minimal_spirv());
        let words = spirv_words(&padded[1..]).unwrap();
        assert_eq!(words, [SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]);
    }

    #[test]
    fn test_module_lifecycle() {
        let mock = MockBackend::new();
        let module = ShaderModule::from_spirv_bytes(
            mock.backend(),
            &minimal_spirv(),
            ShaderStage::Fragment,
            "main",
        )
        .unwrap();
        assert_eq!(module.entry_point().to_str().unwrap(), "main");
        assert_eq!(
            module.stage_create_info().stage,
            vk::ShaderStageFlags::FRAGMENT
        );
        assert_eq!(mock.live(ObjectKind::ShaderModule), 1);
        module.release();
        assert_eq!(mock.live(ObjectKind::ShaderModule), 0);
    }

    #[test]
    fn test_bad_entry_point_rejected() {
        let mock = MockBackend::new();
        let result = ShaderModule::from_spirv_bytes(
            mock.backend(),
            &minimal_spirv(),
            ShaderStage::Vertex,
            "ma\0in",
        );
        assert!(result.is_err());
        assert_eq!(mock.live(ObjectKind::ShaderModule), 0);
    }
}
