//! Shader trait, shader descriptor and reflection data

use std::any::Any;
use bitflags::bitflags;
use crate::graphics_device::BindingType;

/// Pipeline stage a shader module is compiled for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

bitflags! {
    /// Stage visibility for bindings and push constants
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStageFlags: u32 {
        const VERTEX = 0x01;
        const FRAGMENT = 0x02;
        const VERTEX_FRAGMENT = Self::VERTEX.bits() | Self::FRAGMENT.bits();
    }
}

impl From<ShaderStage> for ShaderStageFlags {
    fn from(stage: ShaderStage) -> Self {
        match stage {
            ShaderStage::Vertex => ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => ShaderStageFlags::FRAGMENT,
        }
    }
}

/// Descriptor for creating a shader module
#[derive(Debug, Clone)]
pub struct ShaderDesc {
    /// SPIR-V bytes (length must be a multiple of 4)
    pub code: Vec<u8>,
    /// Stage
    pub stage: ShaderStage,
    /// Entry point name
    pub entry_point: String,
}

/// A descriptor binding found by SPIR-V reflection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflectedBinding {
    pub name: String,
    pub set: u32,
    pub binding: u32,
    pub binding_type: BindingType,
}

/// Shader module trait
pub trait Shader: Send + Sync {
    /// Stage this module was created for
    fn stage(&self) -> ShaderStage;

    /// Descriptor bindings declared by the module (empty when reflection is unavailable)
    fn reflected_bindings(&self) -> &[ReflectedBinding];

    /// Downcast support for backends
    fn as_any(&self) -> &dyn Any;
}
