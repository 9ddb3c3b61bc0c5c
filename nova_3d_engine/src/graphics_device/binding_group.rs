//! BindingGroup trait and binding layout description
//!
//! A BindingGroup is an immutable descriptor set. Its layout is described by
//! value ([`BindingGroupLayoutDesc`]); backends cache one native layout per
//! distinct description so pipelines and binding groups built from equal
//! descriptions are compatible.

use std::any::Any;
use std::sync::Arc;
use crate::graphics_device::{Buffer, Sampler, ShaderStageFlags, Texture};

/// Type of resource bound at a given slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingType {
    UniformBuffer,
    CombinedImageSampler,
}

/// One binding slot of a layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingSlotDesc {
    /// `layout(binding = N)` in GLSL
    pub binding: u32,
    pub binding_type: BindingType,
    pub stage_flags: ShaderStageFlags,
}

/// Layout of one descriptor set
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct BindingGroupLayoutDesc {
    pub entries: Vec<BindingSlotDesc>,
}

/// A concrete resource written into a binding slot
///
/// Resources are matched to `BindingGroupLayoutDesc::entries` by position.
#[derive(Clone)]
pub enum BindingResource {
    /// `range` bytes of `buffer` starting at `offset`
    UniformBuffer {
        buffer: Arc<dyn Buffer>,
        offset: u64,
        range: u64,
    },
    /// Texture + sampler
    SampledTexture {
        texture: Arc<dyn Texture>,
        sampler: Arc<dyn Sampler>,
    },
}

/// An immutable set of GPU resource bindings
///
/// Keeps the bound resources alive for as long as the group lives.
pub trait BindingGroup: Send + Sync {
    /// Downcast support for backends
    fn as_any(&self) -> &dyn Any;
}
