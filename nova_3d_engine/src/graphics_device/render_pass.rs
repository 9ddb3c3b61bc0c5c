//! RenderPass trait and the structural render pass description

use std::any::Any;
use crate::graphics_device::{SampleCount, TextureFormat};

/// Render pass trait (one native render pass handle, destroyed on drop)
pub trait RenderPass: Send + Sync {
    /// Downcast support for backends
    fn as_any(&self) -> &dyn Any;
}

/// Structural description of a single-subpass render pass
///
/// Two descriptions that compare equal always map to the same cached pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderPassDesc {
    /// Color attachments, in attachment order
    pub color_attachments: Vec<AttachmentDesc>,
    /// Optional depth attachment (placed after the color attachments)
    pub depth_attachment: Option<AttachmentDesc>,
}

/// One attachment of a render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttachmentDesc {
    pub format: TextureFormat,
    pub samples: SampleCount,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub initial_layout: ImageLayout,
    pub final_layout: ImageLayout,
}

/// What happens to attachment contents when the pass begins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadOp {
    /// Keep existing content
    Load,
    /// Clear to the pass clear value
    Clear,
    /// Content is undefined
    DontCare,
}

/// What happens to attachment contents when the pass ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Store,
    DontCare,
}

/// Image layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageLayout {
    Undefined,
    ColorAttachment,
    DepthStencilAttachment,
    ShaderReadOnly,
    TransferSrc,
    TransferDst,
    PresentSrc,
}
