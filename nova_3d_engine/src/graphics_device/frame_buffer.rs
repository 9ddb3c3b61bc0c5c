//! Framebuffer trait - groups render target attachments for a render pass

use std::any::Any;
use std::sync::Arc;
use crate::graphics_device::{RenderPass, RenderTarget};

/// Framebuffer (one native handle, destroyed on drop)
pub trait Framebuffer: Send + Sync {
    /// Width in pixels
    fn width(&self) -> u32;

    /// Height in pixels
    fn height(&self) -> u32;

    /// Downcast support for backends
    fn as_any(&self) -> &dyn Any;
}

/// Descriptor for creating a framebuffer
pub struct FramebufferDesc<'a> {
    /// The render pass this framebuffer is compatible with
    pub render_pass: &'a Arc<dyn RenderPass>,
    /// Color attachments
    pub color_attachments: Vec<Arc<dyn RenderTarget>>,
    /// Optional depth attachment
    pub depth_stencil_attachment: Option<Arc<dyn RenderTarget>>,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}
