//! RenderTarget trait - an image view usable as a framebuffer attachment

use std::any::Any;
use crate::graphics_device::TextureFormat;

/// Render target: a swapchain image view or an owned offscreen image
pub trait RenderTarget: Send + Sync {
    /// Width in pixels
    fn width(&self) -> u32;

    /// Height in pixels
    fn height(&self) -> u32;

    /// Pixel format
    fn format(&self) -> TextureFormat;

    /// Downcast support for backends
    fn as_any(&self) -> &dyn Any;
}

/// Descriptor for an owned offscreen attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTargetDesc {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
}
