//! Swapchain trait - presentation images for the device surface

use std::any::Any;
use std::sync::Arc;
use crate::error::Result;
use crate::graphics_device::{RenderTarget, TextureFormat};

/// Outcome of acquire/present
///
/// `OutOfDate` and `SubOptimal` both ask the caller to recreate the
/// swapchain-dependent resources before the next frame. Hard failures are
/// reported as `Err`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Success,
    OutOfDate,
    SubOptimal,
}

impl FrameStatus {
    /// True for `OutOfDate` and `SubOptimal`
    pub fn needs_recreation(&self) -> bool {
        !matches!(self, FrameStatus::Success)
    }
}

/// Swapchain for presenting rendered images
pub trait Swapchain: Send + Sync {
    /// Acquire the next image, signalling the image-available semaphore of `frame_slot`
    ///
    /// On `FrameStatus::OutOfDate` the returned index is meaningless.
    fn acquire_next_image(&mut self, frame_slot: usize) -> Result<(u32, FrameStatus)>;

    /// Present `image_index`, waiting on its render-finished semaphore
    fn present(&mut self, image_index: u32) -> Result<FrameStatus>;

    /// Recreate for a new surface size (reuses the old swapchain handle)
    fn recreate(&mut self, width: u32, height: u32) -> Result<()>;

    /// Number of images
    fn image_count(&self) -> usize;

    /// Width of the images in pixels
    fn width(&self) -> u32;

    /// Height of the images in pixels
    fn height(&self) -> u32;

    /// Pixel format of the images
    fn format(&self) -> TextureFormat;

    /// View of image `image_index` as a render target
    fn render_target(&self, image_index: u32) -> Arc<dyn RenderTarget>;

    /// Downcast support for backends
    fn as_any(&self) -> &dyn Any;
}
