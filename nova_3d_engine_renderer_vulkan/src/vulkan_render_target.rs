/// RenderTarget - Vulkan implementation of the nova3d RenderTarget trait
///
/// Either an owned offscreen attachment (image + memory + view) or a view of a
/// swapchain image. The swapchain owns its images, so only the view is
/// destroyed for swapchain targets.

use nova_3d_engine::nova3d::Result;
use nova_3d_engine::nova3d::render::{RenderTarget as RendererRenderTarget, RenderTargetDesc, TextureFormat};
use nova_3d_engine::engine_bail_warn;
use ash::vk;
use gpu_allocator::vulkan::Allocation;
use std::any::Any;
use std::sync::Arc;

use crate::vulkan_context::GpuContext;
use crate::vulkan_format::{aspect_mask, texture_format_to_vk};
use crate::vulkan_texture::create_image;

/// Vulkan render target
pub struct RenderTarget {
    ctx: Arc<GpuContext>,
    width: u32,
    height: u32,
    format: TextureFormat,
    /// Image used for barriers and clears
    pub(crate) image: vk::Image,
    pub(crate) image_view: vk::ImageView,
    /// `Some` for owned targets, `None` for swapchain images
    allocation: Option<Allocation>,
}

impl RenderTarget {
    /// Create an owned attachment (color or depth depending on `desc.format`)
    pub(crate) fn new_owned(ctx: Arc<GpuContext>, desc: &RenderTargetDesc) -> Result<Self> {
        if desc.width == 0 || desc.height == 0 {
            engine_bail_warn!("nova3d::vulkan", "Render target size must be non-zero (got {}x{})", desc.width, desc.height);
        }

        let usage = if desc.format.is_depth() {
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
        } else {
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED
        } | vk::ImageUsageFlags::TRANSFER_DST;

        let (image, allocation) = create_image(&ctx, "render_target", desc.width, desc.height, desc.format, usage)?;

        let image_view = match ctx.create_image_view(image, texture_format_to_vk(desc.format), aspect_mask(desc.format)) {
            Ok(view) => view,
            Err(e) => {
                ctx.free(allocation);
                unsafe { ctx.device.destroy_image(image, None); }
                return Err(e);
            }
        };

        Ok(Self {
            ctx,
            width: desc.width,
            height: desc.height,
            format: desc.format,
            image,
            image_view,
            allocation: Some(allocation),
        })
    }

    /// Wrap a swapchain image (the view is created here and owned by the target)
    pub(crate) fn new_swapchain_target(
        ctx: Arc<GpuContext>,
        image: vk::Image,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> Result<Self> {
        let image_view = ctx.create_image_view(image, texture_format_to_vk(format), vk::ImageAspectFlags::COLOR)?;
        Ok(Self {
            ctx,
            width,
            height,
            format,
            image,
            image_view,
            allocation: None,
        })
    }
}

impl RendererRenderTarget for RenderTarget {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn format(&self) -> TextureFormat {
        self.format
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for RenderTarget {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_image_view(self.image_view, None);
            if let Some(allocation) = self.allocation.take() {
                self.ctx.free(allocation);
                self.ctx.device.destroy_image(self.image, None);
            }
        }
    }
}
