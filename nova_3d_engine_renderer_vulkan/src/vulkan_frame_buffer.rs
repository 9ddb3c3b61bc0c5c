/// Framebuffer - Vulkan implementation of the nova3d Framebuffer trait
///
/// Wraps a VkFramebuffer and keeps its attachments alive for as long as it lives.

use nova_3d_engine::nova3d::Result;
use nova_3d_engine::nova3d::render::{Framebuffer as RendererFramebuffer, FramebufferDesc, RenderTarget as RendererRenderTarget};
use nova_3d_engine::{engine_bail_warn, engine_err};
use ash::vk;
use std::any::Any;
use std::sync::Arc;

use crate::vulkan_context::{downcast, GpuContext};
use crate::vulkan_render_pass::RenderPass;
use crate::vulkan_render_target::RenderTarget;

/// Vulkan framebuffer
pub struct Framebuffer {
    ctx: Arc<GpuContext>,
    pub(crate) framebuffer: vk::Framebuffer,
    width: u32,
    height: u32,
    _attachments: Vec<Arc<dyn RendererRenderTarget>>,
}

impl Framebuffer {
    pub(crate) fn new(ctx: Arc<GpuContext>, desc: &FramebufferDesc) -> Result<Self> {
        let render_pass: &RenderPass = downcast(desc.render_pass.as_any(), "Framebuffer render pass")?;

        let attachments: Vec<Arc<dyn RendererRenderTarget>> = desc
            .color_attachments
            .iter()
            .chain(desc.depth_stencil_attachment.iter())
            .cloned()
            .collect();

        if attachments.len() != render_pass.attachment_count {
            engine_bail_warn!("nova3d::vulkan",
                "Framebuffer has {} attachments, render pass expects {}",
                attachments.len(), render_pass.attachment_count);
        }

        let mut views = Vec::with_capacity(attachments.len());
        for attachment in &attachments {
            if attachment.width() < desc.width || attachment.height() < desc.height {
                engine_bail_warn!("nova3d::vulkan",
                    "Attachment {}x{} is smaller than framebuffer {}x{}",
                    attachment.width(), attachment.height(), desc.width, desc.height);
            }
            let target: &RenderTarget = downcast(attachment.as_any(), "Framebuffer attachment")?;
            views.push(target.image_view);
        }

        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass.render_pass)
            .attachments(&views)
            .width(desc.width)
            .height(desc.height)
            .layers(1);

        let framebuffer = unsafe {
            ctx.device.create_framebuffer(&create_info, None)
                .map_err(|e| engine_err!("nova3d::vulkan", "Failed to create framebuffer: {:?}", e))?
        };

        Ok(Self {
            ctx,
            framebuffer,
            width: desc.width,
            height: desc.height,
            _attachments: attachments,
        })
    }
}

impl RendererFramebuffer for Framebuffer {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_framebuffer(self.framebuffer, None);
        }
    }
}
