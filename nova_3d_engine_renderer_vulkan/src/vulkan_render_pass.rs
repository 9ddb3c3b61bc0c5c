/// RenderPass - Vulkan implementation of the nova3d RenderPass trait
///
/// One subpass, colors first then the optional depth attachment.

use nova_3d_engine::nova3d::Result;
use nova_3d_engine::nova3d::render::{AttachmentDesc, RenderPass as RendererRenderPass, RenderPassDesc, StoreOp, LoadOp};
use nova_3d_engine::{engine_bail_warn, engine_err};
use ash::vk;
use std::any::Any;
use std::sync::Arc;

use crate::vulkan_context::GpuContext;
use crate::vulkan_format::{image_layout_to_vk, load_op_to_vk, sample_count_to_vk, store_op_to_vk, texture_format_to_vk};

/// Vulkan render pass
pub struct RenderPass {
    ctx: Arc<GpuContext>,
    pub(crate) render_pass: vk::RenderPass,
    /// Attachment count, checked against clear values and framebuffers
    pub(crate) attachment_count: usize,
    /// Pipelines need one blend state per color attachment
    pub(crate) color_attachment_count: usize,
}

fn attachment_description(attachment: &AttachmentDesc) -> vk::AttachmentDescription {
    // Stencil follows depth for combined formats, otherwise unused
    let (stencil_load, stencil_store) = if attachment.format.has_stencil() {
        (load_op_to_vk(attachment.load_op), store_op_to_vk(attachment.store_op))
    } else {
        (load_op_to_vk(LoadOp::DontCare), store_op_to_vk(StoreOp::DontCare))
    };

    vk::AttachmentDescription::default()
        .format(texture_format_to_vk(attachment.format))
        .samples(sample_count_to_vk(attachment.samples))
        .load_op(load_op_to_vk(attachment.load_op))
        .store_op(store_op_to_vk(attachment.store_op))
        .stencil_load_op(stencil_load)
        .stencil_store_op(stencil_store)
        .initial_layout(image_layout_to_vk(attachment.initial_layout))
        .final_layout(image_layout_to_vk(attachment.final_layout))
}

impl RenderPass {
    pub(crate) fn new(ctx: Arc<GpuContext>, desc: &RenderPassDesc) -> Result<Self> {
        if desc.color_attachments.is_empty() && desc.depth_attachment.is_none() {
            engine_bail_warn!("nova3d::vulkan", "Render pass needs at least one attachment");
        }
        if let Some(color) = desc.color_attachments.iter().find(|a| a.format.is_depth()) {
            engine_bail_warn!("nova3d::vulkan", "Color attachment uses depth format {:?}", color.format);
        }
        if let Some(depth) = desc.depth_attachment.as_ref().filter(|a| !a.format.is_depth()) {
            engine_bail_warn!("nova3d::vulkan", "Depth attachment uses color format {:?}", depth.format);
        }

        let mut attachments: Vec<vk::AttachmentDescription> =
            desc.color_attachments.iter().map(attachment_description).collect();
        let color_refs: Vec<vk::AttachmentReference> = (0..desc.color_attachments.len())
            .map(|i| vk::AttachmentReference {
                attachment: i as u32,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            })
            .collect();

        let depth_ref = desc.depth_attachment.as_ref().map(|depth| {
            attachments.push(attachment_description(depth));
            vk::AttachmentReference {
                attachment: (attachments.len() - 1) as u32,
                layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            }
        });

        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if let Some(depth_ref) = depth_ref.as_ref() {
            subpass = subpass.depth_stencil_attachment(depth_ref);
        }

        let attachment_stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
            | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
        let attachment_writes = vk::AccessFlags::COLOR_ATTACHMENT_WRITE
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;

        // Incoming: previous passes and transfer clears of the same images
        let dependencies = [
            vk::SubpassDependency::default()
                .src_subpass(vk::SUBPASS_EXTERNAL)
                .dst_subpass(0)
                .src_stage_mask(attachment_stages | vk::PipelineStageFlags::TRANSFER)
                .src_access_mask(attachment_writes | vk::AccessFlags::TRANSFER_WRITE)
                .dst_stage_mask(attachment_stages)
                .dst_access_mask(
                    attachment_writes
                        | vk::AccessFlags::COLOR_ATTACHMENT_READ
                        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
                ),
            vk::SubpassDependency::default()
                .src_subpass(0)
                .dst_subpass(vk::SUBPASS_EXTERNAL)
                .src_stage_mask(attachment_stages)
                .src_access_mask(attachment_writes)
                .dst_stage_mask(attachment_stages | vk::PipelineStageFlags::TRANSFER)
                .dst_access_mask(
                    attachment_writes
                        | vk::AccessFlags::COLOR_ATTACHMENT_READ
                        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                        | vk::AccessFlags::TRANSFER_WRITE,
                ),
        ];

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(std::slice::from_ref(&subpass))
            .dependencies(&dependencies);

        let render_pass = unsafe {
            ctx.device.create_render_pass(&create_info, None)
                .map_err(|e| engine_err!("nova3d::vulkan", "Failed to create render pass: {:?}", e))?
        };

        Ok(Self {
            ctx,
            render_pass,
            attachment_count: attachments.len(),
            color_attachment_count: desc.color_attachments.len(),
        })
    }
}

impl RendererRenderPass for RenderPass {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_render_pass(self.render_pass, None);
        }
    }
}
