/// CommandList - Vulkan implementation of the nova3d CommandList trait
///
/// One primary command buffer from its own RESET_COMMAND_BUFFER pool.
/// Recording state is tracked so misuse (draw outside a render pass, nested
/// passes, ...) fails with `Error::InvalidState` instead of reaching the driver.

use nova_3d_engine::nova3d::{Error, Result};
use nova_3d_engine::nova3d::render::{
    BindingGroup as RendererBindingGroup, Buffer as RendererBuffer, ClearValue,
    CommandList as RendererCommandList, Framebuffer as RendererFramebuffer, ImageLayout, IndexType,
    Pipeline as RendererPipeline, Rect2D, RenderPass as RendererRenderPass,
    RenderTarget as RendererRenderTarget, ShaderStageFlags, Viewport,
};
use nova_3d_engine::{engine_bail_warn, engine_err};
use ash::vk;
use std::any::Any;
use std::sync::Arc;

use crate::vulkan_binding_group::BindingGroup;
use crate::vulkan_buffer::Buffer;
use crate::vulkan_context::{downcast, GpuContext};
use crate::vulkan_format::{
    aspect_mask, clear_value_to_vk, image_layout_to_vk, index_type_to_vk, layout_access_and_stage,
    stage_flags_to_vk,
};
use crate::vulkan_frame_buffer::Framebuffer;
use crate::vulkan_pipeline::Pipeline;
use crate::vulkan_render_pass::RenderPass;
use crate::vulkan_render_target::RenderTarget;

/// Vulkan command list
pub struct CommandList {
    ctx: Arc<GpuContext>,
    command_pool: vk::CommandPool,
    pub(crate) command_buffer: vk::CommandBuffer,
    is_recording: bool,
    in_render_pass: bool,
    /// Ended at least once since the last `begin()`
    ended: bool,
}

impl CommandList {
    pub(crate) fn new(ctx: Arc<GpuContext>) -> Result<Self> {
        unsafe {
            let pool_create_info = vk::CommandPoolCreateInfo::default()
                .queue_family_index(ctx.graphics_queue_family)
                .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
            let command_pool = ctx.device.create_command_pool(&pool_create_info, None)
                .map_err(|e| engine_err!("nova3d::vulkan", "Failed to create command pool: {:?}", e))?;

            let allocate_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(command_pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);
            let command_buffer = match ctx.device.allocate_command_buffers(&allocate_info) {
                Ok(buffers) => buffers[0],
                Err(e) => {
                    ctx.device.destroy_command_pool(command_pool, None);
                    return Err(engine_err!("nova3d::vulkan", "Failed to allocate command buffer: {:?}", e));
                }
            };

            Ok(Self {
                ctx,
                command_pool,
                command_buffer,
                is_recording: false,
                in_render_pass: false,
                ended: false,
            })
        }
    }

    /// True between `end()` and the next `begin()`
    pub(crate) fn is_executable(&self) -> bool {
        self.ended
    }

    fn require_recording(&self, operation: &str) -> Result<()> {
        if !self.is_recording {
            return Err(Error::InvalidState(format!("{}: command list is not recording", operation)));
        }
        Ok(())
    }

    fn require_render_pass(&self, operation: &str) -> Result<()> {
        self.require_recording(operation)?;
        if !self.in_render_pass {
            return Err(Error::InvalidState(format!("{}: no render pass in progress", operation)));
        }
        Ok(())
    }

    fn require_outside_render_pass(&self, operation: &str) -> Result<()> {
        self.require_recording(operation)?;
        if self.in_render_pass {
            return Err(Error::InvalidState(format!("{}: not allowed inside a render pass", operation)));
        }
        Ok(())
    }

    /// Whole-image barrier between two layouts
    fn image_barrier(&self, target: &RenderTarget, old_layout: ImageLayout, new_layout: ImageLayout) {
        let (src_access, src_stage) = layout_access_and_stage(old_layout);
        let (dst_access, dst_stage) = layout_access_and_stage(new_layout);
        let barrier = vk::ImageMemoryBarrier::default()
            .old_layout(image_layout_to_vk(old_layout))
            .new_layout(image_layout_to_vk(new_layout))
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(target.image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect_mask(target.format()),
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            })
            .src_access_mask(src_access)
            .dst_access_mask(dst_access);

        unsafe {
            self.ctx.device.cmd_pipeline_barrier(
                self.command_buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }
}

impl RendererCommandList for CommandList {
    fn begin(&mut self) -> Result<()> {
        if self.is_recording {
            return Err(Error::InvalidState("begin: command list already recording".to_string()));
        }

        unsafe {
            self.ctx.device.reset_command_buffer(self.command_buffer, vk::CommandBufferResetFlags::empty())
                .map_err(|e| engine_err!("nova3d::vulkan", "Failed to reset command buffer: {:?}", e))?;

            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.ctx.device.begin_command_buffer(self.command_buffer, &begin_info)
                .map_err(|e| engine_err!("nova3d::vulkan", "Failed to begin command buffer: {:?}", e))?;
        }

        self.is_recording = true;
        self.in_render_pass = false;
        self.ended = false;
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        self.require_outside_render_pass("end")?;

        unsafe {
            self.ctx.device.end_command_buffer(self.command_buffer)
                .map_err(|e| engine_err!("nova3d::vulkan", "Failed to end command buffer: {:?}", e))?;
        }

        self.is_recording = false;
        self.ended = true;
        Ok(())
    }

    fn clear_render_target(
        &mut self,
        target: &Arc<dyn RendererRenderTarget>,
        old_layout: ImageLayout,
        value: ClearValue,
    ) -> Result<()> {
        self.require_outside_render_pass("clear_render_target")?;
        let vk_target: &RenderTarget = downcast(target.as_any(), "Clear target")?;

        let range = vk::ImageSubresourceRange {
            aspect_mask: aspect_mask(vk_target.format()),
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };

        match (vk_target.format().is_depth(), value) {
            (false, ClearValue::Color(color)) => {
                self.image_barrier(vk_target, old_layout, ImageLayout::TransferDst);
                let clear = vk::ClearColorValue { float32: color };
                unsafe {
                    self.ctx.device.cmd_clear_color_image(
                        self.command_buffer,
                        vk_target.image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &clear,
                        &[range],
                    );
                }
            }
            (true, ClearValue::DepthStencil { depth, stencil }) => {
                self.image_barrier(vk_target, old_layout, ImageLayout::TransferDst);
                let clear = vk::ClearDepthStencilValue { depth, stencil };
                unsafe {
                    self.ctx.device.cmd_clear_depth_stencil_image(
                        self.command_buffer,
                        vk_target.image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &clear,
                        &[range],
                    );
                }
            }
            (is_depth, value) => {
                engine_bail_warn!("nova3d::vulkan",
                    "Clear value {:?} does not match {} target format {:?}",
                    value, if is_depth { "depth" } else { "color" }, vk_target.format());
            }
        }
        Ok(())
    }

    fn transition_render_target(
        &mut self,
        target: &Arc<dyn RendererRenderTarget>,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
    ) -> Result<()> {
        self.require_outside_render_pass("transition_render_target")?;
        let vk_target: &RenderTarget = downcast(target.as_any(), "Transition target")?;
        self.image_barrier(vk_target, old_layout, new_layout);
        Ok(())
    }

    fn begin_render_pass(
        &mut self,
        render_pass: &Arc<dyn RendererRenderPass>,
        framebuffer: &Arc<dyn RendererFramebuffer>,
        clear_values: &[ClearValue],
    ) -> Result<()> {
        self.require_outside_render_pass("begin_render_pass")?;
        let vk_render_pass: &RenderPass = downcast(render_pass.as_any(), "Render pass")?;
        let vk_framebuffer: &Framebuffer = downcast(framebuffer.as_any(), "Framebuffer")?;

        if !clear_values.is_empty() && clear_values.len() != vk_render_pass.attachment_count {
            engine_bail_warn!("nova3d::vulkan",
                "begin_render_pass: {} clear values for {} attachments",
                clear_values.len(), vk_render_pass.attachment_count);
        }
        let vk_clear_values: Vec<vk::ClearValue> = clear_values.iter().map(clear_value_to_vk).collect();

        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(vk_render_pass.render_pass)
            .framebuffer(vk_framebuffer.framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: vk::Extent2D {
                    width: framebuffer.width(),
                    height: framebuffer.height(),
                },
            })
            .clear_values(&vk_clear_values);

        unsafe {
            self.ctx.device.cmd_begin_render_pass(self.command_buffer, &begin_info, vk::SubpassContents::INLINE);
        }
        self.in_render_pass = true;
        Ok(())
    }

    fn end_render_pass(&mut self) -> Result<()> {
        self.require_render_pass("end_render_pass")?;
        unsafe {
            self.ctx.device.cmd_end_render_pass(self.command_buffer);
        }
        self.in_render_pass = false;
        Ok(())
    }

    fn set_viewport(&mut self, viewport: Viewport) -> Result<()> {
        self.require_recording("set_viewport")?;
        let vk_viewport = vk::Viewport {
            x: viewport.x,
            y: viewport.y,
            width: viewport.width,
            height: viewport.height,
            min_depth: viewport.min_depth,
            max_depth: viewport.max_depth,
        };
        unsafe {
            self.ctx.device.cmd_set_viewport(self.command_buffer, 0, &[vk_viewport]);
        }
        Ok(())
    }

    fn set_scissor(&mut self, scissor: Rect2D) -> Result<()> {
        self.require_recording("set_scissor")?;
        let vk_scissor = vk::Rect2D {
            offset: vk::Offset2D { x: scissor.x, y: scissor.y },
            extent: vk::Extent2D { width: scissor.width, height: scissor.height },
        };
        unsafe {
            self.ctx.device.cmd_set_scissor(self.command_buffer, 0, &[vk_scissor]);
        }
        Ok(())
    }

    fn bind_pipeline(&mut self, pipeline: &Arc<dyn RendererPipeline>) -> Result<()> {
        self.require_render_pass("bind_pipeline")?;
        let vk_pipeline: &Pipeline = downcast(pipeline.as_any(), "Pipeline")?;
        unsafe {
            self.ctx.device.cmd_bind_pipeline(self.command_buffer, vk::PipelineBindPoint::GRAPHICS, vk_pipeline.pipeline);
        }
        Ok(())
    }

    fn bind_binding_group(
        &mut self,
        pipeline: &Arc<dyn RendererPipeline>,
        set_index: u32,
        binding_group: &Arc<dyn RendererBindingGroup>,
    ) -> Result<()> {
        self.require_recording("bind_binding_group")?;
        let vk_pipeline: &Pipeline = downcast(pipeline.as_any(), "Pipeline")?;
        let vk_group: &BindingGroup = downcast(binding_group.as_any(), "Binding group")?;

        if set_index >= vk_pipeline.set_count {
            engine_bail_warn!("nova3d::vulkan",
                "bind_binding_group: set {} out of range (pipeline layout has {} sets)",
                set_index, vk_pipeline.set_count);
        }

        unsafe {
            self.ctx.device.cmd_bind_descriptor_sets(
                self.command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                vk_pipeline.pipeline_layout,
                set_index,
                &[vk_group.descriptor_set],
                &[],
            );
        }
        Ok(())
    }

    fn push_constants(
        &mut self,
        pipeline: &Arc<dyn RendererPipeline>,
        stages: ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) -> Result<()> {
        self.require_recording("push_constants")?;
        let vk_pipeline: &Pipeline = downcast(pipeline.as_any(), "Pipeline")?;
        unsafe {
            self.ctx.device.cmd_push_constants(
                self.command_buffer,
                vk_pipeline.pipeline_layout,
                stage_flags_to_vk(stages),
                offset,
                data,
            );
        }
        Ok(())
    }

    fn bind_vertex_buffer(&mut self, buffer: &Arc<dyn RendererBuffer>, offset: u64) -> Result<()> {
        self.require_recording("bind_vertex_buffer")?;
        let vk_buffer: &Buffer = downcast(buffer.as_any(), "Vertex buffer")?;
        unsafe {
            self.ctx.device.cmd_bind_vertex_buffers(self.command_buffer, 0, &[vk_buffer.buffer], &[offset]);
        }
        Ok(())
    }

    fn bind_index_buffer(&mut self, buffer: &Arc<dyn RendererBuffer>, offset: u64, index_type: IndexType) -> Result<()> {
        self.require_recording("bind_index_buffer")?;
        let vk_buffer: &Buffer = downcast(buffer.as_any(), "Index buffer")?;
        unsafe {
            self.ctx.device.cmd_bind_index_buffer(self.command_buffer, vk_buffer.buffer, offset, index_type_to_vk(index_type));
        }
        Ok(())
    }

    fn draw(&mut self, vertex_count: u32, first_vertex: u32) -> Result<()> {
        self.require_render_pass("draw")?;
        unsafe {
            self.ctx.device.cmd_draw(self.command_buffer, vertex_count, 1, first_vertex, 0);
        }
        Ok(())
    }

    fn draw_indexed(&mut self, index_count: u32, first_index: u32, vertex_offset: i32) -> Result<()> {
        self.require_render_pass("draw_indexed")?;
        unsafe {
            self.ctx.device.cmd_draw_indexed(self.command_buffer, index_count, 1, first_index, vertex_offset, 0);
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for CommandList {
    fn drop(&mut self) {
        unsafe {
            // Destroying the pool frees its command buffer
            self.ctx.device.destroy_command_pool(self.command_pool, None);
        }
    }
}
