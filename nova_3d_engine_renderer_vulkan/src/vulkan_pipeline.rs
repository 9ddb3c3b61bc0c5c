/// Pipeline - Vulkan implementation of the nova3d Pipeline trait
///
/// Graphics pipeline + pipeline layout. Viewport and scissor are dynamic.
/// Descriptor set layouts belong to the shared [`DescriptorAllocator`], which
/// the pipeline keeps alive.

use nova_3d_engine::nova3d::Result;
use nova_3d_engine::nova3d::render::{Pipeline as RendererPipeline, PipelineDesc, ShaderStage};
use nova_3d_engine::{engine_bail_warn, engine_err, engine_warn};
use ash::vk;
use std::any::Any;
use std::sync::Arc;

use crate::vulkan_binding_group::DescriptorAllocator;
use crate::vulkan_context::{downcast, GpuContext};
use crate::vulkan_format::{
    blend_factor_to_vk, blend_op_to_vk, compare_op_to_vk, cull_mode_to_vk, front_face_to_vk,
    input_rate_to_vk, polygon_mode_to_vk, sample_count_to_vk, shader_stage_to_vk, stage_flags_to_vk,
    topology_to_vk, vertex_format_to_vk,
};
use crate::vulkan_render_pass::RenderPass;
use crate::vulkan_shader::Shader;

/// Vulkan graphics pipeline
pub struct Pipeline {
    ctx: Arc<GpuContext>,
    _descriptors: Arc<DescriptorAllocator>,
    pub(crate) pipeline: vk::Pipeline,
    pub(crate) pipeline_layout: vk::PipelineLayout,
    /// Number of descriptor sets in the layout
    pub(crate) set_count: u32,
}

impl Pipeline {
    pub(crate) fn new(
        ctx: Arc<GpuContext>,
        descriptors: Arc<DescriptorAllocator>,
        desc: &PipelineDesc,
        depth_bounds_supported: bool,
    ) -> Result<Self> {
        let vertex_shader: &Shader = downcast(desc.vertex_shader.as_any(), "Vertex shader")?;
        let fragment_shader: &Shader = downcast(desc.fragment_shader.as_any(), "Fragment shader")?;
        let render_pass: &RenderPass = downcast(desc.render_pass.as_any(), "Pipeline render pass")?;

        if desc.vertex_shader.stage() != ShaderStage::Vertex || desc.fragment_shader.stage() != ShaderStage::Fragment {
            engine_bail_warn!("nova3d::vulkan",
                "Pipeline shader stages mismatch (vertex slot: {:?}, fragment slot: {:?})",
                desc.vertex_shader.stage(), desc.fragment_shader.stage());
        }

        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(shader_stage_to_vk(ShaderStage::Vertex))
                .module(vertex_shader.module)
                .name(&vertex_shader.entry_point),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(shader_stage_to_vk(ShaderStage::Fragment))
                .module(fragment_shader.module)
                .name(&fragment_shader.entry_point),
        ];

        // Vertex input
        let vertex_bindings: Vec<vk::VertexInputBindingDescription> = desc.vertex_layout.bindings
            .iter()
            .map(|binding| vk::VertexInputBindingDescription {
                binding: binding.binding,
                stride: binding.stride,
                input_rate: input_rate_to_vk(binding.input_rate),
            })
            .collect();
        let vertex_attributes: Vec<vk::VertexInputAttributeDescription> = desc.vertex_layout.attributes
            .iter()
            .map(|attribute| vk::VertexInputAttributeDescription {
                location: attribute.location,
                binding: attribute.binding,
                format: vertex_format_to_vk(attribute.format),
                offset: attribute.offset,
            })
            .collect();
        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&vertex_bindings)
            .vertex_attribute_descriptions(&vertex_attributes);

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(topology_to_vk(desc.topology))
            .primitive_restart_enable(false);

        // Dynamic viewport/scissor, counts only
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(polygon_mode_to_vk(desc.rasterization.polygon_mode))
            .line_width(1.0)
            .cull_mode(cull_mode_to_vk(desc.rasterization.cull_mode))
            .front_face(front_face_to_vk(desc.rasterization.front_face))
            .depth_bias_enable(false);

        let depth_bounds = desc.depth_stencil.depth_bounds_test_enable && {
            if !depth_bounds_supported {
                engine_warn!("nova3d::vulkan", "Depth bounds test requested but unsupported by the device, disabled");
            }
            depth_bounds_supported
        };
        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(desc.depth_stencil.depth_test_enable)
            .depth_write_enable(desc.depth_stencil.depth_write_enable)
            .depth_compare_op(compare_op_to_vk(desc.depth_stencil.depth_compare_op))
            .depth_bounds_test_enable(depth_bounds)
            .min_depth_bounds(desc.depth_stencil.min_depth_bounds)
            .max_depth_bounds(desc.depth_stencil.max_depth_bounds)
            .stencil_test_enable(false);

        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            .rasterization_samples(sample_count_to_vk(desc.samples));

        let blend = &desc.color_blend;
        let color_blend_attachment = vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(blend.blend_enable)
            .src_color_blend_factor(blend_factor_to_vk(blend.src_color_factor))
            .dst_color_blend_factor(blend_factor_to_vk(blend.dst_color_factor))
            .color_blend_op(blend_op_to_vk(blend.color_blend_op))
            .src_alpha_blend_factor(blend_factor_to_vk(blend.src_alpha_factor))
            .dst_alpha_blend_factor(blend_factor_to_vk(blend.dst_alpha_factor))
            .alpha_blend_op(blend_op_to_vk(blend.alpha_blend_op));
        let blend_attachments = vec![color_blend_attachment; render_pass.color_attachment_count];
        let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::default()
            .dynamic_states(&dynamic_states);

        // Layout: cached set layouts + push constants
        let set_layouts = desc.binding_group_layouts
            .iter()
            .map(|layout| descriptors.layout(layout))
            .collect::<Result<Vec<_>>>()?;
        let push_constant_ranges: Vec<vk::PushConstantRange> = desc.push_constant_ranges
            .iter()
            .map(|range| vk::PushConstantRange {
                stage_flags: stage_flags_to_vk(range.stages),
                offset: range.offset,
                size: range.size,
            })
            .collect();
        let layout_create_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_constant_ranges);

        unsafe {
            let pipeline_layout = ctx.device.create_pipeline_layout(&layout_create_info, None)
                .map_err(|e| engine_err!("nova3d::vulkan", "Failed to create pipeline layout: {:?}", e))?;

            let create_info = vk::GraphicsPipelineCreateInfo::default()
                .stages(&shader_stages)
                .vertex_input_state(&vertex_input_state)
                .input_assembly_state(&input_assembly_state)
                .viewport_state(&viewport_state)
                .rasterization_state(&rasterization_state)
                .depth_stencil_state(&depth_stencil_state)
                .multisample_state(&multisample_state)
                .color_blend_state(&color_blend_state)
                .dynamic_state(&dynamic_state)
                .layout(pipeline_layout)
                .render_pass(render_pass.render_pass)
                .subpass(0);

            let pipeline = match ctx.device.create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None) {
                Ok(pipelines) => pipelines[0],
                Err((_, e)) => {
                    ctx.device.destroy_pipeline_layout(pipeline_layout, None);
                    return Err(engine_err!("nova3d::vulkan", "Failed to create graphics pipeline: {:?}", e));
                }
            };

            Ok(Self {
                ctx,
                _descriptors: descriptors,
                pipeline,
                pipeline_layout,
                set_count: set_layouts.len() as u32,
            })
        }
    }
}

impl RendererPipeline for Pipeline {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_pipeline(self.pipeline, None);
            self.ctx.device.destroy_pipeline_layout(self.pipeline_layout, None);
        }
    }
}
