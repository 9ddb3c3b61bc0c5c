/// MaterialPipelineCache - compiled graphics pipelines per shader-material
///
/// Two-level lookup: the outer map is keyed by shader-material, the inner map
/// by (render pass cookie, pipeline settings). A pipeline is created at most
/// once per key and lives until the material is destroyed or `free()` runs.

use std::sync::Arc;
use rustc_hash::FxHashMap;
use crate::error::Result;
use crate::{engine_debug, engine_error};
use crate::cache::{PipelineSettings, RenderPassCache, RenderPassCookie};
use crate::graphics_device::{
    BindingGroupLayoutDesc, GraphicsDevice, Pipeline, PipelineDesc, PushConstantRange, SampleCount, Shader,
    VertexLayout,
};
use crate::renderer::ShaderMaterialHandle;

/// Cache key of one pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineCacheInfo {
    pub shader_material: ShaderMaterialHandle,
    pub render_pass_cookie: RenderPassCookie,
    pub settings: PipelineSettings,
}

/// Everything a pipeline needs from the shader program
#[derive(Clone)]
pub struct PipelineProgram {
    pub vertex_shader: Arc<dyn Shader>,
    pub fragment_shader: Arc<dyn Shader>,
    pub vertex_layout: VertexLayout,
    pub binding_group_layouts: Vec<BindingGroupLayoutDesc>,
    pub push_constant_ranges: Vec<PushConstantRange>,
}

type PipelineKey = (RenderPassCookie, PipelineSettings);

pub struct MaterialPipelineCache {
    materials: FxHashMap<ShaderMaterialHandle, FxHashMap<PipelineKey, Arc<dyn Pipeline>>>,
}

impl MaterialPipelineCache {
    pub fn new() -> Self {
        Self {
            materials: FxHashMap::default(),
        }
    }

    /// Return the pipeline for `info`, compiling it on a miss
    ///
    /// # Panics
    ///
    /// Panics when no render pass of `info.render_pass_cookie` exists in
    /// `render_passes`: the bake must create the pass before asking for pipelines.
    pub fn find_or_create(
        &mut self,
        device: &mut dyn GraphicsDevice,
        render_passes: &RenderPassCache,
        info: &PipelineCacheInfo,
        program: &PipelineProgram,
    ) -> Result<Arc<dyn Pipeline>> {
        let key = (info.render_pass_cookie, info.settings);
        if let Some(pipeline) = self.materials.get(&info.shader_material).and_then(|m| m.get(&key)) {
            return Ok(pipeline.clone());
        }

        let Some(render_pass) = render_passes.find_compatible(info.render_pass_cookie) else {
            engine_error!(
                "nova3d::MaterialPipelineCache",
                "No render pass for cookie {} (material {:?})",
                info.render_pass_cookie.0,
                info.shader_material
            );
            panic!("no render pass compatible with cookie {}", info.render_pass_cookie.0);
        };
        let samples = render_passes
            .sample_count(info.render_pass_cookie)
            .unwrap_or(SampleCount::S1);

        let desc = PipelineDesc {
            vertex_shader: program.vertex_shader.clone(),
            fragment_shader: program.fragment_shader.clone(),
            vertex_layout: program.vertex_layout.clone(),
            topology: info.settings.topology,
            push_constant_ranges: program.push_constant_ranges.clone(),
            binding_group_layouts: program.binding_group_layouts.clone(),
            render_pass,
            samples,
            rasterization: info.settings.rasterization,
            depth_stencil: info.settings.depth_stencil,
            color_blend: info.settings.color_blend,
        };
        let pipeline = device.create_pipeline(&desc)?;

        engine_debug!(
            "nova3d::MaterialPipelineCache",
            "Compiled pipeline for material {:?} (cookie {}, settings {:016x})",
            info.shader_material,
            info.render_pass_cookie.0,
            info.settings.settings_hash()
        );
        self.materials
            .entry(info.shader_material)
            .or_default()
            .insert(key, pipeline.clone());
        Ok(pipeline)
    }

    /// Cached pipeline for `info`, if any
    pub fn find(&self, info: &PipelineCacheInfo) -> Option<Arc<dyn Pipeline>> {
        self.materials
            .get(&info.shader_material)
            .and_then(|m| m.get(&(info.render_pass_cookie, info.settings)))
            .cloned()
    }

    /// Drop every pipeline of `shader_material`, returning how many were removed
    ///
    /// The caller must ensure the GPU no longer uses them.
    pub fn remove_material(&mut self, shader_material: ShaderMaterialHandle) -> usize {
        self.materials.remove(&shader_material).map_or(0, |m| m.len())
    }

    /// Total number of cached pipelines
    pub fn pipeline_count(&self) -> usize {
        self.materials.values().map(|m| m.len()).sum()
    }

    /// Number of pipelines cached for `shader_material`
    pub fn material_pipeline_count(&self, shader_material: ShaderMaterialHandle) -> usize {
        self.materials.get(&shader_material).map_or(0, |m| m.len())
    }

    /// Destroy every cached pipeline (shutdown only)
    pub fn free(&mut self) {
        engine_debug!("nova3d::MaterialPipelineCache", "Freeing {} pipelines", self.pipeline_count());
        self.materials.clear();
    }
}

impl Default for MaterialPipelineCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "pipeline_cache_tests.rs"]
mod tests;
