/// Physical passes: logical passes bound to concrete GPU objects

use std::sync::Arc;
use crate::cache::RenderPassCookie;
use crate::graphics_device::{
    ClearValue, Framebuffer, ImageLayout, Pipeline, RenderPass, RenderPassDesc, RenderTarget,
};
use crate::render_graph::GraphicalFrameData;
use crate::renderer::ShaderMaterialHandle;

/// Color used when a pass is the first to touch a color image
pub const DEFAULT_CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];
/// Depth used when a pass is the first to touch a depth image (reverse-Z far plane)
pub const DEFAULT_CLEAR_DEPTH: f32 = 0.0;

/// Consecutive items drawn with one pipeline
#[derive(Clone)]
pub struct PipelineBatch {
    pub first_item: usize,
    pub item_count: usize,
    pub shader_material: ShaderMaterialHandle,
    pub pipeline: Arc<dyn Pipeline>,
}

/// The items of one original render task, split into pipeline batches
///
/// Items skipped during pipeline resolution belong to no batch.
#[derive(Clone)]
pub struct RenderRange {
    pub first_item: usize,
    pub item_count: usize,
    pub batches: Vec<PipelineBatch>,
}

/// An explicit image clear recorded before the render pass
#[derive(Clone)]
pub struct PhysicalClear {
    pub target: Arc<dyn RenderTarget>,
    pub old_layout: ImageLayout,
    pub value: ClearValue,
}

/// The render pass part of a physical pass
#[derive(Clone)]
pub struct PhysicalRenderPass {
    pub desc: RenderPassDesc,
    pub render_pass: Arc<dyn RenderPass>,
    pub cookie: RenderPassCookie,
    pub framebuffer: Arc<dyn Framebuffer>,
    /// One per attachment, colors first
    pub clear_values: Vec<ClearValue>,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone)]
pub struct PhysicalPass {
    /// View of the render queue this pass belongs to
    pub view_index: usize,
    pub clear_colors: Vec<[f32; 4]>,
    pub clear_depths: Vec<(f32, u32)>,
    pub clears: Vec<PhysicalClear>,
    /// `None` for a clear with no following draw pass
    pub render_pass: Option<PhysicalRenderPass>,
    pub items: Vec<GraphicalFrameData>,
    pub ranges: Vec<RenderRange>,
}

impl PhysicalPass {
    /// Number of items that will actually be drawn
    pub fn drawn_item_count(&self) -> usize {
        self.ranges
            .iter()
            .flat_map(|r| r.batches.iter())
            .map(|b| b.item_count)
            .sum()
    }
}
