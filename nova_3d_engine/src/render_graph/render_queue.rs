/// RenderQueue - the per-frame description of what to draw
///
/// Built fresh every frame by the scene layer and only read by the renderer.
/// Views are baked in queue order, and the tasks of a view in list order.

use glam::Mat4;
use crate::graphics_device::Viewport;
use crate::renderer::{MeshHandle, ShaderHandle, ShaderMaterialHandle};

/// Timing of one logical frame context
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameBlock {
    /// Elapsed time in seconds
    pub frame_time: f32,
    /// Time since the previous frame in seconds
    pub delta_time: f32,
}

/// One drawable of a render group
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GraphicalFrameData {
    pub mesh: MeshHandle,
    pub shader: ShaderHandle,
    pub material: ShaderMaterialHandle,
    /// World transform
    pub transform: Mat4,
}

/// Clear of the final color and/or depth target
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearTarget {
    /// RGBA clear color, `None` keeps the color target
    pub color: Option<[f32; 4]>,
    /// Depth and stencil clear values, `None` keeps the depth target
    pub depth: Option<(f32, u32)>,
}

impl ClearTarget {
    /// Clear both color and depth
    pub fn color_and_depth(color: [f32; 4], depth: f32) -> Self {
        Self { color: Some(color), depth: Some((depth, 0)) }
    }
}

/// One step of a view
#[derive(Debug, Clone, PartialEq)]
pub enum RenderTask {
    ClearTarget(ClearTarget),
    /// Ordered draw list
    RenderGroup(Vec<GraphicalFrameData>),
}

/// One camera and its tasks
#[derive(Debug, Clone, PartialEq)]
pub struct ViewBlock {
    pub projection: Mat4,
    pub view: Mat4,
    /// `None` covers the whole target
    pub viewport: Option<Viewport>,
    /// Index of the frame block this view belongs to
    pub frame_block: usize,
    pub tasks: Vec<RenderTask>,
}

impl ViewBlock {
    pub fn new(projection: Mat4, view: Mat4) -> Self {
        Self {
            projection,
            view,
            viewport: None,
            frame_block: 0,
            tasks: Vec::new(),
        }
    }

    pub fn clear(&mut self, clear: ClearTarget) -> &mut Self {
        self.tasks.push(RenderTask::ClearTarget(clear));
        self
    }

    pub fn draw(&mut self, items: Vec<GraphicalFrameData>) -> &mut Self {
        self.tasks.push(RenderTask::RenderGroup(items));
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderQueue {
    pub frame_blocks: Vec<FrameBlock>,
    pub view_blocks: Vec<ViewBlock>,
}

impl RenderQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a frame block and return its index
    pub fn push_frame_block(&mut self, block: FrameBlock) -> usize {
        self.frame_blocks.push(block);
        self.frame_blocks.len() - 1
    }

    /// Append a view and return its index
    pub fn push_view_block(&mut self, view: ViewBlock) -> usize {
        self.view_blocks.push(view);
        self.view_blocks.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.view_blocks.iter().all(|v| v.tasks.is_empty())
    }
}
