/// Frame-in-flight ring slots and the engine uniform blocks

use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use std::sync::Arc;
use crate::graphics_device::{BindingGroup, CommandList, ImageLayout};
use crate::render_graph::PhysicalPass;

/// Per-frame buffer holding [`FrameUniforms`] (id = frame block index)
pub const FRAME_UNIFORMS_NAME: &str = "engine_frame";
/// Per-frame buffer holding [`ViewUniforms`] (id = view index)
pub const VIEW_UNIFORMS_NAME: &str = "engine_view";

/// Set 0, binding 0
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct FrameUniforms {
    pub time: f32,
    pub delta_time: f32,
    pub frame_index: u32,
    pub _padding: u32,
}

/// Set 0, binding 1
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ViewUniforms {
    pub projection: Mat4,
    pub view: Mat4,
    pub view_projection: Mat4,
    /// x, y, width, height
    pub viewport: [f32; 4],
}

/// Where the current frame stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    /// No frame open
    Idle,
    /// Image acquired, command list recording
    Acquired { image_index: u32 },
    /// Render queue recorded, swapchain image left in `color_layout`
    Recorded { image_index: u32, color_layout: ImageLayout },
}

/// One slot of the frame ring
///
/// Everything in `in_flight` may still be read by the GPU until the slot's
/// fence has been waited on.
pub(crate) struct FrameSlot {
    pub(crate) commands: Box<dyn CommandList>,
    pub(crate) in_flight: Vec<PhysicalPass>,
    pub(crate) bound_groups: Vec<Arc<dyn BindingGroup>>,
}

impl FrameSlot {
    pub(crate) fn new(commands: Box<dyn CommandList>) -> Self {
        Self {
            commands,
            in_flight: Vec::new(),
            bound_groups: Vec::new(),
        }
    }

    /// Drop the transient objects of the previous use of this slot
    pub(crate) fn recycle(&mut self) {
        self.in_flight.clear();
        self.bound_groups.clear();
    }
}
