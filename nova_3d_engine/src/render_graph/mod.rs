//! Render graph: RenderQueue in, ordered physical passes out

pub mod render_queue;
pub mod logical_pass;
pub mod physical_pass;
pub mod render_graph;

pub use render_queue::{ClearTarget, FrameBlock, GraphicalFrameData, RenderQueue, RenderTask, ViewBlock};
pub use logical_pass::{
    ImageAspect, LogicalImageId, LogicalImageResource, LogicalPass, LogicalPassKind, LogicalRange,
    FINAL_COLOR, FINAL_DEPTH,
};
pub use physical_pass::{
    PhysicalClear, PhysicalPass, PhysicalRenderPass, PipelineBatch, RenderRange,
    DEFAULT_CLEAR_COLOR, DEFAULT_CLEAR_DEPTH,
};
pub use render_graph::{BakeContext, MaterialResolver, PhysicalTargets, RenderGraph, ResolvedMaterial};
